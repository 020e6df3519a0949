#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod error;
pub mod frame;
pub(crate) mod macros;
#[cfg(test)]
pub(crate) mod mocks;
pub mod regs;
pub mod stat;

use core::{convert::TryFrom, fmt::Debug};

use buffer::{RxBuf, TxBuf, TxRequest, BUFFER_LEN};
use embedded_hal::{
    blocking::{can::Can, delay::DelayMs, spi::Transfer},
    can::nb::Can as NbCan,
    digital::v2::OutputPin,
};
use frame::CanFrame;
use regs::{OpMode, Register};
use stat::{RxStatus, Status};

use crate::{
    error::{Error, Result, UnsupportedBitrate},
    macros::{debug, trace},
    regs::{BfpCtrl, CanCtrl, CanInte, CanIntf, CanStat, TxRtsCtrl},
};

/// Number of `REQOP` write and `OPMOD` read-back rounds before a mode change
/// is reported as timed out.
const MODE_CHANGE_ATTEMPTS: usize = 20;

/// Time the MCP2515 needs after a reset before it accepts commands.
const RESET_DELAY_MS: u8 = 10;

/// Fixed instruction bytes. Instructions addressing a buffer are built by
/// [`TxBuf`], [`RxBuf`] and [`TxRequest`].
#[repr(u8)]
enum Instruction {
    Write = 0x2,
    Read = 0x3,
    Bitmod = 0x5,
    ReadStatus = 0xA0,
    RxStatus = 0xB0,
    Reset = 0xC0,
}

/// Speed the CAN bus is operating at.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub enum CanSpeed {
    Kbps10,
    Kbps20,
    Kbps50,
    Kbps100,
    Kbps250,
    Kbps500,
    Kbps1000,
}

impl CanSpeed {
    /// All supported bus speeds.
    pub const ALL: [Self; 7] = [
        CanSpeed::Kbps10,
        CanSpeed::Kbps20,
        CanSpeed::Kbps50,
        CanSpeed::Kbps100,
        CanSpeed::Kbps250,
        CanSpeed::Kbps500,
        CanSpeed::Kbps1000,
    ];

    /// Bit rate in bits per second.
    pub const fn bps(self) -> u32 {
        match self {
            CanSpeed::Kbps10 => 10_000,
            CanSpeed::Kbps20 => 20_000,
            CanSpeed::Kbps50 => 50_000,
            CanSpeed::Kbps100 => 100_000,
            CanSpeed::Kbps250 => 250_000,
            CanSpeed::Kbps500 => 500_000,
            CanSpeed::Kbps1000 => 1_000_000,
        }
    }
}

impl TryFrom<u32> for CanSpeed {
    type Error = UnsupportedBitrate;

    fn try_from(bps: u32) -> core::result::Result<Self, Self::Error> {
        CanSpeed::ALL
            .iter()
            .copied()
            .find(|speed| speed.bps() == bps)
            .ok_or(UnsupportedBitrate(bps))
    }
}

/// Speed the MCP2515 is operating at. Should match the crystal frequency
/// onboard.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub enum McpSpeed {
    MHz8,
    MHz16,
}

/// `CNF1`, `CNF2` and `CNF3` contents for a bus speed and oscillator.
pub const fn bit_timing(can_speed: CanSpeed, mcp_speed: McpSpeed) -> (u8, u8, u8) {
    match (mcp_speed, can_speed) {
        (McpSpeed::MHz8, CanSpeed::Kbps10) => (0x93, 0xF6, 0x84),
        (McpSpeed::MHz8, CanSpeed::Kbps20) => (0x89, 0xF6, 0x84),
        (McpSpeed::MHz8, CanSpeed::Kbps50) => (0x84, 0xE5, 0x83),
        (McpSpeed::MHz8, CanSpeed::Kbps100) => (0x81, 0xF6, 0x84),
        (McpSpeed::MHz8, CanSpeed::Kbps250) => (0x80, 0xE5, 0x83),
        (McpSpeed::MHz8, CanSpeed::Kbps500) => (0x00, 0xD1, 0x81),
        (McpSpeed::MHz8, CanSpeed::Kbps1000) => (0x00, 0xC0, 0x80),
        // 16 MHz: 20 TQ per bit up to 100 kbit/s, 16 TQ at 250/500 kbit/s,
        // 8 TQ at 1 Mbit/s.
        (McpSpeed::MHz16, CanSpeed::Kbps10) => (0xE7, 0xB6, 0x04),
        (McpSpeed::MHz16, CanSpeed::Kbps20) => (0xD3, 0xB6, 0x04),
        (McpSpeed::MHz16, CanSpeed::Kbps50) => (0xC7, 0xB6, 0x04),
        (McpSpeed::MHz16, CanSpeed::Kbps100) => (0xC3, 0xB6, 0x04),
        (McpSpeed::MHz16, CanSpeed::Kbps250) => (0x81, 0xAC, 0x03),
        (McpSpeed::MHz16, CanSpeed::Kbps500) => (0x80, 0xAC, 0x03),
        (McpSpeed::MHz16, CanSpeed::Kbps1000) => (0x00, 0xCA, 0x81),
    }
}

/// Settings used to initialize the MCP2515.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub struct Settings {
    /// Device operation mode once initialized.
    pub mode: OpMode,
    /// Device CAN speed.
    pub can_speed: CanSpeed,
    /// Device oscillator speed. Should match the clock speed of the oscillator
    /// attached to the MCP2515.
    pub mcp_speed: McpSpeed,
    /// Whether to enable the CLKOUT pin.
    pub clkout_en: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: OpMode::ListenOnly,
            can_speed: CanSpeed::Kbps100,
            mcp_speed: McpSpeed::MHz16,
            clkout_en: false,
        }
    }
}

/// MCP2515 driver.
///
/// Every command is one chip-select framed SPI transaction, and every method
/// takes `&mut self`, so a driver shared between execution contexts has to be
/// put behind a mutex.
pub struct MCP2515<SPI, CS> {
    /// SPI interface to interact with the MCP2515.
    spi: SPI,
    /// Chip select pin to select the MCP2515.
    cs: CS,
    /// Rx buffer drained most recently.
    last_rx: RxBuf,
}

impl<SPI, CS, SPIE, CSE> MCP2515<SPI, CS>
where
    SPI: Transfer<u8, Error = SPIE>,
    CS: OutputPin<Error = CSE>,
    SPIE: Debug,
    CSE: Debug,
{
    /// Creates a new MCP2515 driver. Call [`init`](Self::init) before using it.
    ///
    /// # Configuration
    ///
    /// As this driver only takes ownership of the SPI interface, it is up to
    /// the user to create and configure the SPI interface. Namely, the MCP2515
    /// requires the following options:
    ///
    /// * **Data Order**: MSB first.
    /// * **Clock**: Check with your MCP2515 clock. Most breakout boards have an
    ///   8 MHz or 16 MHz oscillator on board. Half of the system clock rate is
    ///   good.
    /// * **Mode**: Mode 0.
    ///
    /// # Parameters
    ///
    /// * `spi` - SPI interface.
    /// * `cs` - Chip-select pin for the MCP2515.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self {
            spi,
            cs,
            last_rx: RxBuf::B1,
        }
    }

    /// Sets which Rx buffer counts as drained most recently. The other one is
    /// read first when both hold a message.
    pub fn with_last_rx(mut self, buf: RxBuf) -> Self {
        self.last_rx = buf;
        self
    }

    /// Rx buffer drained most recently.
    pub fn last_rx(&self) -> RxBuf {
        self.last_rx
    }

    /// Releases the SPI interface and chip-select pin.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Initializes the MCP2515 driver. This should be called once at the start
    /// of the program.
    ///
    /// Interrupts, the `RXnBF` pins and the `TXnRTS` pins are all disabled.
    /// Filters and masks keep their reset values, which accept every frame.
    ///
    /// # Parameters
    ///
    /// * `delay` - Delay interface from downstream HAL.
    /// * `settings` - Settings for MCP2515. See [`Settings`].
    ///
    /// # Returns
    ///
    /// [`Error::RegisterMismatch`] if the bit timing registers don't read back
    /// as written. The device is unusable and should be reset again.
    pub fn init(
        &mut self,
        delay: &mut impl DelayMs<u8>,
        settings: Settings,
    ) -> Result<(), SPIE, CSE> {
        self.cs.set_high().map_err(Error::Hal)?;
        self.reset(delay)?;

        // The device comes out of reset in configuration mode.
        self.set_mode(OpMode::Configuration)?;
        self.set_bitrate(settings.can_speed, settings.mcp_speed, settings.clkout_en)?;

        self.write_register(CanInte::new())?;
        self.write_register(BfpCtrl::new())?;
        self.write_register(TxRtsCtrl::new())?;
        self.set_clken(settings.clkout_en)?;

        trace!("mcp2515 configured, switching to {}", settings.mode);
        self.set_mode(settings.mode)
    }

    /// Configures the MCP2515 to operate at a certain CAN bitrate, then reads
    /// the timing registers back to check the device is responding.
    ///
    /// # Parameters
    ///
    /// * `can_speed` - CAN speed to operate at.
    /// * `mcp_speed` - Clock speed of the MCP2515.
    /// * `clkout_en` - Whether to enable the `CLKOUT` pin.
    pub fn set_bitrate(
        &mut self,
        can_speed: CanSpeed,
        mcp_speed: McpSpeed,
        clkout_en: bool,
    ) -> Result<(), SPIE, CSE> {
        let (cnf1, cnf2, mut cnf3) = bit_timing(can_speed, mcp_speed);
        if clkout_en {
            // SOF shares the CLKOUT pin.
            cnf3 &= !0x80;
        }

        let writes = [
            (Register::CNF3, cnf3),
            (Register::CNF2, cnf2),
            (Register::CNF1, cnf1),
        ];
        for &(register, value) in writes.iter() {
            self.write_byte(register, value)?;
        }
        for &(register, written) in writes.iter() {
            let read = self.read_byte(register)?;
            if read != written {
                debug!(
                    "{} reads back {=u8:#x}, wrote {=u8:#x}",
                    register, read, written
                );
                return Err(Error::RegisterMismatch {
                    register,
                    written,
                    read,
                });
            }
        }
        Ok(())
    }

    /// Reads the current operation mode from `CANSTAT`.
    pub fn mode(&mut self) -> Result<OpMode, SPIE, CSE> {
        let status: CanStat = self.read_register()?;
        status
            .opmod_or_err()
            .map_err(|_| Error::InvalidMode(status.opmod_bits()))
    }

    /// Set the operation mode of the device.
    ///
    /// This will wake the device if necessary. Nothing is written if the
    /// device already reports `mode`.
    ///
    /// # Parameters
    ///
    /// * `mode` - New device mode.
    ///
    /// # Returns
    ///
    /// Nothing on success, error if waking the device or setting the new mode
    /// fails.
    pub fn set_mode(&mut self, mode: OpMode) -> Result<(), SPIE, CSE> {
        let current = self.mode()?;
        if current == mode {
            return Ok(());
        }

        // If the device is currently in sleep mode, we need to wake it
        if current == OpMode::Sleep {
            // Ensure wake interrupt is enabled
            let caninte: CanInte = self.read_register()?;
            let int_enabled = caninte.wakie();
            if !int_enabled {
                let data = CanInte::new().with_wakie(true);
                self.modify_register(data, data)?;
            }

            // Actually wake the device
            let data = CanIntf::new().with_wakif(true);
            self.modify_register(data, CanIntf::MASK_WAKIF)?;

            // Change the device into listen only mode.
            self.set_mode_no_wake(OpMode::ListenOnly)?;

            // Disable the interrupt if it was originally disabled
            if !int_enabled {
                self.modify_register(CanInte::new().with_wakie(false), CanInte::MASK_WAKIE)?;
            }
        }

        // Clear wake flag and actually set the new mode
        self.modify_register(CanIntf::new().with_wakif(false), CanIntf::MASK_WAKIF)?;
        self.set_mode_no_wake(mode)
    }

    /// Attempts to set the operation mode without waking the device.
    ///
    /// The request is repeated until `CANSTAT` reports the new mode, at most
    /// [`MODE_CHANGE_ATTEMPTS`] times.
    fn set_mode_no_wake(&mut self, mode: OpMode) -> Result<(), SPIE, CSE> {
        for _ in 0..MODE_CHANGE_ATTEMPTS {
            self.modify_register(CanCtrl::new().with_reqop(mode), CanCtrl::MASK_REQOP)?;
            let canstat: CanStat = self.read_register()?;
            if canstat.opmod_or_err().ok() == Some(mode) {
                trace!("mode is now {}", mode);
                return Ok(());
            }
        }

        debug!("mcp2515 did not enter {}", mode);
        Err(Error::NewModeTimeout)
    }

    /// Enables/disables the `CLKOUT` pin on the MCP2515.
    fn set_clken(&mut self, clken: bool) -> Result<(), SPIE, CSE> {
        self.modify_register(CanCtrl::new().with_clken(clken), CanCtrl::MASK_CLKEN)
    }

    /// Loads `frame` into the highest numbered free Tx buffer and requests its
    /// transmission.
    ///
    /// Frames are only sent in the order they were queued if each one has
    /// left the device before the next is queued; see
    /// [`TxBuf::select_free`].
    ///
    /// # Returns
    ///
    /// The buffer used, or [`nb::Error::WouldBlock`] if all three buffers are
    /// pending. Only `READ STATUS` is issued in that case.
    pub fn try_send(&mut self, frame: &CanFrame) -> nb::Result<TxBuf, Error<SPIE, CSE>> {
        let status = self.read_status()?;
        let buf = match TxBuf::select_free(status) {
            Some(buf) => buf,
            None => return Err(nb::Error::WouldBlock),
        };
        self.load_tx_buffer(buf, frame)?;
        self.request_to_send(buf.request())?;
        trace!("queued {} in {}", frame, buf);
        Ok(buf)
    }

    /// Busy-polls [`try_send`](Self::try_send) until a Tx buffer is free.
    pub fn send_blocking(&mut self, frame: &CanFrame) -> Result<TxBuf, SPIE, CSE> {
        nb::block!(self.try_send(frame))
    }

    /// Reads a frame from one of the Rx buffers. When both hold a message, the
    /// buffer not drained last time is read.
    ///
    /// # Returns
    ///
    /// The frame, or [`nb::Error::WouldBlock`] if both buffers are empty. Only
    /// `RX STATUS` is issued in that case.
    pub fn try_receive(&mut self) -> nb::Result<CanFrame, Error<SPIE, CSE>> {
        let status = self.rx_status()?;
        let buf = match RxBuf::select(status, self.last_rx) {
            Some(buf) => buf,
            None => return Err(nb::Error::WouldBlock),
        };
        let frame = self.read_rx_buffer(buf)?;
        self.last_rx = buf;
        trace!("received {} from {}", frame, buf);
        Ok(frame)
    }

    /// Busy-polls [`try_receive`](Self::try_receive) until a frame arrives.
    pub fn receive_blocking(&mut self) -> Result<CanFrame, SPIE, CSE> {
        nb::block!(self.try_receive())
    }

    /// Resets the MCP2515 and waits for it to come back up in configuration
    /// mode.
    pub fn reset(&mut self, delay: &mut impl DelayMs<u8>) -> Result<(), SPIE, CSE> {
        self.transfer(&mut [Instruction::Reset as u8])?;
        delay.delay_ms(RESET_DELAY_MS);

        Ok(())
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<Status, SPIE, CSE> {
        let mut data = [Instruction::ReadStatus as u8, 0];
        self.transfer(&mut data)
            .map(|b| [b])
            .map(Status::from_bytes)
    }

    /// Reads which Rx buffers hold a message.
    pub fn rx_status(&mut self) -> Result<RxStatus, SPIE, CSE> {
        let mut data = [Instruction::RxStatus as u8, 0];
        self.transfer(&mut data)
            .map(|b| [b])
            .map(RxStatus::from_bytes)
    }

    /// Flags Tx buffers for transmission.
    ///
    /// # Panics
    ///
    /// If `buffers` is empty.
    pub fn request_to_send(&mut self, buffers: TxRequest) -> Result<(), SPIE, CSE> {
        assert!(!buffers.is_empty(), "request-to-send without a buffer");
        self.transfer(&mut [buffers.instruction()])?;
        Ok(())
    }

    /// Writes the identifier, DLC and `dlc` data bytes of `frame` into a Tx
    /// buffer in a single transaction.
    pub fn load_tx_buffer(&mut self, buf: TxBuf, frame: &CanFrame) -> Result<(), SPIE, CSE> {
        let (encoded, len) = buffer::encode_frame(frame);
        let mut data = [0u8; 1 + BUFFER_LEN];
        data[0] = buf.load_instruction();
        data[1..=len].copy_from_slice(&encoded[..len]);
        self.transfer(&mut data[..=len])?;
        Ok(())
    }

    /// Reads a frame out of an Rx buffer in a single transaction. The device
    /// clears the buffer's interrupt flag when the transaction ends.
    pub fn read_rx_buffer(&mut self, buf: RxBuf) -> Result<CanFrame, SPIE, CSE> {
        let mut data = [0u8; 1 + BUFFER_LEN];
        data[0] = buf.read_instruction();
        self.transfer(&mut data)?;

        let mut raw = [0u8; BUFFER_LEN];
        raw.copy_from_slice(&data[1..]);
        Ok(buffer::decode_frame(&raw))
    }

    /// Read a register via a register object.
    #[inline]
    pub fn read_register<const N: usize, R: regs::Reg<N>>(&mut self) -> Result<R, SPIE, CSE> {
        let mut ret = [0u8; N];
        for (reg, byte) in R::ADDRESSES.iter().zip(ret.iter_mut()) {
            *byte = self.read_byte(*reg)?;
        }
        Ok(R::read(ret))
    }

    /// Write to a register using a register object.
    #[inline]
    pub fn write_register<const N: usize, R: regs::Reg<N>>(
        &mut self,
        reg: R,
    ) -> Result<(), SPIE, CSE> {
        for (addr, byte) in R::ADDRESSES.iter().zip(reg.write().iter()) {
            self.write_byte(*addr, *byte)?;
        }
        Ok(())
    }

    /// Modifies a register.
    ///
    /// # Parameters
    ///
    /// * `reg` - New register content.
    /// * `mask` - Mask register. The bits must be 1 in the positions you want
    ///   to modify.
    #[inline]
    pub fn modify_register<const N: usize, R: regs::BitModifiable<N>>(
        &mut self,
        reg: R,
        mask: R,
    ) -> Result<(), SPIE, CSE> {
        let data = reg.write();
        let masks = mask.write();
        for i in 0..N {
            self.bit_modify(R::ADDRESSES[i], masks[i], data[i])?;
        }
        Ok(())
    }

    /// Reads a single register.
    pub fn read_byte(&mut self, reg: Register) -> Result<u8, SPIE, CSE> {
        self.transfer(&mut [Instruction::Read as u8, reg as u8, 0])
    }

    /// Writes a single register.
    pub fn write_byte(&mut self, reg: Register, data: u8) -> Result<(), SPIE, CSE> {
        self.transfer(&mut [Instruction::Write as u8, reg as u8, data])?;
        Ok(())
    }

    /// Changes the bits of `reg` that are set in `mask` to those of `data`.
    /// The device applies the mask itself.
    pub fn bit_modify(&mut self, reg: Register, mask: u8, data: u8) -> Result<(), SPIE, CSE> {
        self.transfer(&mut [
            Instruction::Bitmod as u8, // BIT MODIFY
            reg as u8,                 // Register address
            mask,                      // Modify mask byte
            data,                      // Data byte
        ])?;
        Ok(())
    }

    /// Transfers an array of bytes via SPI, returning the slave response inside
    /// the given mutable bytes array.
    ///
    /// # Parameters
    ///
    /// * `bytes` - Bytes to transfer. Also used to return the data the slave
    ///   has sent.
    ///
    /// # Returns
    ///
    /// Returns the last element received from the slave. If no bytes were sent,
    /// 0 is returned.
    fn transfer(&mut self, bytes: &mut [u8]) -> Result<u8, SPIE, CSE> {
        self.with_cs(|spi| spi.transfer(bytes).map(|_| ()))?
            .map_err(Error::Spi)?;
        if let [.., data] = bytes {
            Ok(*data)
        } else {
            Ok(0)
        }
    }

    /// Calls a function `f` after bringing the chip select pin low, restoring
    /// it to high after the function has finished.
    fn with_cs<T>(&mut self, f: impl FnOnce(&mut SPI) -> T) -> Result<T, SPIE, CSE> {
        self.cs.set_low().map_err(Error::Hal)?;
        let result = f(&mut self.spi);
        self.cs.set_high().map_err(Error::Hal)?;
        Ok(result)
    }
}

impl<SPI, CS, SPIE, CSE> Can for MCP2515<SPI, CS>
where
    SPI: Transfer<u8, Error = SPIE>,
    CS: OutputPin<Error = CSE>,
    SPIE: Debug,
    CSE: Debug,
{
    type Frame = CanFrame;
    type Error = Error<SPIE, CSE>;

    #[inline]
    fn transmit(&mut self, frame: &Self::Frame) -> Result<(), SPIE, CSE> {
        self.send_blocking(frame).map(|_| ())
    }

    #[inline]
    fn receive(&mut self) -> Result<Self::Frame, SPIE, CSE> {
        self.receive_blocking()
    }
}

impl<SPI, CS, SPIE, CSE> NbCan for MCP2515<SPI, CS>
where
    SPI: Transfer<u8, Error = SPIE>,
    CS: OutputPin<Error = CSE>,
    SPIE: Debug,
    CSE: Debug,
{
    type Frame = CanFrame;
    type Error = Error<SPIE, CSE>;

    /// Never replaces a pending frame: a full set of Tx buffers is reported as
    /// [`nb::Error::WouldBlock`].
    #[inline]
    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        self.try_send(frame).map(|_| None)
    }

    #[inline]
    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        self.try_receive()
    }
}
