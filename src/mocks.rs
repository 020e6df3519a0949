//! Register-level MCP2515 model driven through the `embedded-hal` SPI and pin
//! traits. Every chip-select framed transaction is recorded as the bytes the
//! driver sent.

use std::{cell::RefCell, convert::Infallible, rc::Rc, vec::Vec};

use embedded_hal::{
    blocking::{delay::DelayMs, spi::Transfer},
    digital::v2::OutputPin,
};
use void::Void;

use crate::{
    buffer::{RxBuf, TxBuf, BUFFER_LEN},
    regs::Register,
};

const TXREQ: u8 = 0b0000_1000;

#[derive(Debug)]
pub struct Chip {
    pub regs: [u8; 128],
    /// Ignore `REQOP` requests, like a chip that never changes mode.
    pub frozen_mode: bool,
    /// Drop writes to this register, like a chip that isn't listening.
    pub ignore_writes_to: Option<Register>,
    pub transactions: Vec<Vec<u8>>,
    selected: bool,
    current: Vec<u8>,
}

impl Chip {
    fn new() -> Self {
        let mut chip = Self {
            regs: [0; 128],
            frozen_mode: false,
            ignore_writes_to: None,
            transactions: Vec::new(),
            selected: false,
            current: Vec::new(),
        };
        chip.reset();
        chip
    }

    fn reset(&mut self) {
        self.regs = [0; 128];
        self.regs[Register::CANCTRL as usize] = 0x87;
        self.regs[Register::CANSTAT as usize] = 0x80;
    }

    pub fn reg(&self, reg: Register) -> u8 {
        self.regs[reg as usize]
    }

    /// Places a received frame (header + 8 data bytes) into an Rx buffer.
    pub fn receive(&mut self, buf: RxBuf, bytes: &[u8; BUFFER_LEN]) {
        let base = Self::rx_base(buf);
        self.regs[base..base + BUFFER_LEN].copy_from_slice(bytes);
        self.regs[Register::CANINTF as usize] |= 1 << buf.index();
    }

    /// Header + data bytes of a Tx buffer.
    pub fn tx_buffer(&self, buf: TxBuf) -> [u8; BUFFER_LEN] {
        let base = Self::tx_base(buf);
        let mut out = [0; BUFFER_LEN];
        out.copy_from_slice(&self.regs[base..base + BUFFER_LEN]);
        out
    }

    pub fn tx_pending(&self, buf: TxBuf) -> bool {
        self.regs[Self::tx_base(buf) - 1] & TXREQ != 0
    }

    pub fn set_tx_pending(&mut self, buf: TxBuf, pending: bool) {
        let ctrl = &mut self.regs[Self::tx_base(buf) - 1];
        if pending {
            *ctrl |= TXREQ;
        } else {
            *ctrl &= !TXREQ;
        }
    }

    fn tx_base(buf: TxBuf) -> usize {
        0x31 + 0x10 * buf.index() as usize
    }

    fn rx_base(buf: RxBuf) -> usize {
        0x61 + 0x10 * buf.index() as usize
    }

    fn loopback(&self) -> bool {
        self.reg(Register::CANSTAT) >> 5 == 0b010
    }

    fn sync_mode(&mut self) {
        if !self.frozen_mode {
            let reqop = self.reg(Register::CANCTRL) & 0xE0;
            let stat = &mut self.regs[Register::CANSTAT as usize];
            *stat = *stat & 0x1F | reqop;
        }
    }

    fn write(&mut self, addr: usize, value: u8) {
        if self.ignore_writes_to.map(|r| r as usize) == Some(addr) {
            return;
        }
        self.regs[addr] = value;
        if addr == Register::CANCTRL as usize {
            self.sync_mode();
        }
    }

    fn select(&mut self) {
        assert!(!self.selected, "chip select asserted twice");
        self.selected = true;
        self.current.clear();
    }

    fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        match self.current.first().copied() {
            // Reading an Rx buffer clears its interrupt flag on deselect.
            Some(0x90) if self.current.len() > 1 => self.regs[Register::CANINTF as usize] &= !0b01,
            Some(0x94) if self.current.len() > 1 => self.regs[Register::CANINTF as usize] &= !0b10,
            _ => {}
        }
        self.transactions.push(core::mem::take(&mut self.current));
    }

    fn request_to_send(&mut self, flags: u8) {
        for buf in TxBuf::ALL.iter().copied() {
            if flags & (1 << buf.index()) == 0 {
                continue;
            }
            if self.loopback() {
                let frame = self.tx_buffer(buf);
                let intf = self.reg(Register::CANINTF);
                let rx = if intf & 0b01 == 0 { RxBuf::B0 } else { RxBuf::B1 };
                self.receive(rx, &frame);
                self.regs[Register::CANINTF as usize] |= 0b100 << buf.index();
            } else {
                self.set_tx_pending(buf, true);
            }
        }
    }

    fn read_status(&self) -> u8 {
        let intf = self.reg(Register::CANINTF);
        let mut status = intf & 0b11;
        for buf in TxBuf::ALL.iter().copied() {
            let n = buf.index();
            if self.tx_pending(buf) {
                status |= 1 << (2 + 2 * n);
            }
            if intf & (0b100 << n) != 0 {
                status |= 1 << (3 + 2 * n);
            }
        }
        status
    }

    fn rx_status(&self) -> u8 {
        (self.reg(Register::CANINTF) & 0b11) << 6
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        let pos = self.current.len();
        self.current.push(byte);
        let cmd = self.current[0];
        match cmd {
            0xC0 if pos == 0 => {
                self.reset();
                0
            }
            0x03 if pos >= 2 => self.regs[(self.current[1] as usize + pos - 2) & 0x7F],
            0x02 if pos >= 2 => {
                let addr = (self.current[1] as usize + pos - 2) & 0x7F;
                self.write(addr, byte);
                0
            }
            0x05 if pos == 3 => {
                let addr = self.current[1] as usize & 0x7F;
                let mask = self.current[2];
                let value = self.regs[addr] & !mask | byte & mask;
                self.write(addr, value);
                0
            }
            0xA0 if pos >= 1 => self.read_status(),
            0xB0 if pos >= 1 => self.rx_status(),
            0x90 | 0x94 if pos >= 1 => {
                let buf = if cmd == 0x90 { RxBuf::B0 } else { RxBuf::B1 };
                self.regs[(Self::rx_base(buf) + pos - 1) & 0x7F]
            }
            0x40 | 0x42 | 0x44 if pos >= 1 => {
                let buf = TxBuf::ALL[((cmd - 0x40) >> 1) as usize];
                let addr = (Self::tx_base(buf) + pos - 1) & 0x7F;
                self.regs[addr] = byte;
                0
            }
            0x80..=0x87 if pos == 0 => {
                self.request_to_send(cmd & 0x07);
                0
            }
            _ => 0,
        }
    }
}

pub type Shared = Rc<RefCell<Chip>>;

pub struct FakeSpi(Shared);

impl Transfer<u8> for FakeSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut chip = self.0.borrow_mut();
        assert!(chip.selected, "SPI transfer without chip select");
        for word in words.iter_mut() {
            *word = chip.exchange(*word);
        }
        Ok(words)
    }
}

pub struct FakeCs(Shared);

impl OutputPin for FakeCs {
    type Error = Void;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDelay {
    pub elapsed_ms: u32,
}

impl DelayMs<u8> for FakeDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.elapsed_ms += ms as u32;
    }
}

/// A fresh chip in its post-reset state.
pub fn chip() -> (FakeSpi, FakeCs, Shared) {
    let chip = Rc::new(RefCell::new(Chip::new()));
    (FakeSpi(chip.clone()), FakeCs(chip.clone()), chip)
}
