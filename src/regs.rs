//! MCP2515 registers.

use modular_bitfield::prelude::*;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    BFPCTRL = 0x0C,
    TXRTSCTRL = 0x0D,
    CANSTAT = 0x0E,
    CANCTRL = 0x0F,
    CNF3 = 0x28,
    CNF2 = 0x29,
    CNF1 = 0x2A,
    CANINTE = 0x2B,
    CANINTF = 0x2C,
}

pub trait Reg<const BYTES: usize>: Copy {
    /// List of addresses related to this register (or register set). LSB to
    /// MSB.
    const ADDRESSES: [Register; BYTES];

    /// Read the register into itself from a list of bytes.
    fn read(content: [u8; BYTES]) -> Self;

    /// Write the register to a list of bytes.
    fn write(self) -> [u8; BYTES];
}

/// Marker trait implemented on registers which are modifiable.
pub trait BitModifiable<const BYTES: usize>: Reg<BYTES> {}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanCtrl {
    /// CLKOUT Prescaler
    pub clkpre: ClkPre,
    /// CLKOUT Enable
    pub clken: bool,
    /// One-shot Mode
    pub osm: bool,
    /// Abort All Pending Transmission
    pub abat: bool,
    /// Request Operation Mode
    pub reqop: OpMode,
}

impl CanCtrl {
    /// Mask to modify the `reqop` bits.
    pub const MASK_REQOP: Self = Self::from_bytes([0b1110_0000]);
    /// Mask to modify the `clken` bit.
    pub const MASK_CLKEN: Self = Self::from_bytes([0b0000_0100]);
}

impl BitModifiable<1> for CanCtrl {}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanStat {
    #[skip]
    __: B1,
    #[skip(setters)]
    pub icod: IntFlagCode,
    #[skip]
    __: B1,
    #[skip(setters)]
    pub opmod: OpMode,
}

impl CanStat {
    /// Raw `OPMOD` bits, for reporting encodings without an [`OpMode`].
    pub fn opmod_bits(self) -> u8 {
        self.into_bytes()[0] >> 5
    }
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanIntf {
    pub rx0if: bool,
    pub rx1if: bool,
    pub tx0if: bool,
    pub tx1if: bool,
    pub tx2if: bool,
    pub errif: bool,
    pub wakif: bool,
    pub merrf: bool,
}

impl CanIntf {
    pub const MASK_WAKIF: Self = Self::from_bytes([0b0100_0000]);
}

impl BitModifiable<1> for CanIntf {}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanInte {
    pub rx0ie: bool,
    pub rx1ie: bool,
    pub tx0ie: bool,
    pub tx1ie: bool,
    pub tx2ie: bool,
    pub errie: bool,
    pub wakie: bool,
    pub merre: bool,
}

impl CanInte {
    pub const MASK_WAKIE: Self = Self::from_bytes([0b0100_0000]);
}

impl BitModifiable<1> for CanInte {}

/// `RXnBF` pin control.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BfpCtrl {
    pub b0bfm: bool,
    pub b1bfm: bool,
    pub b0bfe: bool,
    pub b1bfe: bool,
    pub b0bfs: bool,
    pub b1bfs: bool,
    #[skip]
    __: B2,
}

/// `TXnRTS` pin control.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxRtsCtrl {
    pub b0rtsm: bool,
    pub b1rtsm: bool,
    pub b2rtsm: bool,
    #[skip(setters)]
    pub b0rts: bool,
    #[skip(setters)]
    pub b1rts: bool,
    #[skip(setters)]
    pub b2rts: bool,
    #[skip]
    __: B2,
}

// Enums

/// Device operation mode, as requested in `CANCTRL` and reported in
/// `CANSTAT`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
#[bits = 3]
pub enum OpMode {
    Normal,
    Sleep,
    Loopback,
    ListenOnly,
    Configuration,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[bits = 2]
pub enum ClkPre {
    Div1,
    Div2,
    Div4,
    Div8,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[bits = 3]
pub enum IntFlagCode {
    None,
    Error,
    WakeUp,
    TXB0,
    TXB1,
    TXB2,
    RXB0,
    RXB1,
}

macro_rules! reg {
    ($($s:ty => $reg:expr),*) => {
        $(
            impl Reg<1> for $s {
                const ADDRESSES: [Register; 1] = [$reg];

                #[inline]
                fn read(content: [u8; 1]) -> Self {
                    Self::from_bytes(content)
                }

                #[inline]
                fn write(self) -> [u8; 1] {
                    self.into_bytes()
                }
            }
        )*
    };
}

reg! {
    CanCtrl => Register::CANCTRL,
    CanStat => Register::CANSTAT,
    CanIntf => Register::CANINTF,
    CanInte => Register::CANINTE,
    BfpCtrl => Register::BFPCTRL,
    TxRtsCtrl => Register::TXRTSCTRL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reqop_occupies_top_bits() {
        let cases = [
            (OpMode::Normal, 0b000),
            (OpMode::Sleep, 0b001),
            (OpMode::Loopback, 0b010),
            (OpMode::ListenOnly, 0b011),
            (OpMode::Configuration, 0b100),
        ];
        for (mode, bits) in cases.iter() {
            let ctrl = CanCtrl::new().with_reqop(*mode);
            assert_eq!(ctrl.into_bytes()[0], bits << 5);

            let stat = CanStat::from_bytes([bits << 5]);
            assert_eq!(stat.opmod_or_err().ok(), Some(*mode));
        }
    }

    #[test]
    fn register_addresses() {
        let cases = [
            (Register::BFPCTRL, 0x0C),
            (Register::TXRTSCTRL, 0x0D),
            (Register::CANSTAT, 0x0E),
            (Register::CANCTRL, 0x0F),
            (Register::CNF3, 0x28),
            (Register::CNF2, 0x29),
            (Register::CNF1, 0x2A),
            (Register::CANINTE, 0x2B),
            (Register::CANINTF, 0x2C),
        ];
        for (reg, addr) in cases.iter() {
            assert_eq!(*reg as u8, *addr);
        }
        assert_eq!(<CanCtrl as Reg<1>>::ADDRESSES, [Register::CANCTRL]);
        assert_eq!(<CanStat as Reg<1>>::ADDRESSES, [Register::CANSTAT]);
        assert_eq!(<CanIntf as Reg<1>>::ADDRESSES, [Register::CANINTF]);
        assert_eq!(<CanInte as Reg<1>>::ADDRESSES, [Register::CANINTE]);
        assert_eq!(<BfpCtrl as Reg<1>>::ADDRESSES, [Register::BFPCTRL]);
        assert_eq!(<TxRtsCtrl as Reg<1>>::ADDRESSES, [Register::TXRTSCTRL]);
    }

    #[test]
    fn reserved_opmod_is_error() {
        let stat = CanStat::from_bytes([0b1110_0000]);
        assert!(stat.opmod_or_err().is_err());
        assert_eq!(stat.opmod_bits(), 0b111);
    }
}
