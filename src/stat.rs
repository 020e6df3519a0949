//! Responses to the `READ STATUS` and `RX STATUS` instructions.

use modular_bitfield::prelude::*;

/// Response to the `READ STATUS` instruction.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    #[skip(setters)]
    pub rx0if: bool,
    #[skip(setters)]
    pub rx1if: bool,
    /// Tx buffer 0 is pending transmission.
    #[skip(setters)]
    pub tx0req: bool,
    #[skip(setters)]
    pub tx0if: bool,
    /// Tx buffer 1 is pending transmission.
    #[skip(setters)]
    pub tx1req: bool,
    #[skip(setters)]
    pub tx1if: bool,
    /// Tx buffer 2 is pending transmission.
    #[skip(setters)]
    pub tx2req: bool,
    #[skip(setters)]
    pub tx2if: bool,
}

/// Response to the `RX STATUS` instruction.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStatus {
    /// Filter which accepted the most recent message.
    #[skip(setters)]
    pub filter: FilterMatch,
    /// Kind of the most recent message.
    #[skip(setters)]
    pub kind: MessageKind,
    #[skip]
    __: B1,
    /// Rx buffer 0 holds a message.
    #[skip(setters)]
    pub rxb0: bool,
    /// Rx buffer 1 holds a message.
    #[skip(setters)]
    pub rxb1: bool,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[bits = 3]
pub enum FilterMatch {
    Rxf0,
    Rxf1,
    Rxf2,
    Rxf3,
    Rxf4,
    Rxf5,
    /// RXF0, rolled over into Rx buffer 1.
    Rxf0Rollover,
    /// RXF1, rolled over into Rx buffer 1.
    Rxf1Rollover,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[bits = 2]
pub enum MessageKind {
    StandardData,
    StandardRemote,
    ExtendedData,
    ExtendedRemote,
}
