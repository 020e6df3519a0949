use core::fmt::Debug;

use embedded_hal::can::{Error as CanError, ErrorKind};

use crate::regs::Register;

pub type Result<T, SPIE, CSE> = core::result::Result<T, Error<SPIE, CSE>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<SPIE, CSE> {
    /// MCP2515 did not report the requested operation mode in time.
    NewModeTimeout,
    /// `CANSTAT` reported a reserved operation mode encoding.
    InvalidMode(u8),
    /// A register written during initialization did not read back the same.
    /// The device is not usable until it is reset and initialized again.
    RegisterMismatch {
        register: Register,
        written: u8,
        read: u8,
    },
    /// SPI error.
    Spi(SPIE),
    /// Chip-select pin error.
    Hal(CSE),
}

impl<SPIE: Debug, CSE: Debug> CanError for Error<SPIE, CSE> {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Requested CAN bit rate is not one of the rates supported by
/// [`CanSpeed`](crate::CanSpeed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub struct UnsupportedBitrate(pub u32);
