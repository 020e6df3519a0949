//! Tx/Rx buffer slots and the identifier/DLC layout shared by the
//! `LOAD TX BUFFER` and `READ RX BUFFER` instructions.

use bitflags::bitflags;
use embedded_hal::can::{ExtendedId, Id, StandardId};

use crate::{
    frame::CanFrame,
    stat::{RxStatus, Status},
};

/// Number of header bytes (`SIDH`, `SIDL`, `EID8`, `EID0`, `DLC`) preceding the
/// payload in a buffer.
pub const HEADER_LEN: usize = 5;

/// Header bytes followed by the full 8 byte payload.
pub const BUFFER_LEN: usize = HEADER_LEN + 8;

/// Identifier and DLC registers of a Tx or Rx buffer, decoded.
///
/// Wire order is `SIDH`, `SIDL`, `EID8`, `EID0`, `DLC`:
///
/// ```text
/// SIDH  SID10..SID3
/// SIDL  SID2..SID0 | SRR | IDE | - | EID17 EID16
/// EID8  EID15..EID8
/// EID0  EID7..EID0
/// DLC   - | RTR | - - | DLC3..DLC0
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufHeader {
    /// Standard identifier (11 bits).
    pub sid: u16,
    /// Standard frame remote request. Set by the chip on reception.
    pub srr: bool,
    /// Extended identifier enable.
    pub ide: bool,
    /// Extended identifier (18 bits).
    pub eid: u32,
    /// Remote transmission request.
    pub rtr: bool,
    /// Data length code (4 bits).
    pub dlc: u8,
}

impl BufHeader {
    /// Builds the header for transmitting `frame`.
    ///
    /// A remote standard frame sets both `RTR` and `SRR`. The chip only looks at
    /// `RTR` when transmitting, but on reception it reports standard remote
    /// frames through `SRR`, so setting both keeps encode and decode symmetric.
    pub fn from_frame(frame: &CanFrame) -> Self {
        match frame.id {
            Id::Standard(id) => Self {
                sid: id.as_raw(),
                srr: frame.rtr,
                ide: false,
                eid: 0,
                rtr: frame.rtr,
                dlc: frame.dlc,
            },
            Id::Extended(id) => Self {
                sid: (id.as_raw() >> 18) as u16, // Upper 11 bits in SID
                srr: false,
                ide: true,
                eid: id.as_raw() & 0x3FFFF, // Lower 18 bits in EID
                rtr: frame.rtr,
                dlc: frame.dlc,
            },
        }
    }

    /// Packs the header into register order.
    pub fn into_bytes(self) -> [u8; HEADER_LEN] {
        [
            (self.sid >> 3) as u8,
            ((self.sid & 0x07) as u8) << 5
                | (self.srr as u8) << 4
                | (self.ide as u8) << 3
                | ((self.eid >> 16) & 0x03) as u8,
            (self.eid >> 8) as u8,
            self.eid as u8,
            (self.rtr as u8) << 6 | (self.dlc & 0x0F),
        ]
    }

    /// Unpacks a header from register order. Unimplemented bits are dropped.
    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        let [sidh, sidl, eid8, eid0, dlc] = bytes;
        Self {
            sid: (sidh as u16) << 3 | (sidl >> 5) as u16,
            srr: sidl & 0x10 != 0,
            ide: sidl & 0x08 != 0,
            eid: ((sidl & 0x03) as u32) << 16 | (eid8 as u32) << 8 | eid0 as u32,
            rtr: dlc & 0x40 != 0,
            dlc: dlc & 0x0F,
        }
    }

    /// Whether the header describes a remote frame. Extended frames carry the
    /// flag in `RTR`, standard frames in `SRR`.
    pub fn is_remote(&self) -> bool {
        if self.ide {
            self.rtr
        } else {
            self.srr
        }
    }

    /// Builds a frame from this header and the buffer payload.
    ///
    /// A DLC above 8 still means 8 data bytes.
    pub fn into_frame(self, data: &[u8; 8]) -> CanFrame {
        // 11 + 18 identifier bits always fit, the fallbacks are unreachable.
        let id = if self.ide {
            let raw = ((self.sid as u32) << 18 | self.eid) & 0x1FFF_FFFF;
            Id::Extended(ExtendedId::new(raw).unwrap_or(ExtendedId::ZERO))
        } else {
            Id::Standard(StandardId::new(self.sid & 0x7FF).unwrap_or(StandardId::ZERO))
        };
        CanFrame {
            id,
            rtr: self.is_remote(),
            dlc: self.dlc.min(8),
            data: *data,
        }
    }
}

/// Encodes `frame` as header bytes followed by its payload. Returns the buffer
/// and the number of bytes in use.
pub fn encode_frame(frame: &CanFrame) -> ([u8; BUFFER_LEN], usize) {
    let mut buf = [0u8; BUFFER_LEN];
    buf[..HEADER_LEN].copy_from_slice(&BufHeader::from_frame(frame).into_bytes());
    let len = frame.dlc as usize;
    buf[HEADER_LEN..HEADER_LEN + len].copy_from_slice(&frame.data[..len]);
    (buf, HEADER_LEN + len)
}

/// Decodes a frame from header bytes followed by the full payload.
pub fn decode_frame(buf: &[u8; BUFFER_LEN]) -> CanFrame {
    let mut header = [0u8; HEADER_LEN];
    let mut data = [0u8; 8];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    data.copy_from_slice(&buf[HEADER_LEN..]);
    BufHeader::from_bytes(header).into_frame(&data)
}

crate::slot_def! {
    /// Transmit buffer.
    TxBuf => {
        /// Tx buffer 0.
        B0 = 0,
        /// Tx buffer 1.
        B1 = 1,
        /// Tx buffer 2.
        B2 = 2
    }
}

impl TxBuf {
    /// `LOAD TX BUFFER` instruction, starting at `TXBnSIDH`.
    pub const fn load_instruction(self) -> u8 {
        0x40 | self.index() << 1
    }

    /// Request-to-send flag for this buffer.
    pub const fn request(self) -> TxRequest {
        match self {
            TxBuf::B0 => TxRequest::B0,
            TxBuf::B1 => TxRequest::B1,
            TxBuf::B2 => TxRequest::B2,
        }
    }

    /// Whether this buffer has a transmission pending according to `status`.
    pub fn is_pending(self, status: Status) -> bool {
        match self {
            TxBuf::B0 => status.tx0req(),
            TxBuf::B1 => status.tx1req(),
            TxBuf::B2 => status.tx2req(),
        }
    }

    /// Picks the highest numbered buffer without a pending transmission.
    ///
    /// The MCP2515 sends the highest numbered loaded buffer first when
    /// priorities are equal, so frames only leave in submission order if a new
    /// frame is not loaded before the previous one has been sent.
    pub fn select_free(status: Status) -> Option<TxBuf> {
        TxBuf::ALL
            .iter()
            .rev()
            .copied()
            .find(|buf| !buf.is_pending(status))
    }
}

bitflags! {
    /// Buffers flagged by a `RTS` instruction.
    pub struct TxRequest: u8 {
        const B0 = 0b001;
        const B1 = 0b010;
        const B2 = 0b100;
    }
}

impl TxRequest {
    /// `RTS` instruction for the flagged buffers.
    pub const fn instruction(self) -> u8 {
        0x80 | self.bits()
    }
}

crate::slot_def! {
    /// Receive buffer.
    RxBuf => {
        /// Rx buffer 0.
        B0 = 0,
        /// Rx buffer 1.
        B1 = 1
    }
}

impl RxBuf {
    /// `READ RX BUFFER` instruction, starting at `RXBnSIDH`.
    pub const fn read_instruction(self) -> u8 {
        0x90 | self.index() << 2
    }

    /// The other Rx buffer.
    pub const fn other(self) -> RxBuf {
        match self {
            RxBuf::B0 => RxBuf::B1,
            RxBuf::B1 => RxBuf::B0,
        }
    }

    /// Whether this buffer holds a message according to `status`.
    pub fn has_message(self, status: RxStatus) -> bool {
        match self {
            RxBuf::B0 => status.rxb0(),
            RxBuf::B1 => status.rxb1(),
        }
    }

    /// Picks the buffer to drain next. The buffer not serviced `last` is
    /// preferred so that neither buffer can starve the other.
    pub fn select(status: RxStatus, last: RxBuf) -> Option<RxBuf> {
        [last.other(), last]
            .iter()
            .copied()
            .find(|buf| buf.has_message(status))
    }
}
