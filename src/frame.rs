use embedded_hal::can::{Frame, Id};

/// CAN frame.
///
/// Only the first [`dlc`](Frame::dlc) bytes of the payload are meaningful;
/// comparison ignores the rest.
#[derive(Debug, Clone, Copy)]
pub struct CanFrame {
    /// ID of CAN frame.
    pub(crate) id: Id,
    /// Whether the frame is an RTR frame.
    pub(crate) rtr: bool,
    /// Length of data in CAN frame.
    pub(crate) dlc: u8,
    /// Data, maximum 8 bytes.
    pub(crate) data: [u8; 8],
}

impl CanFrame {
    /// The 11-bit standard identifier field.
    ///
    /// For extended frames this is the upper 11 bits of the 29-bit identifier.
    pub fn standard_id(&self) -> u16 {
        match self.id {
            Id::Standard(id) => id.as_raw(),
            Id::Extended(id) => (id.as_raw() >> 18) as u16,
        }
    }

    /// The 18-bit identifier extension, or 0 for standard frames.
    pub fn extended_id(&self) -> u32 {
        match self.id {
            Id::Standard(_) => 0,
            Id::Extended(id) => id.as_raw() & 0x3FFFF,
        }
    }
}

impl PartialEq for CanFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.rtr == other.rtr && self.data() == other.data()
    }
}

impl Eq for CanFrame {}

#[cfg(feature = "defmt")]
impl defmt::Format for CanFrame {
    fn format(&self, fmt: defmt::Formatter) {
        // [`Id`] does not implement `defmt::Format`
        #[derive(defmt::Format)]
        enum InnerId {
            Standard(u16),
            Extended(u32),
        }

        defmt::write!(
            fmt,
            "CanFrame {{ id: {:#X}, rtr: {}, dlc: {:#X}, data: {:#X} }}",
            match self.id {
                Id::Standard(id) => InnerId::Standard(id.as_raw()),
                Id::Extended(id) => InnerId::Extended(id.as_raw()),
            },
            self.rtr,
            self.dlc,
            self.data()
        );
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut frame = CanFrame {
            id: id.into(),
            rtr: false,
            dlc: data.len() as u8, // Already asserted data.len() <= 8
            data: [0; 8],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Some(frame)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(CanFrame {
            id: id.into(),
            rtr: true,
            dlc: dlc as u8, // Already asserted dlc <= 8
            data: [0; 8],
        })
    }

    #[inline]
    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    #[inline]
    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    #[inline]
    fn id(&self) -> Id {
        self.id
    }

    #[inline]
    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    #[inline]
    fn data(&self) -> &[u8] {
        &self.data[..self.dlc()]
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::can::{ExtendedId, StandardId};

    use super::*;

    #[test]
    fn identifier_fields() {
        let std = CanFrame::new(StandardId::new(0x123).unwrap(), &[]).unwrap();
        assert_eq!(std.standard_id(), 0x123);
        assert_eq!(std.extended_id(), 0);

        let ext = CanFrame::new(ExtendedId::new(0x1234_5678).unwrap(), &[]).unwrap();
        assert_eq!(ext.standard_id(), 0x48D);
        assert_eq!(ext.extended_id(), 0x0_5678);
    }

    #[test]
    fn payload_beyond_dlc_is_ignored() {
        let a = CanFrame::new(StandardId::new(1).unwrap(), &[1, 2]).unwrap();
        let mut b = a;
        b.data[5] = 0xFF;
        assert_eq!(a, b);

        b.data[1] = 0xFF;
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_payload_rejected() {
        assert!(CanFrame::new(StandardId::ZERO, &[0; 9]).is_none());
        assert!(CanFrame::new_remote(StandardId::ZERO, 9).is_none());
    }
}
