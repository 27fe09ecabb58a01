//! CAN frame model and identifier bit-packing
//!
//! Identifiers carry the routing information for the whole network:
//!
//! ```text
//!  bits 31..24  23..16   15..8         7..0
//!      unused   target   destination   sender (bit 7 = for-destination flag)
//! ```
//!
//! The for-destination flag shares bit 7 with the sender byte: requests coming
//! from tester-side senders (API 0xFA and friends) have it set, responses
//! coming back from peer units do not.

use std::fmt;

use thiserror::Error;

/// Maximum payload of a classic CAN frame
pub const MAX_FRAME_LEN: usize = 8;

/// Destination byte used for bus test frames
pub const BROADCAST_TEST_ID: u8 = 0xFF;

const FOR_DESTINATION_BIT: u32 = 1 << 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {0} bytes (max 8)")]
    PayloadTooLong(usize),

    #[error("Identifier out of range: 0x{0:08X}")]
    InvalidId(u32),

    #[error("Service data unit too long to segment: {0} bytes (max 4095)")]
    SduTooLong(usize),
}

/// Decoded view of a frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId {
    /// Unit being updated by OTA traffic (0 = the MCU itself)
    pub target: u8,
    /// Unit the frame is addressed to
    pub destination: u8,
    /// Unit (or API) that sent the frame
    pub sender: u8,
}

impl FrameId {
    pub fn new(target: u8, destination: u8, sender: u8) -> Self {
        Self {
            target,
            destination,
            sender,
        }
    }

    /// Decode a raw identifier
    pub fn from_raw(raw: u32) -> Self {
        Self {
            target: ((raw >> 16) & 0xFF) as u8,
            destination: ((raw >> 8) & 0xFF) as u8,
            sender: (raw & 0xFF) as u8,
        }
    }

    pub fn to_raw(self) -> u32 {
        (u32::from(self.target) << 16) | (u32::from(self.destination) << 8) | u32::from(self.sender)
    }

    /// Whether the request is meant to be served by the destination unit itself
    pub fn is_for_destination(self) -> bool {
        self.to_raw() & FOR_DESTINATION_BIT != 0
    }

    /// Identifier for a reply: sender and destination swap, target is kept
    pub fn reversed(self) -> Self {
        Self {
            target: self.target,
            destination: self.sender,
            sender: self.destination,
        }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.to_raw())
    }
}

/// One wire frame. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    len: u8,
    data: [u8; MAX_FRAME_LEN],
}

impl Frame {
    /// Build a frame, rejecting payloads longer than 8 bytes and identifiers
    /// outside the 29-bit extended range
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }
        if id > 0x1FFF_FFFF {
            return Err(FrameError::InvalidId(id));
        }

        let mut data = [0u8; MAX_FRAME_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn raw_id(&self) -> u32 {
        self.id
    }

    pub fn id(&self) -> FrameId {
        FrameId::from_raw(self.id)
    }

    /// Declared payload length
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Same payload under a different identifier
    pub fn with_id(&self, id: FrameId) -> Self {
        Self {
            id: id.to_raw(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &format_args!("0x{:08X}", self.id))
            .field("data", &hex::encode_upper(self.data()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_fields() {
        let id = FrameId::from_raw(0x0310_FA);
        assert_eq!(id.target, 0x03);
        assert_eq!(id.destination, 0x10);
        assert_eq!(id.sender, 0xFA);
        assert!(id.is_for_destination());
        assert_eq!(id.to_raw(), 0x0310_FA);
    }

    #[test]
    fn test_peer_response_not_for_destination() {
        let id = FrameId::from_raw(0x1011);
        assert_eq!(id.destination, 0x10);
        assert_eq!(id.sender, 0x11);
        assert!(!id.is_for_destination());
    }

    #[test]
    fn test_reversed_keeps_target() {
        let id = FrameId::new(0x03, 0x10, 0xFA).reversed();
        assert_eq!(id, FrameId::new(0x03, 0xFA, 0x10));
    }

    #[test]
    fn test_frame_rejects_long_payload() {
        assert_eq!(
            Frame::new(0x10FA, &[0; 9]),
            Err(FrameError::PayloadTooLong(9))
        );
        assert!(matches!(
            Frame::new(0x2000_0000, &[]),
            Err(FrameError::InvalidId(_))
        ));
    }

    #[test]
    fn test_frame_data_is_declared_length() {
        let frame = Frame::new(0x10FA, &[0x02, 0x3E, 0x00]).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.data(), &[0x02, 0x3E, 0x00]);
    }
}
