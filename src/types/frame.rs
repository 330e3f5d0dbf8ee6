//! Radio frame type and its transport layout

use std::fmt;

use super::GroupId;
use crate::{GatewayError, Result};

/// One identifier + payload unit delivered by the peer radio.
///
/// Frames are immutable once built. The transport carries them as a fixed 16-byte buffer:
///
/// ```text
/// 0..4   identifier (little-endian u32)
/// 4      payload length (0..=8)
/// 5..13  payload bytes
/// 13..16 padding
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    identifier: u32,
    length: u8,
    data: [u8; Frame::MAX_PAYLOAD],
}

impl Frame {
    /// Maximum payload size in bytes.
    pub const MAX_PAYLOAD: usize = 8;

    /// Exact size of a frame on the radio transport.
    pub const WIRE_SIZE: usize = 16;

    /// Build a frame from an identifier and payload.
    pub fn new(identifier: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > Self::MAX_PAYLOAD {
            return Err(GatewayError::FrameLength { length: payload.len() });
        }

        let mut data = [0u8; Self::MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self { identifier, length: payload.len() as u8, data })
    }

    /// Build a frame for a known group.
    pub fn for_group(group: GroupId, payload: &[u8]) -> Result<Self> {
        Self::new(group.frame_id(), payload)
    }

    /// Parse a transport buffer.
    ///
    /// The buffer must be exactly [`Frame::WIRE_SIZE`] bytes and declare a payload length of
    /// at most 8; anything else is rejected whole.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(GatewayError::MalformedFrame {
                expected: Self::WIRE_SIZE,
                actual: bytes.len(),
            });
        }

        let identifier = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let length = bytes[4] as usize;
        if length > Self::MAX_PAYLOAD {
            return Err(GatewayError::FrameLength { length });
        }

        Self::new(identifier, &bytes[5..5 + length])
    }

    /// Encode into the transport layout. Unused payload bytes and padding are zero.
    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        let mut wire = [0u8; Self::WIRE_SIZE];
        wire[..4].copy_from_slice(&self.identifier.to_le_bytes());
        wire[4] = self.length;
        wire[5..5 + Self::MAX_PAYLOAD].copy_from_slice(&self.data);
        wire
    }

    /// Frame identifier.
    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    /// Declared payload length.
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// Whether the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Payload bytes (exactly `len()` of them).
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Group carried by this frame, if the identifier is known.
    pub fn group(&self) -> Option<GroupId> {
        GroupId::from_frame_id(self.identifier)
    }
}

impl fmt::Display for Frame {
    /// Compact `ID#PAYLOAD` notation, e.g. `88008000#0CE40CE5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}#{}", self.identifier, hex::encode_upper(self.payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_layout_is_little_endian_identifier() {
        let frame = Frame::new(0x8800_8000, &[0x0C, 0xE4]).unwrap();
        let wire = frame.to_wire();
        assert_eq!(&wire[..4], &[0x00, 0x80, 0x00, 0x88]);
        assert_eq!(wire[4], 2);
        assert_eq!(&wire[5..7], &[0x0C, 0xE4]);
        assert!(wire[7..].iter().all(|b| *b == 0));
    }

    #[test]
    fn wrong_transport_size_is_rejected() {
        let err = Frame::from_wire(&[0u8; 13]).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedFrame { expected: 16, actual: 13 }));
    }

    #[test]
    fn oversized_length_byte_is_rejected() {
        let mut wire = Frame::new(1, &[1, 2, 3]).unwrap().to_wire();
        wire[4] = 9;
        assert!(matches!(Frame::from_wire(&wire), Err(GatewayError::FrameLength { length: 9 })));
    }

    #[test]
    fn bytes_past_length_are_ignored() {
        let mut wire = Frame::new(7, &[0xAA]).unwrap().to_wire();
        wire[6] = 0xFF;
        let frame = Frame::from_wire(&wire).unwrap();
        assert_eq!(frame.payload(), &[0xAA]);
    }

    #[test]
    fn display_uses_compact_notation() {
        let frame = Frame::for_group(GroupId::Temperatures, &[0x28, 0x29]).unwrap();
        assert_eq!(frame.to_string(), "90008000#2829");
    }

    #[test]
    fn payload_longer_than_eight_is_rejected() {
        assert!(Frame::new(1, &[0u8; 9]).is_err());
    }

    proptest! {
        #[test]
        fn prop_wire_encoding_preserves_frame(
            identifier in any::<u32>(),
            payload in prop::collection::vec(any::<u8>(), 0..=8)
        ) {
            let frame = Frame::new(identifier, &payload).unwrap();
            let parsed = Frame::from_wire(&frame.to_wire()).unwrap();
            prop_assert_eq!(parsed, frame);
            prop_assert_eq!(parsed.payload(), payload.as_slice());
        }
    }
}
