//! Codec for the room-selection handshake.
//!
//! The handshake is 4 bytes: a little-endian `u16` room identifier followed by
//! a little-endian `u16` protocol version.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::room::RoomId;
use crate::version::{Version, PROTOCOL_VERSION};

/// Handshake size in bytes.
pub const HANDSHAKE_LEN: usize = 4;

/// Protocol errors that can occur while decoding a handshake.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not enough data to decode the handshake.
    #[error("Incomplete handshake: need {0} more bytes")]
    Incomplete(usize),
}

/// The first message a client sends after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Room the client joins.
    pub room: RoomId,
    /// Protocol version from the reserved bytes.
    pub version: Version,
}

impl Handshake {
    /// Create a handshake for `room` at the current protocol version.
    #[must_use]
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            version: PROTOCOL_VERSION,
        }
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Encode the handshake to its 4-byte wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode the handshake into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HANDSHAKE_LEN);
        buf.put_u16_le(self.room.get());
        buf.put_u16_le(self.version.0);
    }
}

/// Decode a handshake from bytes.
///
/// Only the first [`HANDSHAKE_LEN`] bytes are consulted; anything after them is
/// left for the caller.
///
/// # Errors
///
/// Returns an error if the data is incomplete.
pub fn decode_handshake(data: &[u8]) -> Result<Handshake, ProtocolError> {
    if data.len() < HANDSHAKE_LEN {
        return Err(ProtocolError::Incomplete(HANDSHAKE_LEN - data.len()));
    }

    let room = u16::from_le_bytes([data[0], data[1]]);
    let version = u16::from_le_bytes([data[2], data[3]]);

    Ok(Handshake {
        room: RoomId::new(room),
        version: Version::new(version),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian_room() {
        let hs = decode_handshake(&[1, 0, 0, 0]).unwrap();
        assert_eq!(hs.room, RoomId::new(1));
        assert!(hs.version.is_current());

        let hs = decode_handshake(&[0x34, 0x12, 0, 0]).unwrap();
        assert_eq!(hs.room.get(), 0x1234);
    }

    #[test]
    fn test_decode_reserved_bytes() {
        let hs = decode_handshake(&[2, 0, 9, 1]).unwrap();
        assert_eq!(hs.room, RoomId::new(2));
        assert_eq!(hs.version, Version::new(0x0109));
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode_handshake(&[]), Err(ProtocolError::Incomplete(4)));
        assert_eq!(decode_handshake(&[1, 0, 0]), Err(ProtocolError::Incomplete(1)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let hs = decode_handshake(&[5, 0, 0, 0, b'h', b'i']).unwrap();
        assert_eq!(hs.room, RoomId::new(5));
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let encoded = Handshake::new(RoomId::new(0x0102))
            .with_version(Version::new(7))
            .encode();
        assert_eq!(&encoded[..], &[0x02, 0x01, 7, 0]);
    }
}
