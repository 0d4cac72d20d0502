//! Room identifiers.

use std::fmt;

/// Identifies a room on the relay.
///
/// Clients choose the room with the first two handshake bytes, so the whole
/// `u16` range is valid and no further validation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RoomId(u16);

impl RoomId {
    /// Create a room identifier.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// The raw wire value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The identifier widened to a native integer.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for RoomId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_widening() {
        assert_eq!(RoomId::new(u16::MAX).as_usize(), 65_535);
        assert_eq!(RoomId::from(3).get(), 3);
    }

    #[test]
    fn test_room_id_display() {
        assert_eq!(RoomId::new(42).to_string(), "42");
    }
}
