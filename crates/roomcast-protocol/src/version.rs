//! Protocol versioning for roomcast.
//!
//! Handshake bytes 2-3 are reserved for a protocol version. Version 0 is the
//! only version defined today; the relay accepts any value so that newer
//! clients keep working against an older relay.

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version(0);

/// Protocol version carried in the reserved handshake bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub u16);

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Whether this is the version this crate speaks.
    #[must_use]
    pub fn is_current(&self) -> bool {
        *self == PROTOCOL_VERSION
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
