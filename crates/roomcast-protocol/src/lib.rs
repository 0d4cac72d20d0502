//! # roomcast-protocol
//!
//! Wire format for the roomcast relay.
//!
//! The protocol has exactly one structured element: a fixed 4-byte handshake
//! sent by the client right after connecting. Everything after it is an
//! opaque byte stream relayed verbatim to the other members of the room.
//!
//! ```text
//! 0        2        4
//! +--------+--------+------------------------
//! | room   | version| payload bytes ...
//! | u16 LE | u16 LE |
//! +--------+--------+------------------------
//! ```
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, Handshake, RoomId};
//!
//! let hello = Handshake::new(RoomId::new(7));
//! let encoded = hello.encode();
//! let decoded = codec::decode_handshake(&encoded).unwrap();
//! assert_eq!(decoded.room, RoomId::new(7));
//! ```

pub mod codec;
pub mod room;
pub mod version;

pub use codec::{decode_handshake, Handshake, ProtocolError, HANDSHAKE_LEN};
pub use room::RoomId;
pub use version::{Version, PROTOCOL_VERSION};
