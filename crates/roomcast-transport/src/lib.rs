//! # roomcast-transport
//!
//! Transport abstraction layer for the roomcast relay.
//!
//! The relay only needs accepted, bidirectional byte streams. This crate
//! provides them behind one interface:
//!
//! - **TCP** - The production listener
//! - **Memory** - In-process duplex pipes for tests and benchmarks
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` trait, allowing the server to be
//! transport-agnostic.
//!
//! ```rust,ignore
//! use roomcast_transport::Transport;
//!
//! async fn accept_one(transport: &dyn Transport) {
//!     let accepted = transport.accept().await.unwrap();
//!     // Hand accepted.stream to the relay
//! }
//! ```

pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "memory")]
pub mod memory;

pub use traits::{Accepted, ByteStream, BoxedStream, Transport, TransportError};

#[cfg(feature = "tcp")]
pub use tcp::TcpTransport;

#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryTransport};
