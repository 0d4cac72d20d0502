//! Transport abstraction traits for roomcast.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the server to be transport-agnostic.

use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream the relay can serve.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A type-erased byte stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport will not yield any more connections.
    #[error("Transport closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A freshly accepted connection.
pub struct Accepted {
    /// The connection.
    pub stream: BoxedStream,
    /// Remote address, if the transport has one.
    pub peer: Option<SocketAddr>,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").field("peer", &self.peer).finish()
    }
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Get the transport name (e.g., "tcp", "memory").
    fn name(&self) -> &'static str;

    /// Local address the transport is bound to, if any.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_byte_stream<T: ByteStream>() {}

    #[test]
    fn test_duplex_is_byte_stream() {
        assert_byte_stream::<tokio::io::DuplexStream>();
        assert_byte_stream::<tokio::net::TcpStream>();
        assert_byte_stream::<BoxedStream>();
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "Transport closed");
    }
}
