//! In-memory transport.
//!
//! Connections are `tokio::io::duplex` pipes. The connector keeps the client
//! half and hands the server half to whoever is calling `accept`.

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::traits::{Accepted, Transport, TransportError};

/// Default pipe buffer size per direction.
const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Accepts connections created by a [`MemoryConnector`].
pub struct MemoryTransport {
    incoming: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
}

/// Creates client connections to a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::UnboundedSender<DuplexStream>,
    pipe_capacity: usize,
}

impl MemoryTransport {
    /// Create a transport and its connector.
    #[must_use]
    pub fn new() -> (Self, MemoryConnector) {
        Self::with_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Create a transport whose pipes buffer `pipe_capacity` bytes.
    #[must_use]
    pub fn with_capacity(pipe_capacity: usize) -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: Mutex::new(rx),
            },
            MemoryConnector {
                outgoing: tx,
                pipe_capacity,
            },
        )
    }
}

impl MemoryConnector {
    /// Open a connection and return the client half.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport was dropped.
    pub fn connect(&self) -> Result<DuplexStream, TransportError> {
        let (client, server) = tokio::io::duplex(self.pipe_capacity);
        self.outgoing
            .send(server)
            .map_err(|_| TransportError::Closed)?;
        Ok(client)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let stream = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;

        debug!("Accepted in-memory connection");

        Ok(Accepted {
            stream: Box::new(stream),
            peer: None,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
