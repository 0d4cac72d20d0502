//! Outbound delivery to a single peer.
//!
//! Every registered session owns one writer task that drains a bounded queue
//! into the write half of its connection. Broadcasters only ever enqueue, so a
//! slow or stalled peer can never block the session that is sending to it.
//!
//! Delivery is best effort:
//!
//! - a full or closed queue drops the message for that peer,
//! - a write that fails or exceeds the write timeout ends the writer task, and
//!   every later message to that peer is dropped,
//! - nothing is retried and nothing is reported back to the sender.
//!
//! A peer whose writer has ended is only removed from its room once its own
//! read loop ends.

use bytes::Bytes;
use roomcast_protocol::RoomId;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::session::SessionId;

/// Default number of messages queued per peer.
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default bound on a single write to a peer.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the best-effort shutdown of a write half.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound queue configuration.
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// Messages buffered per peer before new ones are dropped.
    pub queue_capacity: usize,
    /// Maximum time a single write may take.
    pub write_timeout: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

struct PeerInner {
    id: SessionId,
    room: RoomId,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

/// A cheaply cloneable handle to a session's outbound side.
///
/// This is what the registry stores. Holding a handle does not keep the
/// connection open: closing it cancels the session.
#[derive(Clone)]
pub struct PeerHandle {
    inner: Arc<PeerInner>,
}

impl PeerHandle {
    /// The session this handle belongs to.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The room the session joined.
    #[must_use]
    pub fn room(&self) -> RoomId {
        self.inner.room
    }

    /// Queue `payload` for this peer without waiting.
    ///
    /// Returns `false` if the message was dropped because the queue is full or
    /// the writer has ended.
    pub fn try_deliver(&self, payload: Bytes) -> bool {
        match self.inner.sender.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(session = %self.inner.id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!(session = %self.inner.id, "Outbound writer gone, dropping message");
                false
            }
        }
    }

    /// Whether the writer task is still accepting messages.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.inner.sender.is_closed()
    }

    /// Close the session: stops its read loop and shuts down its write half.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled when the session is closed.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.inner.id)
            .field("room", &self.inner.room)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Spawn the writer task for a peer and return its handle.
///
/// Must be called from within a tokio runtime.
pub fn spawn_writer<W>(writer: W, id: SessionId, room: RoomId, config: &OutboundConfig) -> PeerHandle
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let cancel = CancellationToken::new();

    tokio::spawn(write_loop(
        writer,
        receiver,
        id,
        config.write_timeout,
        cancel.clone(),
    ));

    PeerHandle {
        inner: Arc::new(PeerInner {
            id,
            room,
            sender,
            cancel,
        }),
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut receiver: mpsc::Receiver<Bytes>,
    id: SessionId,
    write_timeout: Duration,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            next = receiver.recv() => {
                let Some(payload) = next else { break };

                match tokio::time::timeout(write_timeout, writer.write_all(&payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(session = %id, error = %e, "Write to peer failed");
                        break;
                    }
                    Err(_) => {
                        debug!(session = %id, timeout = ?write_timeout, "Write to peer timed out");
                        break;
                    }
                }
            }
        }
    }

    receiver.close();
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await;
    trace!(session = %id, "Writer stopped");
}
