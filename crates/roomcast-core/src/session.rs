//! Client sessions.
//!
//! A session is one accepted connection plus the room it chose during the
//! handshake. It moves strictly forward through [`SessionState`]:
//!
//! ```text
//! Created → Handshaking → Active → Deregistering → Closed
//! ```

use roomcast_protocol::{decode_handshake, Handshake, ProtocolError, RoomId, Version, HANDSHAKE_LEN};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tracing::debug;

use crate::dispatcher::{DispatcherError, DispatcherHandle, Registration};
use crate::outbound::{self, OutboundConfig, PeerHandle};

/// Default size of the per-session read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Created,
    Handshaking,
    Active,
    Deregistering,
    Closed,
}

impl SessionState {
    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns `false` and leaves the state untouched otherwise.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection failed or closed before the handshake completed.
    #[error("Handshake read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The client did not send a handshake in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The handshake could not be decoded.
    #[error("Handshake invalid: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum bytes taken from the connection per read.
    pub read_buffer_size: usize,
    /// Optional bound on the handshake read. `None` waits indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// Outbound queue settings.
    pub outbound: OutboundConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            handshake_timeout: None,
            outbound: OutboundConfig::default(),
        }
    }
}

/// A live connection assigned to a room.
///
/// The session owns the read half of its connection. The write half belongs
/// to the outbound writer task reachable through [`peer`](Self::peer).
pub struct ClientSession<S> {
    pub(crate) id: SessionId,
    pub(crate) room: RoomId,
    pub(crate) version: Version,
    pub(crate) reader: ReadHalf<S>,
    pub(crate) peer: PeerHandle,
    pub(crate) state: SessionState,
    pub(crate) read_buffer_size: usize,
}

impl<S> ClientSession<S> {
    /// The session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The room chosen during the handshake.
    #[must_use]
    pub fn room(&self) -> RoomId {
        self.room
    }

    /// The protocol version the client announced.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle to this session's outbound side.
    #[must_use]
    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Register this session with the dispatcher and mark it active.
    ///
    /// Once this returns the session is visible to broadcasts in its room.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has shut down. The session is closed
    /// in that case.
    pub async fn register(
        &mut self,
        dispatcher: &DispatcherHandle,
    ) -> Result<Registration, DispatcherError> {
        match dispatcher.register(self.peer.clone()).await {
            Ok(registration) => {
                self.state.advance(SessionState::Active);
                Ok(registration)
            }
            Err(e) => {
                self.peer.close();
                self.state.advance(SessionState::Closed);
                Err(e)
            }
        }
    }
}

impl<S> fmt::Debug for ClientSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("room", &self.room)
            .field("state", &self.state)
            .finish()
    }
}

/// Read the 4-byte handshake from `reader`.
///
/// # Errors
///
/// Returns an error if the read fails, ends early, or exceeds `timeout`.
pub async fn read_handshake<R>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<Handshake, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_LEN];

    match timeout {
        Some(limit) => {
            tokio::time::timeout(limit, reader.read_exact(&mut buf))
                .await
                .map_err(|_| SessionError::HandshakeTimeout(limit))??;
        }
        None => {
            reader.read_exact(&mut buf).await?;
        }
    }

    Ok(decode_handshake(&buf)?)
}

/// Turn a freshly accepted connection into a session.
///
/// Performs the handshake, splits the stream, and starts the outbound writer.
/// On error the connection is dropped, which closes it.
///
/// # Errors
///
/// Returns an error if the handshake fails.
pub async fn accept_session<S>(
    mut stream: S,
    config: &SessionConfig,
) -> Result<ClientSession<S>, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let id = SessionId::next();
    let mut state = SessionState::Created;
    state.advance(SessionState::Handshaking);

    let handshake = read_handshake(&mut stream, config.handshake_timeout).await?;
    if !handshake.version.is_current() {
        debug!(session = %id, version = %handshake.version, "Client sent non-zero reserved bytes");
    }

    let (reader, writer) = tokio::io::split(stream);
    let peer = outbound::spawn_writer(writer, id, handshake.room, &config.outbound);

    debug!(session = %id, room = %handshake.room, "Handshake complete");

    Ok(ClientSession {
        id,
        room: handshake.room,
        version: handshake.version,
        reader,
        peer,
        state,
        read_buffer_size: config.read_buffer_size.max(1),
    })
}
