//! The relay: registry, dispatcher, and session settings in one place.
//!
//! A [`Relay`] is created once at startup and cloned into every connection
//! task. Tests construct their own, so no state is process-global.

use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::info;

use crate::broadcast::SessionStats;
use crate::dispatcher::{self, Dispatcher, DispatcherError, DispatcherHandle};
use crate::registry::RoomRegistry;
use crate::session::{accept_session, SessionConfig, SessionError};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The connection failed before it could join a room.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The relay is shutting down.
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Per-session settings.
    pub session: SessionConfig,
    /// Capacity of the dispatcher's request queue.
    pub dispatcher_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            dispatcher_queue_capacity: dispatcher::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Shared relay state.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<RoomRegistry>,
    dispatcher: DispatcherHandle,
    config: Arc<RelayConfig>,
}

impl Relay {
    /// Create the registry and start its dispatcher.
    ///
    /// The returned task finishes after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn start(config: RelayConfig) -> (Self, JoinHandle<()>) {
        info!("Starting relay with config: {:?}", config);

        let registry = Arc::new(RoomRegistry::new());
        let (dispatcher, task) =
            Dispatcher::spawn(Arc::clone(&registry), config.dispatcher_queue_capacity);

        (
            Self {
                registry,
                dispatcher,
                config: Arc::new(config),
            },
            task,
        )
    }

    /// Read access to room membership.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Handle to the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Handshake, register, and relay one connection until it ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails or the relay is shutting down.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<SessionStats, RelayError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let session = accept_session(stream, &self.config.session).await?;
        let stats = session.run(&self.dispatcher, &self.registry).await?;
        Ok(stats)
    }

    /// Close every session and stop the dispatcher.
    ///
    /// Returns the number of sessions closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay was already shut down.
    pub async fn shutdown(&self) -> Result<usize, DispatcherError> {
        self.dispatcher.shutdown().await
    }
}
