//! The dispatcher: sole writer of the room registry.
//!
//! Register and deregister requests arrive over a bounded queue and are
//! applied one at a time, in arrival order. That gives every membership change
//! a total order without any lock on the write path; readers see the results
//! through registry snapshots.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::outbound::PeerHandle;
use crate::registry::RoomRegistry;

/// Default capacity of the request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Dispatcher errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatcherError {
    /// The dispatcher has shut down.
    #[error("Dispatcher closed")]
    Closed,
}

/// Outcome of a register request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The session was added to its room.
    Registered,
    /// The session was already registered; nothing changed.
    AlreadyRegistered,
    /// The session was closed before the request was processed.
    Closed,
}

enum Request {
    Register {
        peer: PeerHandle,
        ack: oneshot::Sender<Registration>,
    },
    Deregister {
        peer: PeerHandle,
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        ack: oneshot::Sender<usize>,
    },
}

/// Handle for sending requests to the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<Request>,
}

impl DispatcherHandle {
    /// Register `peer` in its room and wait until it is visible.
    ///
    /// # Errors
    ///
    /// Returns [`DispatcherError::Closed`] if the dispatcher has stopped.
    pub async fn register(&self, peer: PeerHandle) -> Result<Registration, DispatcherError> {
        let (ack, done) = oneshot::channel();
        self.send(Request::Register { peer, ack }).await?;
        done.await.map_err(|_| DispatcherError::Closed)
    }

    /// Close `peer` and remove it from its room.
    ///
    /// Peers that were never registered are only closed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatcherError::Closed`] if the dispatcher has stopped.
    pub async fn deregister(&self, peer: PeerHandle) -> Result<(), DispatcherError> {
        let (ack, done) = oneshot::channel();
        self.send(Request::Deregister { peer, ack }).await?;
        done.await.map_err(|_| DispatcherError::Closed)
    }

    /// Close every registered session and stop the dispatcher.
    ///
    /// Returns the number of sessions that were closed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatcherError::Closed`] if the dispatcher already stopped.
    pub async fn shutdown(&self) -> Result<usize, DispatcherError> {
        let (ack, done) = oneshot::channel();
        self.send(Request::Shutdown { ack }).await?;
        done.await.map_err(|_| DispatcherError::Closed)
    }

    /// Whether the dispatcher has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    async fn send(&self, request: Request) -> Result<(), DispatcherError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| DispatcherError::Closed)
    }
}

/// Owns write access to a [`RoomRegistry`].
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
    requests: mpsc::Receiver<Request>,
}

impl Dispatcher {
    /// Create a dispatcher for `registry` and the handle used to reach it.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>, queue_capacity: usize) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                registry,
                requests: rx,
            },
            DispatcherHandle { requests: tx },
        )
    }

    /// Create a dispatcher and run it on a new task.
    #[must_use]
    pub fn spawn(
        registry: Arc<RoomRegistry>,
        queue_capacity: usize,
    ) -> (DispatcherHandle, JoinHandle<()>) {
        let (dispatcher, handle) = Self::new(registry, queue_capacity);
        (handle, tokio::spawn(dispatcher.run()))
    }

    /// Process requests until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Dispatcher started");

        while let Some(request) = self.requests.recv().await {
            match request {
                Request::Register { peer, ack } => {
                    let _ = ack.send(self.register(peer));
                }
                Request::Deregister { peer, ack } => {
                    self.deregister(&peer);
                    let _ = ack.send(());
                }
                Request::Shutdown { ack } => {
                    let closed = self.drain();
                    let _ = ack.send(closed);
                    break;
                }
            }
        }

        debug!("Dispatcher stopped");
    }

    fn register(&self, peer: PeerHandle) -> Registration {
        let id = peer.id();
        let room = peer.room();

        if peer.is_closed() {
            debug!(session = %id, room = %room, "Ignoring register of closed session");
            return Registration::Closed;
        }

        if self.registry.insert(peer) {
            info!(
                session = %id,
                room = %room,
                members = self.registry.member_count(room),
                "Registered"
            );
            Registration::Registered
        } else {
            warn!(session = %id, room = %room, "Session already registered");
            Registration::AlreadyRegistered
        }
    }

    fn deregister(&self, peer: &PeerHandle) {
        peer.close();

        if self.registry.remove(peer.id()).is_some() {
            info!(
                session = %peer.id(),
                room = %peer.room(),
                members = self.registry.member_count(peer.room()),
                "Deregistered"
            );
        } else {
            debug!(session = %peer.id(), "Deregister of unregistered session");
        }
    }

    fn drain(&self) -> usize {
        let peers = self.registry.drain();
        for peer in &peers {
            peer.close();
        }
        info!(sessions = peers.len(), "Dispatcher drained");
        peers.len()
    }
}
