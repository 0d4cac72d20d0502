//! # roomcast-core
//!
//! Room membership and byte relaying for the roomcast relay.
//!
//! This crate provides the moving parts behind a single relay process:
//!
//! - **Registry** - Room membership, published as immutable snapshots
//! - **Dispatcher** - The single writer that serializes register/deregister
//! - **Session** - One connection's handshake, lifecycle, and read loop
//! - **Outbound** - Per-peer bounded write queue with drop-on-backpressure
//! - **Relay** - Composes the above into one object owned by the server
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register/deregister  ┌─────────────┐  replaces   ┌─────────────┐
//! │   Session   │──────────────────────▶│ Dispatcher  │────────────▶│  Registry   │
//! └─────────────┘                       └─────────────┘             └─────────────┘
//!        │                  snapshot of room members                       │
//!        │◀────────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌─────────────┐
//! │  Outbound   │ (one writer task per peer)
//! └─────────────┘
//! ```

pub mod broadcast;
pub mod dispatcher;
pub mod outbound;
pub mod registry;
pub mod relay;
pub mod session;

pub use broadcast::SessionStats;
pub use dispatcher::{Dispatcher, DispatcherError, DispatcherHandle, Registration};
pub use outbound::{OutboundConfig, PeerHandle};
pub use registry::{FanOut, RegistryStats, RoomRegistry, RoomSnapshot};
pub use relay::{Relay, RelayConfig, RelayError};
pub use roomcast_protocol::RoomId;
pub use session::{accept_session, ClientSession, SessionConfig, SessionError, SessionId, SessionState};
