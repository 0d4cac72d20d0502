//! Shared fixtures for roomcast benchmarks.

use roomcast_core::outbound::{spawn_writer, OutboundConfig};
use roomcast_core::{PeerHandle, Relay, RelayConfig, RoomId, SessionId};
use roomcast_protocol::Handshake;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};

/// A peer whose writes go nowhere.
#[must_use]
pub fn sink_peer(room: RoomId) -> PeerHandle {
    spawn_writer(
        tokio::io::sink(),
        SessionId::next(),
        room,
        &OutboundConfig {
            queue_capacity: 1024,
            write_timeout: Duration::from_secs(5),
        },
    )
}

/// Start a relay and register `members` sink peers in `room`.
///
/// Returns the relay and the peers, in registration order.
pub async fn relay_with_members(room: RoomId, members: usize) -> (Relay, Vec<PeerHandle>) {
    let (relay, _task) = Relay::start(RelayConfig::default());
    let mut peers = Vec::with_capacity(members);

    for _ in 0..members {
        let peer = sink_peer(room);
        relay
            .dispatcher()
            .register(peer.clone())
            .await
            .expect("dispatcher running");
        peers.push(peer);
    }

    (relay, peers)
}

/// Open an in-memory connection to `relay` in `room` and wait until it is
/// registered.
pub async fn join_in_memory(relay: &Relay, room: RoomId) -> DuplexStream {
    let before = relay.registry().member_count(room);
    let (mut client, server) = tokio::io::duplex(256 * 1024);
    client
        .write_all(&Handshake::new(room).encode())
        .await
        .expect("handshake write");

    let serving = relay.clone();
    tokio::spawn(async move { serving.serve_connection(server).await });

    while relay.registry().member_count(room) <= before {
        tokio::task::yield_now().await;
    }
    client
}
