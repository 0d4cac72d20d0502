//! Room registry.
//!
//! The registry maps each room to its current members. Membership is published
//! as copy-on-write snapshots: every change builds a new [`RoomSnapshot`] and
//! swaps the room's `Arc`, so a broadcaster iterating a snapshot never sees a
//! set that is halfway through an update.
//!
//! Only the dispatcher mutates the registry. Everything else gets read access
//! through snapshots and counters; the underlying maps are never exposed.
//!
//! Rooms are created on first registration and are never removed, even once
//! empty.

use bytes::Bytes;
use dashmap::DashMap;
use roomcast_protocol::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::outbound::PeerHandle;
use crate::session::SessionId;

/// Immutable view of one room's membership.
#[derive(Debug, Default, Clone)]
pub struct RoomSnapshot {
    members: HashMap<SessionId, PeerHandle>,
}

impl RoomSnapshot {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `session` is a member.
    #[must_use]
    pub fn contains(&self, session: SessionId) -> bool {
        self.members.contains_key(&session)
    }

    /// Member session identifiers, in no particular order.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.members.keys().copied().collect()
    }

    /// Iterate over member handles.
    pub fn peers(&self) -> impl Iterator<Item = &PeerHandle> {
        self.members.values()
    }

    fn with_member(&self, peer: PeerHandle) -> Self {
        let mut members = self.members.clone();
        members.insert(peer.id(), peer);
        Self { members }
    }

    fn without_member(&self, session: SessionId) -> Self {
        let mut members = self.members.clone();
        members.remove(&session);
        Self { members }
    }
}

/// Result of relaying one payload to a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Peers the payload was queued for.
    pub delivered: usize,
    /// Peers that dropped the payload (queue full or writer gone).
    pub dropped: usize,
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of rooms ever created.
    pub room_count: usize,
    /// Number of registered sessions.
    pub session_count: usize,
}

/// Authoritative mapping of rooms to member sessions.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Membership snapshot per room.
    rooms: DashMap<RoomId, Arc<RoomSnapshot>>,
    /// Reverse index: session -> room.
    sessions: DashMap<SessionId, RoomId>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current membership snapshot of `room`.
    #[must_use]
    pub fn snapshot(&self, room: RoomId) -> Option<Arc<RoomSnapshot>> {
        self.rooms.get(&room).map(|entry| Arc::clone(entry.value()))
    }

    /// Members of `room`, empty if the room does not exist.
    #[must_use]
    pub fn members(&self, room: RoomId) -> Vec<SessionId> {
        self.snapshot(room)
            .map(|snapshot| snapshot.session_ids())
            .unwrap_or_default()
    }

    /// Number of members in `room`.
    #[must_use]
    pub fn member_count(&self, room: RoomId) -> usize {
        self.rooms.get(&room).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Whether `session` is registered.
    #[must_use]
    pub fn contains(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    /// The room `session` is registered in.
    #[must_use]
    pub fn room_of(&self, session: SessionId) -> Option<RoomId> {
        self.sessions.get(&session).map(|entry| *entry.value())
    }

    /// Whether `room` has ever had a member.
    #[must_use]
    pub fn room_exists(&self, room: RoomId) -> bool {
        self.rooms.contains_key(&room)
    }

    /// All known room identifiers.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| *entry.key()).collect()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            session_count: self.sessions.len(),
        }
    }

    /// Queue `payload` for every member of `room` except `from`.
    ///
    /// Reads a single snapshot, so membership changes that land while the
    /// payload is being queued affect only later payloads.
    pub fn fan_out(&self, room: RoomId, from: SessionId, payload: Bytes) -> FanOut {
        let Some(snapshot) = self.snapshot(room) else {
            return FanOut::default();
        };

        let mut result = FanOut::default();
        for peer in snapshot.peers().filter(|peer| peer.id() != from) {
            if peer.try_deliver(payload.clone()) {
                result.delivered += 1;
            } else {
                result.dropped += 1;
            }
        }

        trace!(
            room = %room,
            from = %from,
            bytes = payload.len(),
            delivered = result.delivered,
            dropped = result.dropped,
            "Fan-out"
        );
        result
    }

    /// Add `peer` to its room.
    ///
    /// Returns `false` without changing anything if the session is already
    /// registered.
    pub(crate) fn insert(&self, peer: PeerHandle) -> bool {
        let id = peer.id();
        let room = peer.room();

        if self.sessions.contains_key(&id) {
            return false;
        }

        {
            let mut entry = self.rooms.entry(room).or_insert_with(|| {
                debug!(room = %room, "Creating room");
                Arc::default()
            });
            let next = entry.with_member(peer);
            *entry = Arc::new(next);
        }
        self.sessions.insert(id, room);

        true
    }

    /// Remove `session` from its room, returning its handle if it was
    /// registered.
    pub(crate) fn remove(&self, session: SessionId) -> Option<PeerHandle> {
        let (_, room) = self.sessions.remove(&session)?;

        let mut entry = self.rooms.get_mut(&room)?;
        let peer = entry.members.get(&session).cloned();
        let next = entry.without_member(session);
        *entry = Arc::new(next);

        peer
    }

    /// Remove every session from every room, returning their handles.
    ///
    /// Rooms themselves are kept.
    pub(crate) fn drain(&self) -> Vec<PeerHandle> {
        let mut peers = Vec::with_capacity(self.sessions.len());

        for mut entry in self.rooms.iter_mut() {
            peers.extend(entry.peers().cloned());
            *entry = Arc::default();
        }
        self.sessions.clear();

        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{spawn_writer, OutboundConfig};

    fn test_peer(room: u16) -> PeerHandle {
        spawn_writer(
            tokio::io::sink(),
            SessionId::next(),
            RoomId::new(room),
            &OutboundConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let registry = RoomRegistry::new();
        let peer = test_peer(1);
        let id = peer.id();

        assert!(registry.insert(peer));
        assert!(registry.contains(id));
        assert_eq!(registry.room_of(id), Some(RoomId::new(1)));
        assert_eq!(registry.members(RoomId::new(1)), vec![id]);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(!registry.contains(id));
        assert_eq!(registry.member_count(RoomId::new(1)), 0);
    }

    #[tokio::test]
    async fn test_empty_rooms_persist() {
        let registry = RoomRegistry::new();
        let peer = test_peer(4);
        let id = peer.id();

        registry.insert(peer);
        registry.remove(id);

        assert!(registry.room_exists(RoomId::new(4)));
        assert!(registry.snapshot(RoomId::new(4)).unwrap().is_empty());
        assert_eq!(registry.stats().room_count, 1);
        assert_eq!(registry.stats().session_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let registry = RoomRegistry::new();
        let peer = test_peer(1);

        assert!(registry.insert(peer.clone()));
        assert!(!registry.insert(peer));
        assert_eq!(registry.member_count(RoomId::new(1)), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_session() {
        let registry = RoomRegistry::new();
        assert!(registry.remove(SessionId::next()).is_none());
        assert!(!registry.room_exists(RoomId::new(0)));
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_changes() {
        let registry = RoomRegistry::new();
        let a = test_peer(1);
        let b = test_peer(1);

        registry.insert(a.clone());
        let before = registry.snapshot(RoomId::new(1)).unwrap();

        registry.insert(b.clone());
        registry.remove(a.id());

        assert_eq!(before.len(), 1);
        assert!(before.contains(a.id()));
        let after = registry.snapshot(RoomId::new(1)).unwrap();
        assert_eq!(after.session_ids(), vec![b.id()]);
    }

    #[tokio::test]
    async fn test_fan_out_skips_sender_and_other_rooms() {
        let registry = RoomRegistry::new();
        let a = test_peer(1);
        let b = test_peer(1);
        let c = test_peer(1);
        let other = test_peer(2);

        for peer in [&a, &b, &c, &other] {
            registry.insert(peer.clone());
        }

        let result = registry.fan_out(RoomId::new(1), a.id(), Bytes::from_static(b"hello"));
        assert_eq!(result, FanOut { delivered: 2, dropped: 0 });

        let result = registry.fan_out(RoomId::new(9), a.id(), Bytes::from_static(b"hello"));
        assert_eq!(result, FanOut::default());
    }

    #[tokio::test]
    async fn test_fan_out_counts_dropped() {
        let registry = RoomRegistry::new();
        let a = test_peer(1);
        let (_client, server) = tokio::io::duplex(8);
        let slow = spawn_writer(
            server,
            SessionId::next(),
            RoomId::new(1),
            &OutboundConfig {
                queue_capacity: 1,
                ..Default::default()
            },
        );

        registry.insert(a.clone());
        registry.insert(slow);

        let mut dropped = 0;
        for _ in 0..5 {
            dropped += registry
                .fan_out(RoomId::new(1), a.id(), Bytes::from(vec![0u8; 4096]))
                .dropped;
        }
        assert!(dropped >= 3, "dropped {dropped}");
    }

    #[tokio::test]
    async fn test_drain_keeps_rooms() {
        let registry = RoomRegistry::new();
        registry.insert(test_peer(1));
        registry.insert(test_peer(2));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.stats(), RegistryStats { room_count: 2, session_count: 0 });

        let mut rooms = registry.room_ids();
        rooms.sort_by_key(|room| room.get());
        assert_eq!(rooms, vec![RoomId::new(1), RoomId::new(2)]);
    }
}
