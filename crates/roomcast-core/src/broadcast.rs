//! The per-session broadcast routine.
//!
//! Each session reads its connection in a loop and relays every chunk to the
//! other members of its room. Exactly the bytes returned by a read are relayed,
//! never the rest of the read buffer.
//!
//! The loop ends on EOF, on a read error, or when the session is closed. On
//! the way out the session asks the dispatcher to deregister it.
//!
//! Relay counters are emitted through the `metrics` facade as each chunk is
//! relayed. They are no-ops until the binary installs a recorder.

use bytes::Bytes;
use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, trace};

use crate::dispatcher::{DispatcherError, DispatcherHandle, Registration};
use crate::registry::{FanOut, RoomRegistry};
use crate::session::{ClientSession, SessionState};

/// Metric names for relay traffic.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "roomcast_messages_total";
    pub const MESSAGES_BYTES: &str = "roomcast_messages_bytes";
    pub const DELIVERIES_TOTAL: &str = "roomcast_deliveries_total";
    pub const DROPPED_TOTAL: &str = "roomcast_dropped_total";
}

/// Record one relayed chunk.
fn record_chunk(len: usize, fan_out: FanOut) {
    counter!(names::MESSAGES_TOTAL).increment(1);
    counter!(names::MESSAGES_BYTES).increment(len as u64);
    counter!(names::DELIVERIES_TOTAL).increment(fan_out.delivered as u64);
    if fan_out.dropped > 0 {
        counter!(names::DROPPED_TOTAL).increment(fan_out.dropped as u64);
    }
}

/// Totals for one session's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Chunks read from the connection.
    pub messages: u64,
    /// Bytes read from the connection.
    pub bytes: u64,
    /// Per-peer deliveries queued.
    pub delivered: u64,
    /// Per-peer deliveries dropped.
    pub dropped: u64,
}

impl SessionStats {
    fn record(&mut self, len: usize, fan_out: FanOut) {
        self.messages += 1;
        self.bytes += len as u64;
        self.delivered += fan_out.delivered as u64;
        self.dropped += fan_out.dropped as u64;
    }
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Register the session, then relay until the connection ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher is gone before registration. The
    /// session is closed in that case.
    pub async fn run(
        mut self,
        dispatcher: &DispatcherHandle,
        registry: &RoomRegistry,
    ) -> Result<SessionStats, DispatcherError> {
        match self.register(dispatcher).await? {
            Registration::Registered => {}
            Registration::AlreadyRegistered => {
                debug!(session = %self.id, "Session was registered twice");
            }
            Registration::Closed => {
                self.state.advance(SessionState::Closed);
                return Ok(SessionStats::default());
            }
        }

        Ok(self.serve(dispatcher, registry).await)
    }

    /// Relay inbound bytes to room peers until EOF, error, or close.
    ///
    /// Always deregisters the session before returning.
    pub async fn serve(mut self, dispatcher: &DispatcherHandle, registry: &RoomRegistry) -> SessionStats {
        let mut stats = SessionStats::default();
        let mut buf = vec![0u8; self.read_buffer_size];
        let cancel = self.peer.cancellation().clone();

        debug!(session = %self.id, room = %self.room, "Serving session");

        loop {
            let n = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(session = %self.id, "Session closed");
                    break;
                }

                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!(session = %self.id, "Connection closed by client");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!(session = %self.id, error = %e, "Read failed");
                        break;
                    }
                },
            };

            let payload = Bytes::copy_from_slice(&buf[..n]);
            let fan_out = registry.fan_out(self.room, self.id, payload);
            trace!(session = %self.id, bytes = n, delivered = fan_out.delivered, "Relayed");
            stats.record(n, fan_out);
            record_chunk(n, fan_out);
        }

        self.state.advance(SessionState::Deregistering);
        if dispatcher.deregister(self.peer.clone()).await.is_err() {
            // Dispatcher already drained; close directly.
            self.peer.close();
        }
        self.state.advance(SessionState::Closed);

        debug!(
            session = %self.id,
            messages = stats.messages,
            bytes = stats.bytes,
            dropped = stats.dropped,
            "Session ended"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::session::{accept_session, SessionConfig};
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use roomcast_protocol::{Handshake, RoomId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        registry: Arc<RoomRegistry>,
        dispatcher: DispatcherHandle,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(RoomRegistry::new());
            let (dispatcher, _task) = Dispatcher::spawn(Arc::clone(&registry), 64);
            Self {
                registry,
                dispatcher,
            }
        }

        /// Connect a client to `room` and wait until it is registered.
        async fn join(&self, room: u16) -> (DuplexStream, JoinHandle<SessionStats>) {
            let (mut client, server) = tokio::io::duplex(64 * 1024);
            client
                .write_all(&Handshake::new(RoomId::new(room)).encode())
                .await
                .unwrap();

            let mut session = accept_session(server, &SessionConfig::default())
                .await
                .unwrap();
            session.register(&self.dispatcher).await.unwrap();

            let dispatcher = self.dispatcher.clone();
            let registry = Arc::clone(&self.registry);
            let task = tokio::spawn(async move { session.serve(&dispatcher, &registry).await });
            (client, task)
        }
    }

    async fn read_n(client: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for relay")
            .unwrap();
        buf
    }

    async fn assert_silent(client: &mut DuplexStream) {
        let mut buf = [0u8; 1];
        let result = tokio::time::timeout(Duration::from_millis(100), client.read(&mut buf)).await;
        assert!(result.is_err(), "expected no data, got {result:?}");
    }

    #[tokio::test]
    async fn test_room_isolation_scenario() {
        let harness = Harness::new();
        let (mut a, _ta) = harness.join(1).await;
        let (mut b, _tb) = harness.join(1).await;
        let (mut c, _tc) = harness.join(2).await;

        a.write_all(b"hello").await.unwrap();

        assert_eq!(read_n(&mut b, 5).await, b"hello");
        assert_silent(&mut c).await;
        assert_silent(&mut a).await;
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_peer() {
        let harness = Harness::new();
        let (mut a, _ta) = harness.join(5).await;
        let (mut b, _tb) = harness.join(5).await;
        let (mut c, _tc) = harness.join(5).await;

        a.write_all(b"ping").await.unwrap();

        assert_eq!(read_n(&mut b, 4).await, b"ping");
        assert_eq!(read_n(&mut c, 4).await, b"ping");
        assert_silent(&mut a).await;
    }

    #[tokio::test]
    async fn test_relays_exact_bytes() {
        let harness = Harness::new();
        let (mut a, _ta) = harness.join(1).await;
        let (mut b, _tb) = harness.join(1).await;

        // A long message followed by a short one must not leak the tail of
        // the first through a reused buffer.
        let long = vec![b'x'; 3000];
        a.write_all(&long).await.unwrap();
        assert_eq!(read_n(&mut b, long.len()).await, long);

        a.write_all(b"hi").await.unwrap();
        assert_eq!(read_n(&mut b, 2).await, b"hi");
        assert_silent(&mut b).await;
    }

    #[tokio::test]
    async fn test_disconnect_deregisters() {
        let harness = Harness::new();
        let (a, ta) = harness.join(1).await;
        let (mut b, tb) = harness.join(1).await;
        assert_eq!(harness.registry.member_count(RoomId::new(1)), 2);

        drop(a);
        let stats = ta.await.unwrap();
        assert_eq!(stats, SessionStats::default());
        assert_eq!(harness.registry.member_count(RoomId::new(1)), 1);

        // B is alone now; its message goes nowhere and nothing fails.
        b.write_all(b"anyone?").await.unwrap();
        b.shutdown().await.unwrap();
        let stats = tb.await.unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.bytes, 7);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dropped, 0);
        assert_eq!(harness.registry.member_count(RoomId::new(1)), 0);
    }

    #[tokio::test]
    async fn test_deregistered_session_receives_nothing() {
        let harness = Harness::new();
        let (mut a, _ta) = harness.join(1).await;
        let (mut b, tb) = harness.join(1).await;

        let b_id = harness.registry.members(RoomId::new(1))
            .into_iter()
            .max()
            .unwrap();
        let snapshot = harness.registry.snapshot(RoomId::new(1)).unwrap();
        let b_peer = snapshot.peers().find(|p| p.id() == b_id).unwrap().clone();

        harness.dispatcher.deregister(b_peer).await.unwrap();
        tb.await.unwrap();

        assert!(!harness.registry.contains(b_id));
        a.write_all(b"late").await.unwrap();

        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), b.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    /// Counts every counter by name.
    #[derive(Default)]
    struct CountingRecorder {
        counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
    }

    impl CountingRecorder {
        fn value(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(name)
                .map_or(0, |c| c.load(Ordering::Relaxed))
        }
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let counter = self
                .counters
                .lock()
                .unwrap()
                .entry(key.name().to_string())
                .or_default()
                .clone();
            Counter::from_arc(counter)
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_counters_rise_while_session_is_open() {
        let recorder = CountingRecorder::default();
        // A current-thread runtime keeps every task on this thread, where
        // the local recorder is installed.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let harness = Harness::new();
                let (mut a, ta) = harness.join(1).await;
                let (mut b, _tb) = harness.join(1).await;

                a.write_all(b"hello").await.unwrap();
                assert_eq!(read_n(&mut b, 5).await, b"hello");

                assert!(!ta.is_finished());
                assert_eq!(recorder.value(names::MESSAGES_TOTAL), 1);
                assert_eq!(recorder.value(names::MESSAGES_BYTES), 5);
                assert_eq!(recorder.value(names::DELIVERIES_TOTAL), 1);
                assert_eq!(recorder.value(names::DROPPED_TOTAL), 0);

                a.write_all(b"again").await.unwrap();
                assert_eq!(read_n(&mut b, 5).await, b"again");
                assert_eq!(recorder.value(names::MESSAGES_TOTAL), 2);
                assert_eq!(recorder.value(names::MESSAGES_BYTES), 10);
            });
        });
    }

    #[tokio::test]
    async fn test_run_refuses_when_dispatcher_gone() {
        let registry = Arc::new(RoomRegistry::new());
        let (dispatcher, task) = Dispatcher::spawn(Arc::clone(&registry), 4);
        dispatcher.shutdown().await.unwrap();
        task.await.unwrap();

        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[1, 0, 0, 0]).await.unwrap();
        let session = accept_session(server, &SessionConfig::default()).await.unwrap();
        let peer = session.peer().clone();

        let result = session.run(&dispatcher, &registry).await;
        assert_eq!(result, Err(DispatcherError::Closed));
        assert!(peer.is_closed());
    }
}
