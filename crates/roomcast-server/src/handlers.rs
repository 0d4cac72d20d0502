//! Connection handlers for the roomcast server.
//!
//! This module owns the listener loop: it accepts connections from a
//! transport, runs each one on its own task, and drains the relay on shutdown.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use roomcast_core::{Relay, RelayError};
use roomcast_transport::{Accepted, TcpTransport, Transport, TransportError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// How often registry gauges are refreshed.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Run the relay server until ctrl-c.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind; failure here is fatal
    let addr = config.bind_addr()?;
    let transport = TcpTransport::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let (relay, dispatcher_task) = Relay::start(config.relay_config());

    info!("roomcast listening on {}", addr);

    let reporter = tokio::spawn(report_stats(relay.clone()));

    run_relay(&transport, relay.clone(), shutdown_signal()).await;

    info!("Shutting down, draining sessions");
    match relay.shutdown().await {
        Ok(closed) => info!(sessions = closed, "Relay drained"),
        Err(e) => warn!(error = %e, "Relay already stopped"),
    }
    reporter.abort();
    dispatcher_task.await.context("Dispatcher task failed")?;

    Ok(())
}

/// Accept connections from `transport` until `shutdown` resolves or the
/// transport closes.
///
/// Each connection is handshaken and served on its own task, so a client that
/// is slow to send its handshake never holds up the loop.
pub async fn run_relay<T, F>(transport: &T, relay: Relay, shutdown: F)
where
    T: Transport + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!("Listener stopping");
                break;
            }

            accepted = transport.accept() => match accepted {
                Ok(accepted) => {
                    tokio::spawn(handle_connection(relay.clone(), accepted));
                }
                Err(TransportError::Closed) => {
                    debug!(transport = transport.name(), "Transport closed");
                    break;
                }
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "Accept failed");
                    metrics::record_error("accept");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

/// Serve one accepted connection.
async fn handle_connection(relay: Relay, accepted: Accepted) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let peer = accepted
        .peer
        .map_or_else(|| "local".to_string(), |addr| addr.to_string());

    info!(peer = %peer, "Client connected");

    match relay.serve_connection(accepted.stream).await {
        Ok(stats) => {
            info!(
                peer = %peer,
                messages = stats.messages,
                bytes = stats.bytes,
                "Client disconnected"
            );
        }
        Err(RelayError::Session(e)) => {
            metrics::record_error("handshake");
            warn!(peer = %peer, error = %e, "Handshake failed, dropping connection");
        }
        Err(RelayError::Dispatcher(e)) => {
            debug!(peer = %peer, error = %e, "Relay shutting down, dropping connection");
        }
    }
}

/// Periodically publish registry gauges.
async fn report_stats(relay: Relay) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        interval.tick().await;
        let stats = relay.registry().stats();
        metrics::set_registry_stats(&stats);
        debug!(
            rooms = stats.room_count,
            sessions = stats.session_count,
            "Registry stats"
        );
    }
}

/// Resolve on ctrl-c.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
