//! End-to-end throughput benchmark for roomcast.
//!
//! This benchmark measures actual relay throughput with real network I/O.
//! Every client joins the same room, sends fixed-size payloads as fast as it
//! can, and counts the bytes relayed to it by its peers.

use roomcast_core::RoomId;
use roomcast_protocol::Handshake;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Barrier;

const SERVER_ADDR: &str = "127.0.0.1:7000";
const BENCH_ROOM: u16 = 4242;
const PAYLOAD_SIZE: usize = 64;
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let addr = args.get(2).cloned().unwrap_or_else(|| SERVER_ADDR.to_string());

    println!("roomcast end-to-end throughput benchmark");
    println!("  server:  {} (start it with `cargo run --release`)", addr);
    println!("  clients: {}, payload: {}B", num_clients, PAYLOAD_SIZE);
    println!();

    run_room_benchmark(num_clients, addr).await;
}

async fn run_room_benchmark(num_clients: usize, addr: String) {
    let received_bytes = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let received = Arc::clone(&received_bytes);
        let barrier = Arc::clone(&barrier);
        let addr = addr.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(&addr, received, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    // Warmup phase
    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    received_bytes.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_bytes = received_bytes.load(Ordering::SeqCst);

    let bytes_per_sec = total_bytes as f64 / elapsed.as_secs_f64();
    let payloads_per_sec = bytes_per_sec / PAYLOAD_SIZE as f64;

    println!();
    println!("Results");
    println!("  clients:          {:>12}", num_clients);
    println!("  duration:         {:>12.2}s", elapsed.as_secs_f64());
    println!("  bytes relayed:    {:>12}", total_bytes);
    println!("  throughput:       {:>12.0} payloads/s", payloads_per_sec);
    println!("  bandwidth:        {:>12.2} MiB/s", bytes_per_sec / (1024.0 * 1024.0));

    // Signal clients to stop
    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    addr: &str,
    received_bytes: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    // Join the benchmark room
    stream
        .write_all(&Handshake::new(RoomId::new(BENCH_ROOM)).encode())
        .await?;

    // Wait for all clients to be ready
    barrier.wait().await;

    let (mut reader, mut writer) = stream.into_split();

    // Separate receiver task for full-duplex operation
    let recv_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    received_bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
            }
        }
    });

    // Send loop - no waiting, just blast payloads
    let payload = vec![0u8; PAYLOAD_SIZE];
    loop {
        if writer.write_all(&payload).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
