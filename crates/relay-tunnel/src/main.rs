#![warn(missing_docs)]

//! Streams messages through a loopback relay tunnel and reports throughput.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use relay_tunnel::{loopback, TunnelConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tunnel-bench", about = "Streams messages through a loopback relay tunnel")]
struct Cli {
    /// Tunnel configuration file (.json or .toml).
    #[arg(long, env = "TUNNEL_BENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Number of messages to stream.
    #[arg(long, default_value_t = 10_000)]
    messages: usize,

    /// Size of each message in bytes.
    #[arg(long, default_value_t = 4096)]
    size: usize,

    /// Per-call timeout in seconds, 0 to block indefinitely.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(cli.size > 0, "message size must be positive");

    let config = match &cli.config {
        Some(path) => TunnelConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TunnelConfig::default(),
    };
    tracing::info!(?config, messages = cli.messages, size = cli.size, "tunnel bench starting");

    let timeout = Duration::from_secs(cli.timeout_secs);
    let mut pair = loopback::pair(config);
    let sender = pair
        .left
        .init_tunnel("bench", timeout.max(Duration::from_millis(1)))
        .await?;
    let receiver = pair
        .right_incoming
        .recv()
        .await
        .context("inbound tunnel never arrived")?;

    let messages = cli.messages;
    let consumer = tokio::spawn(async move {
        let mut received = 0usize;
        for _ in 0..messages {
            received += receiver.recv(timeout).await?.len();
        }
        Ok::<_, relay_tunnel::TunnelError>((received, receiver))
    });

    let payload = Bytes::from(vec![0xA5u8; cli.size]);
    let start = Instant::now();
    for _ in 0..messages {
        sender.send(payload.clone(), timeout).await?;
    }
    let (received, receiver) = consumer.await??;
    let elapsed = start.elapsed();

    sender.close().await?;
    anyhow::ensure!(receiver.is_closed(), "receiving side did not observe the close");

    let mib_per_sec = received as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        messages,
        bytes = received,
        elapsed_ms = elapsed.as_millis() as u64,
        mib_per_sec,
        "tunnel bench finished"
    );
    Ok(())
}
