//! Replay a frame capture through a full gateway cycle.
//!
//! Usage: cargo run --example replay_gateway -- [capture.log] [seconds]
//!
//! The network and broker are in-memory; every accepted message is printed at the end.
//! Set RUST_LOG=cellgate=debug to follow each frame and transition.

use anyhow::Context;
use cellgate::providers::{MemoryBroker, MemoryNetwork, ReplayRadio};
use cellgate::{BrokerSettings, Gateway, GatewayConfig, StaticConfigStore};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let capture = args.next().unwrap_or_else(|| "demos/pack_capture.log".to_string());
    let seconds: u64 = match args.next() {
        Some(value) => value.parse().context("seconds must be a whole number")?,
        None => 5,
    };

    let radio = ReplayRadio::open(&capture)
        .with_context(|| format!("failed to open capture {}", capture))?
        .with_interval(Duration::from_millis(100))
        .with_repeat(true);
    println!("Replaying {} frames from {}", radio.frame_count(), capture);

    let broker = MemoryBroker::new();
    let config = GatewayConfig { publish_spacing_ms: 50, ..Default::default() };
    let settings = BrokerSettings::new("127.0.0.1", "bms/demo");

    let mut gateway = Gateway::start(
        config,
        radio,
        MemoryNetwork::new(),
        broker.clone(),
        StaticConfigStore::new(settings),
    )
    .await?;

    let mut states = gateway.state_updates();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            println!("state: {}", state);
        }
    });

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        stop.cancel();
    });

    gateway.run(cancel).await;

    println!("\n{} cycle(s), {} message(s):", gateway.cycles(), broker.published().len());
    for (topic, payload) in broker.published() {
        println!("  {} {}", topic, payload);
    }
    if let Some(error) = gateway.last_error() {
        println!("last error: {}", error);
    }

    Ok(())
}
