//! Telemetry gateway for a battery-management unit.
//!
//! Cellgate listens for the battery unit's frames on a peer-to-peer radio, reassembles them into
//! a [`Snapshot`] of seven field groups (16 cell voltages, pack electricals, four temperatures
//! and seven status values), and republishes the snapshot to a message broker over the
//! infrastructure network. Both links share one radio, so the gateway alternates between them
//! in a self-healing cycle:
//!
//! - **Receive**: frames are decoded as they arrive and swapped into the snapshot store
//! - **Connect**: once the snapshot is complete (or the receive window gives up), the peer radio
//!   is switched off and the network and broker are connected
//! - **Publish**: one small JSON message per group, then everything is torn down and receiving
//!   starts over
//!
//! Hardware is reached only through the [`PeerRadio`], [`NetworkLink`], [`BrokerClient`] and
//! [`ConfigStore`] traits.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cellgate::providers::{MemoryBroker, MemoryNetwork, ReplayRadio};
//! use cellgate::{BrokerSettings, Gateway, GatewayConfig, StaticConfigStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = ReplayRadio::open("pack_capture.log")?.with_repeat(true);
//!     let settings = BrokerSettings::new("10.0.0.2", "bms/pack1");
//!
//!     let mut gateway = Gateway::start(
//!         GatewayConfig::default(),
//!         radio,
//!         MemoryNetwork::new(),
//!         MemoryBroker::new(),
//!         StaticConfigStore::new(settings),
//!     )
//!     .await?;
//!
//!     gateway.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod types;

// Frame path
pub mod decoder;
pub mod snapshot;

// Cycle
pub mod config;
pub mod gateway;
pub mod machine;
pub mod publisher;

// Collaborators
pub mod provider;
pub mod providers;

// Core exports
pub use error::*;
pub use types::*;

pub use config::{BrokerSettings, ConfigStore, EntryState, GatewayConfig, StaticConfigStore, YamlConfigStore};
pub use decoder::{DecodedGroup, decode};
pub use gateway::{Gateway, GatewayContext, RadioMode};
pub use machine::{GatewayState, ReceiveOutcome, Session};
pub use provider::{BrokerClient, FrameSink, NetworkLink, PeerRadio};
pub use publisher::{Message, PublishReport, Publisher};
pub use snapshot::{GroupSlot, Snapshot, SnapshotStore};
