//! Collaborator traits for the radio, the network and the broker.
//!
//! The gateway core never talks to hardware directly. Hosts implement these traits over their
//! drivers; [`providers`](crate::providers) ships a frame-log replay radio and in-memory
//! implementations for tests and simulation.
//!
//! The peer radio and the infrastructure network share one physical radio. The gateway always
//! disables one before it activates the other, so implementations may assume they are never
//! active at the same time.

use tracing::{debug, warn};

use crate::Result;
use crate::config::BrokerSettings;
use crate::decoder::decode;
use crate::snapshot::SnapshotStore;
use crate::types::{Frame, GroupId};

/// Callback handle given to the peer radio when receive mode is enabled.
///
/// The radio calls [`deliver`](FrameSink::deliver) with each raw transport buffer, from whatever
/// context its driver runs in. Decoding happens off to the side and the finished group is
/// swapped into the store in one step.
#[derive(Debug, Clone)]
pub struct FrameSink {
    store: SnapshotStore,
}

impl FrameSink {
    /// Create a sink writing into `store`.
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Handle one raw transport buffer.
    ///
    /// Returns the group that was updated, `Ok(None)` for unknown identifiers, or an error for
    /// malformed buffers (which leave the store untouched).
    pub fn deliver(&self, bytes: &[u8]) -> Result<Option<GroupId>> {
        let frame = Frame::from_wire(bytes).inspect_err(|e| {
            warn!("Discarding frame: {}", e);
        })?;
        Ok(self.deliver_frame(&frame))
    }

    /// Handle an already parsed frame.
    pub fn deliver_frame(&self, frame: &Frame) -> Option<GroupId> {
        let decoded = decode(frame)?;
        self.store.apply(decoded.group, decoded.reading, tokio::time::Instant::now());
        debug!("Received {} ({} bytes) as {}", frame, frame.len(), decoded.group);
        let missing = self.store.missing_groups();
        if missing.is_empty() {
            debug!("All groups received");
        } else {
            debug!("Still missing {} group(s): {:?}", missing.len(), missing);
        }
        Some(decoded.group)
    }
}

/// Peer-to-peer radio receive mode.
#[async_trait::async_trait]
pub trait PeerRadio: Send {
    /// Enable receive mode and register `sink` as the frame callback.
    async fn enable(&mut self, sink: FrameSink) -> Result<()>;

    /// Disable receive mode and drop the registered callback.
    async fn disable(&mut self);
}

/// Infrastructure network association.
#[async_trait::async_trait]
pub trait NetworkLink: Send {
    /// Start associating with the stored credentials.
    ///
    /// Returning `Ok` does not mean the link is up; the gateway polls
    /// [`is_connected`](NetworkLink::is_connected) with a bounded wait.
    async fn connect(&mut self) -> Result<()>;

    /// Drop the association.
    async fn disconnect(&mut self);

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;
}

/// Message broker client.
#[async_trait::async_trait]
pub trait BrokerClient: Send {
    /// Connect to the broker described by `settings` under `client_id`.
    async fn connect(&mut self, settings: &BrokerSettings, client_id: &str) -> Result<()>;

    /// Publish one message and wait for the broker's acknowledgement.
    async fn publish(&mut self, topic: &str, payload: &str) -> bool;

    /// Disconnect from the broker.
    async fn disconnect(&mut self);

    /// Whether a broker session is open.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayError;

    #[tokio::test]
    async fn sink_applies_known_groups() {
        let store = SnapshotStore::new();
        let sink = FrameSink::new(store.clone());
        let frame = Frame::for_group(GroupId::Cells1, &[0x0C, 0xE4]).unwrap();

        let group = sink.deliver(&frame.to_wire()).unwrap();
        assert_eq!(group, Some(GroupId::Cells1));
        assert!(store.snapshot().is_received(GroupId::Cells1));
        assert_eq!(store.missing_groups().len(), GroupId::COUNT - 1);
        assert!(!store.missing_groups().contains(&GroupId::Cells1));
    }

    #[tokio::test]
    async fn sink_ignores_unknown_identifiers() {
        let store = SnapshotStore::new();
        let sink = FrameSink::new(store.clone());
        let frame = Frame::new(0x18FF_50E5, &[1, 2, 3]).unwrap();

        assert_eq!(sink.deliver(&frame.to_wire()).unwrap(), None);
        assert!(store.snapshot().received_groups().is_empty());
    }

    #[tokio::test]
    async fn malformed_buffers_leave_store_untouched() {
        let store = SnapshotStore::new();
        let sink = FrameSink::new(store.clone());
        let wire = Frame::for_group(GroupId::Pack, &[1, 2, 3, 4]).unwrap().to_wire();

        let err = sink.deliver(&wire[..13]).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedFrame { .. }));
        assert_eq!(store.snapshot(), crate::Snapshot::new());
    }
}
