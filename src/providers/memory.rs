//! In-memory radio, network and broker.
//!
//! Each type is a cloneable handle over shared state: hand one clone to the
//! [`Gateway`](crate::Gateway) and keep another to inject frames, script failures and inspect
//! what happened. Attach the same [`EventLog`] to all three to check the order of radio
//! switches across them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::BrokerSettings;
use crate::provider::{BrokerClient, FrameSink, NetworkLink, PeerRadio};
use crate::types::{Frame, GroupId};
use crate::{GatewayError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Something a memory collaborator did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PeerEnabled,
    PeerDisabled,
    NetworkConnected,
    NetworkDisconnected,
    BrokerConnected { client_id: String },
    Published { topic: String, payload: String },
    BrokerDisconnected,
}

/// Shared, ordered record of [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        lock(&self.events).push(event);
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// True if the peer radio and the network were never up at the same time.
    pub fn radio_exclusive(&self) -> bool {
        let mut peer = false;
        let mut network = false;
        for event in lock(&self.events).iter() {
            match event {
                Event::PeerEnabled => peer = true,
                Event::PeerDisabled => peer = false,
                Event::NetworkConnected => network = true,
                Event::NetworkDisconnected => network = false,
                _ => continue,
            }
            if peer && network {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct RadioState {
    sink: Option<FrameSink>,
    enables: usize,
    disables: usize,
    failing_enables: u32,
}

/// Peer radio driven by the test: frames only land while receive mode is enabled.
#[derive(Debug, Clone, Default)]
pub struct MemoryRadio {
    state: Arc<Mutex<RadioState>>,
    log: EventLog,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Make the next `count` enable calls fail.
    pub fn fail_next_enables(&self, count: u32) {
        lock(&self.state).failing_enables = count;
    }

    /// Deliver a frame as if it arrived over the air.
    ///
    /// Returns the updated group, or `None` if receive mode is off or the identifier is
    /// unknown.
    pub fn inject(&self, frame: &Frame) -> Option<GroupId> {
        let sink = lock(&self.state).sink.clone()?;
        sink.deliver_frame(frame)
    }

    /// Deliver a raw transport buffer.
    pub fn inject_wire(&self, bytes: &[u8]) -> Result<Option<GroupId>> {
        let sink = lock(&self.state).sink.clone();
        match sink {
            Some(sink) => sink.deliver(bytes),
            None => Ok(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    /// Enable calls so far, including failed ones.
    pub fn enable_count(&self) -> usize {
        lock(&self.state).enables
    }

    pub fn disable_count(&self) -> usize {
        lock(&self.state).disables
    }
}

#[async_trait::async_trait]
impl PeerRadio for MemoryRadio {
    async fn enable(&mut self, sink: FrameSink) -> Result<()> {
        let mut state = lock(&self.state);
        state.enables += 1;
        if state.failing_enables > 0 {
            state.failing_enables -= 1;
            return Err(GatewayError::radio_failed("peer receive mode unavailable"));
        }
        state.sink = Some(sink);
        drop(state);
        self.log.push(Event::PeerEnabled);
        Ok(())
    }

    async fn disable(&mut self) {
        let mut state = lock(&self.state);
        state.disables += 1;
        if state.sink.take().is_some() {
            drop(state);
            self.log.push(Event::PeerDisabled);
        }
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    connected: bool,
    unreachable: bool,
    failing_connects: u32,
    connects: usize,
}

/// Network link that either comes up immediately or never does.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    log: EventLog,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Accept connect calls but never report the link as up.
    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    /// Make the next `count` connect calls return an error.
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).failing_connects = count;
    }

    /// Connect calls so far.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }
}

#[async_trait::async_trait]
impl NetworkLink for MemoryNetwork {
    async fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(GatewayError::network_failed("association rejected"));
        }
        if state.unreachable {
            return Ok(());
        }
        state.connected = true;
        drop(state);
        self.log.push(Event::NetworkConnected);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let was_connected = std::mem::take(&mut lock(&self.state).connected);
        if was_connected {
            self.log.push(Event::NetworkDisconnected);
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    connected: bool,
    failing_connects: u32,
    connect_attempts: usize,
    client_ids: Vec<String>,
    acks: VecDeque<bool>,
    publish_attempts: usize,
    published: Vec<(String, String)>,
    disconnects: usize,
}

/// Broker that records every publish.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    log: EventLog,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events into `log`.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).failing_connects = count;
    }

    /// Script acknowledgements for the next publishes; once exhausted, publishes succeed.
    pub fn script_acks<I: IntoIterator<Item = bool>>(&self, acks: I) {
        lock(&self.state).acks.extend(acks);
    }

    /// Accepted messages as `(topic, payload)`.
    pub fn published(&self) -> Vec<(String, String)> {
        lock(&self.state).published.clone()
    }

    /// Publish calls that reached the broker, accepted or not.
    pub fn publish_attempts(&self) -> usize {
        lock(&self.state).publish_attempts
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    /// Client ids used by connect attempts, in order.
    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.state).client_ids.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        lock(&self.state).disconnects
    }
}

#[async_trait::async_trait]
impl BrokerClient for MemoryBroker {
    async fn connect(&mut self, settings: &BrokerSettings, client_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        state.client_ids.push(client_id.to_string());
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(GatewayError::broker_failed(
                format!("{}:{} refused connection", settings.server, settings.port),
                1,
            ));
        }
        state.connected = true;
        drop(state);
        self.log.push(Event::BrokerConnected { client_id: client_id.to_string() });
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> bool {
        let mut state = lock(&self.state);
        if !state.connected {
            return false;
        }
        state.publish_attempts += 1;
        let accepted = state.acks.pop_front().unwrap_or(true);
        if accepted {
            state.published.push((topic.to_string(), payload.to_string()));
            drop(state);
            self.log.push(Event::Published { topic: topic.to_string(), payload: payload.to_string() });
        }
        accepted
    }

    async fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        if std::mem::take(&mut state.connected) {
            drop(state);
            self.log.push(Event::BrokerDisconnected);
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotStore;

    #[tokio::test]
    async fn radio_drops_frames_while_disabled() {
        let store = SnapshotStore::new();
        let mut radio = MemoryRadio::new();
        let handle = radio.clone();
        let frame = Frame::for_group(GroupId::Pack, &[0x02, 0x10]).unwrap();

        assert_eq!(handle.inject(&frame), None);

        radio.enable(FrameSink::new(store.clone())).await.unwrap();
        assert_eq!(handle.inject(&frame), Some(GroupId::Pack));

        radio.disable().await;
        store.reset();
        assert_eq!(handle.inject(&frame), None);
        assert!(!store.snapshot().is_received(GroupId::Pack));
    }

    #[tokio::test]
    async fn scripted_enable_failures_run_out() {
        let mut radio = MemoryRadio::new();
        radio.fail_next_enables(1);
        let sink = FrameSink::new(SnapshotStore::new());

        assert!(radio.enable(sink.clone()).await.is_err());
        assert!(radio.enable(sink).await.is_ok());
        assert_eq!(radio.enable_count(), 2);
        assert!(radio.is_enabled());
    }

    #[tokio::test]
    async fn unreachable_network_never_comes_up() {
        let mut network = MemoryNetwork::new();
        network.set_unreachable(true);
        network.connect().await.unwrap();
        assert!(!network.is_connected());
    }

    #[tokio::test]
    async fn event_log_detects_overlap() {
        let log = EventLog::new();
        let mut radio = MemoryRadio::new().with_log(log.clone());
        let mut network = MemoryNetwork::new().with_log(log.clone());

        radio.enable(FrameSink::new(SnapshotStore::new())).await.unwrap();
        network.connect().await.unwrap();
        assert!(!log.radio_exclusive());

        log.clear();
        radio.disable().await;
        network.connect().await.unwrap();
        assert!(log.radio_exclusive());
        assert_eq!(log.events(), vec![Event::NetworkConnected]);
    }

    #[tokio::test]
    async fn broker_rejects_publish_when_disconnected() {
        let mut broker = MemoryBroker::new();
        assert!(!broker.publish("t", "{}").await);
        assert_eq!(broker.publish_attempts(), 0);

        broker.fail_next_connects(1);
        let settings = BrokerSettings::new("broker", "t");
        assert!(broker.connect(&settings, "a").await.is_err());
        broker.connect(&settings, "b").await.unwrap();
        assert!(broker.publish("t", "{}").await);
        assert_eq!(broker.client_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
