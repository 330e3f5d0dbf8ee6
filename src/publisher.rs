//! Snapshot publishing.
//!
//! A snapshot is split into one small message per received group, in a fixed order:
//! the four cell banks, then status, temperatures and pack. Each message is a flat JSON object
//! of named values, e.g. `{"V1":3.3,"V2":3.301,"V3":3.302,"V4":3.303}`.
//!
//! Messages are emitted one at a time and each waits for the broker's acknowledgement. A
//! rejected message never stops the sequence: every message is attempted exactly once.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::Duration;
use tracing::{debug, warn};

use crate::provider::BrokerClient;
use crate::snapshot::Snapshot;
use crate::types::GroupId;
use crate::{GatewayError, Result};

/// Order in which groups are published.
pub const PUBLISH_ORDER: [GroupId; GroupId::COUNT] = [
    GroupId::Cells1,
    GroupId::Cells2,
    GroupId::Cells3,
    GroupId::Cells4,
    GroupId::Status,
    GroupId::Temperatures,
    GroupId::Pack,
];

/// Largest number of fields in one message.
pub const MAX_FIELDS_PER_MESSAGE: usize = 7;

/// One bounded message covering a single group.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    group: GroupId,
    values: Vec<f32>,
}

impl Message {
    fn for_group(snapshot: &Snapshot, group: GroupId) -> Self {
        let values = snapshot.reading(group).values().to_vec();
        debug_assert!(values.len() <= MAX_FIELDS_PER_MESSAGE);
        Self { group, values }
    }

    /// Group this message covers.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Field names paired with their rounded values, in payload order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        let decimals = self.group.decimals();
        self.group.field_names().iter().copied().zip(self.values.iter().map(move |v| round(*v, decimals)))
    }

    /// Encode as a flat JSON object.
    ///
    /// Fails if a value is NaN or infinite, which JSON cannot carry.
    pub fn to_json(&self) -> Result<String> {
        if let Some((name, value)) = self.fields().find(|(_, value)| !value.is_finite()) {
            return Err(GatewayError::Encode {
                message: self.group.to_string(),
                details: format!("{} is {}", name, value),
            });
        }
        serde_json::to_string(self).map_err(|e| GatewayError::Encode {
            message: self.group.to_string(),
            details: e.to_string(),
        })
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

fn round(value: f32, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value as f64 * scale).round() / scale
}

/// Lazy, ordered sequence of messages for the received groups of `snapshot`.
///
/// Groups whose received flag is clear are skipped; a zero value in a received group is
/// still published.
pub fn messages(snapshot: &Snapshot) -> impl Iterator<Item = Message> + '_ {
    PUBLISH_ORDER
        .into_iter()
        .filter(|group| snapshot.is_received(*group))
        .map(|group| Message::for_group(snapshot, group))
}

/// Outcome of one publish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Messages attempted
    pub attempted: usize,
    /// Messages acknowledged by the broker
    pub accepted: usize,
    /// Groups whose message was rejected or could not be encoded
    pub failed: Vec<GroupId>,
}

impl PublishReport {
    /// True only if every attempted message was accepted.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.accepted == self.attempted
    }
}

/// Emits snapshot messages to a broker client.
#[derive(Debug, Clone)]
pub struct Publisher {
    topic: String,
    spacing: Duration,
}

impl Publisher {
    /// Publisher for `topic` with `spacing` between messages.
    pub fn new(topic: impl Into<String>, spacing: Duration) -> Self {
        Self { topic: topic.into(), spacing }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish every message of `snapshot`, one acknowledgement at a time.
    pub async fn publish<B>(&self, snapshot: &Snapshot, broker: &mut B) -> PublishReport
    where
        B: BrokerClient + ?Sized,
    {
        let mut report = PublishReport::default();

        for (index, message) in messages(snapshot).enumerate() {
            if index > 0 && !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }
            report.attempted += 1;

            let accepted = match message.to_json() {
                Ok(payload) if broker.is_connected() => {
                    debug!("Publishing {} to {}: {}", message.group(), self.topic, payload);
                    broker.publish(&self.topic, &payload).await
                }
                Ok(_) => {
                    warn!("Broker not connected, dropping {} message", message.group());
                    false
                }
                Err(e) => {
                    warn!("{}", e);
                    false
                }
            };

            if accepted {
                report.accepted += 1;
            } else {
                warn!("Publish of {} message failed", message.group());
                report.failed.push(message.group());
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryBroker;
    use crate::types::{GroupReading, PackReading};
    use tokio::time::Instant;

    fn full_snapshot() -> Snapshot {
        let now = Instant::now();
        let mut snapshot = Snapshot::new();
        snapshot.apply(GroupId::Cells1, GroupReading::Cells([3.3, 3.301, 3.302, 3.303]), now);
        snapshot.apply(GroupId::Cells2, GroupReading::Cells([3.31; 4]), now);
        snapshot.apply(GroupId::Cells3, GroupReading::Cells([3.32; 4]), now);
        snapshot.apply(GroupId::Cells4, GroupReading::Cells([3.33; 4]), now);
        snapshot.apply(GroupId::Pack, GroupReading::Pack(PackReading([52.8, -12.5, 52.7, 0.0])), now);
        snapshot.apply(GroupId::Temperatures, GroupReading::Temperatures([21.0, 22.0, -3.0, 25.0]), now);
        snapshot.apply(GroupId::Status, GroupReading::Status([1.0, 0.5, 0.0, 0.1, 0.2, 2.0, 1.5]), now);
        snapshot
    }

    async fn connected_broker() -> MemoryBroker {
        let mut broker = MemoryBroker::new();
        let settings = crate::BrokerSettings::new("broker", "bms/pack");
        broker.connect(&settings, "test").await.unwrap();
        broker
    }

    #[test]
    fn messages_follow_fixed_order() {
        let snapshot = full_snapshot();
        let groups: Vec<GroupId> = messages(&snapshot).map(|m| m.group()).collect();
        assert_eq!(groups, PUBLISH_ORDER.to_vec());
    }

    #[test]
    fn messages_skip_unreceived_groups() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(GroupId::Pack, GroupReading::empty(GroupId::Pack), Instant::now());
        let groups: Vec<GroupId> = messages(&snapshot).map(|m| m.group()).collect();
        assert_eq!(groups, vec![GroupId::Pack]);
    }

    #[test]
    fn payloads_keep_field_order_and_rounding() {
        let snapshot = full_snapshot();
        let payloads: Vec<String> = messages(&snapshot).map(|m| m.to_json().unwrap()).collect();
        assert_eq!(payloads[0], r#"{"V1":3.3,"V2":3.301,"V3":3.302,"V4":3.303}"#);
        assert_eq!(payloads[4], r#"{"S1":1.0,"S2":0.5,"S3":0.0,"S4":0.1,"S5":0.2,"S6":2.0,"S7":1.5}"#);
        assert_eq!(payloads[5], r#"{"T1":21.0,"T2":22.0,"T3":-3.0,"T4":25.0}"#);
        assert_eq!(payloads[6], r#"{"VT":52.8,"A":-12.5,"V0":52.7,"A2":0.0}"#);
    }

    #[test]
    fn every_message_is_bounded() {
        let snapshot = full_snapshot();
        for message in messages(&snapshot) {
            let count = message.fields().count();
            assert!((3..=MAX_FIELDS_PER_MESSAGE).contains(&count));
        }
    }

    #[tokio::test]
    async fn publishes_every_group_to_one_topic() {
        let snapshot = full_snapshot();
        let mut broker = connected_broker().await;
        let publisher = Publisher::new("bms/pack", Duration::ZERO);

        let report = publisher.publish(&snapshot, &mut broker).await;
        assert!(report.is_success());
        assert_eq!(report.attempted, 7);

        let published = broker.published();
        assert_eq!(published.len(), 7);
        assert!(published.iter().all(|(topic, _)| topic == "bms/pack"));
    }

    #[tokio::test]
    async fn rejected_message_does_not_stop_the_sequence() {
        let snapshot = full_snapshot();
        let mut broker = connected_broker().await;
        broker.script_acks([true, false]);
        let publisher = Publisher::new("bms/pack", Duration::ZERO);

        let report = publisher.publish(&snapshot, &mut broker).await;
        assert!(!report.is_success());
        assert_eq!(report.attempted, 7);
        assert_eq!(report.accepted, 6);
        assert_eq!(report.failed, vec![GroupId::Cells2]);
        // Every message reached the broker, including the rejected one.
        assert_eq!(broker.publish_attempts(), 7);
    }

    #[tokio::test]
    async fn disconnected_broker_fails_every_message() {
        let snapshot = full_snapshot();
        let mut broker = MemoryBroker::new();
        let publisher = Publisher::new("bms/pack", Duration::ZERO);

        let report = publisher.publish(&snapshot, &mut broker).await;
        assert_eq!(report.attempted, 7);
        assert_eq!(report.failed.len(), 7);
        assert_eq!(broker.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn non_finite_reading_fails_only_its_message() {
        let mut snapshot = full_snapshot();
        let reading = GroupReading::Pack(PackReading([52.8, f32::NAN, 52.7, 0.0]));
        snapshot.apply(GroupId::Pack, reading, Instant::now());

        let pack = messages(&snapshot).find(|m| m.group() == GroupId::Pack).unwrap();
        let err = pack.to_json().unwrap_err();
        assert!(matches!(err, GatewayError::Encode { .. }));
        assert!(err.to_string().contains("A is NaN"));

        let mut broker = connected_broker().await;
        let publisher = Publisher::new("bms/pack", Duration::ZERO);
        let report = publisher.publish(&snapshot, &mut broker).await;
        assert_eq!(report.failed, vec![GroupId::Pack]);
        assert_eq!(broker.publish_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_separates_messages() {
        let snapshot = full_snapshot();
        let mut broker = connected_broker().await;
        let publisher = Publisher::new("bms/pack", Duration::from_millis(250));

        let start = Instant::now();
        publisher.publish(&snapshot, &mut broker).await;
        assert_eq!(start.elapsed(), Duration::from_millis(250 * 6));
    }
}
