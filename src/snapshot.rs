//! Snapshot of the latest group readings and the shared store that holds it.
//!
//! [`Snapshot`] is a plain value: seven group slots, each with its reading and the instant it
//! was last received. The completeness and freshness checks live on it so they can be
//! evaluated on a stable copy.
//!
//! [`SnapshotStore`] is the shared handle. The radio callback writes through a
//! [`FrameSink`](crate::provider::FrameSink) while the gateway loop reads; every write
//! replaces one whole group inside a single watch-channel update, so a reader never observes a
//! half-written group.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::types::{GroupId, GroupReading, PackReading};

/// Latest reading of one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupSlot {
    reading: GroupReading,
    received_at: Option<Instant>,
}

impl GroupSlot {
    fn empty(group: GroupId) -> Self {
        Self { reading: GroupReading::empty(group), received_at: None }
    }

    /// Decoded values. Only meaningful when [`is_received`](Self::is_received) is true.
    pub fn reading(&self) -> &GroupReading {
        &self.reading
    }

    /// Instant of the last reception, `None` if not received since the last reset.
    pub fn received_at(&self) -> Option<Instant> {
        self.received_at
    }

    /// Whether the group has been received since the last reset.
    pub fn is_received(&self) -> bool {
        self.received_at.is_some()
    }

    /// Whether the slot was received more than `threshold` before `now`.
    fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        self.received_at.is_some_and(|at| now.saturating_duration_since(at) > threshold)
    }
}

/// All seven groups plus their reception metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    slots: [GroupSlot; GroupId::COUNT],
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// Empty snapshot: nothing received, every value zero.
    pub fn new() -> Self {
        Self { slots: GroupId::ALL.map(GroupSlot::empty) }
    }

    /// Clear every group, flag and timestamp.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Replace one group's reading and mark it received at `at`.
    ///
    /// Readings whose shape does not match `group` are ignored.
    pub fn apply(&mut self, group: GroupId, reading: GroupReading, at: Instant) -> bool {
        if !reading.fits(group) {
            return false;
        }
        self.slots[group.index()] = GroupSlot { reading, received_at: Some(at) };
        true
    }

    /// Slot of `group`.
    pub fn slot(&self, group: GroupId) -> &GroupSlot {
        &self.slots[group.index()]
    }

    /// Reading of `group` (zeros if never received).
    pub fn reading(&self, group: GroupId) -> &GroupReading {
        &self.slots[group.index()].reading
    }

    /// Whether `group` has been received since the last reset.
    pub fn is_received(&self, group: GroupId) -> bool {
        self.slots[group.index()].is_received()
    }

    /// True iff all seven groups have been received.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(GroupSlot::is_received)
    }

    /// True iff every group in `groups` has been received.
    pub fn has_all(&self, groups: &[GroupId]) -> bool {
        groups.iter().all(|group| self.is_received(*group))
    }

    /// True iff no received group is older than `threshold`.
    ///
    /// Groups never received do not count against freshness.
    pub fn is_fresh(&self, threshold: Duration, now: Instant) -> bool {
        !self.slots.iter().any(|slot| slot.is_stale(threshold, now))
    }

    /// Received groups older than `threshold`.
    pub fn stale_groups(&self, threshold: Duration, now: Instant) -> Vec<GroupId> {
        GroupId::ALL.into_iter().filter(|g| self.slot(*g).is_stale(threshold, now)).collect()
    }

    /// Clear the groups older than `threshold` and return them.
    pub fn expire_stale(&mut self, threshold: Duration, now: Instant) -> Vec<GroupId> {
        let stale = self.stale_groups(threshold, now);
        for group in &stale {
            self.slots[group.index()] = GroupSlot::empty(*group);
        }
        stale
    }

    /// True iff every value in every group is zero, regardless of received flags.
    pub fn is_all_zero(&self) -> bool {
        self.slots.iter().all(|slot| slot.reading.is_zero())
    }

    /// Groups received since the last reset.
    pub fn received_groups(&self) -> Vec<GroupId> {
        GroupId::ALL.into_iter().filter(|g| self.is_received(*g)).collect()
    }

    /// Groups not yet received.
    pub fn missing_groups(&self) -> Vec<GroupId> {
        GroupId::ALL.into_iter().filter(|g| !self.is_received(*g)).collect()
    }

    /// All sixteen cell voltages, V1 first.
    pub fn cell_voltages(&self) -> [f32; 16] {
        let mut volts = [0.0; 16];
        for group in [GroupId::Cells1, GroupId::Cells2, GroupId::Cells3, GroupId::Cells4] {
            if let (Some(first), GroupReading::Cells(values)) =
                (group.first_cell(), self.reading(group))
            {
                volts[first..first + 4].copy_from_slice(values);
            }
        }
        volts
    }

    /// Pack readings.
    pub fn pack(&self) -> PackReading {
        match self.reading(GroupId::Pack) {
            GroupReading::Pack(pack) => *pack,
            _ => PackReading::default(),
        }
    }

    /// Temperatures T1-T4.
    pub fn temperatures(&self) -> [f32; 4] {
        match self.reading(GroupId::Temperatures) {
            GroupReading::Temperatures(values) => *values,
            _ => [0.0; 4],
        }
    }

    /// Status values S1-S7.
    pub fn status(&self) -> [f32; 7] {
        match self.reading(GroupId::Status) {
            GroupReading::Status(values) => *values,
            _ => [0.0; 7],
        }
    }
}

/// Shared handle to the current snapshot.
///
/// Cloning the handle shares the same underlying snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Create a store holding an empty snapshot.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::new());
        Self { tx: Arc::new(tx) }
    }

    /// Swap in one group's reading as a single visible update.
    pub fn apply(&self, group: GroupId, reading: GroupReading, at: Instant) -> bool {
        let mut applied = false;
        self.tx.send_modify(|snapshot| applied = snapshot.apply(group, reading, at));
        applied
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Groups not yet received.
    pub fn missing_groups(&self) -> Vec<GroupId> {
        self.tx.borrow().missing_groups()
    }

    /// Clear every group.
    pub fn reset(&self) {
        self.tx.send_modify(Snapshot::reset);
    }

    /// Clear groups older than `threshold`, returning them.
    pub fn expire_stale(&self, threshold: Duration, now: Instant) -> Vec<GroupId> {
        let mut expired = Vec::new();
        self.tx.send_if_modified(|snapshot| {
            expired = snapshot.expire_stale(threshold, now);
            !expired.is_empty()
        });
        expired
    }

    /// Run `f` on the snapshot under the store's lock.
    ///
    /// `f` returns its result and whether it changed the snapshot; subscribers are notified
    /// only in that case. Frames applied concurrently wait until `f` returns.
    pub fn modify<T: Default>(&self, f: impl FnOnce(&mut Snapshot) -> (T, bool)) -> T {
        let mut result = T::default();
        self.tx.send_if_modified(|snapshot| {
            let (value, changed) = f(snapshot);
            result = value;
            changed
        });
        result
    }

    /// Receiver notified on every store update.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}
