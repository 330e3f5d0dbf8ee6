//! Gateway state machine: states, session bookkeeping and transition functions.
//!
//! The gateway runs one cycle forever:
//!
//! ```text
//!  ReceivingFrames ──► ConnectingNetwork ──► ConnectingBroker ──► Publishing
//!        ▲                    │                     │                 │
//!        │                    ▼                     ▼                 │
//!        └─────────────────  Error  ◄───────────────┘                 │
//!        └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transitions are plain functions of their inputs so they can be tested without any radio.
//! The side effects (radio switching, connecting, publishing) live in
//! [`Gateway`](crate::Gateway).

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::GatewayConfig;
use crate::snapshot::Snapshot;
use crate::types::GroupId;
use crate::{GatewayError, Result};

/// Gateway states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// Peer radio active, collecting groups.
    ReceivingFrames,
    /// Peer radio off, associating with the network.
    ConnectingNetwork,
    /// Network up, connecting to the broker.
    ConnectingBroker,
    /// Broker connected, sending the snapshot.
    Publishing,
    /// Tearing down after a failure.
    Error,
}

impl GatewayState {
    pub const fn as_str(self) -> &'static str {
        match self {
            GatewayState::ReceivingFrames => "receiving_frames",
            GatewayState::ConnectingNetwork => "connecting_network",
            GatewayState::ConnectingBroker => "connecting_broker",
            GatewayState::Publishing => "publishing",
            GatewayState::Error => "error",
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state machine's own bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    state: GatewayState,
    entered_at: Instant,
    timeout: Duration,
    incomplete_retries: u32,
}

impl Session {
    /// Fresh session in `state`.
    pub fn new(state: GatewayState, config: &GatewayConfig, now: Instant) -> Self {
        Self { state, entered_at: now, timeout: config.receive_timeout(), incomplete_retries: 0 }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Instant the current state (or receive window) started.
    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    /// Active receive timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Incomplete receive windows so far in this cycle.
    pub fn incomplete_retries(&self) -> u32 {
        self.incomplete_retries
    }

    /// Move to `state`, restarting the state timer.
    pub fn enter(&mut self, state: GatewayState, now: Instant) {
        self.state = state;
        self.entered_at = now;
    }

    /// Back to initial values in `ReceivingFrames`.
    pub fn reset(&mut self, config: &GatewayConfig, now: Instant) {
        *self = Self::new(GatewayState::ReceivingFrames, config, now);
    }

    fn back_off(&mut self, max: Duration) {
        self.timeout = self.timeout.saturating_mul(2).min(max);
    }
}

/// Result of one evaluation tick in `ReceivingFrames`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Keep waiting.
    #[default]
    Wait,
    /// Every group is in. `stale` lists groups older than the staleness threshold.
    Complete { stale: Vec<GroupId> },
    /// Snapshot complete but these groups are stale; clear them and keep receiving.
    ///
    /// Only produced when `expire_stale_groups` is enabled.
    ExpireStale(Vec<GroupId>),
    /// Window closed; publish what was received.
    PublishPartial { missing: Vec<GroupId> },
    /// Window closed without enough data; reset the snapshot and listen again.
    Retry { attempt: u32, missing: Vec<GroupId> },
}

impl ReceiveOutcome {
    /// State to enter after this outcome.
    pub fn next_state(&self) -> GatewayState {
        match self {
            ReceiveOutcome::Complete { .. } | ReceiveOutcome::PublishPartial { .. } => {
                GatewayState::ConnectingNetwork
            }
            ReceiveOutcome::Wait | ReceiveOutcome::ExpireStale(_) | ReceiveOutcome::Retry { .. } => {
                GatewayState::ReceivingFrames
            }
        }
    }

    /// Whether the caller must clear the snapshot.
    pub fn resets_snapshot(&self) -> bool {
        matches!(self, ReceiveOutcome::Retry { .. })
    }
}

/// Evaluate the receive window.
///
/// A complete snapshot moves on regardless of age; stale groups are only reported, unless
/// `expire_stale_groups` asks for them to be cleared and received again.
///
/// Every expired window doubles the timeout up to the configured maximum. An expired window
/// publishes partial data when the minimum groups are present or the retry cap is reached;
/// otherwise the retry counter grows and the window restarts.
pub fn evaluate_receive(
    session: &mut Session,
    snapshot: &Snapshot,
    config: &GatewayConfig,
    now: Instant,
) -> ReceiveOutcome {
    if snapshot.is_complete() {
        let stale = snapshot.stale_groups(config.staleness(), now);
        if config.expire_stale_groups && !stale.is_empty() {
            return ReceiveOutcome::ExpireStale(stale);
        }
        session.enter(GatewayState::ConnectingNetwork, now);
        return ReceiveOutcome::Complete { stale };
    }

    if now.saturating_duration_since(session.entered_at) <= session.timeout {
        return ReceiveOutcome::Wait;
    }

    session.back_off(config.max_receive_timeout());
    let missing = snapshot.missing_groups();

    if snapshot.has_all(&config.minimum_groups)
        || session.incomplete_retries >= config.max_incomplete_retries
    {
        session.enter(GatewayState::ConnectingNetwork, now);
        ReceiveOutcome::PublishPartial { missing }
    } else {
        session.incomplete_retries += 1;
        session.enter(GatewayState::ReceivingFrames, now);
        ReceiveOutcome::Retry { attempt: session.incomplete_retries, missing }
    }
}

/// Next state after network association.
pub fn after_network(result: &Result<()>) -> GatewayState {
    match result {
        Ok(()) => GatewayState::ConnectingBroker,
        Err(_) => GatewayState::Error,
    }
}

/// Next state after the broker connection attempts.
pub fn after_broker(result: &Result<()>) -> GatewayState {
    match result {
        Ok(()) => GatewayState::Publishing,
        Err(_) => GatewayState::Error,
    }
}

/// Next state after publishing and cleanup.
///
/// The publish outcome never matters; only reactivating the peer radio can fail the cycle.
pub fn after_publish(radio: &Result<()>) -> GatewayState {
    match radio {
        Ok(()) => GatewayState::ReceivingFrames,
        Err(_) => GatewayState::Error,
    }
}

/// Next state after error recovery.
pub fn after_recovery(radio: &Result<()>) -> GatewayState {
    match radio {
        Ok(()) => GatewayState::ReceivingFrames,
        Err(_) => GatewayState::Error,
    }
}

/// Error describing an incomplete window, for logs and reports.
pub fn incomplete(missing: &[GroupId]) -> GatewayError {
    GatewayError::IncompleteData { missing: missing.to_vec() }
}
