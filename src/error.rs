//! Error types for the gateway core.
//!
//! Every failure the gateway can hit is represented by [`GatewayError`]. None of them is fatal
//! to the gateway loop: the state machine routes network and broker failures through its
//! `Error` state and always comes back to receiving frames. Errors are still surfaced as values
//! so that callers (and tests) can inspect them.
//!
//! ## Error Categories
//!
//! - **Frame Errors**: transport buffers that do not have the expected size or length byte
//! - **Data Errors**: the receive window closed before every group arrived
//! - **Link Errors**: network association, broker connection and peer radio failures
//! - **Configuration Errors**: missing broker settings or unreadable configuration files
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use cellgate::GatewayError;
//!
//! let error = GatewayError::network_failed("association timed out");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::GroupId;

/// Result type alias for gateway operations.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Main error type for gateway operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Malformed frame: expected {expected} bytes, received {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("Frame payload length {length} exceeds 8 bytes")]
    FrameLength { length: usize },

    #[error("Incomplete data: {} group(s) missing ({})", missing.len(), format_groups(missing))]
    IncompleteData { missing: Vec<GroupId> },

    #[error("Network failure: {reason}")]
    Network {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Broker failure after {attempts} attempt(s): {reason}")]
    Broker { reason: String, attempts: u32 },

    #[error("Peer radio failure: {reason}")]
    Radio { reason: String },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Configuration missing: {key}")]
    ConfigurationMissing { key: String },

    #[error("Configuration file error: {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {details}")]
    ConfigParse { details: String },

    #[error("Failed to encode message '{message}': {details}")]
    Encode { message: String, details: String },

    #[error("Capture line {line}: {details}")]
    Capture { line: usize, details: String },
}

fn format_groups(groups: &[GroupId]) -> String {
    groups.iter().map(|g| g.as_str()).collect::<Vec<_>>().join(", ")
}

impl GatewayError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::MalformedFrame { .. } => false,
            GatewayError::FrameLength { .. } => false,
            GatewayError::IncompleteData { .. } => true,
            GatewayError::Network { .. } => true,
            GatewayError::Broker { .. } => true,
            GatewayError::Radio { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::ConfigurationMissing { .. } => false,
            GatewayError::Config { .. } => false,
            GatewayError::ConfigParse { .. } => false,
            GatewayError::Encode { .. } => false,
            GatewayError::Capture { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            GatewayError::MalformedFrame { .. } | GatewayError::FrameLength { .. } => vec![
                "Check that the sender uses the 16-byte frame layout",
                "Verify both radios run compatible firmware",
            ],
            GatewayError::IncompleteData { .. } => vec![
                "Check that the battery unit transmits every frame group",
                "Increase the receive timeout",
                "Move the gateway closer to the sender",
            ],
            GatewayError::Network { .. } => vec![
                "Verify stored network credentials",
                "Check access point availability",
                "Increase the network association timeout",
            ],
            GatewayError::Broker { .. } => vec![
                "Verify broker address and port",
                "Check broker credentials",
                "Confirm the broker accepts new clients",
            ],
            GatewayError::Radio { .. } => vec![
                "Reinitialize the radio driver",
                "Restart the gateway if the failure persists",
            ],
            GatewayError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Check signal strength",
            ],
            GatewayError::ConfigurationMissing { .. } => vec![
                "Run the provisioning portal to store broker settings",
                "Provide a broker settings file",
            ],
            GatewayError::Config { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            GatewayError::ConfigParse { .. } => vec![
                "Check configuration syntax",
                "Compare against the documented defaults",
            ],
            GatewayError::Encode { .. } => vec!["Check for non-finite readings in the snapshot"],
            GatewayError::Capture { .. } => {
                vec!["Use one ID#HEX frame per line", "Prefix comments with '#'"]
            }
        }
    }

    /// Helper constructor for network errors.
    pub fn network_failed(reason: impl Into<String>) -> Self {
        GatewayError::Network { reason: reason.into(), source: None }
    }

    /// Helper constructor for network errors with source.
    pub fn network_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        GatewayError::Network { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for broker errors.
    pub fn broker_failed(reason: impl Into<String>, attempts: u32) -> Self {
        GatewayError::Broker { reason: reason.into(), attempts }
    }

    /// Helper constructor for peer radio errors.
    pub fn radio_failed(reason: impl Into<String>) -> Self {
        GatewayError::Radio { reason: reason.into() }
    }

    /// Helper constructor for bounded waits that elapsed.
    pub fn timed_out(operation: impl Into<String>, duration: Duration) -> Self {
        GatewayError::Timeout { operation: operation.into(), duration }
    }

    /// Helper constructor for missing configuration keys.
    pub fn configuration_missing(key: impl Into<String>) -> Self {
        GatewayError::ConfigurationMissing { key: key.into() }
    }

    /// Helper constructor for invalid configuration values.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        GatewayError::ConfigParse { details: details.into() }
    }

    /// Helper constructor for unreadable capture log lines.
    pub fn capture(line: usize, details: impl Into<String>) -> Self {
        GatewayError::Capture { line, details: details.into() }
    }

    /// Helper constructor for configuration file errors with path context.
    pub fn config_file(path: PathBuf, source: std::io::Error) -> Self {
        GatewayError::Config { path, source }
    }
}

impl From<serde_yaml_ng::Error> for GatewayError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        GatewayError::ConfigParse { details: err.to_string() }
    }
}
