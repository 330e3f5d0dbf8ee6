//! Gateway configuration and broker settings.
//!
//! [`GatewayConfig`] holds the timing and policy knobs of the state machine. Every field has a
//! default, so a YAML file only needs to name what it changes:
//!
//! ```rust
//! use cellgate::GatewayConfig;
//!
//! let config = GatewayConfig::from_yaml_str("receive_timeout_ms: 15000\nbroker_attempts: 5").unwrap();
//! assert_eq!(config.receive_timeout_ms, 15000);
//! assert_eq!(config.max_receive_timeout_ms, 30000);
//! ```
//!
//! Broker settings come from a read-only [`ConfigStore`]; the provisioning flow that writes
//! them lives outside this crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::types::GroupId;
use crate::{GatewayError, Result};

/// State the gateway enters at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Start by listening for peer frames.
    #[default]
    Receiving,
    /// Start with a network flush (gateway already holds network credentials).
    Network,
}

/// Timing and policy configuration for the gateway state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Initial receive window before an incomplete snapshot times out
    pub receive_timeout_ms: u64,
    /// Upper bound for the doubled receive window
    pub max_receive_timeout_ms: u64,
    /// Incomplete windows retried before partial data is published anyway
    pub max_incomplete_retries: u32,
    /// Age after which a received group is stale
    pub staleness_ms: u64,
    /// Clear stale groups of a complete snapshot and keep receiving instead of publishing
    pub expire_stale_groups: bool,
    /// Groups that make a partial snapshot worth publishing on timeout
    pub minimum_groups: Vec<GroupId>,
    /// Bounded wait for network association
    pub network_timeout_ms: u64,
    /// Interval between network status polls
    pub network_poll_ms: u64,
    /// Broker connection attempts per cycle
    pub broker_attempts: u32,
    /// Fixed delay between broker attempts
    pub broker_retry_delay_ms: u64,
    /// Delay between published messages
    pub publish_spacing_ms: u64,
    /// Pause in the error state before the radio is reactivated
    pub error_settle_ms: u64,
    /// Evaluation tick while receiving frames
    pub tick_ms: u64,
    /// Consecutive radio reactivation failures before a full reinitialize
    pub max_radio_failures: u32,
    /// State entered at startup
    pub entry_state: EntryState,
    /// Prefix of the per-cycle broker client id
    pub client_id_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 20_000,
            max_receive_timeout_ms: 30_000,
            max_incomplete_retries: 3,
            staleness_ms: 5_000,
            expire_stale_groups: false,
            minimum_groups: vec![GroupId::Cells1, GroupId::Cells2],
            network_timeout_ms: 10_000,
            network_poll_ms: 500,
            broker_attempts: 3,
            broker_retry_delay_ms: 2_000,
            publish_spacing_ms: 250,
            error_settle_ms: 1_000,
            tick_ms: 100,
            max_radio_failures: 3,
            entry_state: EntryState::Receiving,
            client_id_prefix: "cellgate".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::config_file(path.to_path_buf(), e))?;
        debug!("Loaded gateway configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the state machine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("receive_timeout_ms", self.receive_timeout_ms),
            ("staleness_ms", self.staleness_ms),
            ("network_timeout_ms", self.network_timeout_ms),
            ("network_poll_ms", self.network_poll_ms),
            ("tick_ms", self.tick_ms),
            ("broker_attempts", self.broker_attempts as u64),
            ("max_radio_failures", self.max_radio_failures as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(GatewayError::invalid_config(format!("{} must be greater than zero", name)));
        }
        if self.max_receive_timeout_ms < self.receive_timeout_ms {
            return Err(GatewayError::invalid_config(format!(
                "max_receive_timeout_ms ({}) is below receive_timeout_ms ({})",
                self.max_receive_timeout_ms, self.receive_timeout_ms
            )));
        }
        if self.client_id_prefix.is_empty() {
            return Err(GatewayError::invalid_config("client_id_prefix must not be empty"));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn max_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.max_receive_timeout_ms)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    pub fn network_poll(&self) -> Duration {
        Duration::from_millis(self.network_poll_ms)
    }

    pub fn broker_retry_delay(&self) -> Duration {
        Duration::from_millis(self.broker_retry_delay_ms)
    }

    pub fn publish_spacing(&self) -> Duration {
        Duration::from_millis(self.publish_spacing_ms)
    }

    pub fn error_settle(&self) -> Duration {
        Duration::from_millis(self.error_settle_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

fn default_port() -> u16 {
    1883
}

/// Broker connection settings, stored by the provisioning flow.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub topic: String,
}

impl BrokerSettings {
    /// Settings for `server` with the default port and no credentials.
    pub fn new(server: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            topic: topic.into(),
        }
    }

    /// Attach credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Override the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

// Keeps the password out of logs.
impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("topic", &self.topic)
            .finish()
    }
}

/// Read-only source of stored broker settings.
pub trait ConfigStore: Send + Sync {
    /// Load the stored settings; `Ok(None)` when nothing has been provisioned yet.
    fn load_broker(&self) -> Result<Option<BrokerSettings>>;
}

/// Settings held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    settings: Option<BrokerSettings>,
}

impl StaticConfigStore {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings: Some(settings) }
    }

    /// A store with nothing provisioned.
    pub fn empty() -> Self {
        Self { settings: None }
    }
}

impl ConfigStore for StaticConfigStore {
    fn load_broker(&self) -> Result<Option<BrokerSettings>> {
        Ok(self.settings.clone())
    }
}

/// Settings persisted as a YAML file.
///
/// A missing file or an empty `server` means nothing has been provisioned.
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for YamlConfigStore {
    fn load_broker(&self) -> Result<Option<BrokerSettings>> {
        let yaml = match std::fs::read_to_string(&self.path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No broker settings at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(GatewayError::config_file(self.path.clone(), e)),
        };

        let settings: BrokerSettings = serde_yaml_ng::from_str(&yaml)?;
        if settings.server.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.receive_timeout(), Duration::from_secs(20));
        assert_eq!(config.max_receive_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_incomplete_retries, 3);
        assert_eq!(config.staleness(), Duration::from_secs(5));
        assert!(!config.expire_stale_groups);
        assert_eq!(config.minimum_groups, vec![GroupId::Cells1, GroupId::Cells2]);
        assert_eq!(config.entry_state, EntryState::Receiving);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = GatewayConfig::from_yaml_str(
            "minimum_groups: [cells1, pack]\nentry_state: network\npublish_spacing_ms: 0\n",
        )
        .unwrap();
        assert_eq!(config.minimum_groups, vec![GroupId::Cells1, GroupId::Pack]);
        assert_eq!(config.entry_state, EntryState::Network);
        assert_eq!(config.publish_spacing(), Duration::ZERO);
        assert_eq!(config.broker_attempts, 3);
    }

    #[test]
    fn validation_rejects_inverted_timeouts() {
        let err = GatewayConfig::from_yaml_str("receive_timeout_ms: 40000").unwrap_err();
        assert!(matches!(err, GatewayError::ConfigParse { .. }));
        assert!(err.to_string().contains("max_receive_timeout_ms"));
    }

    #[test]
    fn validation_rejects_zero_values() {
        let config = GatewayConfig { broker_attempts: 0, ..Default::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broker_attempts"));
    }

    #[test]
    fn validation_rejects_zero_staleness() {
        let err = GatewayConfig::from_yaml_str("staleness_ms: 0").unwrap_err();
        assert!(err.to_string().contains("staleness_ms"));
    }

    #[test]
    fn unknown_group_names_fail_to_parse() {
        assert!(GatewayConfig::from_yaml_str("minimum_groups: [cells9]").is_err());
    }

    #[test]
    fn broker_debug_redacts_password() {
        let settings = BrokerSettings::new("10.0.0.2", "bms/pack1").with_credentials("gw", "hunter2");
        let debug = format!("{:?}", settings);
        assert!(debug.contains("10.0.0.2"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn yaml_store_reads_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: broker.local\nuser: gw\npassword: pw\ntopic: bms/pack1").unwrap();

        let store = YamlConfigStore::new(file.path());
        let settings = store.load_broker().unwrap().expect("settings should be present");
        assert_eq!(settings.server, "broker.local");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.topic, "bms/pack1");
    }

    #[test]
    fn yaml_store_treats_missing_file_as_unprovisioned() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlConfigStore::new(dir.path().join("broker.yaml"));
        assert!(store.load_broker().unwrap().is_none());
    }

    #[test]
    fn yaml_store_treats_blank_server_as_unprovisioned() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: \"\"\nport: 1884").unwrap();
        assert!(YamlConfigStore::new(file.path()).load_broker().unwrap().is_none());
    }

    #[test]
    fn static_store_round_trip() {
        assert!(StaticConfigStore::empty().load_broker().unwrap().is_none());
        let settings = BrokerSettings::new("broker", "t").with_port(8883);
        let loaded = StaticConfigStore::new(settings.clone()).load_broker().unwrap();
        assert_eq!(loaded, Some(settings));
    }
}
