//! Gateway runner: owns the collaborators and drives the receive/publish cycle.
//!
//! [`Gateway::step`] runs the current state's handler once and returns the new state, which
//! makes each transition observable in tests. [`Gateway::run`] repeats it until cancelled,
//! waking on every store update (or the evaluation tick) while receiving frames.

use futures::Stream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BrokerSettings, ConfigStore, EntryState, GatewayConfig};
use crate::machine::{
    GatewayState, ReceiveOutcome, Session, after_broker, after_network, after_publish,
    after_recovery, evaluate_receive, incomplete,
};
use crate::provider::{BrokerClient, FrameSink, NetworkLink, PeerRadio};
use crate::publisher::{PublishReport, Publisher};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::{GatewayError, Result};

/// Which side of the shared radio is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioMode {
    #[default]
    Off,
    /// Peer-to-peer receive mode
    Peer,
    /// Infrastructure network mode
    Infrastructure,
}

/// State owned by the gateway loop.
#[derive(Debug)]
pub struct GatewayContext {
    config: GatewayConfig,
    store: SnapshotStore,
    session: Session,
}

impl GatewayContext {
    fn new(config: GatewayConfig, entry: GatewayState) -> Self {
        let session = Session::new(entry, &config, Instant::now());
        Self { config, store: SnapshotStore::new(), session }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn reset(&mut self) {
        self.store.reset();
        self.session.reset(&self.config, Instant::now());
    }
}

/// The telemetry gateway.
pub struct Gateway<R, N, B> {
    radio: R,
    network: N,
    broker: B,
    config_store: Box<dyn ConfigStore>,
    context: GatewayContext,
    settings: BrokerSettings,
    publisher: Publisher,
    radio_mode: RadioMode,
    radio_failures: u32,
    restarts: u64,
    cycles: u64,
    last_error: Option<GatewayError>,
    last_report: Option<PublishReport>,
    state_tx: watch::Sender<GatewayState>,
}

impl<R, N, B> Gateway<R, N, B>
where
    R: PeerRadio,
    N: NetworkLink,
    B: BrokerClient,
{
    /// Validate the configuration, load broker settings and enter the configured entry state.
    ///
    /// Fails only when the configuration is invalid or no broker settings are stored; a peer
    /// radio that cannot be enabled puts the gateway in `Error` instead.
    pub async fn start<S>(
        config: GatewayConfig,
        radio: R,
        network: N,
        broker: B,
        config_store: S,
    ) -> Result<Self>
    where
        S: ConfigStore + 'static,
    {
        config.validate()?;
        let settings = load_settings(&config_store)?;
        info!("Broker {}:{} topic '{}'", settings.server, settings.port, settings.topic);

        let entry = match config.entry_state {
            EntryState::Receiving => GatewayState::ReceivingFrames,
            EntryState::Network => GatewayState::ConnectingNetwork,
        };
        let publisher = Publisher::new(settings.topic.clone(), config.publish_spacing());
        let (state_tx, _) = watch::channel(entry);

        let mut gateway = Self {
            radio,
            network,
            broker,
            config_store: Box::new(config_store),
            context: GatewayContext::new(config, entry),
            settings,
            publisher,
            radio_mode: RadioMode::Off,
            radio_failures: 0,
            restarts: 0,
            cycles: 0,
            last_error: None,
            last_report: None,
            state_tx,
        };

        if entry == GatewayState::ReceivingFrames {
            let radio = gateway.activate_peer().await;
            let next = after_recovery(&radio);
            gateway.record(radio);
            gateway.transition(next);
        }

        info!("Gateway started in {}", gateway.state());
        Ok(gateway)
    }

    /// Current state.
    pub fn state(&self) -> GatewayState {
        self.context.session.state()
    }

    /// Stream of state changes, starting with the current state.
    pub fn state_updates(&self) -> impl Stream<Item = GatewayState> + 'static {
        WatchStream::new(self.state_tx.subscribe())
    }

    /// Stream of snapshot updates, starting with the current snapshot.
    pub fn snapshot_updates(&self) -> impl Stream<Item = Snapshot> + 'static {
        WatchStream::new(self.context.store.subscribe())
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.context.store.snapshot()
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    pub fn radio_mode(&self) -> RadioMode {
        self.radio_mode
    }

    pub fn broker_settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Most recent failure, cleared by the next successful cycle.
    pub fn last_error(&self) -> Option<&GatewayError> {
        self.last_error.as_ref()
    }

    /// Report of the most recent publish pass; `None` if it was skipped.
    pub fn last_report(&self) -> Option<&PublishReport> {
        self.last_report.as_ref()
    }

    /// Completed publish cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Times the gateway reinitialized itself.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Run the current state's handler once and return the resulting state.
    pub async fn step(&mut self) -> GatewayState {
        match self.state() {
            GatewayState::ReceivingFrames => self.receive_tick(),
            GatewayState::ConnectingNetwork => self.connect_network().await,
            GatewayState::ConnectingBroker => self.connect_broker().await,
            GatewayState::Publishing => self.publish().await,
            GatewayState::Error => self.recover().await,
        }
        self.state()
    }

    /// Drive the cycle until `cancel` fires.
    ///
    /// Cancellation is checked between steps; a cycle already connecting or publishing runs to
    /// its next state first. The radio and links are shut down on exit.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Gateway loop started in {}", self.state());
        let mut updates = self.context.store.subscribe();
        let tick = self.context.config.tick();

        while !cancel.is_cancelled() {
            if self.state() == GatewayState::ReceivingFrames {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = updates.changed() => {}
                    _ = tokio::time::sleep(tick) => {}
                }
            }
            self.step().await;
        }

        self.shutdown().await;
        info!("Gateway loop stopped after {} cycles", self.cycles);
    }

    /// Last-resort recovery: drop both radio modes, clear all cycle state, reload broker
    /// settings and start receiving again.
    pub async fn reinitialize(&mut self) -> Result<()> {
        warn!("Reinitializing gateway");
        self.restarts += 1;
        self.shutdown().await;
        self.context.reset();
        self.radio_failures = 0;

        match load_settings(self.config_store.as_ref()) {
            Ok(settings) => {
                self.publisher =
                    Publisher::new(settings.topic.clone(), self.context.config.publish_spacing());
                self.settings = settings;
            }
            Err(e) => warn!("Keeping current broker settings: {}", e),
        }

        let radio = self.activate_peer().await;
        self.transition(after_recovery(&radio));
        radio
    }

    /// Disable the peer radio and drop broker and network connections.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
        if self.radio_mode == RadioMode::Peer {
            self.radio.disable().await;
        }
        self.radio_mode = RadioMode::Off;
    }

    fn receive_tick(&mut self) {
        let now = Instant::now();
        let context = &mut self.context;
        let (session, config) = (&mut context.session, &context.config);

        // Evaluate and clear under the store's lock so a frame delivered in between survives.
        let outcome = context.store.modify(|snapshot| {
            let outcome = evaluate_receive(session, snapshot, config, now);
            let changed = match &outcome {
                ReceiveOutcome::ExpireStale(_) => {
                    !snapshot.expire_stale(config.staleness(), now).is_empty()
                }
                outcome if outcome.resets_snapshot() => {
                    snapshot.reset();
                    true
                }
                _ => false,
            };
            (outcome, changed)
        });

        match &outcome {
            ReceiveOutcome::Wait => {}
            ReceiveOutcome::Complete { stale } if stale.is_empty() => info!("Snapshot complete"),
            ReceiveOutcome::Complete { stale } => {
                warn!("Snapshot complete with {} stale group(s): {:?}", stale.len(), stale);
            }
            ReceiveOutcome::ExpireStale(expired) => {
                debug!("Expired {} stale group(s)", expired.len());
            }
            ReceiveOutcome::PublishPartial { missing } => {
                warn!("{}; publishing partial snapshot", incomplete(missing));
            }
            ReceiveOutcome::Retry { attempt, missing } => {
                warn!(
                    "{}; listening again (retry {}, timeout {:?})",
                    incomplete(missing),
                    attempt,
                    self.context.session.timeout()
                );
            }
        }
        self.announce();
    }

    async fn connect_network(&mut self) {
        self.activate_infrastructure().await;
        let result = self.associate().await;
        let next = after_network(&result);
        self.record(result);
        self.transition(next);
    }

    async fn associate(&mut self) -> Result<()> {
        self.network.connect().await?;

        let limit = self.context.config.network_timeout();
        let poll = self.context.config.network_poll();
        let network = &self.network;
        tokio::time::timeout(limit, async {
            while !network.is_connected() {
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .map_err(|_| GatewayError::timed_out("network association", limit))?;

        info!("Network connected");
        Ok(())
    }

    async fn connect_broker(&mut self) {
        let result = self.open_broker().await;
        let next = after_broker(&result);
        self.record(result);
        self.transition(next);
    }

    async fn open_broker(&mut self) -> Result<()> {
        if !self.network.is_connected() {
            return Err(GatewayError::network_failed("link dropped before broker connect"));
        }

        let attempts = self.context.config.broker_attempts;
        let delay = self.context.config.broker_retry_delay();
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let client_id = client_id(&self.context.config.client_id_prefix);
            match self.broker.connect(&self.settings, &client_id).await {
                Ok(()) => {
                    info!("Broker connected as {}", client_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Broker attempt {}/{} failed: {}", attempt, attempts, e);
                    reason = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        Err(GatewayError::broker_failed(reason, attempts))
    }

    async fn publish(&mut self) {
        let snapshot = self.context.store.snapshot();

        if snapshot.is_all_zero() {
            info!("Snapshot holds no data, skipping publish");
            self.last_report = None;
        } else {
            let report = self.publisher.publish(&snapshot, &mut self.broker).await;
            if report.is_success() {
                info!("Published {} message(s)", report.accepted);
            } else {
                warn!(
                    "Published {}/{} message(s), failed: {:?}",
                    report.accepted, report.attempted, report.failed
                );
            }
            self.last_report = Some(report);
        }

        self.teardown().await;
        self.context.reset();
        self.cycles += 1;

        let radio = self.activate_peer().await;
        let next = after_publish(&radio);
        if radio.is_ok() {
            self.last_error = None;
        }
        self.record(radio);
        self.transition(next);
    }

    async fn recover(&mut self) {
        self.teardown().await;
        tokio::time::sleep(self.context.config.error_settle()).await;
        self.context.reset();

        let radio = self.activate_peer().await;
        if radio.is_err() {
            self.radio_failures += 1;
        } else {
            self.radio_failures = 0;
        }
        let next = after_recovery(&radio);
        self.record(radio);
        self.transition(next);

        if self.radio_failures >= self.context.config.max_radio_failures {
            error!("Peer radio failed {} times in a row", self.radio_failures);
            let result = self.reinitialize().await;
            self.record(result);
        }
    }

    /// Drop broker and network; leaves the peer radio alone.
    async fn teardown(&mut self) {
        if self.broker.is_connected() {
            self.broker.disconnect().await;
        }
        if self.radio_mode == RadioMode::Infrastructure {
            self.network.disconnect().await;
            self.radio_mode = RadioMode::Off;
        }
    }

    async fn activate_peer(&mut self) -> Result<()> {
        if self.radio_mode == RadioMode::Infrastructure {
            self.network.disconnect().await;
            self.radio_mode = RadioMode::Off;
        }
        if self.radio_mode == RadioMode::Peer {
            return Ok(());
        }

        self.radio.enable(FrameSink::new(self.context.store.clone())).await?;
        self.radio_mode = RadioMode::Peer;
        debug!("Peer radio enabled");
        Ok(())
    }

    async fn activate_infrastructure(&mut self) {
        if self.radio_mode == RadioMode::Peer {
            self.radio.disable().await;
            debug!("Peer radio disabled");
        }
        self.radio_mode = RadioMode::Infrastructure;
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            warn!("{}", e);
            self.last_error = Some(e);
        }
    }

    fn transition(&mut self, next: GatewayState) {
        self.context.session.enter(next, Instant::now());
        self.announce();
    }

    fn announce(&self) {
        let state = self.context.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!("{} -> {}", current, state);
            *current = state;
            true
        });
    }
}

fn load_settings(store: &dyn ConfigStore) -> Result<BrokerSettings> {
    let settings =
        store.load_broker()?.ok_or_else(|| GatewayError::configuration_missing("broker.server"))?;
    if settings.topic.trim().is_empty() {
        return Err(GatewayError::configuration_missing("broker.topic"));
    }
    Ok(settings)
}

/// Fresh broker client id: `<prefix>-<4 hex digits>`.
fn client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..4])
}
