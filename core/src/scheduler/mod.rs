//! Periodic poll cycle and snapshot publication.
//!
//! A single [`PollScheduler`] task owns the device session and the rate
//! history. Each cycle it fetches the mirroring configuration, samples
//! every referenced interface once, validates every session and publishes
//! one immutable [`Snapshot`] to the [`SnapshotStore`]. Readers only ever
//! touch the store.

pub mod store;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, RetryPolicy, Thresholds, Timeouts, MIN_DURATION};
use crate::errors::SessionError;
use crate::monitoring::{
    check_device_error, interface_counters_command, parse_interface_counters,
    parse_port_mirroring_config, validate, AdminState, ConnectionStatus, CounterSample,
    MirroringSessionDef, RateSample, RateTracker, SessionReport, Snapshot, ValidationVerdict,
    PORT_MIRRORING_CONFIG_COMMAND,
};
use crate::session::{Backoff, CliMode, Connector, SessionHandle};

pub use self::store::SnapshotStore;

/// Poll-loop tuning taken from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub thresholds: Thresholds,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
}

impl From<&MonitorConfig> for PollSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            thresholds: config.thresholds,
            timeouts: config.timeouts,
            retry: config.retry,
        }
    }
}

/// Wakes the scheduler for an immediate cycle.
#[derive(Clone, Default)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cycle as soon as the current one (if any) finishes.
    /// Requests made while one is already pending are coalesced.
    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Wait for the next request.
    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// Counter results of one cycle, keyed by interface name.
#[derive(Default)]
struct CycleSamples {
    counters: HashMap<String, CounterSample>,
    rates: HashMap<String, RateSample>,
    failures: HashMap<String, String>,
    transport_error: Option<SessionError>,
}

impl CycleSamples {
    /// Why `interface` cannot contribute a rate this cycle, if anything.
    fn issue(&self, interface: &str) -> Option<String> {
        if let Some(reason) = self.failures.get(interface) {
            return Some(reason.clone());
        }
        if !self.counters.contains_key(interface) {
            return Some(format!("{interface} not sampled"));
        }
        if !self.rates.contains_key(interface) {
            return Some(format!("Waiting for a second counter sample of {interface}"));
        }
        None
    }
}

/// The single producer driving the device session.
pub struct PollScheduler<C: Connector> {
    session: SessionHandle<C>,
    store: SnapshotStore,
    settings: PollSettings,
    tracker: RateTracker,
    cycle: u64,
    refresh: RefreshHandle,
    shutdown: CancellationToken,
}

impl<C> PollScheduler<C>
where
    C: Connector + 'static,
    C::Channel: 'static,
{
    pub fn new(session: SessionHandle<C>, store: SnapshotStore, settings: PollSettings) -> Self {
        Self {
            session,
            store,
            settings,
            tracker: RateTracker::new(),
            cycle: 0,
            refresh: RefreshHandle::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        self.refresh.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run cycles until the shutdown token is cancelled, then close the
    /// session and reset the store.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "Poll scheduler started"
        );
        let mut ticker = tokio::time::interval(self.settings.interval.max(MIN_DURATION));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let refresh = self.refresh.clone();
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = refresh.requested() => {
                    debug!("On-demand refresh");
                    ticker.reset();
                }
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }

        info!("Poll scheduler stopping");
        // Waits for any in-flight command: close() needs the session lock.
        self.session.close().await;
        self.tracker.clear();
        self.store.reset();
        info!("Poll scheduler stopped");
    }

    /// Run one full cycle and publish its snapshot.
    pub async fn poll_once(&mut self) -> Arc<Snapshot> {
        self.cycle += 1;
        let cycle = self.cycle;
        debug!(cycle, "Poll cycle starting");

        let config_text = match self
            .execute_with_retry(PORT_MIRRORING_CONFIG_COMMAND, self.settings.timeouts.config())
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(cycle, error = %err, "Device unreachable, publishing stale snapshot");
                let previous = self.store.load();
                return self.store.publish(Snapshot::degraded_from(
                    &previous,
                    cycle,
                    Utc::now(),
                    err.to_string(),
                ));
            }
        };

        if let Err(err) = check_device_error(&config_text) {
            warn!(cycle, error = %err, "Device rejected configuration dump");
            let previous = self.store.load();
            let mut snapshot =
                Snapshot::degraded_from(&previous, cycle, Utc::now(), err.to_string());
            snapshot.connection_status = ConnectionStatus::Connected;
            snapshot.hostname = self.session.hostname().await;
            return self.store.publish(snapshot);
        }

        let outcome = parse_port_mirroring_config(&config_text);
        for note in &outcome.notes {
            warn!(session = %note.session, "{}", note.message);
        }

        let interfaces = referenced_interfaces(&outcome.sessions);
        let keep: HashSet<String> = interfaces.iter().cloned().collect();
        self.tracker.retain_interfaces(&keep);

        let samples = self.sample_interfaces(&interfaces).await;

        let sessions: Vec<SessionReport> = outcome
            .sessions
            .into_iter()
            .map(|def| self.report(def, &samples))
            .collect();

        let (connection_status, error) = match &samples.transport_error {
            Some(err) => (ConnectionStatus::Down, Some(err.to_string())),
            None => (ConnectionStatus::Connected, None),
        };

        let snapshot = Snapshot {
            cycle,
            hostname: self.session.hostname().await,
            connection_status,
            last_updated: Some(Utc::now()),
            error,
            sessions,
        };
        info!(
            cycle,
            sessions = snapshot.sessions.len(),
            interfaces = interfaces.len(),
            status = %snapshot.connection_status,
            "Poll cycle complete"
        );
        self.store.publish(snapshot)
    }

    async fn sample_interfaces(&mut self, interfaces: &[String]) -> CycleSamples {
        let mut samples = CycleSamples::default();

        for (idx, interface) in interfaces.iter().enumerate() {
            let command = match interface_counters_command(interface) {
                Ok(c) => c,
                Err(e) => {
                    samples.failures.insert(interface.clone(), e.to_string());
                    continue;
                }
            };

            let output = match self
                .execute_with_retry(&command, self.settings.timeouts.counters())
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    warn!(
                        interface = %interface,
                        error = %err,
                        "Counter sampling aborted for this cycle"
                    );
                    for skipped in &interfaces[idx..] {
                        samples
                            .failures
                            .insert(skipped.clone(), format!("{skipped} not sampled: {err}"));
                    }
                    samples.transport_error = Some(err);
                    break;
                }
            };

            match parse_interface_counters(interface, &output, Utc::now()) {
                Ok(sample) => {
                    if let Some(rate) = self.tracker.record(sample.clone()) {
                        samples.rates.insert(interface.clone(), rate);
                    }
                    samples.counters.insert(interface.clone(), sample);
                }
                Err(e) => {
                    warn!(interface = %interface, error = %e, "Unparseable counter output");
                    samples.failures.insert(interface.clone(), e.to_string());
                }
            }
        }
        samples
    }

    fn report(&self, def: MirroringSessionDef, samples: &CycleSamples) -> SessionReport {
        let source_rate = samples.rates.get(&def.source_interface).cloned();
        let dest_rate = samples.rates.get(&def.dest_interface).cloned();
        let issue = samples
            .issue(&def.source_interface)
            .or_else(|| samples.issue(&def.dest_interface));

        let verdict = match issue {
            Some(reason) if def.admin_state != AdminState::Disabled => {
                ValidationVerdict::unknown(&def.name, reason)
            }
            _ => validate(
                &def,
                source_rate.as_ref(),
                dest_rate.as_ref(),
                &self.settings.thresholds,
            ),
        };
        debug!(session = %def.name, status = %verdict.status, detail = %verdict.detail, "Verdict");

        SessionReport {
            source_counters: samples.counters.get(&def.source_interface).cloned(),
            dest_counters: samples.counters.get(&def.dest_interface).cloned(),
            definition: def,
            source_rate,
            dest_rate,
            verdict,
            stale: false,
        }
    }

    /// Connect if needed and run `command` in show mode, retrying
    /// retryable failures with backoff.
    async fn execute_with_retry(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        let mut backoff = Backoff::new(&self.settings.retry);
        loop {
            let result = match self.session.connect().await {
                Ok(()) => self.session.execute(command, CliMode::Show, timeout).await,
                Err(e) => Err(e),
            };
            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };
            let Some(delay) = backoff.next() else {
                return Err(err);
            };
            warn!(
                command,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                retries_left = backoff.remaining(),
                "Device command failed, retrying"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Every interface named by `sessions`, each once, in first-use order.
pub fn referenced_interfaces(sessions: &[MirroringSessionDef]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut interfaces = Vec::new();
    for session in sessions {
        for name in [&session.source_interface, &session.dest_interface] {
            if seen.insert(name.as_str()) {
                interfaces.push(name.clone());
            }
        }
    }
    interfaces
}
