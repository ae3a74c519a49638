//! Shared test utilities for mirrorwatch core integration tests.
//!
//! Provides a scripted fake device that speaks just enough of the device
//! CLI (prompt, `configure`/`end`, canned command output) to drive
//! [`RemoteSession`] and [`PollScheduler`] without a network.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mirrorwatch_core::config::{RetryPolicy, Thresholds, Timeouts};
use mirrorwatch_core::errors::SessionError;
use mirrorwatch_core::monitoring::{interface_counters_command, PORT_MIRRORING_CONFIG_COMMAND};
use mirrorwatch_core::scheduler::{PollScheduler, PollSettings, SnapshotStore};
use mirrorwatch_core::session::{CliChannel, Connector, RemoteSession, SessionHandle};

pub const HOSTNAME: &str = "dut-1";

/// Shared, scriptable device state.
#[derive(Clone, Default)]
pub struct FakeDevice {
    inner: Arc<Mutex<DeviceState>>,
}

#[derive(Default)]
pub struct DeviceState {
    pub hostname: String,
    pub config_mode: bool,
    /// Transport refuses connections while false.
    pub reachable: bool,
    /// Credentials are rejected while true.
    pub reject_auth: bool,
    /// Receiving this command drops the channel and takes the device offline.
    pub drop_on: Option<String>,
    pub responses: HashMap<String, String>,
    pub commands: Vec<String>,
    pub connects: usize,
    outbox: VecDeque<u8>,
    inbox: String,
    closed: bool,
}

impl DeviceState {
    fn prompt(&self) -> String {
        if self.config_mode {
            format!("{}(cfg)# ", self.hostname)
        } else {
            format!("{}# ", self.hostname)
        }
    }

    fn handle_line(&mut self, line: &str) {
        self.commands.push(line.to_string());
        if self.drop_on.as_deref() == Some(line) {
            self.closed = true;
            self.reachable = false;
            return;
        }
        let mut reply = format!("{line}\r\n");
        match line {
            "configure" => self.config_mode = true,
            "end" => self.config_mode = false,
            other => {
                if let Some(out) = self.responses.get(other) {
                    reply.push_str(out);
                }
            }
        }
        reply.push_str(&self.prompt());
        self.outbox.extend(reply.bytes());
    }
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        {
            let mut st = device.state();
            st.hostname = HOSTNAME.to_string();
            st.reachable = true;
        }
        device
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap()
    }

    /// Set the flattened port-mirroring configuration.
    pub fn set_config(&self, lines: &[String]) {
        let mut body = lines.join("\r\n");
        body.push_str("\r\n");
        self.state()
            .responses
            .insert(PORT_MIRRORING_CONFIG_COMMAND.to_string(), body);
    }

    /// Set the octet counters reported for `interface`.
    pub fn set_counters(&self, interface: &str, rx_octets: u64, tx_octets: u64) {
        let body = format!(
            "     RX octets: {rx_octets} ( 0 bps / 0.0 Mbps)\r\n     TX octets: {tx_octets} ( 0 bps / 0.0 Mbps)\r\n"
        );
        self.set_raw_counters(interface, &body);
    }

    /// Set arbitrary counter output for `interface`.
    pub fn set_raw_counters(&self, interface: &str, body: &str) {
        let command = interface_counters_command(interface).unwrap();
        self.state().responses.insert(command, body.to_string());
    }

    /// Add `rx`/`tx` octets to the current counters of `interface`.
    pub fn bump_counters(&self, interface: &str, rx: u64, tx: u64) {
        let (cur_rx, cur_tx) = self.counters(interface);
        self.set_counters(interface, cur_rx + rx, cur_tx + tx);
    }

    fn counters(&self, interface: &str) -> (u64, u64) {
        let command = interface_counters_command(interface).unwrap();
        let st = self.state();
        let body = st.responses.get(&command).cloned().unwrap_or_default();
        let value = |label: &str| {
            body.lines()
                .find_map(|l| l.trim().strip_prefix(label))
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        (value("RX octets:"), value("TX octets:"))
    }

    /// Number of counter commands received for `interface`.
    pub fn counter_requests(&self, interface: &str) -> usize {
        let command = interface_counters_command(interface).unwrap();
        self.state().commands.iter().filter(|c| **c == command).count()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

pub struct FakeChannel(FakeDevice);

impl CliChannel for FakeChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut st = self.0.state();
        if st.closed {
            return Ok(0);
        }
        if st.outbox.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(st.outbox.len());
        for (i, b) in st.outbox.drain(..n).enumerate() {
            buf[i] = b;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut st = self.0.state();
        if st.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        st.inbox.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = st.inbox.find('\n') {
            let line: String = st.inbox.drain(..=pos).collect();
            st.handle_line(line.trim_end());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.0.state().closed = true;
    }
}

pub struct FakeConnector(pub FakeDevice);

impl Connector for FakeConnector {
    type Channel = FakeChannel;

    fn connect(&self) -> Result<FakeChannel, SessionError> {
        let mut st = self.0.state();
        st.connects += 1;
        if !st.reachable {
            return Err(SessionError::Connect("connection refused".to_string()));
        }
        if st.reject_auth {
            return Err(SessionError::Auth("password rejected".to_string()));
        }
        st.closed = false;
        st.config_mode = false;
        st.outbox.clear();
        st.inbox.clear();
        let banner = format!("Last login: today\r\n\x1b[1m{}\x1b[0m", st.prompt());
        st.outbox.extend(banner.bytes());
        Ok(FakeChannel(self.0.clone()))
    }

    fn target(&self) -> String {
        format!("fake@{}", HOSTNAME)
    }
}

/// Flattened configuration for one session.
pub fn session_lines(name: &str, src: &str, dst: &str, direction: Option<&str>) -> Vec<String> {
    let prefix = format!("services port-mirroring session {name}");
    let source = match direction {
        Some(d) => format!("{prefix} source-interface {src} direction {d}"),
        None => format!("{prefix} source-interface {src}"),
    };
    vec![
        format!("{prefix} admin-state enabled"),
        source,
        format!("{prefix} destination-interface {dst}"),
    ]
}

/// Poll settings with short timeouts and near-instant retries.
pub fn fast_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_secs(3600),
        thresholds: Thresholds::default(),
        timeouts: Timeouts {
            connect_secs: 1.0,
            mode_switch_secs: 1.0,
            config_secs: 1.0,
            counters_secs: 1.0,
        },
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            jitter_ms: 0,
        },
    }
}

/// A scheduler wired to `device`, plus a reader handle on its store.
pub fn scheduler(device: &FakeDevice) -> (PollScheduler<FakeConnector>, SnapshotStore) {
    let session = RemoteSession::new(FakeConnector(device.clone()), Duration::from_secs(1));
    let store = SnapshotStore::new();
    let scheduler = PollScheduler::new(SessionHandle::new(session), store.clone(), fast_settings());
    (scheduler, store)
}

/// Wait long enough between cycles that rates are well-defined.
pub async fn between_cycles() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
