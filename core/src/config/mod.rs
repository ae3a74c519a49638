pub mod expand;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, SessionError};

/// Target device and credentials.
///
/// - `port`: SSH port, defaults to 22.
/// - `auth_method`: `"password"` (default), `"key"` or `"agent"`.
/// - `icmp_check`: ping the device before opening the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    #[serde(default = "default_password")]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default = "default_true")]
    pub icmp_check: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            username: default_username(),
            auth_method: default_auth_method(),
            password: default_password(),
            key_path: None,
            icmp_check: true,
        }
    }
}

/// Verdict thresholds, applied to full-precision rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// Maximum tolerated relative difference, in percent.
    #[serde(default = "default_delta_percent")]
    pub delta_percent: f64,
    /// Rates strictly below this many Mbps count as idle.
    #[serde(default = "default_idle_mbps")]
    pub idle_mbps: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            delta_percent: default_delta_percent(),
            idle_mbps: default_idle_mbps(),
        }
    }
}

/// Bounded timeouts for every remote step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: f64,
    #[serde(default = "default_mode_switch_secs")]
    pub mode_switch_secs: f64,
    #[serde(default = "default_config_secs")]
    pub config_secs: f64,
    #[serde(default = "default_counters_secs")]
    pub counters_secs: f64,
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs_f64(self.connect_secs)
    }

    pub fn mode_switch(&self) -> Duration {
        Duration::from_secs_f64(self.mode_switch_secs)
    }

    pub fn config(&self) -> Duration {
        Duration::from_secs_f64(self.config_secs)
    }

    pub fn counters(&self) -> Duration {
        Duration::from_secs_f64(self.counters_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            mode_switch_secs: default_mode_switch_secs(),
            config_secs: default_config_secs(),
            counters_secs: default_counters_secs(),
        }
    }
}

/// Reconnect and retry policy applied within one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Complete monitor configuration.
///
/// Loaded from an optional JSON file; every field has a default so a file
/// may list only what it overrides. An empty host fails [`validate`](Self::validate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub debug: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            poll_interval_secs: default_poll_interval_secs(),
            thresholds: Thresholds::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            listen_port: default_listen_port(),
            debug: false,
        }
    }
}

impl MonitorConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    /// Return a copy with all `${env:...}` placeholders and `~` expanded.
    pub fn expand(mut self) -> Self {
        self.device = self.device.expand();
        self
    }

    /// Check value ranges before the monitor starts.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_device_config(&self.device).map_err(|e| CoreError::Config(e.to_string()))?;

        check_duration("poll interval", self.poll_interval_secs)?;
        if !(self.thresholds.delta_percent.is_finite() && self.thresholds.delta_percent >= 0.0) {
            return Err(CoreError::Config(
                "delta threshold must be a non-negative percentage".to_string(),
            ));
        }
        if !(self.thresholds.idle_mbps.is_finite() && self.thresholds.idle_mbps >= 0.0) {
            return Err(CoreError::Config(
                "idle threshold must be a non-negative rate".to_string(),
            ));
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("connect", t.connect_secs),
            ("mode switch", t.mode_switch_secs),
            ("config", t.config_secs),
            ("counters", t.counters_secs),
        ] {
            check_duration(&format!("{name} timeout"), secs)?;
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(CoreError::Config(
                "initial backoff must not exceed max backoff".to_string(),
            ));
        }
        Ok(())
    }
}

impl DeviceConfig {
    /// Return a copy with all `${env:...}` placeholders and `~` expanded.
    pub fn expand(mut self) -> Self {
        self.host = expand::expand_env_placeholders(&self.host);
        self.username = expand::expand_env_placeholders(&self.username);
        self.key_path = self.key_path.map(|s| {
            let stripped = s.trim().trim_matches('"').trim_matches('\'');
            expand::expand_tilde(&expand::expand_env_placeholders(stripped))
        });
        self.password = self.password.map(|s| expand::expand_env_placeholders(&s));
        self
    }
}

/// Validate device settings before attempting a connection.
///
/// Checks:
/// - `host` is not empty
/// - `username` is not empty
/// - `auth_method` is one of `password`, `key`, `agent`
/// - When `auth_method` is `"key"`, `key_path` must be present and non-empty
pub fn validate_device_config(config: &DeviceConfig) -> Result<(), SessionError> {
    if config.host.trim().is_empty() {
        return Err(SessionError::InvalidConfig(
            "device host must not be empty".to_string(),
        ));
    }

    if config.username.trim().is_empty() {
        return Err(SessionError::InvalidConfig(
            "device username must not be empty".to_string(),
        ));
    }

    match config.auth_method.as_str() {
        "password" | "agent" => Ok(()),
        "key" => {
            let has_key = config
                .key_path
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty());
            if has_key {
                Ok(())
            } else {
                Err(SessionError::InvalidConfig(
                    "key authentication requires a key path".to_string(),
                ))
            }
        }
        other => Err(SessionError::InvalidConfig(format!(
            "unsupported auth method '{other}'"
        ))),
    }
}

/// Shortest accepted interval or timeout.
pub const MIN_DURATION: Duration = Duration::from_millis(1);
/// Longest accepted interval or timeout.
pub const MAX_DURATION: Duration = Duration::from_secs(86_400);

/// Reject seconds values that do not convert to a usable [`Duration`].
fn check_duration(name: &str, secs: f64) -> Result<(), CoreError> {
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|_| CoreError::Config(format!("{name} must be positive, got {secs}")))?;
    if duration < MIN_DURATION || duration > MAX_DURATION {
        return Err(CoreError::Config(format!(
            "{name} must be between {}s and {}s, got {secs}",
            MIN_DURATION.as_secs_f64(),
            MAX_DURATION.as_secs()
        )));
    }
    Ok(())
}

// --- Default value functions ---

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "dnroot".to_string()
}

fn default_password() -> Option<String> {
    Some("dnroot".to_string())
}

fn default_auth_method() -> String {
    "password".to_string()
}

fn default_true() -> bool {
    true
}

fn default_delta_percent() -> f64 {
    10.0
}

fn default_idle_mbps() -> f64 {
    0.1
}

fn default_connect_secs() -> f64 {
    30.0
}

fn default_mode_switch_secs() -> f64 {
    10.0
}

fn default_config_secs() -> f64 {
    30.0
}

fn default_counters_secs() -> f64 {
    15.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_poll_interval_secs() -> f64 {
    5.0
}

fn default_listen_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> MonitorConfig {
        MonitorConfig {
            device: DeviceConfig {
                host: "10.0.0.1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    // --- Default value tests ---

    #[test]
    fn monitor_config_defaults() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.poll_interval_secs, 5.0);
        assert!(!cfg.debug);
        assert_eq!(cfg.thresholds.delta_percent, 10.0);
        assert_eq!(cfg.thresholds.idle_mbps, 0.1);
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn device_config_defaults() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.username, "dnroot");
        assert_eq!(cfg.auth_method, "password");
        assert_eq!(cfg.password.as_deref(), Some("dnroot"));
        assert!(cfg.icmp_check);
    }

    #[test]
    fn timeouts_convert_to_durations() {
        let t = Timeouts {
            connect_secs: 1.5,
            ..Default::default()
        };
        assert_eq!(t.connect(), Duration::from_millis(1500));
        assert_eq!(t.counters(), Duration::from_secs(15));
    }

    // --- Serde tests ---

    #[test]
    fn minimal_json_uses_defaults() {
        let json = r#"{ "device": { "host": "dut-1" } }"#;
        let cfg: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.device.host, "dut-1");
        assert_eq!(cfg.device.port, 22);
        assert_eq!(cfg.poll_interval_secs, 5.0);
        assert_eq!(cfg.thresholds, Thresholds::default());
    }

    #[test]
    fn json_overrides_nested_fields() {
        let json = r#"{
            "device": { "host": "dut-1", "icmpCheck": false },
            "pollIntervalSecs": 2.5,
            "thresholds": { "deltaPercent": 5 },
            "retry": { "maxRetries": 1 }
        }"#;
        let cfg: MonitorConfig = serde_json::from_str(json).unwrap();
        assert!(!cfg.device.icmp_check);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(2500));
        assert_eq!(cfg.thresholds.delta_percent, 5.0);
        assert_eq!(cfg.thresholds.idle_mbps, 0.1);
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.max_backoff_ms, 8_000);
    }

    #[test]
    fn host_may_come_from_elsewhere() {
        let cfg: MonitorConfig = serde_json::from_str(r#"{ "listenPort": 9090 }"#).unwrap();
        assert!(cfg.device.host.is_empty());
        assert_eq!(cfg.device.username, "dnroot");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(br#"{ "device": { "host": "dut-2" }, "listenPort": 9000 }"#)
            .unwrap();
        f.flush().unwrap();
        let cfg = MonitorConfig::load(f.path()).unwrap();
        assert_eq!(cfg.device.host, "dut-2");
        assert_eq!(cfg.listen_port, 9000);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"{ not json").unwrap();
        f.flush().unwrap();
        let err = MonitorConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = MonitorConfig::load(Path::new("/nonexistent/mirrorwatch.json")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }

    // --- Validation tests ---

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_host_fails() {
        let cfg = MonitorConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sub_five_second_interval_is_allowed() {
        let mut cfg = valid_config();
        cfg.poll_interval_secs = 0.5;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_interval_fails() {
        let mut cfg = valid_config();
        cfg.poll_interval_secs = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn interval_rounding_to_zero_fails() {
        let mut cfg = valid_config();
        cfg.poll_interval_secs = 1e-10;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("poll interval"), "{err}");

        cfg.poll_interval_secs = 0.001;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn huge_or_non_finite_interval_fails() {
        for secs in [1e20, 86_401.0, f64::INFINITY, f64::NAN, -1.0] {
            let mut cfg = valid_config();
            cfg.poll_interval_secs = secs;
            assert!(cfg.validate().is_err(), "{secs} accepted");
        }
        let mut cfg = valid_config();
        cfg.poll_interval_secs = 86_400.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn timeouts_are_range_checked() {
        let mut cfg = valid_config();
        cfg.timeouts.counters_secs = 1e-10;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("counters timeout"), "{err}");

        let mut cfg = valid_config();
        cfg.timeouts.connect_secs = 1e20;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("connect timeout"), "{err}");
    }

    #[test]
    fn negative_threshold_fails() {
        let mut cfg = valid_config();
        cfg.thresholds.idle_mbps = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_bounds_checked() {
        let mut cfg = valid_config();
        cfg.retry.initial_backoff_ms = 10_000;
        cfg.retry.max_backoff_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn key_auth_requires_key_path() {
        let mut device = valid_config().device;
        device.auth_method = "key".to_string();
        assert!(validate_device_config(&device).is_err());
        device.key_path = Some("~/.ssh/id_ed25519".to_string());
        assert!(validate_device_config(&device).is_ok());
    }

    #[test]
    fn unknown_auth_method_fails() {
        let mut device = valid_config().device;
        device.auth_method = "token".to_string();
        let err = validate_device_config(&device).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    // --- Expand tests ---

    #[test]
    fn expand_resolves_password_placeholder() {
        std::env::set_var("MIRRORWATCH_TEST_PW", "s3cret");
        let mut cfg = valid_config();
        cfg.device.password = Some("${env:MIRRORWATCH_TEST_PW}".to_string());
        let cfg = cfg.expand();
        assert_eq!(cfg.device.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn expand_strips_quotes_from_key_path() {
        let mut cfg = valid_config();
        cfg.device.key_path = Some("\"/etc/mirrorwatch/key\"".to_string());
        let cfg = cfg.expand();
        assert_eq!(cfg.device.key_path.as_deref(), Some("/etc/mirrorwatch/key"));
    }
}
