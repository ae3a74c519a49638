//! Command-line options and their merge into [`MonitorConfig`].

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mirrorwatch_core::config::MonitorConfig;

#[derive(Parser, Debug)]
#[command(name = "mirrorwatch")]
#[command(version, about = "Port mirroring monitor with a JSON status API")]
pub struct Cli {
    /// Device hostname or IP address
    #[arg(long, required_unless_present = "config")]
    pub host: Option<String>,

    /// Port for the status API [default: 8080]
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds between poll cycles, fractions allowed [default: 5]
    #[arg(long)]
    pub interval: Option<f64>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// SSH username [default: dnroot]
    #[arg(long)]
    pub username: Option<String>,

    /// SSH password; `${env:NAME}` placeholders are expanded [default: dnroot]
    #[arg(long)]
    pub password: Option<String>,

    /// SSH port on the device [default: 22]
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Skip the ICMP reachability check before connecting
    #[arg(long)]
    pub no_icmp_check: bool,

    /// Maximum delta percentage still reported as a match [default: 10]
    #[arg(long)]
    pub delta_threshold: Option<f64>,

    /// Rate in Mbps below which traffic counts as idle [default: 0.1]
    #[arg(long)]
    pub idle_threshold: Option<f64>,
}

impl Cli {
    /// Build the effective configuration: file (or defaults), then flags,
    /// then placeholder expansion and validation.
    pub fn into_config(self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => MonitorConfig::default(),
        };

        if let Some(host) = self.host {
            config.device.host = host;
        }
        if let Some(port) = self.ssh_port {
            config.device.port = port;
        }
        if let Some(username) = self.username {
            config.device.username = username;
        }
        if let Some(password) = self.password {
            config.device.password = Some(password);
        }
        if self.no_icmp_check {
            config.device.icmp_check = false;
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if let Some(delta) = self.delta_threshold {
            config.thresholds.delta_percent = delta;
        }
        if let Some(idle) = self.idle_threshold {
            config.thresholds.idle_mbps = idle;
        }
        config.debug |= self.debug;

        let config = config.expand();
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
