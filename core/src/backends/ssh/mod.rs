//! SSH transport for [`RemoteSession`](crate::session::RemoteSession).
//!
//! [`SshConnector`] opens an interactive shell on a wide PTY and hands it
//! back as an [`SshChannel`]. Reads are non-blocking so the session's
//! read loop can enforce its own deadlines; writes switch the session to
//! blocking mode for the duration of the write.

pub mod auth;
pub mod reachability;

use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::errors::SessionError;
use crate::session::{CliChannel, Connector};

pub use auth::connect_and_authenticate;
pub use reachability::IcmpProbe;

/// Terminal type requested for the shell.
const PTY_TERM: &str = "vt100";
/// Wide enough that long commands and counter lines never wrap.
const PTY_COLS: u32 = 512;
const PTY_ROWS: u32 = 48;

/// Opens authenticated shells on one device.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: DeviceConfig,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(config: DeviceConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
        }
    }
}

impl Connector for SshConnector {
    type Channel = SshChannel;

    fn connect(&self) -> Result<SshChannel, SessionError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.username,
            "Connecting SSH session"
        );
        let session = connect_and_authenticate(&self.config, self.connect_timeout)?;

        debug!("Opening SSH shell channel");
        let mut channel = session
            .channel_session()
            .map_err(|e| SessionError::Connect(format!("Channel open failed: {e}")))?;
        channel
            .request_pty(PTY_TERM, None, Some((PTY_COLS, PTY_ROWS, 0, 0)))
            .map_err(|e| SessionError::Connect(format!("PTY request failed: {e}")))?;
        channel
            .shell()
            .map_err(|e| SessionError::Connect(format!("Shell request failed: {e}")))?;

        // Set non-blocking for reading.
        session.set_blocking(false);

        Ok(SshChannel { session, channel })
    }

    fn target(&self) -> String {
        format!(
            "{}@{}:{}",
            self.config.username, self.config.host, self.config.port
        )
    }
}

/// An open interactive shell.
pub struct SshChannel {
    session: ssh2::Session,
    channel: ssh2::Channel,
}

impl CliChannel for SshChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.channel.read(buf) {
            Ok(0) if !self.channel.eof() => Err(io::ErrorKind::WouldBlock.into()),
            other => other,
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.session.set_blocking(true);
        let result = self
            .channel
            .write_all(data)
            .and_then(|_| self.channel.flush());
        self.session.set_blocking(false);
        result
    }

    fn close(&mut self) {
        // Switch to blocking for clean shutdown.
        self.session.set_blocking(true);
        let _ = self.channel.send_eof();
        let _ = self.channel.close();
        let _ = self
            .session
            .disconnect(None, "monitor disconnecting", None);
        debug!("SSH session disconnected");
    }
}
