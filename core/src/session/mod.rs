//! Remote CLI session state machine.
//!
//! [`RemoteSession`] owns one interactive shell on the device and moves
//! through `Disconnected → Connecting → Authenticated → {Show, Config}`,
//! dropping to `Error` on any failure. The transport is abstracted behind
//! [`Connector`] / [`CliChannel`] so the state machine can be driven by a
//! scripted device in tests; the production transport lives in
//! [`crate::backends::ssh`].
//!
//! All methods are blocking. Async callers go through [`SessionHandle`],
//! which serializes access and runs each operation on the blocking pool.

pub mod backoff;
pub mod handle;
pub mod prompt;

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::SessionError;

use self::prompt::PromptMatcher;

pub use self::backoff::Backoff;
pub use self::handle::{ReachabilityProbe, SessionHandle};

/// Command that enters configuration mode from show mode.
pub const CONFIGURE_COMMAND: &str = "configure";

/// Command that returns to show mode from configuration mode.
pub const END_COMMAND: &str = "end";

/// Poll interval while waiting for more output on a non-blocking channel.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// CLI mode a command runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CliMode {
    Show,
    Config,
}

impl fmt::Display for CliMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliMode::Show => f.write_str("show"),
            CliMode::Config => f.write_str("config"),
        }
    }
}

/// Lifecycle state of a [`RemoteSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Logged in and sitting at the initial show prompt.
    Authenticated,
    Show,
    Config,
    Error,
}

impl SessionState {
    /// Whether commands can be issued in this state.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            SessionState::Authenticated | SessionState::Show | SessionState::Config
        )
    }

    fn current_mode(self) -> Option<CliMode> {
        match self {
            SessionState::Authenticated | SessionState::Show => Some(CliMode::Show),
            SessionState::Config => Some(CliMode::Config),
            _ => None,
        }
    }
}

impl From<CliMode> for SessionState {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Show => SessionState::Show,
            CliMode::Config => SessionState::Config,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Show => "show",
            SessionState::Config => "config",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// A byte-oriented interactive channel to the device.
///
/// `read` follows non-blocking socket conventions: `Ok(0)` means the
/// device closed the channel and `ErrorKind::WouldBlock` means no data is
/// available yet.
pub trait CliChannel: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Best-effort shutdown of the channel.
    fn close(&mut self);
}

/// Opens authenticated interactive channels to one device.
pub trait Connector: Send {
    type Channel: CliChannel;

    /// Establish the transport and authenticate.
    ///
    /// Must return [`SessionError::Connect`] for transport failures and
    /// [`SessionError::Auth`] when the device rejects the credentials.
    fn connect(&self) -> Result<Self::Channel, SessionError>;

    /// Human-readable target, used in log messages.
    fn target(&self) -> String;
}

/// Why a bounded read stopped before its condition was met.
#[derive(Debug)]
enum ReadFailure {
    Timeout,
    Io(io::Error),
}

/// Read from `channel` until `done` accepts the cleaned output or the
/// timeout elapses. Pager prompts are answered with a space.
fn read_until<R, F>(channel: &mut R, timeout: Duration, mut done: F) -> Result<String, ReadFailure>
where
    R: CliChannel + ?Sized,
    F: FnMut(&str) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut raw: Vec<u8> = Vec::new();
    let mut pager_answered_at = 0usize;
    let mut buf = [0u8; 4096];

    loop {
        match channel.read(&mut buf) {
            Ok(0) => {
                return Err(ReadFailure::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed by device",
                )))
            }
            Ok(n) => {
                raw.extend_from_slice(&buf[..n]);
                let text = prompt::strip_ansi(&String::from_utf8_lossy(&raw));
                if done(&text) {
                    return Ok(text);
                }
                if raw.len() > pager_answered_at && prompt::ends_with_pager(&text) {
                    channel.write_all(b" ").map_err(ReadFailure::Io)?;
                    pager_answered_at = raw.len();
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(ReadFailure::Timeout);
                }
                std::thread::sleep(READ_POLL_INTERVAL);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ReadFailure::Io(e)),
        }
        if Instant::now() >= deadline {
            return Err(ReadFailure::Timeout);
        }
    }
}

/// Discard whatever the device already sent.
fn drain<R: CliChannel + ?Sized>(channel: &mut R) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        match channel.read(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed by device",
                ))
            }
            Ok(_) => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Drop stale input, then send one command line.
fn send_line<R: CliChannel + ?Sized>(channel: &mut R, line: &str) -> io::Result<()> {
    drain(channel)?;
    channel.write_all(format!("{line}\n").as_bytes())
}

/// One interactive CLI session on the device.
pub struct RemoteSession<C: Connector> {
    connector: C,
    channel: Option<C::Channel>,
    state: SessionState,
    prompt: PromptMatcher,
    mode_switch_timeout: Duration,
    auth_failure: Option<String>,
    last_error: Option<SessionError>,
}

impl<C: Connector> RemoteSession<C> {
    /// Create a disconnected session. `mode_switch_timeout` bounds both
    /// the wait for the login prompt and every mode switch.
    pub fn new(connector: C, mode_switch_timeout: Duration) -> Self {
        Self {
            connector,
            channel: None,
            state: SessionState::Disconnected,
            prompt: PromptMatcher::new(),
            mode_switch_timeout,
            auth_failure: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device hostname learned from the login prompt.
    pub fn hostname(&self) -> Option<&str> {
        self.prompt.hostname()
    }

    /// Reason of a credential rejection; once set, the session never
    /// reconnects.
    pub fn auth_failure(&self) -> Option<&str> {
        self.auth_failure.as_deref()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session state: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Move to `Error`, drop the channel and hand the error back.
    pub fn fail(&mut self, err: SessionError) -> SessionError {
        warn!("Session to {} failed: {err}", self.connector.target());
        if let SessionError::Auth(ref reason) = err {
            self.auth_failure = Some(reason.clone());
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.transition(SessionState::Error);
        self.last_error = Some(err.clone());
        err
    }

    /// Open the transport, authenticate and wait for the login prompt.
    ///
    /// A no-op when the session is already usable.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        if let Some(reason) = &self.auth_failure {
            return Err(SessionError::Auth(reason.clone()));
        }
        if self.state.is_ready() {
            return Ok(());
        }

        self.transition(SessionState::Connecting);
        let mut channel = match self.connector.connect() {
            Ok(channel) => channel,
            Err(e) => return Err(self.fail(e)),
        };

        let banner = read_until(&mut channel, self.mode_switch_timeout, |text| {
            prompt::trailing_prompt(text).is_some()
        });
        self.channel = Some(channel);

        let banner = match banner {
            Ok(text) => text,
            Err(ReadFailure::Timeout) => {
                return Err(self.fail(SessionError::Connect(format!(
                    "no prompt within {:?} after login",
                    self.mode_switch_timeout
                ))))
            }
            Err(ReadFailure::Io(e)) => {
                return Err(self.fail(SessionError::Connect(format!(
                    "channel failed during login: {e}"
                ))))
            }
        };

        let Some(login_prompt) = prompt::trailing_prompt(&banner) else {
            return Err(self.fail(SessionError::Connect(
                "login prompt not recognized".to_string(),
            )));
        };
        self.prompt.set_hostname(login_prompt.hostname.clone());
        self.last_error = None;
        self.transition(SessionState::Authenticated);
        if login_prompt.mode == CliMode::Config {
            self.transition(SessionState::Config);
        }
        info!(
            "Connected to {} (hostname {})",
            self.connector.target(),
            login_prompt.hostname
        );
        Ok(())
    }

    /// Recover from `Error` (or a fresh start) by opening a new channel.
    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Error {
            if let Some(mut channel) = self.channel.take() {
                channel.close();
            }
            self.transition(SessionState::Disconnected);
        }
        self.connect()
    }

    /// Switch the CLI to `target`, waiting for its prompt.
    pub fn change_mode(&mut self, target: CliMode) -> Result<(), SessionError> {
        let Some(current) = self.state.current_mode() else {
            return Err(SessionError::NotConnected(self.state.to_string()));
        };
        if current == target {
            self.transition(target.into());
            return Ok(());
        }

        let command = match target {
            CliMode::Config => CONFIGURE_COMMAND,
            CliMode::Show => END_COMMAND,
        };
        let timeout = self.mode_switch_timeout;
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(SessionError::NotConnected("no channel".to_string())));
        };

        if let Err(e) = send_line(channel, command) {
            return Err(self.fail(SessionError::ExecuteIo(e.to_string())));
        }
        let matcher = &self.prompt;
        match read_until(channel, timeout, |text| matcher.at_prompt(text, target)) {
            Ok(_) => {
                self.transition(target.into());
                Ok(())
            }
            Err(ReadFailure::Timeout) => Err(self.fail(SessionError::ModeSwitchTimeout {
                mode: target,
                timeout,
            })),
            Err(ReadFailure::Io(e)) => Err(self.fail(SessionError::ExecuteIo(e.to_string()))),
        }
    }

    /// Run `command` in `mode` and return its output with the echo and
    /// the trailing prompt removed.
    pub fn execute(
        &mut self,
        command: &str,
        mode: CliMode,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        self.change_mode(mode)?;

        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail(SessionError::NotConnected("no channel".to_string())));
        };

        debug!("Executing '{command}' in {mode} mode");
        if let Err(e) = send_line(channel, command) {
            return Err(self.fail(SessionError::ExecuteIo(e.to_string())));
        }

        let matcher = &self.prompt;
        match read_until(channel, timeout, |text| matcher.at_prompt(text, mode)) {
            Ok(text) => Ok(prompt::extract_output(&text, command)),
            Err(ReadFailure::Timeout) => Err(self.fail(SessionError::ExecuteTimeout {
                command: command.to_string(),
                timeout,
            })),
            Err(ReadFailure::Io(e)) => Err(self.fail(SessionError::ExecuteIo(e.to_string()))),
        }
    }

    /// Leave configuration mode if needed and close the channel.
    pub fn close(&mut self) {
        if self.state == SessionState::Config {
            let timeout = self.mode_switch_timeout.min(Duration::from_secs(2));
            if let Some(channel) = self.channel.as_mut() {
                if channel.write_all(format!("{END_COMMAND}\n").as_bytes()).is_ok() {
                    let matcher = &self.prompt;
                    let _ = read_until(channel, timeout, |text| {
                        matcher.at_prompt(text, CliMode::Show)
                    });
                }
            }
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            info!("Session to {} closed", self.connector.target());
        }
        self.transition(SessionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Minimal scripted device: answers known commands with canned output.
    #[derive(Clone, Default)]
    struct Device {
        inner: Arc<Mutex<DeviceState>>,
    }

    #[derive(Default)]
    struct DeviceState {
        hostname: String,
        config_mode: bool,
        outbox: VecDeque<u8>,
        inbox: String,
        responses: HashMap<String, String>,
        silent: bool,
        closed: bool,
        commands: Vec<String>,
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
            if self.silent {
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

    struct DeviceChannel(Device);

    impl CliChannel for DeviceChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut st = self.0.inner.lock().unwrap();
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
            let mut st = self.0.inner.lock().unwrap();
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

        fn close(&mut self) {}
    }

    struct DeviceConnector {
        device: Device,
        result: Option<SessionError>,
    }

    impl Connector for DeviceConnector {
        type Channel = DeviceChannel;

        fn connect(&self) -> Result<DeviceChannel, SessionError> {
            if let Some(ref err) = self.result {
                return Err(err.clone());
            }
            let mut st = self.device.inner.lock().unwrap();
            st.closed = false;
            st.config_mode = false;
            let banner = format!("Welcome\r\n\x1b[1m{}\x1b[0m", st.prompt());
            st.outbox.extend(banner.bytes());
            Ok(DeviceChannel(self.device.clone()))
        }

        fn target(&self) -> String {
            "test-device".to_string()
        }
    }

    fn session_with(result: Option<SessionError>) -> (RemoteSession<DeviceConnector>, Device) {
        let device = Device::default();
        {
            let mut st = device.inner.lock().unwrap();
            st.hostname = "dut-1".to_string();
            st.responses.insert(
                "show version".to_string(),
                "DNOS 19.1\r\nbuild 42\r\n".to_string(),
            );
        }
        let connector = DeviceConnector {
            device: device.clone(),
            result,
        };
        (
            RemoteSession::new(connector, Duration::from_millis(200)),
            device,
        )
    }

    #[test]
    fn starts_disconnected() {
        let (session, _) = session_with(None);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.hostname().is_none());
    }

    #[test]
    fn connect_learns_hostname() {
        let (mut session, _) = session_with(None);
        session.connect().unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.hostname(), Some("dut-1"));
    }

    #[test]
    fn connect_failure_moves_to_error() {
        let (mut session, _) = session_with(Some(SessionError::Connect("refused".into())));
        let err = session.connect().unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.auth_failure().is_none());
    }

    #[test]
    fn auth_failure_is_terminal() {
        let (mut session, _) = session_with(Some(SessionError::Auth("denied".into())));
        assert!(matches!(session.connect(), Err(SessionError::Auth(_))));
        assert_eq!(session.auth_failure(), Some("denied"));
        // Later attempts fail immediately without touching the transport.
        assert!(matches!(session.reconnect(), Err(SessionError::Auth(_))));
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn execute_returns_clean_output() {
        let (mut session, _) = session_with(None);
        session.connect().unwrap();
        let out = session
            .execute("show version", CliMode::Show, Duration::from_millis(200))
            .unwrap();
        assert_eq!(out, "DNOS 19.1\nbuild 42");
        assert_eq!(session.state(), SessionState::Show);
    }

    #[test]
    fn execute_when_disconnected_errors() {
        let (mut session, _) = session_with(None);
        let err = session
            .execute("show version", CliMode::Show, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, SessionError::NotConnected(_)));
    }

    #[test]
    fn change_mode_round_trip() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        session.change_mode(CliMode::Config).unwrap();
        assert_eq!(session.state(), SessionState::Config);
        session.change_mode(CliMode::Show).unwrap();
        assert_eq!(session.state(), SessionState::Show);
        let commands = device.inner.lock().unwrap().commands.clone();
        assert_eq!(commands, vec!["configure", "end"]);
    }

    #[test]
    fn change_mode_to_current_sends_nothing() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        session.change_mode(CliMode::Show).unwrap();
        assert!(device.inner.lock().unwrap().commands.is_empty());
    }

    #[test]
    fn execute_in_config_mode_switches_first() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        session
            .execute("show version", CliMode::Config, Duration::from_millis(200))
            .unwrap();
        assert_eq!(session.state(), SessionState::Config);
        let commands = device.inner.lock().unwrap().commands.clone();
        assert_eq!(commands, vec!["configure", "show version"]);
    }

    #[test]
    fn mode_switch_timeout_moves_to_error() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        device.inner.lock().unwrap().silent = true;
        let err = session.change_mode(CliMode::Config).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ModeSwitchTimeout {
                mode: CliMode::Config,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn execute_timeout_moves_to_error() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        device.inner.lock().unwrap().silent = true;
        let err = session
            .execute("show version", CliMode::Show, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, SessionError::ExecuteTimeout { .. }));
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.last_error(), Some(&err));
    }

    #[test]
    fn broken_channel_is_io_error_and_recoverable() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        device.inner.lock().unwrap().closed = true;
        let err = session
            .execute("show version", CliMode::Show, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, SessionError::ExecuteIo(_)));
        assert_eq!(session.state(), SessionState::Error);

        session.reconnect().unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        let out = session
            .execute("show version", CliMode::Show, Duration::from_millis(200))
            .unwrap();
        assert!(out.contains("build 42"));
    }

    #[test]
    fn close_leaves_config_mode() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        session.change_mode(CliMode::Config).unwrap();
        session.close();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!device.inner.lock().unwrap().config_mode);
    }

    #[test]
    fn pager_prompt_is_answered() {
        let (mut session, device) = session_with(None);
        session.connect().unwrap();
        {
            let mut st = device.inner.lock().unwrap();
            st.silent = true;
        }
        // Device sends a first page, waits for space, then the rest.
        let dev = device.clone();
        let feeder = std::thread::spawn(move || {
            loop {
                let mut st = dev.inner.lock().unwrap();
                if st.commands.iter().any(|c| c == "show long") {
                    st.outbox.extend(b"show long\r\npage one\r\n-- More --".iter());
                    break;
                }
                drop(st);
                std::thread::sleep(Duration::from_millis(5));
            }
            loop {
                let mut st = dev.inner.lock().unwrap();
                if st.inbox.contains(' ') {
                    st.inbox.clear();
                    st.outbox.extend(b"\r          \rpage two\r\ndut-1# ".iter());
                    break;
                }
                drop(st);
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        let out = session
            .execute("show long", CliMode::Show, Duration::from_secs(2))
            .unwrap();
        feeder.join().unwrap();
        assert!(out.contains("page one"));
        assert!(out.contains("page two"));
        assert!(!out.contains("More"));
    }
}
