//! Error types for the mirrorwatch core crate.
//!
//! The session errors double as the retry taxonomy used by the poll
//! scheduler: everything except [`SessionError::Auth`] and
//! [`SessionError::InvalidConfig`] is retried with backoff within a cycle.
//! Parse and validation errors never abort a cycle; they degrade the
//! affected session's verdict instead.

use std::time::Duration;

use thiserror::Error;

use crate::session::CliMode;

/// Top-level error type encompassing all core error categories.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A remote session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Device output could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A verdict could not be computed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A configuration error (invalid values, missing fields, parse failures).
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the remote CLI session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The transport could not be established (unreachable, refused,
    /// handshake failure, ICMP pre-check failure).
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The device rejected the credentials. Terminal for the session.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The prompt for the requested mode was not observed in time.
    #[error("Timed out after {timeout:?} waiting for {mode} prompt")]
    ModeSwitchTimeout { mode: CliMode, timeout: Duration },

    /// The prompt did not reappear after a command in time.
    #[error("Command '{command}' timed out after {timeout:?}")]
    ExecuteTimeout { command: String, timeout: Duration },

    /// The channel failed while writing a command or reading its output.
    #[error("I/O failure during command execution: {0}")]
    ExecuteIo(String),

    /// An operation needed an established session.
    #[error("Session not connected ({0})")]
    NotConnected(String),

    /// The session configuration is invalid.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Whether the scheduler may retry the failed step.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SessionError::Auth(_) | SessionError::InvalidConfig(_))
    }
}

/// Errors raised while parsing device output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The flattened configuration could not be interpreted.
    #[error("Config output: {0}")]
    Config(String),

    /// The counter dump for an interface is missing or malformed.
    #[error("Counters for {interface}: {reason}")]
    Counters { interface: String, reason: String },

    /// An interface name is not safe to interpolate into a device command.
    #[error("Invalid interface name: {0:?}")]
    InvalidInterface(String),
}

/// Errors raised by the validation engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A rate needed for the verdict is not available this cycle.
    #[error("{0} rate unavailable")]
    InputUnavailable(String),
}
