//! TCP connect, SSH handshake and user authentication.
//!
//! Provides [`connect_and_authenticate()`] for establishing an
//! authenticated `ssh2::Session` against the configured device.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tracing::debug;

use crate::config::expand::expand_tilde;
use crate::config::DeviceConfig;
use crate::errors::SessionError;

/// libssh2 `LIBSSH2_ERROR_AUTHENTICATION_FAILED`.
const ERROR_AUTHENTICATION_FAILED: i32 = -18;
/// libssh2 `LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED`.
const ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Connect to the device, perform the handshake and authenticate.
///
/// Returns an authenticated `Session` in blocking mode with `timeout` as
/// its blocking-call timeout. Credential rejections map to
/// [`SessionError::Auth`]; everything else maps to
/// [`SessionError::Connect`].
pub fn connect_and_authenticate(
    config: &DeviceConfig,
    timeout: Duration,
) -> Result<ssh2::Session, SessionError> {
    let tcp = open_tcp(&config.host, config.port, timeout)?;

    let mut session =
        ssh2::Session::new().map_err(|e| SessionError::Connect(format!("SSH init failed: {e}")))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| SessionError::Connect(format!("Handshake failed: {e}")))?;

    match config.auth_method.as_str() {
        "agent" => {
            session
                .userauth_agent(&config.username)
                .map_err(|e| auth_error("Agent", e))?;
        }
        "key" => {
            let key_path_str = config
                .key_path
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("~/.ssh/id_rsa");
            let key_path = PathBuf::from(expand_tilde(key_path_str));
            session
                .userauth_pubkey_file(
                    &config.username,
                    None,
                    &key_path,
                    config.password.as_deref(),
                )
                .map_err(|e| auth_error("Key", e))?;
        }
        _ => {
            let password = config.password.as_deref().unwrap_or("");
            session
                .userauth_password(&config.username, password)
                .map_err(|e| auth_error("Password", e))?;
        }
    }

    if !session.authenticated() {
        return Err(SessionError::Auth(format!(
            "{} rejected user {}",
            config.host, config.username
        )));
    }
    debug!(host = %config.host, user = %config.username, "SSH authenticated");

    Ok(session)
}

/// Open a TCP connection with a bounded connect time and keepalive.
fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, SessionError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| SessionError::Connect(format!("Cannot resolve {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(SessionError::Connect(format!("No address for {host}")));
    }

    let mut last_err = None;
    for addr in addrs {
        match connect_socket(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
    Err(SessionError::Connect(format!(
        "Connection to {host}:{port} failed: {reason}"
    )))
}

fn connect_socket(addr: SocketAddr, timeout: Duration) -> std::io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    socket.set_tcp_keepalive(&keepalive)?;
    socket.set_nodelay(true)?;
    socket.connect_timeout(&addr.into(), timeout)?;
    Ok(socket.into())
}

fn auth_error(method: &str, e: ssh2::Error) -> SessionError {
    match e.code() {
        ssh2::ErrorCode::Session(ERROR_AUTHENTICATION_FAILED)
        | ssh2::ErrorCode::Session(ERROR_PUBLICKEY_UNVERIFIED) => {
            SessionError::Auth(format!("{method} auth failed: {e}"))
        }
        _ => SessionError::Connect(format!("{method} auth aborted: {e}")),
    }
}
