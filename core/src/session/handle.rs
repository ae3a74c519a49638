//! Async, exclusive access to a [`RemoteSession`].
//!
//! The session is blocking and holds a single interactive channel, so
//! every operation runs on tokio's blocking pool with the session lock
//! held for exactly that one operation. Two commands can therefore never
//! interleave on the channel, and `close()` naturally waits for an
//! in-flight command to finish.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::SessionError;

use super::{CliMode, Connector, RemoteSession, SessionState};

/// Pre-connect reachability check (ICMP in production).
#[async_trait::async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> Result<(), SessionError>;
}

/// Cloneable handle granting scoped, single-flight access to one session.
pub struct SessionHandle<C: Connector> {
    inner: Arc<Mutex<RemoteSession<C>>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl<C: Connector> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            probe: self.probe.clone(),
        }
    }
}

impl<C> SessionHandle<C>
where
    C: Connector + 'static,
    C::Channel: 'static,
{
    pub fn new(session: RemoteSession<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            probe: None,
        }
    }

    /// Run `probe` before every connect attempt.
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run `f` with exclusive access to the session on the blocking pool.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RemoteSession<C>) -> Result<T, SessionError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = inner
                .lock()
                .map_err(|e| SessionError::ExecuteIo(format!("Failed to lock session: {e}")))?;
            f(&mut *session)
        })
        .await
        .map_err(|e| SessionError::ExecuteIo(format!("Session task failed: {e}")))?
    }

    pub async fn state(&self) -> SessionState {
        self.with_session(|s| Ok(s.state()))
            .await
            .unwrap_or(SessionState::Error)
    }

    pub async fn hostname(&self) -> Option<String> {
        self.with_session(|s| Ok(s.hostname().map(str::to_string)))
            .await
            .ok()
            .flatten()
    }

    /// Connect (or reconnect from `Error`), running the reachability probe
    /// first. Credential failures short-circuit without probing.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let ready = self
            .with_session(|s| {
                if let Some(reason) = s.auth_failure() {
                    return Err(SessionError::Auth(reason.to_string()));
                }
                Ok(s.state().is_ready())
            })
            .await?;
        if ready {
            return Ok(());
        }

        if let Some(probe) = &self.probe {
            if let Err(e) = probe.check().await {
                return self.with_session(move |s| Err(s.fail(e))).await;
            }
        }
        self.with_session(|s| s.reconnect()).await
    }

    /// Execute one command; see [`RemoteSession::execute`].
    pub async fn execute(
        &self,
        command: impl Into<String>,
        mode: CliMode,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        let command = command.into();
        self.with_session(move |s| s.execute(&command, mode, timeout))
            .await
    }

    /// Close the session after any in-flight command completes.
    pub async fn close(&self) {
        let _ = self
            .with_session(|s| {
                s.close();
                Ok(())
            })
            .await;
    }
}
