mod cli;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mirrorwatch_core::backends::ssh::{IcmpProbe, SshConnector};
use mirrorwatch_core::scheduler::{PollScheduler, PollSettings, SnapshotStore};
use mirrorwatch_core::session::{RemoteSession, SessionHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::http::{create_router, AppState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "mirrorwatch {} monitoring {}@{}:{} every {:.1}s",
        VERSION,
        config.device.username,
        config.device.host,
        config.device.port,
        config.poll_interval_secs
    );

    let connect_timeout = config.timeouts.connect();
    let connector = SshConnector::new(config.device.clone(), connect_timeout);
    let session = RemoteSession::new(connector, config.timeouts.mode_switch());
    let mut handle = SessionHandle::new(session);
    if config.device.icmp_check {
        handle = handle.with_probe(Arc::new(IcmpProbe::new(
            config.device.host.clone(),
            connect_timeout,
        )));
    }

    let shutdown = CancellationToken::new();
    let store = SnapshotStore::new();
    let scheduler = PollScheduler::new(handle, store.clone(), PollSettings::from(&config))
        .with_shutdown(shutdown.clone());
    let refresh = scheduler.refresh_handle();
    let poller = tokio::spawn(scheduler.run());

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status API on {addr}"))?;
    info!("Status API listening on http://{addr}/api/data");

    let router = create_router(AppState { store, refresh });
    let server_token = shutdown.clone();
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
    {
        error!("Status API failed: {e}");
        shutdown.cancel();
    }

    poller.await.context("Poll task panicked")?;
    info!("mirrorwatch stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn wait_for_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown requested");
    token.cancel();
}
