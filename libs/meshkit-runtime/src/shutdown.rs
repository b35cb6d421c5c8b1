//! OS signal handling.

use anyhow::Result;
use tokio::signal;

/// Wait for a termination signal: Ctrl+C, SIGTERM or SIGQUIT.
///
/// # Errors
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown() -> Result<()> {
    tokio::select! {
        result = wait_ctrl_c() => result?,
        result = wait_unix(UnixSignal::Terminate) => result?,
        result = wait_unix(UnixSignal::Quit) => result?,
    }
    tracing::info!("shutdown signal received, stopping servers");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum UnixSignal {
    Terminate,
    Quit,
}

async fn wait_ctrl_c() -> Result<()> {
    signal::ctrl_c().await.map_err(|e| {
        tracing::error!(%e, "error handling Ctrl+C signal");
        e
    })?;
    tracing::info!("received Ctrl+C");
    Ok(())
}

#[cfg(unix)]
async fn wait_unix(which: UnixSignal) -> Result<()> {
    use signal::unix::{SignalKind, signal as unix_signal};

    let (kind, label) = match which {
        UnixSignal::Terminate => (SignalKind::terminate(), "SIGTERM"),
        UnixSignal::Quit => (SignalKind::quit(), "SIGQUIT"),
    };
    let mut handler = unix_signal(kind).map_err(|e| {
        tracing::error!(%e, signal = label, "failed to install signal handler");
        e
    })?;
    handler.recv().await;
    tracing::info!(signal = label, "received signal");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_unix(_which: UnixSignal) -> Result<()> {
    std::future::pending::<Result<()>>().await
}
