//! OS signal handling.
//!
//! On Unix, SIGINT, SIGTERM and SIGQUIT all request a shutdown. Elsewhere
//! only Ctrl-C does.

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => tracing::info!(signal = "SIGINT", "Received shutdown signal"),
        _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Received shutdown signal"),
        _ = sigquit.recv() => tracing::info!(signal = "SIGQUIT", "Received shutdown signal"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Resolves on the first shutdown signal.
///
/// If handlers cannot be installed it never resolves, and the process can
/// only end through the supervisor race.
pub async fn shutdown() {
    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::warn!(error = %e, "Could not install signal handlers");
        std::future::pending::<()>().await;
    }
}
