//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM/SIGINT (Ctrl+C on other platforms)
//! - Report which signal arrived
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Only resolves a future; what to do about it is the caller's business

use std::io;

/// Termination signal that ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// Wait for a termination signal.
#[cfg(unix)]
pub async fn wait_for_termination() -> io::Result<Signal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = terminate.recv() => Ok(Signal::Terminate),
        _ = interrupt.recv() => Ok(Signal::Interrupt),
    }
}

/// Wait for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_termination() -> io::Result<Signal> {
    tokio::signal::ctrl_c().await?;
    Ok(Signal::Interrupt)
}

/// Resolve once a termination signal arrives.
///
/// If the handlers cannot be installed this never resolves, so the server
/// keeps running rather than shutting down spuriously.
pub async fn shutdown_signal() {
    match wait_for_termination().await {
        Ok(signal) => tracing::info!(signal = ?signal, "Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            std::future::pending::<()>().await;
        }
    }
}
