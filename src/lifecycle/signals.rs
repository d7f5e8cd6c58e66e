//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT and SIGTERM (SIGTERM on unix only)
//! - Merge them with programmatic stop requests into one termination event
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A signal handler that cannot be installed never fires, instead of
//!   failing the service

use std::fmt;

use tokio::sync::mpsc;

/// What ended the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Programmatic stop.
    Stop,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Termination::Interrupt => "SIGINT",
            Termination::Terminate => "SIGTERM",
            Termination::Stop => "stop",
        };
        f.write_str(name)
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Wait for the first termination event.
///
/// A closed stop channel is ignored; only a signal can end the wait then.
pub async fn wait_for_termination(stop: &mut mpsc::Receiver<()>) -> Termination {
    let stopped = async {
        match stop.recv().await {
            Some(()) => {}
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupt() => Termination::Interrupt,
        _ = terminate() => Termination::Terminate,
        _ = stopped => Termination::Stop,
    }
}
