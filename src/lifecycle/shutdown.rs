//! Shutdown coordination for a service.

use std::fmt;

use tokio::sync::{mpsc, watch};

/// Lifecycle state of a service, observable through [`StopHandle::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Idle => "idle",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting down",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Coordinator for graceful shutdown.
///
/// Owns the single-slot termination channel and the published state.
/// Any number of [`StopHandle`]s can request termination; only the first
/// pending request is kept.
pub struct Shutdown {
    tx: mpsc::Sender<()>,
    rx: Option<mpsc::Receiver<()>>,
    state: watch::Sender<ServiceState>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (state, _) = watch::channel(ServiceState::Idle);
        Self {
            tx,
            rx: Some(rx),
            state,
        }
    }

    /// Handle that can stop the service from elsewhere.
    pub fn handle(&self) -> StopHandle {
        StopHandle {
            tx: self.tx.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Request termination. Never blocks.
    pub fn trigger(&self) {
        request_stop(&self.tx);
    }

    /// Take the termination receiver. Returns `None` once taken.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<()>> {
        self.rx.take()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: ServiceState) {
        self.state.send_replace(state);
        tracing::debug!(state = %state, "Service state changed");
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

fn request_stop(tx: &mpsc::Sender<()>) {
    match tx.try_send(()) {
        Ok(()) => {}
        // A stop is already pending.
        Err(mpsc::error::TrySendError::Full(())) => {}
        Err(mpsc::error::TrySendError::Closed(())) => {
            tracing::debug!("Stop requested after the service finished");
        }
    }
}

/// Cloneable handle to stop a running service and observe its state.
#[derive(Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
    state: watch::Receiver<ServiceState>,
}

impl StopHandle {
    /// Request termination. Never blocks, even if called repeatedly.
    pub fn stop(&self) {
        request_stop(&self.tx);
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Wait until the service has fully stopped.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // An error means the service was dropped, which is stopped as well.
        let _ = state.wait_for(|s| *s == ServiceState::Stopped).await;
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &self.state())
            .finish()
    }
}
