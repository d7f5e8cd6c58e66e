//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     stop() / signal → termination channel → cancel serving
//!     → drain in-flight requests (bounded) → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/stop → Termination
//! ```
//!
//! # Design Decisions
//! - The termination channel holds one pending request; extra stops are
//!   dropped, so stopping never blocks
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::{ServiceState, Shutdown, StopHandle};
pub use signals::{wait_for_termination, Termination};
