//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind server → Serve on background task → Wait for signal
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: the on-timeout policy decides about forced exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{OnTimeout, TimeoutPolicy};
