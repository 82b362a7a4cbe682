//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! Tuned TCP/TLS connection
//!     → server.rs (hyper connection, protocol timeouts)
//!     → drain.rs (count request, reject while closing, contain panics)
//!     → diagnostics.rs (exact-path diagnostics, when enabled)
//!     → wrapped application service
//! ```

pub mod diagnostics;
pub mod drain;
pub mod server;

pub use diagnostics::Diagnostics;
pub use drain::{DrainLayer, DrainPhase, DrainService, DrainState, GuardedBody, CLOSING_STATUS};
pub use server::{HttpServer, ServerError, WRITE_TIMEOUT_STATUS};
