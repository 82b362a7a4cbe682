//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, apply socket option snapshot)
//!     → tls.rs (optional TLS handshake)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Socket options are applied at accept time, never later
//! - The option snapshot is swapped whole, so accepts never see a mix
//! - Closing the listener wakes blocked accepts and releases the port

pub mod listener;
pub mod options;
pub mod tls;

pub use listener::{Accepted, ListenerError, TuningListener};
pub use options::{ProtocolTimeouts, SocketOptions};
