//! Graceful HTTP serving: socket tuning at accept time and request draining
//! on shutdown.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{OnTimeout, TimeoutPolicy};
pub use net::{SocketOptions, TuningListener};
