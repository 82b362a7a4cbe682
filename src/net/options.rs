//! Socket option set and the protocol timeouts derived from it.
//!
//! # Responsibilities
//! - Describe low-level TCP behavior applied to every accepted connection
//! - Carry the protocol-level timeouts handed to the HTTP transport
//! - Resolve zero fields to documented defaults
//!
//! # Design Decisions
//! - An absent option set and an all-zero option set are different things:
//!   absent keeps the platform-style keepalive default, all-zero turns
//!   keepalive off and leaves everything else to the OS
//! - Snapshots are immutable; the server swaps a whole new set in

use std::time::Duration;

/// Keepalive period used when no option set is configured.
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_secs(3 * 60);

/// Default cap on request header bytes.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 28;

/// Low-level TCP and protocol settings for accepted connections.
///
/// Zero durations and sizes mean "not supplied": buffer sizes stay at the OS
/// default and timeouts fall back to [`ProtocolTimeouts`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Set `TCP_NODELAY`.
    pub no_delay: bool,
    /// Set `SO_KEEPALIVE`.
    pub keepalive: bool,
    /// Keepalive probe period; only applied when `keepalive` is on.
    pub keepalive_interval: Duration,
    /// `SO_RCVBUF` size in bytes.
    pub read_buffer_size: usize,
    /// `SO_SNDBUF` size in bytes.
    pub write_buffer_size: usize,
    /// Time allowed to read a request body.
    pub read_timeout: Duration,
    /// Time allowed to read request headers.
    pub read_header_timeout: Duration,
    /// Time allowed to produce and write a response.
    pub write_timeout: Duration,
    /// Cap on request header bytes.
    pub max_header_bytes: usize,
}

impl SocketOptions {
    /// Keepalive period to apply, if any.
    pub fn effective_keepalive_period(&self) -> Option<Duration> {
        (self.keepalive && !self.keepalive_interval.is_zero()).then_some(self.keepalive_interval)
    }

    /// Receive buffer size to apply, if any.
    pub fn effective_read_buffer(&self) -> Option<usize> {
        (self.read_buffer_size > 0).then_some(self.read_buffer_size)
    }

    /// Send buffer size to apply, if any.
    pub fn effective_write_buffer(&self) -> Option<usize> {
        (self.write_buffer_size > 0).then_some(self.write_buffer_size)
    }
}

/// Resolved protocol-level settings for the HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimeouts {
    pub read_timeout: Duration,
    pub read_header_timeout: Duration,
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
}

impl ProtocolTimeouts {
    /// Defaults for servers that only carry ordinary request/response traffic.
    pub const STANDARD: Self = Self {
        read_timeout: Duration::from_secs(60),
        read_header_timeout: Duration::from_secs(60),
        write_timeout: Duration::from_secs(10),
        max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
    };

    /// Defaults for servers exposing long-running diagnostics endpoints.
    pub const LONG_POLL: Self = Self {
        read_timeout: Duration::from_secs(120),
        read_header_timeout: Duration::from_secs(60),
        write_timeout: Duration::from_secs(120),
        max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
    };

    /// Resolve timeouts from an optional option set, field by field.
    pub fn resolve(options: Option<&SocketOptions>, long_poll: bool) -> Self {
        let base = if long_poll { Self::LONG_POLL } else { Self::STANDARD };
        let Some(opts) = options else {
            return base;
        };

        Self {
            read_timeout: non_zero_or(opts.read_timeout, base.read_timeout),
            read_header_timeout: non_zero_or(opts.read_header_timeout, base.read_header_timeout),
            write_timeout: non_zero_or(opts.write_timeout, base.write_timeout),
            max_header_bytes: if opts.max_header_bytes > 0 {
                opts.max_header_bytes
            } else {
                base.max_header_bytes
            },
        }
    }
}

impl Default for ProtocolTimeouts {
    fn default() -> Self {
        Self::STANDARD
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_options_use_profile_defaults() {
        assert_eq!(ProtocolTimeouts::resolve(None, false), ProtocolTimeouts::STANDARD);
        assert_eq!(ProtocolTimeouts::resolve(None, true), ProtocolTimeouts::LONG_POLL);
    }

    #[test]
    fn zero_fields_fall_back_per_field() {
        let opts = SocketOptions {
            write_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let resolved = ProtocolTimeouts::resolve(Some(&opts), false);
        assert_eq!(resolved.write_timeout, Duration::from_secs(3));
        assert_eq!(resolved.read_timeout, Duration::from_secs(60));
        assert_eq!(resolved.read_header_timeout, Duration::from_secs(60));
        assert_eq!(resolved.max_header_bytes, DEFAULT_MAX_HEADER_BYTES);
    }

    #[test]
    fn keepalive_period_requires_flag_and_interval() {
        let mut opts = SocketOptions {
            keepalive_interval: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(opts.effective_keepalive_period(), None);

        opts.keepalive = true;
        assert_eq!(opts.effective_keepalive_period(), Some(Duration::from_secs(30)));

        opts.keepalive_interval = Duration::ZERO;
        assert_eq!(opts.effective_keepalive_period(), None);
    }

    #[test]
    fn buffer_sizes_only_when_positive() {
        let opts = SocketOptions {
            read_buffer_size: 64 * 1024,
            ..Default::default()
        };
        assert_eq!(opts.effective_read_buffer(), Some(64 * 1024));
        assert_eq!(opts.effective_write_buffer(), None);
    }
}
