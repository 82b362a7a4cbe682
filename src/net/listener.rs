//! TCP listener that tunes every accepted connection.
//!
//! # Responsibilities
//! - Bind to the configured address (IPv4 first, IPv6 fallback)
//! - Accept incoming TCP connections
//! - Apply the current socket option snapshot to each connection
//! - Close exactly once, waking any blocked accept

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::net::options::{SocketOptions, DEFAULT_KEEPALIVE_PERIOD};
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Address could not be split into host and port.
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// The listener has been closed.
    #[error("listener closed")]
    Closed,
}

/// A connection handed out by [`TuningListener::accept`].
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    /// Option snapshot that was applied to `stream`.
    pub options: Option<Arc<SocketOptions>>,
}

/// A TCP listener that applies [`SocketOptions`] at accept time.
///
/// The option snapshot can be swapped at any moment; each accept reads one
/// whole snapshot, so a connection never sees a half-updated set.
pub struct TuningListener {
    /// The underlying TCP listener, `None` once closed.
    inner: ArcSwapOption<TcpListener>,
    local_addr: SocketAddr,
    options: ArcSwapOption<SocketOptions>,
    closed: watch::Sender<bool>,
}

impl TuningListener {
    /// Bind to `addr`.
    ///
    /// An empty address means port 80 on all interfaces; `:port` means all
    /// interfaces. The IPv4 bind is tried first and IPv6 only if it fails.
    pub async fn bind(addr: &str, options: Option<SocketOptions>) -> Result<Self, ListenerError> {
        let listener = bind_with_fallback(addr).await?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        tracing::info!(address = %local_addr, tuned = options.is_some(), "Listener bound");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            inner: ArcSwapOption::from_pointee(listener),
            local_addr,
            options: ArcSwapOption::new(options.map(Arc::new)),
            closed,
        })
    }

    /// Accept a new connection and tune it.
    ///
    /// Returns [`ListenerError::Closed`] once [`close`](Self::close) has been
    /// called, including for accepts that were already waiting.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        // Subscribe before loading the socket so a concurrent close is seen
        // either as a missing socket or as a change notification.
        let mut closed = self.closed.subscribe();
        let inner = self.inner.load_full().ok_or(ListenerError::Closed)?;

        let (stream, peer_addr) = tokio::select! {
            biased;
            _ = closed.changed() => return Err(ListenerError::Closed),
            res = inner.accept() => res.map_err(ListenerError::Accept)?,
        };
        drop(inner);

        let options = self.options.load_full();
        if let Err(e) = tune_stream(&stream, options.as_deref()) {
            tracing::warn!(peer_addr = %peer_addr, error = %e, "Failed to apply socket options");
        }
        metrics::record_connection_accepted();

        tracing::trace!(peer_addr = %peer_addr, "Connection accepted");
        Ok(Accepted {
            stream,
            peer_addr,
            options,
        })
    }

    /// Close the listener.
    ///
    /// The OS socket is released as soon as any pending accept has woken up.
    /// Only the first call succeeds.
    pub fn close(&self) -> Result<(), ListenerError> {
        match self.inner.swap(None) {
            Some(_) => {
                self.closed.send_replace(true);
                tracing::debug!(address = %self.local_addr, "Listener closed");
                Ok(())
            }
            None => Err(ListenerError::Closed),
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Replace the option snapshot used for future accepts.
    pub fn set_options(&self, options: Option<SocketOptions>) {
        self.options.store(options.map(Arc::new));
    }

    /// Current option snapshot.
    pub fn options(&self) -> Option<Arc<SocketOptions>> {
        self.options.load_full()
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Apply an option snapshot to an accepted stream.
///
/// With no snapshot, keepalive is switched on with
/// [`DEFAULT_KEEPALIVE_PERIOD`], the same as a stock HTTP listener.
pub fn tune_stream(stream: &TcpStream, options: Option<&SocketOptions>) -> io::Result<()> {
    let sock = SockRef::from(stream);

    let Some(opts) = options else {
        return sock.set_tcp_keepalive(&keepalive_params(DEFAULT_KEEPALIVE_PERIOD));
    };

    stream.set_nodelay(opts.no_delay)?;
    sock.set_keepalive(opts.keepalive)?;
    if let Some(period) = opts.effective_keepalive_period() {
        sock.set_tcp_keepalive(&keepalive_params(period))?;
    }
    if let Some(size) = opts.effective_read_buffer() {
        sock.set_recv_buffer_size(size)?;
    }
    if let Some(size) = opts.effective_write_buffer() {
        sock.set_send_buffer_size(size)?;
    }
    Ok(())
}

fn keepalive_params(period: std::time::Duration) -> TcpKeepalive {
    let params = TcpKeepalive::new().with_time(period);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        windows
    ))]
    let params = params.with_interval(period);
    params
}

/// Split `addr` into host and port, resolving the `http`/`https` names.
fn split_host_port(addr: &str) -> Result<(&str, u16), ListenerError> {
    let addr = if addr.is_empty() { ":http" } else { addr };
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ListenerError::InvalidAddress(addr.to_string()))?;

    let port = match port {
        "http" => 80,
        "https" => 443,
        p => p
            .parse()
            .map_err(|_| ListenerError::InvalidAddress(addr.to_string()))?,
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host, port))
}

async fn bind_with_fallback(addr: &str) -> Result<TcpListener, ListenerError> {
    let (host, port) = split_host_port(addr)?;

    match bind_family(host, port, Family::V4).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::debug!(address = %addr, error = %e, "IPv4 bind failed, retrying as IPv6");
            bind_family(host, port, Family::V6)
                .await
                .map_err(|source| ListenerError::Bind {
                    addr: addr.to_string(),
                    source,
                })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

/// Bind to the first address of `family` that `host` resolves to.
/// An empty host means the family's wildcard address.
async fn bind_family(host: &str, port: u16, family: Family) -> io::Result<TcpListener> {
    if host.is_empty() {
        return match family {
            Family::V4 => TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await,
            Family::V6 => TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)).await,
        };
    }

    let mut last_err = None;
    for candidate in tokio::net::lookup_host((host, port)).await? {
        if candidate.is_ipv6() != (family == Family::V6) {
            continue;
        }
        match TcpListener::bind(candidate).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {:?} address for {}", family, host),
        )
    }))
}
