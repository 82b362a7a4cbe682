//! HTTP server supervision.
//!
//! # Responsibilities
//! - Own the tuning listener and the drain layer for one bound address
//! - Run the accept loop (plaintext or TLS) and serve each connection
//! - Map protocol timeouts onto hyper and tower-http
//! - Shut down in order: close listener, start draining, await idle
//! - Fire the on-timeout action when draining outlives its budget
//!
//! # Design Decisions
//! - The write timeout bounds the whole response future. On expiry the handler
//!   future is dropped (cancelled) and the client gets [`WRITE_TIMEOUT_STATUS`].
//!   Handlers that must outlive it need a larger `write_timeout` or the
//!   long-poll profile

use std::convert::Infallible;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::{Layer, Service, ServiceBuilder};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use crate::http::diagnostics::Diagnostics;
use crate::http::drain::{DrainLayer, DrainState};
use crate::lifecycle::shutdown::OnTimeout;
use crate::net::listener::{Accepted, ListenerError, TuningListener};
use crate::net::options::{ProtocolTimeouts, SocketOptions};
use crate::net::tls;
use crate::observability::metrics;
use crate::resilience::backoff::AcceptBackoff;

/// Status sent when a response is not produced within the write timeout.
pub const WRITE_TIMEOUT_STATUS: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

/// Smallest read buffer hyper accepts for HTTP/1.
const MIN_HTTP1_BUF_SIZE: usize = 8192;

/// Accept retry backoff bounds, in milliseconds.

/// Error type for server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Certificate or key could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(#[source] io::Error),
}

/// Graceful HTTP server bound to one address.
///
/// `serve` blocks for the server's whole life, so run it on its own task and
/// call `shutdown` from elsewhere:
///
/// ```no_run
/// # use std::{sync::Arc, time::Duration};
/// # async fn run(router: axum::Router) -> Result<(), graceful_http::http::ServerError> {
/// let server = Arc::new(
///     graceful_http::HttpServer::new(":8080", router, Duration::from_secs(5), None, None).await?,
/// );
/// let serving = tokio::spawn({
///     let server = Arc::clone(&server);
///     async move { server.serve().await }
/// });
/// graceful_http::lifecycle::signals::shutdown_signal().await;
/// server.shutdown().await?;
/// # let _ = serving.await;
/// # Ok(())
/// # }
/// ```
pub struct HttpServer<H> {
    addr: String,
    shutdown_timeout: Duration,
    listener: TuningListener,
    drain: DrainLayer,
    handler: H,
    long_poll: AtomicBool,
    on_timeout: Option<OnTimeout>,
}

impl<H> HttpServer<H>
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    H::Future: Send + 'static,
{
    /// Bind `addr` and wrap `handler` for draining.
    ///
    /// Bind failures are returned, never turned into a process exit.
    pub async fn new(
        addr: &str,
        handler: H,
        shutdown_timeout: Duration,
        options: Option<SocketOptions>,
        on_timeout: Option<OnTimeout>,
    ) -> Result<Self, ServerError> {
        let listener = TuningListener::bind(addr, options).await.map_err(|e| {
            tracing::error!(address = %addr, error = %e, "HTTP server creation failed");
            e
        })?;

        Ok(Self {
            addr: addr.to_string(),
            shutdown_timeout,
            listener,
            drain: DrainLayer::new(Arc::new(DrainState::new())),
            handler,
            long_poll: AtomicBool::new(false),
            on_timeout,
        })
    }

    /// Serve diagnostics endpoints under `root`.
    ///
    /// Also switches timeout defaults to the long-poll profile so slow
    /// diagnostics responses are not cut short.
    pub fn enable_diagnostics(&self, root: &str) {
        self.drain.set_diagnostics(Diagnostics::new(root));
        self.long_poll.store(true, Ordering::SeqCst);
    }

    /// Replace the socket option set.
    ///
    /// Per-connection tuning and protocol timeouts both read the same
    /// snapshot, so they change together. Open connections keep what they had.
    pub fn configure_sockets(&self, options: Option<SocketOptions>) {
        tracing::info!(address = %self.local_addr(), tuned = options.is_some(), "Socket options updated");
        self.listener.set_options(options);
    }

    /// Timeouts new connections will be served with.
    pub fn protocol_timeouts(&self) -> ProtocolTimeouts {
        ProtocolTimeouts::resolve(self.listener.options().as_deref(), self.is_long_poll())
    }

    /// Serve plaintext HTTP until the listener is closed.
    pub async fn serve(&self) -> Result<(), ServerError> {
        self.accept_loop(None).await
    }

    /// Serve HTTPS with the given PEM files until the listener is closed.
    pub async fn serve_tls(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        let acceptor = tls::load_acceptor(cert_path.as_ref(), key_path.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(address = %self.local_addr(), error = %e, "Failed to load TLS configuration");
                ServerError::Tls(e)
            })?;
        self.accept_loop(Some(acceptor)).await
    }

    /// Stop accepting, drain in-flight requests, and wait for them.
    ///
    /// If draining takes longer than the shutdown timeout the on-timeout
    /// action runs once and the wait continues. Returns the result of closing
    /// the listener; a second call returns [`ListenerError::Closed`].
    pub async fn shutdown(&self) -> Result<(), ListenerError> {
        let address = self.local_addr();

        let closed = self.listener.close();
        tracing::info!(address = %address, "HTTP server shutdown waiting...");

        let state = self.drain.state();
        state.begin_closing();

        let idle = state.wait_idle();
        tokio::pin!(idle);

        tokio::select! {
            _ = &mut idle => {}
            _ = tokio::time::sleep(self.shutdown_timeout) => {
                tracing::error!(
                    address = %address,
                    timeout = ?self.shutdown_timeout,
                    in_flight = state.in_flight(),
                    "HTTP server shutdown timeout"
                );
                metrics::record_shutdown_timeout();
                if let Some(on_timeout) = &self.on_timeout {
                    on_timeout();
                }
                idle.await;
            }
        }

        tracing::info!(address = %address, "HTTP server shutdown done");
        closed
    }

    /// The address string the server was created with.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.listener.local_addr()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn drain_state(&self) -> &Arc<DrainState> {
        self.drain.state()
    }

    pub fn is_long_poll(&self) -> bool {
        self.long_poll.load(Ordering::SeqCst)
    }

    async fn accept_loop(&self, tls: Option<RustlsAcceptor>) -> Result<(), ServerError> {
        let address = self.local_addr();
        tracing::info!(address = %address, tls = tls.is_some(), "HTTP server running");

        let mut backoff = AcceptBackoff::default();
        let result = loop {
            match self.listener.accept().await {
                Ok(accepted) => {
                    backoff.reset();
                    self.spawn_connection(accepted, tls.clone());
                }
                Err(ListenerError::Closed) => break Ok(()),
                Err(ListenerError::Accept(e)) => {
                    let delay = backoff.next_delay(&e);
                    if delay.is_zero() {
                        tracing::debug!(address = %address, error = %e, "Connection dropped before accept");
                        continue;
                    }
                    tracing::warn!(
                        address = %address,
                        error = %e,
                        failures = backoff.failures(),
                        retry_in = ?delay,
                        "Accept failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(address = %address, error = %e, "Listener failed");
                    break Err(e.into());
                }
            }
        };

        if result.is_ok() {
            tracing::info!(address = %address, "HTTP server exit: listener closed");
        }
        result
    }

    fn spawn_connection(&self, accepted: Accepted, tls: Option<RustlsAcceptor>) {
        let Accepted {
            stream,
            peer_addr,
            options,
        } = accepted;

        let timeouts = ProtocolTimeouts::resolve(options.as_deref(), self.is_long_poll());
        let service = connection_service(self.drain.layer(self.handler.clone()), timeouts);

        tokio::spawn(async move {
            let result = match tls {
                None => serve_connection(stream, service, timeouts).await,
                Some(acceptor) => match acceptor.accept(stream, ()).await {
                    Ok((stream, ())) => serve_connection(stream, service, timeouts).await,
                    Err(e) => {
                        tracing::debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
            };

            if let Err(e) = result {
                tracing::debug!(peer_addr = %peer_addr, error = %e, "Connection closed with error");
            }
        });
    }
}

/// Wrap the per-connection service with the body-read and response timeouts.
fn connection_service<S>(
    service: S,
    timeouts: ProtocolTimeouts,
) -> tower_http::timeout::Timeout<tower_http::timeout::RequestBodyTimeout<S>> {
    ServiceBuilder::new()
        .layer(TimeoutLayer::with_status_code(WRITE_TIMEOUT_STATUS, timeouts.write_timeout))
        .layer(RequestBodyTimeoutLayer::new(timeouts.read_timeout))
        .service(service)
}

async fn serve_connection<I, S>(
    io: I,
    service: S,
    timeouts: ProtocolTimeouts,
) -> Result<(), axum::BoxError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Service<Request<Incoming>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read_header_timeout)
        .max_buf_size(timeouts.max_header_bytes.max(MIN_HTTP1_BUF_SIZE));
    builder
        .http2()
        .max_header_list_size(u32::try_from(timeouts.max_header_bytes).unwrap_or(u32::MAX));

    builder
        .serve_connection_with_upgrades(TokioIo::new(io), TowerToHyperService::new(service))
        .await
}
