//! Convenience entry points that tie a server to process signals.
//!
//! # Responsibilities
//! - Build a server whose shutdown timeout forces a process exit
//! - Serve on a background task
//! - Map SIGTERM/SIGINT to a graceful shutdown, then exit 0
//!
//! # Design Decisions
//! - Fail fast: a bind error is logged and the process exits with status 1
//! - The exit policy lives here, never inside `HttpServer`

use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tower::Service;

use crate::http::server::{HttpServer, ServerError};
use crate::lifecycle::shutdown::exit_process;
use crate::net::listener::ListenerError;
use crate::net::options::SocketOptions;

/// Serve until `signal` resolves, then shut down gracefully.
///
/// Returns the shutdown result. The serve task's own result is logged.
pub async fn run_until<H, F>(
    server: Arc<HttpServer<H>>,
    tls: Option<(PathBuf, PathBuf)>,
    signal: F,
) -> Result<(), ListenerError>
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    H::Future: Send + 'static,
    F: Future<Output = ()>,
{
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let result = match tls {
                Some((cert, key)) => server.serve_tls(cert, key).await,
                None => server.serve().await,
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server stopped with error");
            }
        })
    };

    signal.await;
    let result = server.shutdown().await;
    if let Err(e) = serving.await {
        tracing::error!(error = %e, "HTTP serve task failed");
    }
    result
}

/// Serve until SIGTERM/SIGINT.
pub async fn run_until_signal<H>(
    server: Arc<HttpServer<H>>,
    tls: Option<(PathBuf, PathBuf)>,
) -> Result<(), ListenerError>
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    H::Future: Send + 'static,
{
    run_until(server, tls, crate::lifecycle::signals::shutdown_signal()).await
}

/// Serve plaintext HTTP on `addr` until SIGTERM/SIGINT, then exit the process.
///
/// Does not return.
pub async fn serve<H>(addr: &str, handler: H, timeout: Duration, options: Option<SocketOptions>)
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    H::Future: Send + 'static,
{
    run_and_exit(addr, handler, timeout, options, None).await
}

/// Serve HTTPS on `addr` until SIGTERM/SIGINT, then exit the process.
///
/// Does not return.
pub async fn serve_tls<H>(
    addr: &str,
    handler: H,
    timeout: Duration,
    options: Option<SocketOptions>,
    cert_path: impl Into<PathBuf>,
    key_path: impl Into<PathBuf>,
)
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    H::Future: Send + 'static,
{
    let tls = Some((cert_path.into(), key_path.into()));
    run_and_exit(addr, handler, timeout, options, tls).await
}

async fn run_and_exit<H>(
    addr: &str,
    handler: H,
    timeout: Duration,
    options: Option<SocketOptions>,
    tls: Option<(PathBuf, PathBuf)>,
)
where
    H: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    H::Future: Send + 'static,
{
    let server = match HttpServer::new(addr, handler, timeout, options, Some(exit_process(0))).await {
        Ok(server) => Arc::new(server),
        Err(e) => fatal(e),
    };

    if let Err(e) = run_until_signal(server, tls).await {
        tracing::warn!(error = %e, "Listener close reported an error");
    }
    std::process::exit(0)
}

fn fatal(e: ServerError) -> ! {
    tracing::error!(error = %e, "graceful: serve failed");
    std::process::exit(1)
}
