//! Graceful HTTP demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net::listener ──▶ http::server ──▶ http::drain ──▶ demo router
//!              (socket tuning)   (hyper, timeouts) (counting,
//!                                                   closing state)
//!
//!   SIGTERM/SIGINT ──▶ lifecycle::signals ──▶ HttpServer::shutdown
//!                                              1. close listener
//!                                              2. start draining
//!                                              3. wait (bounded by timeout)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::routing::{any, get};
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;

use graceful_http::config::{load_config, ServerConfig};
use graceful_http::config::watcher::SocketOptionsWatcher;
use graceful_http::lifecycle::startup::run_until_signal;
use graceful_http::observability::{logging, metrics};
use graceful_http::HttpServer;

#[derive(Parser)]
#[command(name = "graceful-http")]
#[command(about = "HTTP server with graceful shutdown and per-connection socket tuning", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for socket option changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file.
    #[arg(short, long)]
    bind: Option<String>,

    /// Shutdown budget in seconds, overrides the config file.
    #[arg(long)]
    shutdown_timeout_secs: Option<u64>,

    /// PEM certificate; serve TLS when given together with --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Enable diagnostics endpoints under the configured root.
    #[arg(long)]
    diagnostics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(secs) = cli.shutdown_timeout_secs {
        config.shutdown.timeout_secs = secs;
    }
    if cli.diagnostics {
        config.diagnostics.enabled = true;
    }

    logging::init(&config.observability);
    tracing::info!("graceful-http v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = Arc::new(
        HttpServer::new(
            &config.listener.bind_address,
            demo_router(),
            config.shutdown.timeout(),
            config.socket.as_ref().map(|s| s.to_options()),
            config.shutdown.policy().into_callback(),
        )
        .await?,
    );
    if config.diagnostics.enabled {
        server.enable_diagnostics(&config.diagnostics.root);
    }

    // Keep the watcher alive for the life of the server.
    let _watcher = match &cli.config {
        Some(path) => Some(spawn_socket_reload(
            path,
            config.socket.as_ref().map(|s| s.to_options()),
            Arc::clone(&server),
        )?),
        None => None,
    };

    let tls = match (cli.tls_cert, cli.tls_key) {
        (Some(cert), Some(key)) => Some((cert, key)),
        _ => config
            .listener
            .tls
            .as_ref()
            .map(|tls| (PathBuf::from(&tls.cert_path), PathBuf::from(&tls.key_path))),
    };

    if let Err(e) = run_until_signal(server, tls).await {
        tracing::warn!(error = %e, "Listener close reported an error");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_router() -> Router {
    Router::new()
        .route("/hello", any(|| async { "hello" }))
        .route(
            "/sleep/{ms}",
            get(|Path(ms): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                format!("slept {}ms", ms)
            }),
        )
        .route("/panic", get(|| async { panic!("requested panic") as () }))
        .layer(TraceLayer::new_for_http())
}

fn spawn_socket_reload<H>(
    path: &std::path::Path,
    initial: Option<graceful_http::SocketOptions>,
    server: Arc<HttpServer<H>>,
) -> Result<notify::RecommendedWatcher, notify::Error>
where
    H: tower::Service<
            axum::http::Request<axum::body::Body>,
            Response = axum::response::Response,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + Sync
        + 'static,
    H::Future: Send + 'static,
{
    let (watcher, mut updates) = SocketOptionsWatcher::new(path, initial);
    let watcher = watcher.run()?;

    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let options = updates.borrow_and_update().clone();
            server.configure_sockets(options);
        }
    });

    Ok(watcher)
}
