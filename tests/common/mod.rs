//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Path;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use graceful_http::http::ServerError;
use graceful_http::{HttpServer, OnTimeout, SocketOptions};

/// Router used by the integration tests.
#[allow(dead_code)]
pub fn test_router() -> Router {
    Router::new()
        .route("/hello", get(|| async { "hello" }))
        .route(
            "/sleep/{ms}",
            get(|Path(ms): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                "done"
            }),
        )
        .route("/panic", get(|| async { panic!("handler fault") as () }))
        .route(
            "/stream",
            get(|| async {
                let chunks = futures_util::stream::iter(0..STREAM_CHUNKS).then(|i| async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, std::io::Error>(format!("chunk{}\n", i))
                });
                Body::from_stream(chunks)
            }),
        )
}

/// Number of chunks `/stream` writes, 200ms apart.
#[allow(dead_code)]
pub const STREAM_CHUNKS: usize = 5;

#[allow(dead_code)]
pub struct Running {
    pub server: Arc<HttpServer<Router>>,
    pub addr: SocketAddr,
    pub serving: JoinHandle<Result<(), ServerError>>,
}

/// Bind on an ephemeral port and serve on a background task.
pub async fn start_server(
    shutdown_timeout: Duration,
    options: Option<SocketOptions>,
    on_timeout: Option<OnTimeout>,
) -> Running {
    let server = Arc::new(
        HttpServer::new("127.0.0.1:0", test_router(), shutdown_timeout, options, on_timeout)
            .await
            .unwrap(),
    );
    let addr = server.local_addr();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };

    Running {
        server,
        addr,
        serving,
    }
}

/// Wait until the server counts exactly `expected` requests in flight.
#[allow(dead_code)]
pub async fn wait_for_in_flight(server: &HttpServer<Router>, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.drain_state().in_flight() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "in-flight count stuck at {}, expected {}",
            server.drain_state().in_flight(),
            expected
        )
    });
}

/// HTTP client that never reuses connections or goes through a proxy.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Send a raw HTTP/1.1 GET on an open connection and return the status line.
#[allow(dead_code)]
pub async fn raw_get(stream: &mut TcpStream, path: &str) -> String {
    let request = format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("no response")
        .unwrap();
    let text = String::from_utf8_lossy(&buf[..n]).to_string();
    text.lines().next().unwrap_or_default().to_string()
}
