//! Diagnostics endpoints served ahead of the wrapped handler.
//!
//! Paths are matched exactly under a configurable root, e.g.
//! `/debug/pprof/drain`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::extract::Query;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::drain::DrainState;

/// Built-in diagnostics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Lists every registered path.
    Index,
    /// Process command line, NUL separated.
    Cmdline,
    /// Tokio runtime counters.
    Runtime,
    /// Drain phase and pending request counts.
    Drain,
    /// Package name and version.
    Build,
    /// Samples drain and runtime counters for `?seconds=N`, then reports them.
    Profile,
}

/// Sampling window used when `profile` is called without `seconds`.
pub const DEFAULT_PROFILE_WINDOW: Duration = Duration::from_secs(30);

/// Upper bound on one `profile` window.
pub const MAX_PROFILE_WINDOW: Duration = Duration::from_secs(110);

const PROFILE_INTERVAL: Duration = Duration::from_millis(100);

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Index,
        Endpoint::Cmdline,
        Endpoint::Runtime,
        Endpoint::Drain,
        Endpoint::Build,
        Endpoint::Profile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Index => "index",
            Endpoint::Cmdline => "cmdline",
            Endpoint::Runtime => "runtime",
            Endpoint::Drain => "drain",
            Endpoint::Build => "build",
            Endpoint::Profile => "profile",
        }
    }
}

#[derive(Serialize)]
struct DrainReport {
    phase: &'static str,
    pending: usize,
    in_flight: usize,
}

#[derive(Serialize)]
struct RuntimeReport {
    pid: u32,
    workers: Option<usize>,
    alive_tasks: Option<usize>,
}

#[derive(Deserialize)]
struct ProfileParams {
    seconds: Option<u64>,
}

#[derive(Serialize)]
struct ProfileSample {
    offset_ms: u64,
    pending: usize,
    alive_tasks: Option<usize>,
}

#[derive(Serialize)]
struct ProfileReport {
    seconds: u64,
    samples: Vec<ProfileSample>,
    peak_pending: usize,
}

#[derive(Serialize)]
struct BuildReport {
    name: &'static str,
    version: &'static str,
}

/// Route table for the diagnostics endpoints.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    root: String,
    routes: BTreeMap<String, Endpoint>,
}

impl Diagnostics {
    /// Register every endpoint under `root`. A trailing `/` is added if missing.
    pub fn new(root: &str) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }

        let routes: BTreeMap<String, Endpoint> = Endpoint::ALL
            .iter()
            .map(|endpoint| (format!("{}{}", root, endpoint.name()), *endpoint))
            .collect();

        for path in routes.keys() {
            tracing::info!(path = %path, "Diagnostics endpoint registered");
        }

        Self { root, routes }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Exact-match lookup.
    pub fn lookup(&self, path: &str) -> Option<Endpoint> {
        self.routes.get(path).copied()
    }

    /// Answer a request for `endpoint`. `profile` holds the request open for
    /// the sampling window.
    pub async fn respond(&self, endpoint: Endpoint, state: &DrainState, uri: &Uri) -> Response {
        match endpoint {
            Endpoint::Index => {
                let mut body = String::new();
                for path in self.paths() {
                    body.push_str(path);
                    body.push('\n');
                }
                text(body)
            }
            Endpoint::Cmdline => text(std::env::args().collect::<Vec<_>>().join("\0")),
            Endpoint::Runtime => {
                let metrics = tokio::runtime::Handle::try_current()
                    .ok()
                    .map(|handle| handle.metrics());
                Json(RuntimeReport {
                    pid: std::process::id(),
                    workers: metrics.as_ref().map(|m| m.num_workers()),
                    alive_tasks: metrics.as_ref().map(|m| m.num_alive_tasks()),
                })
                .into_response()
            }
            Endpoint::Drain => Json(DrainReport {
                phase: if state.is_closing() { "closing" } else { "accepting" },
                pending: state.pending(),
                in_flight: state.in_flight(),
            })
            .into_response(),
            Endpoint::Build => Json(BuildReport {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            })
            .into_response(),
            Endpoint::Profile => match profile_window(uri) {
                Ok(window) => Json(sample(state, window).await).into_response(),
                Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            },
        }
    }
}

fn profile_window(uri: &Uri) -> Result<Duration, String> {
    let Query(params) = Query::<ProfileParams>::try_from_uri(uri)
        .map_err(|e| format!("invalid profile query: {}", e))?;

    match params.seconds {
        None => Ok(DEFAULT_PROFILE_WINDOW),
        Some(0) => Err("seconds must be positive".to_string()),
        Some(secs) => Ok(Duration::from_secs(secs).min(MAX_PROFILE_WINDOW)),
    }
}

async fn sample(state: &DrainState, window: Duration) -> ProfileReport {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(PROFILE_INTERVAL);
    let mut samples = Vec::new();

    loop {
        ticker.tick().await;
        let elapsed = started.elapsed();
        samples.push(ProfileSample {
            offset_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            pending: state.pending(),
            alive_tasks: tokio::runtime::Handle::try_current()
                .ok()
                .map(|handle| handle.metrics().num_alive_tasks()),
        });
        if elapsed >= window {
            break;
        }
    }

    ProfileReport {
        seconds: window.as_secs(),
        peak_pending: samples.iter().map(|s| s.pending).max().unwrap_or(0),
        samples,
    }
}

fn text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn root_is_normalised() {
        let diag = Diagnostics::new("/debug/pprof");
        assert_eq!(diag.root(), "/debug/pprof/");
        assert_eq!(diag.lookup("/debug/pprof/cmdline"), Some(Endpoint::Cmdline));
        assert_eq!(diag.lookup("/debug/pprof/cmdline/"), None);
        assert_eq!(diag.lookup("/debug/pprof/"), None);
        assert_eq!(diag.paths().count(), Endpoint::ALL.len());
    }

    fn uri(path: &str) -> Uri {
        path.parse().unwrap()
    }

    #[tokio::test]
    async fn index_lists_all_paths() {
        let diag = Diagnostics::new("/diag/");
        let response = diag
            .respond(Endpoint::Index, &DrainState::new(), &uri("/diag/index"))
            .await;
        let body = body_string(response).await;
        for endpoint in Endpoint::ALL {
            assert!(body.contains(&format!("/diag/{}", endpoint.name())));
        }
    }

    #[tokio::test]
    async fn drain_report_reflects_state() {
        let diag = Diagnostics::new("/diag/");
        let state = DrainState::new();
        state.begin_closing();

        let body = body_string(diag.respond(Endpoint::Drain, &state, &uri("/diag/drain")).await).await;
        let report: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["phase"], "closing");
        assert_eq!(report["pending"], 0);
        assert_eq!(report["in_flight"], 0);
    }

    #[tokio::test]
    async fn runtime_report_has_workers() {
        let diag = Diagnostics::new("/diag/");
        let response = diag
            .respond(Endpoint::Runtime, &DrainState::new(), &uri("/diag/runtime"))
            .await;
        let report: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(report["pid"], std::process::id());
        assert!(report["workers"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn profile_window_from_query() {
        assert_eq!(profile_window(&uri("/diag/profile")), Ok(DEFAULT_PROFILE_WINDOW));
        assert_eq!(
            profile_window(&uri("/diag/profile?seconds=2")),
            Ok(Duration::from_secs(2))
        );
        assert_eq!(
            profile_window(&uri("/diag/profile?seconds=9999")),
            Ok(MAX_PROFILE_WINDOW)
        );
        assert!(profile_window(&uri("/diag/profile?seconds=0")).is_err());
        assert!(profile_window(&uri("/diag/profile?seconds=soon")).is_err());
    }

    #[tokio::test]
    async fn profile_samples_for_the_whole_window() {
        let diag = Diagnostics::new("/diag/");
        let state = std::sync::Arc::new(DrainState::new());
        let _guard = state.track();

        let response = diag
            .respond(Endpoint::Profile, &state, &uri("/diag/profile?seconds=1"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let report: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(report["seconds"], 1);
        assert_eq!(report["peak_pending"], 2);
        let samples = report["samples"].as_array().unwrap();
        assert!(samples.len() >= 10, "only {} samples", samples.len());
        assert!(samples.last().unwrap()["offset_ms"].as_u64().unwrap() >= 1000);
    }

    #[tokio::test]
    async fn profile_rejects_zero_window() {
        let diag = Diagnostics::new("/diag/");
        let response = diag
            .respond(Endpoint::Profile, &DrainState::new(), &uri("/diag/profile?seconds=0"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
