//! Request draining and in-flight tracking.
//!
//! # Responsibilities
//! - Count in-flight requests (plus one baseline token for the running server)
//! - Switch Accepting → Closing exactly once
//! - Answer requests that arrive while Closing without calling the handler
//! - Contain handler panics to the request that raised them
//!
//! # Design Decisions
//! - The counter is incremented before the Closing check, so shutdown never
//!   misses a request that got past the check
//! - Decrement happens in a guard's `Drop`, which also covers panics and
//!   cancelled futures
//! - The guard travels inside the response body, so a request stays in flight
//!   until its body has been fully written or dropped by the connection

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::{BoxFuture, FutureExt};
use hyper::body::{Body as HttpBody, Bytes, Frame, SizeHint};
use tokio::sync::Notify;
use tower::{Layer, Service, ServiceExt};

use crate::http::diagnostics::Diagnostics;
use crate::observability::metrics;

/// Status returned to requests that arrive after draining began.
pub const CLOSING_STATUS: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

/// Drain lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    /// Requests are passed to the wrapped handler.
    Accepting,
    /// Requests get [`CLOSING_STATUS`]; counted requests finish.
    Closing,
}

/// Shared pending-request counter with a one-way closing flag.
///
/// Starts at 1: the baseline token held by the running server, released by
/// [`begin_closing`](Self::begin_closing). The count reaches zero only once
/// closing has begun and no request is in flight.
#[derive(Debug)]
pub struct DrainState {
    pending: AtomicUsize,
    closing: AtomicBool,
    idle: Notify,
}

impl DrainState {
    pub fn new() -> Self {
        Self {
            pending: AtomicUsize::new(1),
            closing: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Record a new in-flight request. Returns a guard that releases it on drop.
    pub fn track(self: &Arc<Self>) -> PendingGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        metrics::request_started();
        PendingGuard {
            state: Arc::clone(self),
        }
    }

    /// Flip to Closing and release the baseline token.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn begin_closing(&self) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.release();
        true
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> DrainPhase {
        if self.is_closing() {
            DrainPhase::Closing
        } else {
            DrainPhase::Accepting
        }
    }

    /// Raw counter value, baseline token included.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> usize {
        let baseline = usize::from(!self.is_closing());
        self.pending().saturating_sub(baseline)
    }

    /// Wait until the counter reaches zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before reading the counter so a release in between
            // is not lost.
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "pending counter underflow");
        if prev == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Default for DrainState {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks one request's lifetime.
/// Decrements the pending count when dropped.
#[derive(Debug)]
pub struct PendingGuard {
    state: Arc<DrainState>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        metrics::request_finished();
        self.state.release();
    }
}

/// Response body that holds a [`PendingGuard`] until the last frame is
/// produced or the body is dropped.
pub struct GuardedBody {
    inner: Body,
    guard: Option<PendingGuard>,
}

impl GuardedBody {
    pub fn new(inner: Body, guard: PendingGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl HttpBody for GuardedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => {
                self.guard.take();
            }
            Poll::Ready(Some(Ok(_))) if self.inner.is_end_stream() => {
                self.guard.take();
            }
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Move `guard` into the body of `response`.
fn hold_until_written(response: Response, guard: PendingGuard) -> Response {
    response.map(|body| Body::new(GuardedBody::new(body, guard)))
}

/// Layer that wraps a handler in a [`DrainService`].
#[derive(Clone)]
pub struct DrainLayer {
    state: Arc<DrainState>,
    diagnostics: Arc<ArcSwapOption<Diagnostics>>,
}

impl DrainLayer {
    pub fn new(state: Arc<DrainState>) -> Self {
        Self {
            state,
            diagnostics: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn state(&self) -> &Arc<DrainState> {
        &self.state
    }

    /// Serve `diagnostics` ahead of the wrapped handler from now on.
    pub fn set_diagnostics(&self, diagnostics: Diagnostics) {
        self.diagnostics.store(Some(Arc::new(diagnostics)));
    }

    pub fn diagnostics(&self) -> Option<Arc<Diagnostics>> {
        self.diagnostics.load_full()
    }
}

impl<S> Layer<S> for DrainLayer {
    type Service = DrainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DrainService {
            inner,
            state: Arc::clone(&self.state),
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }
}

/// Handler wrapper that counts requests and enforces the Closing phase.
#[derive(Clone)]
pub struct DrainService<S> {
    inner: S,
    state: Arc<DrainState>,
    diagnostics: Arc<ArcSwapOption<Diagnostics>>,
}

impl<S, B> Service<Request<B>> for DrainService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The inner service is driven with `oneshot`, which polls readiness itself.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let guard = self.state.track();

        if self.state.is_closing() {
            metrics::record_request(metrics::Outcome::RejectedClosing);
            drop(guard);
            return futures_util::future::ready(Ok(unavailable_response())).boxed();
        }

        let request = request.map(Body::new);

        if let Some(diagnostics) = self.diagnostics.load_full() {
            if let Some(endpoint) = diagnostics.lookup(request.uri().path()) {
                let state = Arc::clone(&self.state);
                let uri = request.uri().clone();
                return async move {
                    let response = diagnostics.respond(endpoint, &state, &uri).await;
                    metrics::record_request(metrics::Outcome::Served);
                    Ok(hold_until_written(response, guard))
                }
                .boxed();
            }
        }

        let inner = self.inner.clone();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        async move {
            let handled = AssertUnwindSafe(inner.oneshot(request)).catch_unwind().await;
            match handled {
                Ok(Ok(response)) => {
                    metrics::record_request(metrics::Outcome::Served);
                    Ok(hold_until_written(response, guard))
                }
                Ok(Err(never)) => match never {},
                Err(payload) => {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        panic = %panic_message(payload.as_ref()),
                        "Handler panicked"
                    );
                    metrics::record_request(metrics::Outcome::Panicked);
                    drop(guard);
                    Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
                }
            }
        }
        .boxed()
    }
}

/// Response sent to requests that arrive while Closing.
pub fn unavailable_response() -> Response {
    let mut response = (CLOSING_STATUS, "Service Unavailable").into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
