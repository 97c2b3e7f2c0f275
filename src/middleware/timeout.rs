//! Global request deadline.
//!
//! The rest of the chain runs on its own task while this stage waits on the
//! request's [`RequestContext`]:
//!
//! ```text
//!           ┌── spawn(inner.call(req)) ──► response ──┐
//! request ──┤                                         ├──► first to finish wins
//!           └── ctx.done() (deadline) ──► 408 ────────┘
//! ```
//!
//! The context is inserted into request extensions so handlers and the
//! aggregator inherit the same deadline. When this stage returns, for any
//! reason, the context is cancelled; an abandoned task observes that and
//! winds down on its own rather than being aborted.
//!
//! # Client-specified Timeout
//!
//! Clients may shorten the budget with `X-Request-Timeout` in milliseconds:
//!
//! ```text
//! X-Request-Timeout: 5000
//! ```
//!
//! Values outside [`MIN_REQUEST_TIMEOUT_MS`]..=[`MAX_REQUEST_TIMEOUT_MS`] or
//! that don't parse are ignored. A value above the server budget has no effect.

use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::context::{DoneReason, RequestContext};
use crate::error::AppError;

/// Minimum allowed request timeout (100ms).
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Maximum allowed request timeout (5 minutes).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Header name for client-specified request timeout.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Client-requested timeout, stored in request extensions when valid.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeout {
    pub duration: Duration,
    /// The original value from the header (for logging).
    pub original_ms: u64,
}

impl RequestTimeout {
    /// Returns `None` if `ms` is outside the allowed range.
    pub fn from_millis(ms: u64) -> Option<Self> {
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&ms) {
            return None;
        }
        Some(Self {
            duration: Duration::from_millis(ms),
            original_ms: ms,
        })
    }

    /// Parse `X-Request-Timeout`, ignoring absent or invalid values.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(REQUEST_TIMEOUT_HEADER)?.to_str().ok()?;

        match value.trim().parse::<u64>() {
            Ok(ms) => {
                let timeout = Self::from_millis(ms);
                if timeout.is_none() {
                    debug!(
                        timeout_ms = ms,
                        min = MIN_REQUEST_TIMEOUT_MS,
                        max = MAX_REQUEST_TIMEOUT_MS,
                        "Client timeout outside allowed range, ignoring"
                    );
                }
                timeout
            }
            Err(_) => {
                debug!(value, "Invalid X-Request-Timeout header value, ignoring");
                None
            }
        }
    }
}

/// Timeout stage for the Tower middleware stack.
#[derive(Clone, Debug)]
pub struct TimeoutLayer {
    budget: Duration,
}

impl TimeoutLayer {
    /// `budget` bounds every request; clients can only shorten it.
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            budget: self.budget,
        }
    }
}

/// Timeout service wrapper.
#[derive(Clone)]
pub struct TimeoutService<S> {
    inner: S,
    budget: Duration,
}

impl<S> Service<Request<Body>> for TimeoutService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut budget = self.budget;
        if let Some(requested) = RequestTimeout::from_headers(req.headers()) {
            debug!(
                timeout_ms = requested.original_ms,
                "Client specified request timeout via header"
            );
            budget = budget.min(requested.duration);
            req.extensions_mut().insert(requested);
        }

        let parent = req
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default();
        let ctx = parent.with_timeout(budget);
        req.extensions_mut().insert(ctx.clone());

        let path = req.uri().path().to_string();
        let work = self.inner.clone().call(req);

        Box::pin(async move {
            let _cancel = ctx.cancel_on_drop();
            let mut task = tokio::spawn(work);

            let joined = tokio::select! {
                biased;

                reason = ctx.done() => Err(reason),
                joined = &mut task => match ctx.err() {
                    // Finished in the same instant the deadline fired
                    Some(DoneReason::DeadlineExceeded) => Err(DoneReason::DeadlineExceeded),
                    _ => Ok(joined),
                },
            };

            match joined {
                Ok(Ok(result)) => result,
                // Re-raise so Recovery sees the original panic
                Ok(Err(join_error)) if join_error.is_panic() => {
                    std::panic::resume_unwind(join_error.into_panic())
                }
                Ok(Err(_)) => Ok(
                    AppError::Internal("request task was cancelled".to_string()).into_response(),
                ),
                Err(reason) => {
                    warn!(
                        path = %path,
                        %reason,
                        budget_ms = budget.as_millis() as u64,
                        "Request exceeded its deadline, abandoning handler"
                    );
                    Ok(AppError::RequestTimeout(budget).into_response())
                }
            }
        })
    }
}
