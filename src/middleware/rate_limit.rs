//! Per-client sliding-window rate limiting.
//!
//! # Algorithm
//!
//! Each client identity owns the instants of its admitted requests inside the
//! trailing window:
//!
//! ```text
//!            window
//!   ├──────────────────────┤
//! ──x────x──x────────x─────┼──► time
//!   ^ pruned        kept   now
//! ```
//!
//! A check prunes instants at or before `now - window`, admits iff fewer than
//! `limit` remain, and records `now` on admission. Prune, decide and record run
//! in one critical section, so concurrent requests from one client can never
//! push the count above `limit`.
//!
//! Whitelisted identities are admitted without touching any window.
//!
//! A background sweep runs once per window and drops identities whose window
//! has emptied, so memory tracks active clients only.
//!
//! # Response Headers
//!
//! - Admitted: `X-RateLimit-Limit`, `X-RateLimit-Remaining`
//! - Rejected (429): the above plus `Retry-After`

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use super::ip::{TrustedProxyConfig, client_identity};
use crate::error::AppError;
use crate::metrics;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted and recorded; `remaining` admissions left in the window.
    Admitted { remaining: usize },
    /// Admitted without being recorded.
    Whitelisted,
    /// Window is full; the oldest entry expires after `retry_after`.
    Rejected { retry_after: Duration },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Rejected { .. })
    }
}

/// Sliding-window limiter keyed by client identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    whitelist: RwLock<HashSet<String>>,
}

impl SlidingWindowLimiter {
    /// `limit` admissions per client per trailing `window`.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
            whitelist: RwLock::new(HashSet::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `true` if a request from `client` may proceed.
    pub fn admit(&self, client: &str) -> bool {
        self.check(client).is_admitted()
    }

    /// Decide on a request from `client`, recording it if admitted.
    pub fn check(&self, client: &str) -> Decision {
        if self.is_whitelisted(client) {
            return Decision::Whitelisted;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();

        let timestamps = windows.entry(client.to_string()).or_default();

        prune(timestamps, now, self.window);

        if timestamps.len() < self.limit {
            timestamps.push_back(now);
            Decision::Admitted {
                remaining: self.limit - timestamps.len(),
            }
        } else {
            let retry_after = timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            Decision::Rejected { retry_after }
        }
    }

    pub fn add_to_whitelist(&self, client: impl Into<String>) {
        self.whitelist.write().insert(client.into());
    }

    /// Returns `true` if `client` was whitelisted.
    pub fn remove_from_whitelist(&self, client: &str) -> bool {
        self.whitelist.write().remove(client)
    }

    pub fn is_whitelisted(&self, client: &str) -> bool {
        self.whitelist.read().contains(client)
    }

    /// Number of identities currently holding a window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }

    /// Drop identities whose windows hold no live entries. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();

        windows.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });

        let removed = before - windows.len();
        metrics::set_rate_limit_tracked_clients(windows.len());
        removed
    }

    /// Run [`sweep`](Self::sweep) once per window until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let limiter = Arc::clone(self);
        let period = self.window;

        tracker.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Rate limiter sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, "Evicted idle rate limit windows");
                        }
                    }
                }
            }
        });

        info!(window_secs = period.as_secs(), "Rate limiter sweep started");
    }
}

/// Drop instants at or before `now - window`.
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

/// Tower layer applying a [`SlidingWindowLimiter`] per client identity.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(900)));
/// let api = Router::new()
///     .route("/ethereum/{address}", get(handler))
///     .layer(RateLimitLayer::new(limiter, Arc::new(TrustedProxyConfig::default())));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            limiter,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<SlidingWindowLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        let client_ip = client_identity(&req, &self.trusted_proxies);

        Box::pin(async move {
            let limit = limiter.limit();

            match limiter.check(&client_ip) {
                Decision::Whitelisted => inner.call(req).await,
                Decision::Admitted { remaining } => {
                    let mut response = inner.call(req).await?;
                    let headers = response.headers_mut();
                    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
                    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
                    Ok(response)
                }
                Decision::Rejected { retry_after } => {
                    metrics::record_rate_limit_rejection();
                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        retry_after_secs = retry_after.as_secs(),
                        "Rate limit exceeded for client"
                    );

                    Ok(AppError::RateLimited { limit, retry_after }.into_response())
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn limiter() -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(3, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_then_reject_within_window() {
        let limiter = limiter();

        assert_eq!(limiter.check("a"), Decision::Admitted { remaining: 2 });
        assert_eq!(limiter.check("a"), Decision::Admitted { remaining: 1 });
        assert_eq!(limiter.check("a"), Decision::Admitted { remaining: 0 });
        assert!(!limiter.admit("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_again_after_window() {
        let limiter = limiter();
        for _ in 0..3 {
            assert!(limiter.admit("a"));
        }
        assert!(!limiter.admit("a"));

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert!(limiter.admit("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_rather_than_resets() {
        let limiter = limiter();

        assert!(limiter.admit("a"));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.admit("a"));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));

        // Only the first admission has expired
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_tracks_oldest_entry() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.admit("a");
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        // Oldest entry was 300ms ago
        assert_eq!(
            limiter.check("a"),
            Decision::Rejected {
                retry_after: Duration::from_millis(700)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_recorded() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.admit("a");
        }
        for _ in 0..10 {
            assert!(!limiter.admit("a"));
        }

        tokio::time::advance(Duration::from_millis(1001)).await;

        // Rejected attempts did not extend the window
        for _ in 0..3 {
            assert!(limiter.admit("a"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.admit("a");
        }
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitelist_bypasses_and_does_not_record() {
        let limiter = limiter();
        limiter.add_to_whitelist("10.0.0.1");

        for _ in 0..100 {
            assert_eq!(limiter.check("10.0.0.1"), Decision::Whitelisted);
        }
        assert_eq!(limiter.tracked_clients(), 0);

        assert!(limiter.remove_from_whitelist("10.0.0.1"));
        assert!(!limiter.remove_from_whitelist("10.0.0.1"));
        assert_eq!(limiter.check("10.0.0.1"), Decision::Admitted { remaining: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_clients() {
        let limiter = limiter();
        for i in 0..50 {
            limiter.admit(&format!("client-{i}"));
        }
        assert_eq!(limiter.tracked_clients(), 50);

        // Nothing expired yet
        assert_eq!(limiter.sweep(), 0);

        tokio::time::advance(Duration::from_millis(1001)).await;
        limiter.admit("client-0");

        assert_eq!(limiter.sweep(), 49);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_memory_stays_bounded_over_many_windows() {
        let limiter = limiter();

        for cycle in 0..20 {
            for i in 0..10 {
                limiter.admit(&format!("cycle-{cycle}-client-{i}"));
            }
            tokio::time::advance(Duration::from_millis(1001)).await;
            limiter.sweep();
            assert_eq!(limiter.tracked_clients(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let limiter = Arc::new(limiter());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        limiter.spawn_sweeper(&tracker, cancel.clone());
        limiter.admit("a");

        // One full period plus slack for the sweep to run
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(25, Duration::from_secs(60)));
        let mut handles = Vec::new();

        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.admit("shared") }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 25);
    }
}
