//! API key authentication middleware.
//!
//! # Security Features
//!
//! - **Constant-time lookup**: every registered key is compared on each
//!   attempt, so response time reveals neither which key matched nor how many
//!   leading bytes were right
//! - **Multiple input methods**: Header (`X-API-Key`) or query parameter (`api_key`)
//! - **Brute force protection**: repeated failures from one client are
//!   answered with 429 before the credential is looked at
//!
//! # Usage
//!
//! ```bash
//! AUTH_ENABLED=true API_KEYS="k3y-one:alice,k3y-two:bob" cargo run
//!
//! curl -H "X-API-Key: k3y-one" http://localhost:8080/api/ethereum/0x...
//! curl "http://localhost:8080/api/ethereum/0x...?api_key=k3y-one"
//! ```
//!
//! On success the resolved [`Principal`] is inserted into request extensions.
//! The layer is only mounted on the `/api` group, so `/health` never needs a key.
//!
//! Failure state is per client identity. [`AuthFailureGuard::spawn_sweeper`]
//! drops replenished and expired entries periodically.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, header};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use parking_lot::{Mutex, RwLock};
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::{debug, error, info, warn};

use super::ip::{TrustedProxyConfig, client_identity};
use crate::error::AppError;
use crate::metrics;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter name for API key.
pub const API_KEY_QUERY: &str = "api_key";

/// Failures tolerated per client per minute once the burst is spent.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Consecutive failures allowed before throttling starts.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// How often idle failure state is swept.
pub const AUTH_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Identity resolved from a valid API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Credential to principal mapping.
///
/// Read-mostly: lookups take a shared lock, `add`/`remove` an exclusive one.
#[derive(Debug, Default)]
pub struct ApiKeyRegistry {
    keys: RwLock<HashMap<String, String>>,
}

impl ApiKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        let keys = pairs
            .into_iter()
            .map(|(key, principal)| (key.into(), principal.into()))
            .collect();
        Self {
            keys: RwLock::new(keys),
        }
    }

    /// Register `key`, replacing any previous principal for it.
    pub fn add(&self, key: impl Into<String>, principal: impl Into<String>) {
        self.keys.write().insert(key.into(), principal.into());
    }

    /// Revoke `key`. Returns the principal it mapped to.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.keys.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Principal for `candidate`, if registered.
    ///
    /// Compares against every key without short-circuiting.
    pub fn resolve(&self, candidate: &str) -> Option<Principal> {
        let keys = self.keys.read();
        let mut found = None;

        for (key, principal) in keys.iter() {
            if bool::from(key.as_bytes().ct_eq(candidate.as_bytes())) {
                found = Some(principal);
            }
        }

        found.map(|principal| Principal(principal.clone()))
    }
}

/// Per-client failure throttle.
///
/// Governor counts failures; once it refuses one, the client is blocked
/// until governor would accept again.
pub struct AuthFailureGuard {
    limiter: AuthFailureLimiter,
    blocked: Mutex<HashMap<String, Instant>>,
}

impl Default for AuthFailureGuard {
    /// Burst of 5 failures, then 10 per minute.
    fn default() -> Self {
        Self::new(
            Quota::per_minute(DEFAULT_AUTH_FAILURE_LIMIT).allow_burst(DEFAULT_AUTH_FAILURE_BURST),
        )
    }
}

impl AuthFailureGuard {
    pub fn new(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
            blocked: Mutex::new(HashMap::new()),
        }
    }

    /// Remaining block time for `client`, if any.
    fn blocked_for(&self, client: &str) -> Option<Duration> {
        let mut blocked = self.blocked.lock();
        let until = *blocked.get(client)?;
        let now = Instant::now();

        if until > now {
            Some(until - now)
        } else {
            blocked.remove(client);
            None
        }
    }

    /// Count one failure. Returns the block duration if this failure tipped
    /// the client over the limit.
    fn record_failure(&self, client: &str) -> Option<Duration> {
        match self.limiter.check_key(&client.to_string()) {
            Ok(()) => None,
            Err(not_until) => {
                let wait = not_until
                    .wait_time_from(DefaultClock::default().now())
                    .max(Duration::from_secs(1));
                self.blocked
                    .lock()
                    .insert(client.to_string(), Instant::now() + wait);
                Some(wait)
            }
        }
    }

    /// Identities with failures not yet replenished.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Identities currently blocked or whose block has lapsed unobserved.
    pub fn blocked_clients(&self) -> usize {
        self.blocked.lock().len()
    }

    /// Forget fully replenished counters and lapsed blocks. Returns how many
    /// entries were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let forgotten = before.saturating_sub(self.limiter.len());

        let now = Instant::now();
        let mut blocked = self.blocked.lock();
        let before = blocked.len();
        blocked.retain(|_, until| *until > now);
        blocked.shrink_to_fit();

        forgotten + (before - blocked.len())
    }

    /// Run [`sweep`](Self::sweep) every `period` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
        period: Duration,
    ) {
        let guard = Arc::clone(self);

        tracker.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Auth failure sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = guard.sweep();
                        if removed > 0 {
                            debug!(removed, "Evicted idle auth failure state");
                        }
                    }
                }
            }
        });

        info!(period_secs = period.as_secs(), "Auth failure sweep started");
    }
}

/// API key authentication layer.
#[derive(Clone)]
pub struct ApiKeyAuth {
    registry: Arc<ApiKeyRegistry>,
    failures: Arc<AuthFailureGuard>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl ApiKeyAuth {
    /// `failures` is shared so its owner can sweep it.
    pub fn new(
        registry: Arc<ApiKeyRegistry>,
        failures: Arc<AuthFailureGuard>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            registry,
            failures,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for ApiKeyAuth {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            registry: self.registry.clone(),
            failures: self.failures.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    registry: Arc<ApiKeyRegistry>,
    failures: Arc<AuthFailureGuard>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let registry = self.registry.clone();
        let failures = self.failures.clone();
        let mut inner = self.inner.clone();

        let client_ip = client_identity(&req, &self.trusted_proxies);

        Box::pin(async move {
            if let Some(retry_after) = failures.blocked_for(&client_ip) {
                metrics::record_auth_failure();
                error!(
                    client_ip = %client_ip,
                    retry_after_secs = retry_after.as_secs(),
                    "Client blocked due to excessive auth failures"
                );
                return Ok(AppError::AuthThrottled { retry_after }.into_response());
            }

            let failure = match extract_api_key(&req) {
                Some(extracted) => match registry.resolve(&extracted.key) {
                    Some(principal) => {
                        debug!(
                            principal = %principal.as_str(),
                            from_query = extracted.from_query,
                            "API key authentication successful"
                        );
                        req.extensions_mut().insert(principal);
                        return inner.call(req).await;
                    }
                    None => "Invalid API key",
                },
                None => "API key is required",
            };

            metrics::record_auth_failure();
            warn!(
                path = %req.uri().path(),
                client_ip = %client_ip,
                reason = failure,
                "Authentication failed"
            );

            if let Some(retry_after) = failures.record_failure(&client_ip) {
                return Ok(AppError::AuthThrottled { retry_after }.into_response());
            }

            Ok(unauthorized_response(failure))
        })
    }
}

/// Result of extracting an API key with metadata about the source.
struct ExtractedApiKey {
    key: String,
    from_query: bool,
}

/// Extract API key from the `X-API-Key` header, then the `api_key` query parameter.
///
/// Query parameters end up in access logs and browser history, so that path
/// logs a warning.
fn extract_api_key<B>(req: &Request<B>) -> Option<ExtractedApiKey> {
    if let Some(header_value) = req.headers().get(API_KEY_HEADER)
        && let Ok(value) = header_value.to_str()
        && !value.is_empty()
    {
        return Some(ExtractedApiKey {
            key: value.to_string(),
            from_query: false,
        });
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=')
                && key == API_KEY_QUERY
                && !value.is_empty()
            {
                warn!(
                    path = %req.uri().path(),
                    "API key provided via query parameter; prefer the X-API-Key header"
                );
                return Some(ExtractedApiKey {
                    key: value.to_string(),
                    from_query: true,
                });
            }
        }
    }

    None
}

fn unauthorized_response(message: &str) -> Response<Body> {
    let mut response = AppError::Unauthorized(message.to_string()).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("API-Key"));
    response
}
