//! Shared application state for Axum handlers and middleware.
//!
//! Everything here is either `Arc`-wrapped or internally synchronized, so
//! `AppState` is cheap to clone into every request.
//!
//! # Structured Concurrency
//!
//! Background tasks (the rate limiter and auth failure sweepers) are spawned onto a
//! `TaskTracker` and stopped through a shared `CancellationToken`. Call
//! [`AppState::shutdown`] after the server stops accepting connections.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::middleware::{
    AUTH_SWEEP_INTERVAL, ApiKeyRegistry, AuthFailureGuard, SlidingWindowLimiter,
    TrustedProxyConfig,
};
use crate::services::Aggregator;
use crate::upstream::UpstreamClient;

/// Loopback identities never rate limited in debug mode.
pub const DEBUG_WHITELIST: [&str; 2] = ["127.0.0.1", "::1"];

/// Key registered alongside the configured ones when auth is on in debug mode.
pub const DEV_API_KEY: &str = "development-api-key";
pub const DEV_PRINCIPAL: &str = "dev-user";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub aggregator: Aggregator,
    pub rate_limiter: Arc<SlidingWindowLimiter>,
    pub api_keys: Arc<ApiKeyRegistry>,
    pub auth_failures: Arc<AuthFailureGuard>,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Wire the components together and start background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config, upstream: Arc<dyn UpstreamClient>) -> Self {
        let aggregator = Aggregator::new(upstream, config.ethereum_request_timeout);

        let rate_limiter = Arc::new(SlidingWindowLimiter::new(
            config.rate_limit,
            config.rate_limit_window,
        ));
        if config.is_debug() {
            for ip in DEBUG_WHITELIST {
                rate_limiter.add_to_whitelist(ip);
            }
        }
        for client in &config.rate_limit_whitelist {
            rate_limiter.add_to_whitelist(client.clone());
        }

        let api_keys = Arc::new(ApiKeyRegistry::from_pairs(config.api_keys.clone()));
        if config.auth_enabled && config.is_debug() {
            warn!(
                principal = DEV_PRINCIPAL,
                "Debug mode, registering the development API key"
            );
            api_keys.add(DEV_API_KEY, DEV_PRINCIPAL);
        }

        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));

        let state = Self {
            config: Arc::new(config),
            aggregator,
            rate_limiter,
            api_keys,
            auth_failures: Arc::default(),
            trusted_proxies,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_background_tasks();
        state
    }

    fn spawn_background_tasks(&self) {
        self.rate_limiter
            .spawn_sweeper(&self.task_tracker, self.cancellation_token.clone());
        if self.config.auth_enabled {
            self.auth_failures.spawn_sweeper(
                &self.task_tracker,
                self.cancellation_token.clone(),
                AUTH_SWEEP_INTERVAL,
            );
        }
        debug!("Background tasks started");
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}
