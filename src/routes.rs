//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outer to inner)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Recovery     │ ← 500 on panic
//! ├──────────────────┤
//! │  Request Logger  │ ← X-Request-Id, access log, metrics
//! ├──────────────────┤
//! │ Security Headers │
//! ├──────────────────┤
//! │       CORS       │ ← 204 on OPTIONS
//! ├──────────────────┤
//! │    Size Limit    │ ← 413
//! ├──────────────────┤
//! │     Timeout      │ ← 408
//! └────────┬─────────┘
//!          │
//!    ┌─────┴──────────────────────────┐
//!    │                                │
//!    ▼ /api                           ▼ /health, /debug/ping
//! ┌──────────────────┐             Handler
//! │   Rate Limiting  │ ← 429
//! ├──────────────────┤
//! │  Authentication  │ ← 401 / 429 (if AUTH_ENABLED)
//! ├──────────────────┤
//! │   Content-Type   │ ← 415
//! ├──────────────────┤
//! │  Cache-Control   │ (address route only)
//! └────────┬─────────┘
//!          ▼
//!       Handler
//! ```
//!
//! Layers are added innermost first, so each block below reads bottom-up
//! against the diagram.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    ADDRESS_CACHE_MAX_AGE, ApiKeyAuth, CorsPolicy, RateLimitLayer, RecoveryLayer,
    RequestLoggerLayer, TimeoutLayer, cache_control, cors, limit_request_size, require_json,
    with_security_headers,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// - **Authentication**: only when `AUTH_ENABLED`
/// - **`/debug/ping`**: only in debug mode
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    // =========================================================================
    // API group: rate limit → auth → content type → (cache control) → handler
    // =========================================================================
    let mut api = Router::new()
        .route(
            "/ethereum/{address}",
            get(handlers::get_address_info),
        )
        .route_layer(from_fn_with_state(ADDRESS_CACHE_MAX_AGE, cache_control))
        .layer(from_fn(require_json));

    if config.auth_enabled {
        info!(keys = state.api_keys.len(), "API key authentication enabled");
        api = api.layer(ApiKeyAuth::new(
            state.api_keys.clone(),
            state.auth_failures.clone(),
            state.trusted_proxies.clone(),
        ));
    } else {
        info!("API key authentication disabled (AUTH_ENABLED=false)");
    }

    info!(
        limit = config.rate_limit,
        window_secs = config.rate_limit_window.as_secs(),
        trusted_proxies = config.trusted_proxies.len(),
        "Rate limiting enabled"
    );
    api = api.layer(RateLimitLayer::new(
        state.rate_limiter.clone(),
        state.trusted_proxies.clone(),
    ));

    // =========================================================================
    // Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api);

    if config.is_debug() {
        router = router.route("/debug/ping", get(handlers::ping));
    }

    // =========================================================================
    // Global stages, innermost first
    // =========================================================================
    let router = router
        .with_state(state.clone())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_size))
        .layer(from_fn_with_state(
            config.max_request_body_size,
            limit_request_size,
        ))
        .layer(from_fn_with_state(
            Arc::new(CorsPolicy::new(&config.cors_allowed_origins)),
            cors,
        ));

    info!(
        timeout_secs = config.request_timeout.as_secs(),
        max_body_bytes = config.max_request_body_size,
        "Global middleware configured"
    );

    with_security_headers(router)
        .layer(RequestLoggerLayer::new(state.trusted_proxies.clone()))
        .layer(RecoveryLayer::new())
}
