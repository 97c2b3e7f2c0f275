//! HTTP middleware pipeline.
//!
//! Stages in the order a request meets them:
//!
//! ```text
//! Recovery → Logger → Security → CORS → SizeLimit → Timeout
//!     └─ /api only: → RateLimit → Auth → ContentType
//!            └─ /api/ethereum/{address}: → CacheControl → handler
//! ```
//!
//! | Stage        | Short-circuits with                     |
//! |--------------|-----------------------------------------|
//! | Recovery     | 500 on panic                            |
//! | CORS         | 204 on `OPTIONS`                        |
//! | SizeLimit    | 413                                     |
//! | Timeout      | 408                                     |
//! | RateLimit    | 429 + `Retry-After`                     |
//! | Auth         | 401, or 429 after repeated failures     |
//! | ContentType  | 415                                     |
//!
//! Logger runs outside every short-circuiting stage except Recovery, so each
//! rejection is logged with its request id and status.

pub mod auth;
pub mod cache_control;
pub mod content_type;
pub mod cors;
pub mod ip;
pub mod rate_limit;
pub mod recovery;
pub mod request_logger;
pub mod request_size;
pub mod security;
pub mod timeout;

pub use auth::{
    API_KEY_HEADER, AUTH_SWEEP_INTERVAL, ApiKeyAuth, ApiKeyRegistry, AuthFailureGuard, Principal,
};
pub use cache_control::{ADDRESS_CACHE_MAX_AGE, cache_control};
pub use content_type::require_json;
pub use cors::{CorsPolicy, cors};
pub use ip::{ClientIp, TrustedProxyConfig, UNKNOWN_IP, client_identity};
pub use rate_limit::{Decision, RateLimitLayer, SlidingWindowLimiter};
pub use recovery::RecoveryLayer;
pub use request_logger::{REQUEST_ID_HEADER, RequestIdExt, RequestLoggerLayer};
pub use request_size::limit_request_size;
pub use security::with_security_headers;
pub use timeout::{REQUEST_TIMEOUT_HEADER, RequestTimeout, TimeoutLayer};
