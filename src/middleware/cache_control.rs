//! Short-lived caching hints for address lookups.
//!
//! Advisory only: the server itself never serves from a cache.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, TimeDelta, Utc};

/// How long clients may reuse an address lookup.
pub const ADDRESS_CACHE_MAX_AGE: Duration = Duration::from_secs(5);

/// Adds `Cache-Control` and `Expires` to successful `GET` responses.
pub async fn cache_control(
    State(max_age): State<Duration>,
    req: Request,
    next: Next,
) -> Response {
    let is_get = req.method() == Method::GET;
    let mut response = next.run(req).await;

    if is_get && response.status().is_success() {
        let cache_control = format!("public, max-age={}", max_age.as_secs());
        let expires = http_date(Utc::now() + TimeDelta::seconds(max_age.as_secs() as i64));

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if let Ok(value) = HeaderValue::from_str(&expires) {
            headers.insert(header::EXPIRES, value);
        }
    }
    response
}

/// IMF-fixdate, e.g. `Mon, 15 Jan 2024 10:30:05 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
