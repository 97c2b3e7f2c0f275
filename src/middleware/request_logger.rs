//! Request identification and access logging.
//!
//! # Features
//!
//! - Reuses an inbound `X-Request-Id` or generates a UUIDv4
//! - Sets the id on the request (for inner stages) and on every response
//! - Resolves the client identity once and stores it as [`ClientIp`]
//! - Runs the rest of the chain inside a `request` span carrying the id
//! - Logs one line per request at a level keyed by status class
//!
//! ```text
//! status >= 500  → error  "Server error"
//! status >= 400  → warn   "Client error"
//! otherwise      → info   "Request processed"
//! ```
//!
//! # Client Usage
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:8080/health
//! ```
//!
//! The same id is returned in the response for correlation.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::ip::{ClientIp, TrustedProxyConfig, client_identity};
use crate::metrics;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fallback header value when the request id is not a valid header value.
static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

/// Request logging layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestLoggerLayer {
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RequestLoggerLayer {
    pub fn new(trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        Self { trusted_proxies }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Request logging service wrapper.
#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RequestLoggerService<S>
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
        let started = Instant::now();

        let request_id = ensure_request_id(&mut req);
        let client_ip = client_identity(&req, &self.trusted_proxies);
        req.extensions_mut().insert(ClientIp(client_ip.clone()));

        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let user_agent = header_string(&req, header::USER_AGENT);
        let referer = header_string(&req, header::REFERER);

        let span = info_span!("request", request_id = %request_id, method = %method, path = %path);
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let mut response = inner.call(req).await?;

                response.headers_mut().insert(
                    REQUEST_ID_HEADER,
                    request_id
                        .parse()
                        .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone()),
                );

                let status = response.status().as_u16();
                let elapsed = started.elapsed();
                let duration_ms = elapsed.as_millis() as u64;

                if status >= 500 {
                    error!(status, duration_ms, client_ip = %client_ip, user_agent = %user_agent, referer = %referer, "Server error");
                } else if status >= 400 {
                    warn!(status, duration_ms, client_ip = %client_ip, user_agent = %user_agent, referer = %referer, "Client error");
                } else {
                    info!(status, duration_ms, client_ip = %client_ip, user_agent = %user_agent, referer = %referer, "Request processed");
                }

                metrics::record_request(&method, status, elapsed.as_secs_f64());

                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Return the request's id, generating and setting one if absent.
pub(crate) fn ensure_request_id<B>(req: &mut Request<B>) -> String {
    if let Some(id) = req.request_id() {
        return id;
    }

    let id = Uuid::new_v4().to_string();
    req.headers_mut().insert(
        REQUEST_ID_HEADER,
        id.parse().unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone()),
    );
    id
}

fn header_string<B>(req: &Request<B>, name: header::HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Extension trait to extract request ID from requests.
pub trait RequestIdExt {
    /// Get the request ID from the request headers.
    fn request_id(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<String> {
        self.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }
}
