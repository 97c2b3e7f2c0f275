//! Cross-origin headers and preflight short-circuit.
//!
//! With the wildcard origin configured every response carries
//! `Access-Control-Allow-Origin: *` and no credentials flag, since browsers
//! reject that combination. With an explicit list, a matching `Origin` is
//! echoed back together with `Access-Control-Allow-Credentials: true`.
//!
//! Not `tower_http::cors::CorsLayer`: that layer only answers real preflights,
//! while here every `OPTIONS` request ends with 204.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

pub const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
pub const ALLOW_HEADERS: &str = "Origin, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization, X-API-Key";
pub const EXPOSE_HEADERS: &str = "Content-Length, Content-Type, X-Request-ID";

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_any: bool,
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: &[String]) -> Self {
        Self {
            allow_any: origins.iter().any(|o| o == "*"),
            origins: origins
                .iter()
                .filter(|o| o.as_str() != "*")
                .cloned()
                .collect(),
        }
    }

    /// Headers to add for a request carrying `origin`.
    fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if self.allow_any {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        } else if let Some(origin) = origin.filter(|o| self.is_listed(o)) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if !self.allow_any {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }

        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSE_HEADERS),
        );
    }

    fn is_listed(&self, origin: &HeaderValue) -> bool {
        origin
            .to_str()
            .map(|o| self.origins.iter().any(|allowed| allowed == o))
            .unwrap_or(false)
    }
}

/// Every `OPTIONS` request is answered here with 204 and never reaches a handler.
pub async fn cors(State(policy): State<Arc<CorsPolicy>>, req: Request, next: Next) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();

    let mut response = if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        response
    } else {
        next.run(req).await
    };

    policy.apply(origin.as_ref(), response.headers_mut());
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use tower::ServiceExt;

    fn app(origins: &[&str]) -> Router {
        let origins: Vec<String> = origins.iter().map(|o| o.to_string()).collect();
        Router::new()
            .route("/x", get(|| async { "x" }))
            .layer(from_fn_with_state(
                Arc::new(CorsPolicy::new(&origins)),
                cors,
            ))
    }

    fn request(method: Method, origin: Option<&str>) -> Request {
        let mut builder = Request::builder().method(method).uri("/x");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let response = app(&["*"])
            .oneshot(request(Method::OPTIONS, Some("https://a.example")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            ALLOW_METHODS
        );
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_wildcard_on_regular_request() {
        let response = app(&["*"])
            .oneshot(request(Method::GET, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS],
            EXPOSE_HEADERS
        );
    }

    #[tokio::test]
    async fn test_listed_origin_echoed_with_credentials() {
        let response = app(&["https://a.example", "https://b.example"])
            .oneshot(request(Method::GET, Some("https://b.example")))
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://b.example"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
        assert_eq!(response.headers()[header::VARY], "Origin");
    }

    #[tokio::test]
    async fn test_unlisted_origin_gets_no_allow_origin() {
        let response = app(&["https://a.example"])
            .oneshot(request(Method::GET, Some("https://evil.example")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }
}
