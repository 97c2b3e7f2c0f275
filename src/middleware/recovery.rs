//! Outermost stage: turns panics anywhere below into a generic 500.
//!
//! Panics in the handler task are re-raised by the Timeout stage, so they
//! arrive here as ordinary unwinds. The panic hook installed by
//! [`crate::telemetry`] has already logged the location and backtrace; this
//! stage adds the request id and the panic message.
//!
//! Requires `panic = "unwind"` (the default, and what the release profile uses).

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures::FutureExt;
use tower::{Layer, Service};
use tracing::error;

use super::request_logger::{REQUEST_ID_HEADER, ensure_request_id};
use crate::metrics;
use crate::models::ApiResponse;

#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner }
    }
}

#[derive(Clone)]
pub struct RecoveryService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RecoveryService<S>
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
        // The id must exist before anything below can panic
        let request_id = ensure_request_id(&mut req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // `call` itself runs inside the guarded future
            let guarded = AssertUnwindSafe(async move { inner.call(req).await });

            match guarded.catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    metrics::record_panic_recovered();
                    error!(request_id = %request_id, panic = %message, "Panic recovered");
                    Ok(internal_error(&request_id))
                }
            }
        })
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn internal_error(request_id: &str) -> Response<Body> {
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("Internal server error", None)),
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use axum::body::to_bytes;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_panic_becomes_generic_500() {
        let inner = tower::service_fn(|_req: Request<Body>| async move {
            if true {
                panic!("secret internal detail");
            }
            Ok::<_, Infallible>(Response::new(Body::empty()))
        });

        let response = RecoveryLayer::new()
            .layer(inner)
            .oneshot(
                Request::builder()
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-request-id"], "req-42");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body, r#"{"status":"error","message":"Internal server error"}"#);
        assert!(!body.contains("secret"));
    }

    #[tokio::test]
    async fn test_normal_response_untouched() {
        let inner = tower::service_fn(|_req: Request<Body>| async move {
            Ok::<_, Infallible>(Response::new(Body::from("fine")))
        });

        let response = RecoveryLayer::new()
            .layer(inner)
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
