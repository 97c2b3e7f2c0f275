//! Requires a JSON content type on requests that may carry a body.

use axum::extract::Request;
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

pub async fn require_json(req: Request, next: Next) -> Response {
    let method = req.method();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return next.run(req).await;
    }

    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));

    if is_json {
        next.run(req).await
    } else {
        AppError::UnsupportedMediaType.into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::middleware::from_fn;
    use axum::routing::any;
    use tower::ServiceExt;

    async fn send(method: Method, content_type: Option<&str>) -> StatusCode {
        let app = Router::new()
            .route("/x", any(|| async { "ok" }))
            .layer(from_fn(require_json));

        let mut builder = Request::builder().method(method).uri("/x");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_safe_methods_exempt() {
        assert_eq!(send(Method::GET, None).await, StatusCode::OK);
        assert_eq!(send(Method::HEAD, None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_requires_json() {
        assert_eq!(
            send(Method::POST, None).await,
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            send(Method::PUT, Some("text/plain")).await,
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            send(Method::POST, Some("Application/JSON; charset=utf-8")).await,
            StatusCode::OK
        );
    }
}
