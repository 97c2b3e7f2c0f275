use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ApiResponse;
use crate::services::AggregateError;

/// Application-wide error types with their HTTP status codes.
///
/// Every variant renders the same envelope:
///
/// ```json
/// {"status":"error","message":"...","error":"..."}
/// ```
///
/// `Upstream`, `Internal` and `Config` only ever expose a generic message;
/// the detail goes to the log.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Upstream(#[from] AggregateError),

    #[error("Rate limit exceeded")]
    RateLimited {
        limit: usize,
        retry_after: Duration,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Repeated credential failures from one client.
    #[error("Too many failed authentication attempts")]
    AuthThrottled { retry_after: Duration },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(AggregateError::InvalidAddress(_)) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimited { .. } | AppError::AuthThrottled { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing `(message, error)` pair. Never carries internal detail.
    fn public_parts(&self) -> (String, Option<String>) {
        match self {
            AppError::Validation(msg) => (msg.clone(), None),
            AppError::Upstream(AggregateError::InvalidAddress(_)) => {
                ("Invalid Ethereum address format".to_string(), None)
            }
            AppError::Upstream(_) | AppError::Internal(_) | AppError::Config(_) => {
                ("Internal server error".to_string(), None)
            }
            AppError::RateLimited { .. } => {
                ("Rate limit exceeded. Try again later.".to_string(), None)
            }
            AppError::Unauthorized(msg) => (msg.clone(), None),
            AppError::AuthThrottled { .. } => (
                "Too many failed authentication attempts. Try again later.".to_string(),
                None,
            ),
            AppError::PayloadTooLarge { limit } => (
                "Request body too large".to_string(),
                Some(format!("maximum body size is {limit} bytes")),
            ),
            AppError::UnsupportedMediaType => {
                ("Content-Type must be application/json".to_string(), None)
            }
            AppError::RequestTimeout(_) => ("Request timed out".to_string(), None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Full detail stays server-side
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let (message, error) = self.public_parts();
        let mut response = (status, Json(ApiResponse::error(message, error))).into_response();

        let retry_after = match &self {
            AppError::RateLimited { retry_after, .. } | AppError::AuthThrottled { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        };

        if let Some(retry_after) = retry_after {
            // Round up so clients never retry a moment too early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }

        if let AppError::RateLimited { limit, .. } = &self {
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    use super::*;
    use crate::upstream::{UpstreamCall, UpstreamError};

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upstream_error_is_generic() {
        let err = AppError::from(AggregateError::Upstream {
            call: UpstreamCall::Balance,
            source: UpstreamError::Rpc("dial tcp 10.1.2.3:8545: connection refused".to_string()),
        });
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(
            body,
            json!({"status": "error", "message": "Internal server error"})
        );
    }

    #[tokio::test]
    async fn test_unit_conversion_failure_is_generic_500() {
        let conversion = crate::models::wei_to_unit(alloy::primitives::U256::from(1), "furlong")
            .unwrap_err();
        let response = AppError::from(AggregateError::from(conversion)).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_invalid_address_from_aggregator_is_400() {
        let response =
            AppError::from(AggregateError::InvalidAddress("0xzz".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limited_sets_headers() {
        let response = AppError::RateLimited {
            limit: 100,
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }

    #[tokio::test]
    async fn test_payload_too_large_carries_limit() {
        let response = AppError::PayloadTooLarge { limit: 1024 }.into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_json(response).await;
        assert_eq!(body["error"], json!("maximum body size is 1024 bytes"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::UnsupportedMediaType.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            AppError::RequestTimeout(Duration::from_secs(1)).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            AppError::AuthThrottled {
                retry_after: Duration::from_secs(1)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Config("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
