//! Rejects requests whose declared body exceeds the configured limit.
//!
//! Only `Content-Length` is checked here, so the rejection carries the JSON
//! error envelope. Bodies without a declared length are capped as they stream
//! by `tower_http`'s `RequestBodyLimitLayer`, installed just inside this stage.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

pub async fn limit_request_size(
    State(limit): State<usize>,
    req: Request,
    next: Next,
) -> Response {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match declared {
        Some(len) if len > limit as u64 => AppError::PayloadTooLarge { limit }.into_response(),
        _ => next.run(req).await,
    }
}
