//! Liveness and debug endpoints.
//!
//! Neither goes through rate limiting or auth. `/debug/ping` is only routed
//! in debug mode.

use axum::Json;
use tracing::instrument;

use crate::models::HealthResponse;

/// Liveness probe. Does not touch the upstream node.
///
/// ```json
/// {"status":"ok"}
/// ```
#[instrument]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[instrument]
pub async fn ping() -> &'static str {
    "pong"
}
