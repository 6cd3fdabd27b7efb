//! Queue worker callback
//!
//! The queue delivers scheduled publishes here. Failures return HTTP 500 so
//! the queue's own retry policy decides what happens next; skips return 200
//! so an already-handled post is not redelivered.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::services::error::ApiError;
use crate::services::scheduler::{self, FireOutcome};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/worker/publish", post(fire_publish))
}

#[derive(Deserialize)]
struct FireRequest {
    post_id: i64,
}

#[derive(Serialize)]
struct FireResponse {
    status: &'static str,
}

/// POST /worker/publish - Publish a due post on the queue's signal
async fn fire_publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FireRequest>,
) -> Result<Json<FireResponse>, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing worker token"))?;

    if token != state.worker_token {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid worker token"));
    }

    let outcome = scheduler::fire_scheduled(
        state.store.as_ref(),
        state.platform.as_ref(),
        &state.cache,
        req.post_id,
    )
    .await
    .map_err(|e| {
        eprintln!("[worker] publish of post {} failed: {}", req.post_id, e);
        ApiError::internal("scheduled publish failed")
    })?;

    let status = match outcome {
        FireOutcome::Published => "published",
        FireOutcome::Skipped => "skipped",
    };

    Ok(Json(FireResponse { status }))
}
