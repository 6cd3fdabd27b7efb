//! Post endpoints - immediate publishes, the scheduled lifecycle, and listing

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::posts::models::Post;
use crate::domain::posts::queries as posts_domain;
use crate::routes::auth::AuthUser;
use crate::services::error::{ApiError, LogErr};
use crate::services::publisher::{self, PublishError};
use crate::services::resolver::ResolveError;
use crate::services::scheduler::{self, ScheduleError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/scheduled", post(schedule_post))
        .route(
            "/posts/scheduled/{id}",
            patch(update_scheduled).delete(cancel_scheduled),
        )
        .route("/posts/{id}", delete(delete_draft))
}

fn publish_error(e: PublishError) -> ApiError {
    match e {
        PublishError::InvalidPost(_) => ApiError::bad_request(e.to_string()),
        PublishError::Resolve(ResolveError::NoAccountsConnected) => {
            ApiError::bad_request(e.to_string())
        }
        PublishError::Resolve(ResolveError::AccountNotFound) => ApiError::not_found(e.to_string()),
        PublishError::Resolve(ResolveError::Store(_)) | PublishError::Store(_) => {
            eprintln!("[posts] {}", e);
            ApiError::internal("post operation failed")
        }
        // The pending record survives with the failure message attached;
        // surface the platform's refusal as an upstream error.
        PublishError::PublishFailure { .. } => ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

fn schedule_error(e: ScheduleError) -> ApiError {
    match e {
        ScheduleError::Publish(inner) => publish_error(inner),
        ScheduleError::InvalidScheduleTime(_) => ApiError::bad_request(e.to_string()),
        ScheduleError::Resolve(ResolveError::NoAccountsConnected) => {
            ApiError::bad_request(e.to_string())
        }
        ScheduleError::Resolve(ResolveError::AccountNotFound) => ApiError::not_found(e.to_string()),
        ScheduleError::NotFound => ApiError::not_found("scheduled post not found"),
        ScheduleError::Queue(_) => {
            eprintln!("[posts] {}", e);
            ApiError::new(StatusCode::BAD_GATEWAY, "scheduling backend unavailable")
        }
        ScheduleError::Resolve(ResolveError::Store(_)) | ScheduleError::Store(_) => {
            eprintln!("[posts] {}", e);
            ApiError::internal("post operation failed")
        }
    }
}

#[derive(Serialize)]
struct PostResponse {
    id: i64,
    account_id: i64,
    text: String,
    media_ids: Vec<String>,
    status: &'static str,
    scheduled_at: Option<DateTime<Utc>>,
    platform_post_id: Option<String>,
    publish_error: Option<String>,
    publish_attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Post> for PostResponse {
    fn from(p: Post) -> Self {
        let status = p.status().as_str();
        PostResponse {
            id: p.id,
            account_id: p.account_id,
            text: p.text,
            media_ids: p.media_ids,
            status,
            scheduled_at: p.scheduled_at,
            platform_post_id: p.platform_post_id,
            publish_error: p.publish_error,
            publish_attempts: p.publish_attempts,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct CreatePostRequest {
    text: String,
    #[serde(default)]
    media_ids: Vec<String>,
    account_id: Option<i64>,
}

/// POST /posts - Validate, persist, and publish immediately
async fn create_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreatePostRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = publisher::post_now(
        state.store.as_ref(),
        state.platform.as_ref(),
        &state.cache,
        user_id,
        &req.text,
        &req.media_ids,
        req.account_id,
    )
    .await
    .map_err(publish_error)?;

    Ok(Json(post.into()))
}

#[derive(Deserialize)]
struct SchedulePostRequest {
    text: String,
    #[serde(default)]
    media_ids: Vec<String>,
    scheduled_at: DateTime<Utc>,
    account_id: Option<i64>,
}

/// POST /posts/scheduled - Enqueue a future publish, then persist the record
async fn schedule_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SchedulePostRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = scheduler::schedule_post(
        state.store.as_ref(),
        state.queue.as_ref(),
        state.platform.as_ref(),
        &state.cache,
        &state.worker_url(),
        user_id,
        &req.text,
        &req.media_ids,
        req.scheduled_at,
        req.account_id,
    )
    .await
    .map_err(schedule_error)?;

    Ok(Json(post.into()))
}

#[derive(Deserialize)]
struct UpdateScheduledRequest {
    text: String,
    #[serde(default)]
    media_ids: Vec<String>,
    scheduled_at: DateTime<Utc>,
}

/// PATCH /posts/scheduled/{id} - Replace the queue job, then the record
async fn update_scheduled(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
    Json(req): Json<UpdateScheduledRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = scheduler::update_scheduled(
        state.store.as_ref(),
        state.queue.as_ref(),
        &state.worker_url(),
        user_id,
        post_id,
        &req.text,
        &req.media_ids,
        req.scheduled_at,
    )
    .await
    .map_err(schedule_error)?;

    Ok(Json(post.into()))
}

/// DELETE /posts/scheduled/{id} - Cancel a scheduled post
async fn cancel_scheduled(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    scheduler::cancel_scheduled(state.store.as_ref(), state.queue.as_ref(), user_id, post_id)
        .await
        .map_err(schedule_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /posts/{id} - Discard a draft that never published
async fn delete_draft(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = posts_domain::delete_draft_post(&state.db, post_id, user_id)
        .await
        .log_internal("failed to delete draft")?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("draft not found"))
    }
}

#[derive(Deserialize)]
struct ListPostsQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct PostsResponse {
    posts: Vec<PostResponse>,
    total: i64,
    has_more: bool,
}

/// GET /posts - List the user's posts, optionally filtered by lifecycle state
async fn list_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<PostsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    let status = query.status.as_deref();

    let total = posts_domain::count_posts(&state.db, user_id, status)
        .await
        .log_internal("failed to count posts")?;
    let posts = posts_domain::list_posts_paginated(&state.db, user_id, status, limit, offset)
        .await
        .log_internal("failed to list posts")?;

    let has_more = (offset + limit) < total;

    Ok(Json(PostsResponse {
        posts: posts.into_iter().map(PostResponse::from).collect(),
        total,
        has_more,
    }))
}
