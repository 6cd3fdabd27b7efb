//! Connected account endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::routes::auth::AuthUser;
use crate::services::error::{ApiError, LogErr};
use crate::services::resolver::{self, ResolveError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/{id}/activate", post(activate_account))
        .route("/accounts/{id}", delete(disconnect_account))
}

fn resolve_error(e: ResolveError) -> ApiError {
    match e {
        ResolveError::NoAccountsConnected => ApiError::bad_request(e.to_string()),
        ResolveError::AccountNotFound => ApiError::not_found(e.to_string()),
        ResolveError::Store(_) => {
            eprintln!("[accounts] {}", e);
            ApiError::internal("account operation failed")
        }
    }
}

#[derive(Serialize)]
struct AccountResponse {
    id: i64,
    username: String,
    display_name: Option<String>,
    profile_image_url: Option<String>,
    verified: bool,
    is_active: bool,
}

#[derive(Serialize)]
struct AccountsResponse {
    accounts: Vec<AccountResponse>,
    active_account_id: Option<i64>,
}

/// GET /accounts - The user's connected accounts with the active one marked
async fn list_accounts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<AccountsResponse>, ApiError> {
    let view = resolver::user_accounts(
        state.store.as_ref(),
        &state.cache,
        state.platform.as_ref(),
        user_id,
    )
    .await
    .log_internal("failed to load accounts")?;

    let accounts = view
        .accounts
        .iter()
        .map(|a| AccountResponse {
            id: a.id,
            username: a.username.clone(),
            display_name: a.display_name.clone(),
            profile_image_url: a.profile_image_url.clone(),
            verified: a.verified,
            is_active: view.active_account_id == Some(a.id),
        })
        .collect();

    Ok(Json(AccountsResponse {
        accounts,
        active_account_id: view.active_account_id,
    }))
}

/// POST /accounts/{id}/activate - Point the active marker at this account
async fn activate_account(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(account_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    resolver::set_active_account(state.store.as_ref(), &state.cache, user_id, account_id)
        .await
        .map_err(resolve_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /accounts/{id} - Disconnect an account and cancel its scheduled posts
async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(account_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    resolver::disconnect_account(
        state.store.as_ref(),
        &state.cache,
        state.queue.as_ref(),
        user_id,
        account_id,
    )
    .await
    .map_err(resolve_error)?;
    Ok(StatusCode::NO_CONTENT)
}
