//! Authentication and session management endpoints

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, header::SET_COOKIE, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::domain::accounts::queries as accounts;
use crate::services::{cookies, session};

pub fn routes() -> Router<Arc<AppState>> {
    // Rate limit: auth endpoints are a brute force target
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    Router::new()
        .route("/auth/refresh", post(refresh_session))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_me))
        .layer(rate_limit_layer)
}

// ============================================================================
// Auth Extractor - validates JWT cookie and extracts user_id
// ============================================================================

/// Extractor that validates the access_token cookie and returns the user_id
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                eprintln!("Cookie extraction error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        let access_token = jar
            .get(cookies::ACCESS_TOKEN_NAME)
            .map(|c| c.value())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let user_id = session::validate_access_token(access_token, &state.jwt_secret)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser(user_id))
    }
}

// ============================================================================
// Session endpoints
// ============================================================================

/// POST /auth/refresh - Refresh the access token using the refresh token cookie
/// Implements refresh token rotation: old token is invalidated, new one is issued
async fn refresh_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response, StatusCode> {
    let old_refresh_token = jar
        .get(cookies::REFRESH_TOKEN_NAME)
        .map(|c| c.value().to_string())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Rotate refresh token: validate old, delete it, create new one
    // (silent - invalid/expired tokens are expected for expired sessions)
    let (user_id, new_refresh_token) = session::rotate_refresh_token(&old_refresh_token, &state.db)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let access_token = session::create_access_token(user_id, &state.jwt_secret).map_err(|e| {
        eprintln!("Failed to create access token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // 204 No Content - only sets cookies
    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::access_cookie(&access_token)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::refresh_cookie(&new_refresh_token)?);

    Ok(response)
}

/// POST /auth/logout - Clear session and revoke refresh token
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(refresh_token) = jar.get(cookies::REFRESH_TOKEN_NAME) {
        if let Err(e) = session::revoke_refresh_token(refresh_token.value(), &state.db).await {
            // Log but don't fail logout - user is still logged out client-side
            eprintln!("Failed to revoke refresh token during logout: {}", e);
        }
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::clear_access_cookie());
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::clear_refresh_cookie());

    response
}

#[derive(Serialize)]
struct MeResponse {
    id: i64,
    active_account_id: Option<i64>,
}

/// GET /auth/me - Get current user info (validates session)
async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, StatusCode> {
    let exists = accounts::user_exists(&state.db, user_id).await.map_err(|e| {
        eprintln!("User lookup error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // A valid JWT for a deleted user is still unauthorized
    if !exists {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let active_account_id = accounts::active_account_id(&state.db, user_id)
        .await
        .map_err(|e| {
            eprintln!("Active account lookup error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(MeResponse {
        id: user_id,
        active_account_id,
    }))
}
