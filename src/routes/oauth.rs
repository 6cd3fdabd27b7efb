//! Twitter OAuth endpoints (/auth/twitter/*)
//!
//! One flow serves two cases: an anonymous visitor signing in, and a
//! signed-in user connecting an additional account. The OAuth state row
//! remembers which case started the flow.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::domain::accounts::models::ProfileFields;
use crate::domain::accounts::queries as accounts;
use crate::services::{cookies, session};

pub fn routes() -> Router<Arc<AppState>> {
    // Rate limit: Stricter for OAuth - 5 requests per minute to prevent abuse
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(12)
        .burst_size(5)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    Router::new()
        .route("/auth/twitter", get(auth_twitter))
        .route("/auth/twitter/token", post(auth_twitter_token))
        .layer(rate_limit_layer)
}

/// Session user from the access cookie, if one is present and valid.
/// The authorize step works without a session; the callback uses this to
/// attach the new account instead of creating a login.
fn session_user(jar: &CookieJar, state: &AppState) -> Option<i64> {
    let token = jar.get(cookies::ACCESS_TOKEN_NAME)?.value();
    session::validate_access_token(token, &state.jwt_secret).ok()
}

#[derive(Serialize)]
struct AuthUrlResponse {
    url: String,
}

/// GET /auth/twitter - Start OAuth flow, returns URL to redirect user to
async fn auth_twitter(State(state): State<Arc<AppState>>, jar: CookieJar) -> Json<AuthUrlResponse> {
    let auth_request = state.twitter.get_authorize_url(&[
        "tweet.read",
        "tweet.write",
        "users.read",
        "media.write",
        "offline.access",
    ]);

    let initiating_user = session_user(&jar, &state);

    // Store state and code_verifier for callback
    if let Err(e) = session::save_oauth_state(
        &state.db,
        &auth_request.state,
        &auth_request.code_verifier,
        initiating_user,
    )
    .await
    {
        eprintln!("Failed to save OAuth state: {}", e);
        // Return the URL anyway - login will fail at token exchange if state isn't found
        // This is better than blocking the user completely
    }

    Json(AuthUrlResponse {
        url: auth_request.url,
    })
}

#[derive(Deserialize)]
struct TokenRequest {
    code: String,
    state: String,
}

#[derive(Serialize)]
struct ConnectResponse {
    account_id: i64,
    username: String,
}

/// POST /auth/twitter/token - Exchange OAuth code for a connected account
/// Sets httpOnly cookies for access_token (JWT) and refresh_token
async fn auth_twitter_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> Result<Response, StatusCode> {
    // Retrieve and validate state
    let (code_verifier, initiating_user) = session::take_oauth_state(&state.db, &req.state)
        .await
        .map_err(|e| {
            eprintln!("Get OAuth state error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::BAD_REQUEST)?;

    // Exchange code for tokens
    let token_response = state
        .twitter
        .exchange_code(&req.code, &code_verifier)
        .await
        .map_err(|e| {
            eprintln!("Token exchange error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // Get the connected account's profile
    let twitter_user = state
        .twitter
        .get_me(&token_response.access_token)
        .await
        .map_err(|e| {
            eprintln!("Get me error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // Check if user is allowed to log in (if allowlist is configured)
    if let Some(ref allowed) = state.allowed_users {
        if !allowed.contains(&twitter_user.username.to_lowercase()) {
            eprintln!(
                "Login denied: @{} not in ALLOWED_USERS",
                twitter_user.username
            );
            return Err(StatusCode::FORBIDDEN);
        }
    }

    let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
    let profile = ProfileFields {
        username: twitter_user.username.clone(),
        display_name: Some(twitter_user.name.clone()),
        profile_image_url: twitter_user.profile_image_url.clone(),
        verified: twitter_user.verified.unwrap_or(false),
    };

    // Resolve the owning user and attach the account atomically
    let mut tx = state.db.begin().await.map_err(|e| {
        eprintln!("Begin transaction error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let user_id = match initiating_user {
        // A signed-in user is connecting an additional account
        Some(uid) => uid,
        // Sign-in: reuse the user who first connected this identity,
        // or create a fresh one
        None => match accounts::find_user_by_twitter_id(&mut *tx, &twitter_user.id)
            .await
            .map_err(|e| {
                eprintln!("User lookup error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })? {
            Some(existing) => existing,
            None => accounts::create_user(&mut *tx).await.map_err(|e| {
                eprintln!("Create user error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?,
        },
    };

    let account_id = accounts::upsert_account(
        &mut *tx,
        user_id,
        &twitter_user.id,
        &profile,
        &token_response.access_token,
        token_response.refresh_token.as_deref(),
        expires_at,
    )
    .await
    .map_err(|e| {
        eprintln!("Upsert account error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tx.commit().await.map_err(|e| {
        eprintln!("Commit error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // The cached account list for this user is stale now
    state.cache.invalidate(user_id);

    // Create session tokens
    let access_token = session::create_access_token(user_id, &state.jwt_secret).map_err(|e| {
        eprintln!("Failed to create access token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let refresh_token = session::create_refresh_token(user_id, &state.db)
        .await
        .map_err(|e| {
            eprintln!("Failed to create refresh token: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let body = Json(ConnectResponse {
        account_id,
        username: twitter_user.username,
    });

    let mut response = body.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::access_cookie(&access_token)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::refresh_cookie(&refresh_token)?);

    Ok(response)
}
