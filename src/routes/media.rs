//! Media upload endpoint
//!
//! Uploads pass the validation gate before any bytes go to the platform, so
//! a rejected file costs nothing upstream and the caller gets the precise
//! reason instead of a platform error.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::constants::MAX_MEDIA_UPLOAD_SIZE;
use crate::media::{self, MediaKind, MediaValidationError};
use crate::routes::auth::AuthUser;
use crate::services::error::ApiError;
use crate::services::platform::PlatformError;
use crate::services::publisher::{self, PublishError};
use crate::services::resolver::{self, ResolveError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media", post(upload_media))
        .layer(DefaultBodyLimit::max(MAX_MEDIA_UPLOAD_SIZE))
}

fn media_error(e: MediaValidationError) -> ApiError {
    match e {
        MediaValidationError::Oversize { .. } => {
            ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
        }
        _ => ApiError::bad_request(e.to_string()),
    }
}

fn credentials_error(e: PublishError) -> ApiError {
    match e {
        PublishError::Resolve(ResolveError::NoAccountsConnected) => {
            ApiError::bad_request(e.to_string())
        }
        PublishError::Resolve(ResolveError::AccountNotFound) => ApiError::not_found(e.to_string()),
        _ => {
            eprintln!("[media] {}", e);
            ApiError::internal("media upload failed")
        }
    }
}

#[derive(Serialize)]
struct MediaUploadResponse {
    media_id: String,
    kind: &'static str,
    mime: &'static str,
}

/// POST /media - Validate an upload and exchange it for a platform media id
///
/// Multipart fields:
/// - "file": the media bytes (content type and filename read off the part)
/// - "kind": the kind the client believes it is sending (optional)
/// - "existing": comma-separated kinds already attached to the draft (optional)
/// - "account_id": which connected account's credentials to upload with (optional)
async fn upload_media(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<MediaUploadResponse>, ApiError> {
    let mut file: Option<(Bytes, Option<String>, Option<String>)> = None;
    let mut declared_kind: Option<MediaKind> = None;
    let mut existing: Vec<MediaKind> = Vec::new();
    let mut account_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart error: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let content_type = field.content_type().map(|s| s.to_string());
                let file_name = field.file_name().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read upload: {}", e)))?;
                file = Some((bytes, content_type, file_name));
            }
            Some("kind") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("multipart error: {}", e)))?;
                declared_kind = Some(
                    MediaKind::parse(text.trim())
                        .ok_or_else(|| ApiError::bad_request(format!("unknown kind: {}", text)))?,
                );
            }
            Some("existing") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("multipart error: {}", e)))?;
                for part in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    existing.push(MediaKind::parse(part).ok_or_else(|| {
                        ApiError::bad_request(format!("unknown kind in existing: {}", part))
                    })?);
                }
            }
            Some("account_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("multipart error: {}", e)))?;
                account_id = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| ApiError::bad_request("account_id must be an integer"))?,
                );
            }
            _ => {}
        }
    }

    let (bytes, content_type, file_name) =
        file.ok_or_else(|| ApiError::bad_request("missing file field"))?;

    let confirmed = media::classify_and_validate(&bytes, content_type.as_deref(), file_name.as_deref())
        .map_err(media_error)?;

    // The sniffed kind wins over the client's declaration; the corrected
    // kind comes back in the response rather than an error.
    if let Some(declared) = declared_kind {
        if declared != confirmed.kind {
            println!(
                "[media] declared {} reclassified as {} for user {}",
                declared, confirmed.kind, user_id
            );
        }
    }

    media::validate_composition(&existing, confirmed.kind).map_err(media_error)?;

    let account = resolver::resolve_target(
        state.store.as_ref(),
        &state.cache,
        state.platform.as_ref(),
        user_id,
        account_id,
    )
    .await
    .map_err(|e| credentials_error(PublishError::Resolve(e)))?;

    let access_token = publisher::ensure_access_token(
        state.store.as_ref(),
        state.platform.as_ref(),
        &state.cache,
        user_id,
        account.id,
    )
    .await
    .map_err(credentials_error)?;

    let media_id = state
        .platform
        .upload_media(&access_token, &bytes, confirmed.mime)
        .await
        .map_err(|e| match e {
            PlatformError::InvalidMedia(msg) => ApiError::bad_request(msg),
            other => {
                eprintln!("[media] platform upload failed: {}", other);
                ApiError::new(StatusCode::BAD_GATEWAY, "media upload failed")
            }
        })?;

    Ok(Json(MediaUploadResponse {
        media_id,
        kind: confirmed.kind.as_str(),
        mime: confirmed.mime,
    }))
}
