//! Immediate publish pipeline
//!
//! The pending record is persisted before the platform call, so a failed
//! publish leaves a visible draft carrying the error instead of losing the
//! post. There is no automatic retry; the caller decides what to do with
//! the draft.

use chrono::{Duration, Utc};

use crate::constants::{MAX_IMAGES_PER_POST, MAX_POST_CHARS};
use crate::domain::posts::models::{NewPost, Post};
use crate::services::cache::AccountCache;
use crate::services::platform::Platform;
use crate::services::resolver::{self, ResolveError};
use crate::services::store::{Store, StoreError};

#[derive(Debug)]
pub enum PublishError {
    /// Text or media shape rejected before anything was persisted
    InvalidPost(String),
    Resolve(ResolveError),
    Store(StoreError),
    /// The platform refused the publish. The pending record keeps the
    /// failure message and attempt count.
    PublishFailure { post_id: i64, message: String },
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::InvalidPost(msg) => write!(f, "invalid post: {}", msg),
            PublishError::Resolve(e) => write!(f, "{}", e),
            PublishError::Store(e) => write!(f, "storage error: {}", e),
            PublishError::PublishFailure { post_id, message } => {
                write!(f, "publish failed for post {}: {}", post_id, message)
            }
        }
    }
}

impl std::error::Error for PublishError {}

impl From<ResolveError> for PublishError {
    fn from(e: ResolveError) -> Self {
        PublishError::Resolve(e)
    }
}

impl From<StoreError> for PublishError {
    fn from(e: StoreError) -> Self {
        PublishError::Store(e)
    }
}

/// Shape checks shared by immediate and scheduled posting. Rejections
/// happen before any record is written.
pub fn validate_post(text: &str, media_count: usize) -> Result<(), PublishError> {
    if text.trim().is_empty() {
        return Err(PublishError::InvalidPost("post text is empty".to_string()));
    }
    // Counted in characters, not bytes
    let chars = text.chars().count();
    if chars > MAX_POST_CHARS {
        return Err(PublishError::InvalidPost(format!(
            "post text is {} characters; the limit is {}",
            chars, MAX_POST_CHARS
        )));
    }
    if media_count > MAX_IMAGES_PER_POST {
        return Err(PublishError::InvalidPost(format!(
            "{} media attachments; the limit is {}",
            media_count, MAX_IMAGES_PER_POST
        )));
    }
    Ok(())
}

/// Current access token for an account, refreshing through the platform
/// when the stored one is about to expire. Refreshed tokens are written
/// back; a failed refresh falls through to the stale token so the publish
/// attempt itself reports the failure.
pub async fn ensure_access_token(
    store: &dyn Store,
    platform: &dyn Platform,
    cache: &AccountCache,
    user_id: i64,
    account_id: i64,
) -> Result<String, PublishError> {
    let tokens = store
        .account_tokens(account_id)
        .await?
        .ok_or(PublishError::Resolve(ResolveError::AccountNotFound))?;

    if tokens.token_expires_at > Utc::now() + Duration::seconds(60) {
        return Ok(tokens.access_token);
    }

    let Some(refresh_token) = tokens.refresh_token else {
        return Ok(tokens.access_token);
    };

    match platform.refresh_credentials(&refresh_token).await {
        Ok(fresh) => {
            let expires_at = Utc::now() + Duration::seconds(fresh.expires_in);
            store
                .update_account_tokens(
                    account_id,
                    &fresh.access_token,
                    fresh.refresh_token.as_deref(),
                    expires_at,
                )
                .await?;
            cache.invalidate(user_id);
            Ok(fresh.access_token)
        }
        Err(e) => {
            eprintln!(
                "[publisher] token refresh failed for account {}: {}",
                account_id, e
            );
            Ok(tokens.access_token)
        }
    }
}

async fn attempt_publish(
    store: &dyn Store,
    platform: &dyn Platform,
    cache: &AccountCache,
    post: &Post,
) -> Result<String, PublishError> {
    let access_token =
        ensure_access_token(store, platform, cache, post.user_id, post.account_id).await?;
    platform
        .publish(&access_token, &post.text, &post.media_ids)
        .await
        .map_err(|e| PublishError::PublishFailure {
            post_id: post.id,
            message: e.to_string(),
        })
}

/// Publish an existing pending record and flip it to Published. Any
/// failure on the way out is written onto the record before surfacing.
pub async fn publish_pending(
    store: &dyn Store,
    platform: &dyn Platform,
    cache: &AccountCache,
    post: &Post,
) -> Result<String, PublishError> {
    match attempt_publish(store, platform, cache, post).await {
        Ok(platform_post_id) => {
            let marked = store.mark_published(post.id, &platform_post_id).await?;
            if !marked {
                eprintln!(
                    "[publisher] post {} was already published; platform post {} may be a duplicate",
                    post.id, platform_post_id
                );
            }
            Ok(platform_post_id)
        }
        Err(e) => {
            if let Err(record_err) = store.record_publish_failure(post.id, &e.to_string()).await {
                eprintln!(
                    "[publisher] failed to record publish error for post {}: {}",
                    post.id, record_err
                );
            }
            Err(e)
        }
    }
}

/// Post immediately: validate, resolve the target account, persist the
/// pending record, then publish. Each call creates a new record.
pub async fn post_now(
    store: &dyn Store,
    platform: &dyn Platform,
    cache: &AccountCache,
    user_id: i64,
    text: &str,
    media_ids: &[String],
    explicit_account_id: Option<i64>,
) -> Result<Post, PublishError> {
    validate_post(text, media_ids.len())?;

    let account =
        resolver::resolve_target(store, cache, platform, user_id, explicit_account_id).await?;

    // The pending record goes down before any network call
    let post_id = store.reserve_post_id().await?;
    store
        .insert_post(&NewPost {
            id: post_id,
            user_id,
            account_id: account.id,
            text: text.to_string(),
            media_ids: media_ids.to_vec(),
            scheduled_at: None,
            queue_message_id: None,
        })
        .await?;

    let post = store
        .get_post_by_id(post_id)
        .await?
        .ok_or(PublishError::Resolve(ResolveError::AccountNotFound))?;

    publish_pending(store, platform, cache, &post).await?;

    let published = store
        .get_post_by_id(post_id)
        .await?
        .ok_or(PublishError::Resolve(ResolveError::AccountNotFound))?;
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::posts::models::PostStatus;
    use crate::testing::{FakePlatform, MemoryStore, test_account};
    use std::time::Duration as StdDuration;

    fn cache() -> AccountCache {
        AccountCache::new(StdDuration::from_secs(60))
    }

    #[test]
    fn test_empty_text_is_rejected() {
        assert!(matches!(
            validate_post("   ", 0),
            Err(PublishError::InvalidPost(_))
        ));
    }

    #[test]
    fn test_length_limit_counts_characters_not_bytes() {
        // 280 two-byte characters: over the byte count, exactly at the
        // character count
        let text = "é".repeat(280);
        assert!(validate_post(&text, 0).is_ok());

        let over = "é".repeat(281);
        assert!(matches!(
            validate_post(&over, 0),
            Err(PublishError::InvalidPost(_))
        ));
    }

    #[test]
    fn test_media_count_limit() {
        assert!(validate_post("hi", 4).is_ok());
        assert!(matches!(
            validate_post("hi", 5),
            Err(PublishError::InvalidPost(_))
        ));
    }

    #[tokio::test]
    async fn test_post_now_happy_path() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = post_now(&store, &platform, &cache, 7, "hello world", &[], None)
            .await
            .unwrap();

        assert!(post.is_published);
        assert_eq!(post.status(), PostStatus::Published);
        assert!(post.platform_post_id.is_some());
        assert!(post.publish_error.is_none());
        assert_eq!(platform.publish_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_persists_nothing() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let text = "x".repeat(281);
        let err = post_now(&store, &platform, &cache, 7, &text, &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::InvalidPost(_)));
        assert_eq!(store.post_count().await, 0);
        assert!(platform.publish_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_accounts_rejects_before_persisting() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();

        let err = post_now(&store, &platform, &cache, 7, "hello", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::Resolve(ResolveError::NoAccountsConnected)
        ));
        assert_eq!(store.post_count().await, 0);
    }

    #[tokio::test]
    async fn test_platform_failure_leaves_pending_record_with_error() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;
        platform.fail_next_publish("monthly tweet cap reached").await;

        let err = post_now(&store, &platform, &cache, 7, "hello", &[], None)
            .await
            .unwrap_err();

        let message = match err {
            PublishError::PublishFailure { message, .. } => message,
            other => panic!("expected PublishFailure, got {:?}", other),
        };
        assert!(message.contains("monthly tweet cap reached"));

        // The record survives as a pending draft carrying the error
        let posts = store.all_posts().await;
        assert_eq!(posts.len(), 1);
        let post = &posts[0];
        assert!(!post.is_published);
        assert_eq!(post.status(), PostStatus::Draft);
        assert!(
            post.publish_error
                .as_deref()
                .unwrap()
                .contains("monthly tweet cap reached")
        );
        assert_eq!(post.publish_attempts, 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_publish() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;
        store
            .expire_account_tokens(1, "stale-token", Some("refresh-1"))
            .await;

        post_now(&store, &platform, &cache, 7, "hello", &[], None)
            .await
            .unwrap();

        let calls = platform.publish_calls().await;
        assert_eq!(calls.len(), 1);
        assert_ne!(calls[0].access_token, "stale-token");

        let tokens = store.account_tokens(1).await.unwrap().unwrap();
        assert_ne!(tokens.access_token, "stale-token");
        assert!(tokens.token_expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_media_ids_reach_the_platform() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let media = vec!["media-1".to_string(), "media-2".to_string()];
        let post = post_now(&store, &platform, &cache, 7, "with pics", &media, None)
            .await
            .unwrap();

        assert_eq!(post.media_ids, media);
        assert_eq!(platform.publish_calls().await[0].media_ids, media);
    }

    #[tokio::test]
    async fn test_explicit_account_is_used() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;
        store.add_account(test_account(2, 7)).await;
        store.set_active_account(7, Some(1)).await.unwrap();

        let post = post_now(&store, &platform, &cache, 7, "hello", &[], Some(2))
            .await
            .unwrap();

        assert_eq!(post.account_id, 2);
    }
}
