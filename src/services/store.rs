//! Persistence seam for the posting pipelines
//!
//! `PgStore` is the real implementation, delegating to the domain query
//! modules. The trait exists so pipeline logic can run against an in-memory
//! store in tests. Route-only reads (listing, pagination) stay on the domain
//! queries directly; this trait carries just what the pipelines touch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::accounts::models::{AccountTokens, ConnectedAccount, ProfileFields};
use crate::domain::accounts::queries as accounts;
use crate::domain::posts::models::{NewPost, Post};
use crate::domain::posts::queries as posts;

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    /// The store could not be reached. Raised by non-SQL implementations.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_accounts(&self, user_id: i64) -> Result<Vec<ConnectedAccount>, StoreError>;

    async fn get_account(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> Result<Option<ConnectedAccount>, StoreError>;

    async fn account_tokens(&self, account_id: i64) -> Result<Option<AccountTokens>, StoreError>;

    async fn update_account_tokens(
        &self,
        account_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_account_profile(
        &self,
        account_id: i64,
        profile: &ProfileFields,
    ) -> Result<(), StoreError>;

    async fn active_account_id(&self, user_id: i64) -> Result<Option<i64>, StoreError>;

    async fn set_active_account(
        &self,
        user_id: i64,
        account_id: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Remove an account and everything that depends on it: pending
    /// scheduled posts and the active pointer, all in one transaction.
    /// Returns false when the account did not exist for this user.
    async fn delete_account_cascade(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError>;

    /// Claim the next post id without inserting a row. Lets the scheduler
    /// enqueue a job carrying the id before the row exists.
    async fn reserve_post_id(&self) -> Result<i64, StoreError>;

    async fn insert_post(&self, new: &NewPost) -> Result<(), StoreError>;

    async fn get_post(&self, post_id: i64, user_id: i64) -> Result<Option<Post>, StoreError>;

    /// Unscoped lookup for the worker callback, which has no session user.
    async fn get_post_by_id(&self, post_id: i64) -> Result<Option<Post>, StoreError>;

    async fn get_scheduled_post(
        &self,
        post_id: i64,
        user_id: i64,
    ) -> Result<Option<Post>, StoreError>;

    async fn scheduled_posts_for_account(&self, account_id: i64)
    -> Result<Vec<Post>, StoreError>;

    /// Flip a pending post to published. Returns false if the post was
    /// already published or does not exist.
    async fn mark_published(
        &self,
        post_id: i64,
        platform_post_id: &str,
    ) -> Result<bool, StoreError>;

    async fn record_publish_failure(&self, post_id: i64, error: &str) -> Result<(), StoreError>;

    async fn update_scheduled_post(
        &self,
        post_id: i64,
        user_id: i64,
        text: &str,
        media_ids: &[String],
        scheduled_at: DateTime<Utc>,
        queue_message_id: &str,
    ) -> Result<bool, StoreError>;

    async fn delete_scheduled_post(&self, post_id: i64, user_id: i64) -> Result<bool, StoreError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_accounts(&self, user_id: i64) -> Result<Vec<ConnectedAccount>, StoreError> {
        Ok(accounts::list_accounts(&self.pool, user_id).await?)
    }

    async fn get_account(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> Result<Option<ConnectedAccount>, StoreError> {
        Ok(accounts::get_account(&self.pool, account_id, user_id).await?)
    }

    async fn account_tokens(&self, account_id: i64) -> Result<Option<AccountTokens>, StoreError> {
        Ok(accounts::get_account_tokens(&self.pool, account_id).await?)
    }

    async fn update_account_tokens(
        &self,
        account_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        accounts::update_account_tokens(&self.pool, account_id, access_token, refresh_token, expires_at)
            .await?;
        Ok(())
    }

    async fn update_account_profile(
        &self,
        account_id: i64,
        profile: &ProfileFields,
    ) -> Result<(), StoreError> {
        accounts::update_account_profile(&self.pool, account_id, profile).await?;
        Ok(())
    }

    async fn active_account_id(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(accounts::active_account_id(&self.pool, user_id).await?)
    }

    async fn set_active_account(
        &self,
        user_id: i64,
        account_id: Option<i64>,
    ) -> Result<(), StoreError> {
        accounts::set_active_account_id(&self.pool, user_id, account_id).await?;
        Ok(())
    }

    async fn delete_account_cascade(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        posts::delete_scheduled_posts_for_account(&mut *tx, account_id).await?;
        accounts::clear_active_if_account(&mut *tx, user_id, account_id).await?;
        let deleted = accounts::delete_account(&mut *tx, account_id, user_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn reserve_post_id(&self) -> Result<i64, StoreError> {
        Ok(posts::reserve_post_id(&self.pool).await?)
    }

    async fn insert_post(&self, new: &NewPost) -> Result<(), StoreError> {
        posts::insert_post(&self.pool, new).await?;
        Ok(())
    }

    async fn get_post(&self, post_id: i64, user_id: i64) -> Result<Option<Post>, StoreError> {
        Ok(posts::get_post(&self.pool, post_id, user_id).await?)
    }

    async fn get_post_by_id(&self, post_id: i64) -> Result<Option<Post>, StoreError> {
        Ok(posts::get_post_by_id(&self.pool, post_id).await?)
    }

    async fn get_scheduled_post(
        &self,
        post_id: i64,
        user_id: i64,
    ) -> Result<Option<Post>, StoreError> {
        Ok(posts::get_scheduled_post(&self.pool, post_id, user_id).await?)
    }

    async fn scheduled_posts_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<Post>, StoreError> {
        Ok(posts::scheduled_posts_for_account(&self.pool, account_id).await?)
    }

    async fn mark_published(
        &self,
        post_id: i64,
        platform_post_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(posts::mark_published(&self.pool, post_id, platform_post_id).await?)
    }

    async fn record_publish_failure(&self, post_id: i64, error: &str) -> Result<(), StoreError> {
        posts::record_publish_failure(&self.pool, post_id, error).await?;
        Ok(())
    }

    async fn update_scheduled_post(
        &self,
        post_id: i64,
        user_id: i64,
        text: &str,
        media_ids: &[String],
        scheduled_at: DateTime<Utc>,
        queue_message_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(posts::update_scheduled_post(
            &self.pool,
            post_id,
            user_id,
            text,
            media_ids,
            scheduled_at,
            queue_message_id,
        )
        .await?)
    }

    async fn delete_scheduled_post(&self, post_id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(posts::delete_scheduled_post(&self.pool, post_id, user_id).await?)
    }
}
