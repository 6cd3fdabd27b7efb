//! Post domain - DB queries for posts
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use super::models::{NewPost, Post};

const POST_COLUMNS: &str = "id, user_id, account_id, text, media_ids, is_scheduled, \
     scheduled_at, queue_message_id, is_published, platform_post_id, \
     publish_error, publish_attempts, created_at, updated_at";

/// Parsed status filter enum for type-safe query building
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Draft,
    Scheduled,
    Published,
    All,
}

impl StatusFilter {
    pub fn from_str(s: Option<&str>) -> Self {
        match s {
            Some("draft") => StatusFilter::Draft,
            Some("scheduled") => StatusFilter::Scheduled,
            Some("published") => StatusFilter::Published,
            _ => StatusFilter::All,
        }
    }

    /// Returns SQL WHERE clause fragment for filtering by lifecycle state
    fn where_clause(&self) -> &'static str {
        match self {
            StatusFilter::Draft => "AND is_scheduled = FALSE AND is_published = FALSE",
            StatusFilter::Scheduled => "AND is_scheduled = TRUE AND is_published = FALSE",
            StatusFilter::Published => "AND is_published = TRUE",
            StatusFilter::All => "",
        }
    }
}

/// Draw the next post id from the sequence without inserting a row.
/// Scheduling enqueues the queue job (whose body carries the post id) before
/// the record exists, so the id has to be known up front.
pub async fn reserve_post_id<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) =
        sqlx::query_as("SELECT nextval(pg_get_serial_sequence('posts', 'id'))")
            .fetch_one(executor)
            .await?;
    Ok(row.0)
}

pub async fn insert_post<'e, E>(executor: E, new: &NewPost) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO posts
            (id, user_id, account_id, text, media_ids, is_scheduled,
             scheduled_at, queue_message_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(new.id)
    .bind(new.user_id)
    .bind(new.account_id)
    .bind(&new.text)
    .bind(&new.media_ids)
    .bind(new.scheduled_at.is_some())
    .bind(new.scheduled_at)
    .bind(&new.queue_message_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(&format!(
        "SELECT {} FROM posts WHERE id = $1 AND user_id = $2",
        POST_COLUMNS
    ))
    .bind(post_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Get a post without owner scoping (worker callback path, which re-resolves
/// the owning account itself)
pub async fn get_post_by_id<'e, E>(
    executor: E,
    post_id: i64,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(&format!(
        "SELECT {} FROM posts WHERE id = $1",
        POST_COLUMNS
    ))
    .bind(post_id)
    .fetch_optional(executor)
    .await
}

/// Get a still-pending scheduled post, scoped to its owner
pub async fn get_scheduled_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(&format!(
        "SELECT {} FROM posts \
         WHERE id = $1 AND user_id = $2 AND is_scheduled = TRUE AND is_published = FALSE",
        POST_COLUMNS
    ))
    .bind(post_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Mark a post as published (atomic - only succeeds if not already published).
/// Returns true if the update was applied, false if already published.
pub async fn mark_published<'e, E>(
    executor: E,
    post_id: i64,
    platform_post_id: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET is_published = TRUE, platform_post_id = $1, publish_error = NULL,
            updated_at = NOW()
        WHERE id = $2 AND is_published = FALSE
        "#,
    )
    .bind(platform_post_id)
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed publish attempt without changing the lifecycle state
pub async fn record_publish_failure<'e, E>(
    executor: E,
    post_id: i64,
    error: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts
        SET publish_error = $1, publish_attempts = publish_attempts + 1,
            updated_at = NOW()
        WHERE id = $2 AND is_published = FALSE
        "#,
    )
    .bind(error)
    .bind(post_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Replace a pending scheduled post's content, fire time, and queue job
/// reference. Returns false if the post is gone or no longer pending.
pub async fn update_scheduled_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
    text: &str,
    media_ids: &[String],
    scheduled_at: DateTime<Utc>,
    queue_message_id: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET text = $3, media_ids = $4, scheduled_at = $5, queue_message_id = $6,
            publish_error = NULL, updated_at = NOW()
        WHERE id = $1 AND user_id = $2 AND is_scheduled = TRUE AND is_published = FALSE
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .bind(text)
    .bind(media_ids)
    .bind(scheduled_at)
    .bind(queue_message_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a pending scheduled post
pub async fn delete_scheduled_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM posts
        WHERE id = $1 AND user_id = $2 AND is_scheduled = TRUE AND is_published = FALSE
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Discard an unpublished draft
pub async fn delete_draft_post<'e, E>(
    executor: E,
    post_id: i64,
    user_id: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM posts
        WHERE id = $1 AND user_id = $2 AND is_scheduled = FALSE AND is_published = FALSE
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count posts for pagination
pub async fn count_posts<'e, E>(
    executor: E,
    user_id: i64,
    status_filter: Option<&str>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let filter = StatusFilter::from_str(status_filter);
    let query = format!(
        "SELECT COUNT(*) FROM posts WHERE user_id = $1 {}",
        filter.where_clause()
    );

    let (count,): (i64,) = sqlx::query_as(&query)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

/// List posts with pagination, newest first
pub async fn list_posts_paginated<'e, E>(
    executor: E,
    user_id: i64,
    status_filter: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let filter = StatusFilter::from_str(status_filter);
    let query = format!(
        "SELECT {} FROM posts
         WHERE user_id = $1 {}
         ORDER BY created_at DESC, id DESC
         LIMIT $2 OFFSET $3",
        POST_COLUMNS,
        filter.where_clause()
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
}

/// Pending scheduled posts bound to an account (disconnect cascade)
pub async fn scheduled_posts_for_account<'e, E>(
    executor: E,
    account_id: i64,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(&format!(
        "SELECT {} FROM posts \
         WHERE account_id = $1 AND is_scheduled = TRUE AND is_published = FALSE",
        POST_COLUMNS
    ))
    .bind(account_id)
    .fetch_all(executor)
    .await
}

/// Delete all pending scheduled posts for an account (disconnect cascade).
/// Drafts and published posts are left alone.
pub async fn delete_scheduled_posts_for_account<'e, E>(
    executor: E,
    account_id: i64,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM posts
        WHERE account_id = $1 AND is_scheduled = TRUE AND is_published = FALSE
        "#,
    )
    .bind(account_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Scheduled posts whose fire time passed more than `grace_secs` ago with no
/// recorded error (watchdog scan)
pub async fn find_overdue_scheduled<'e, E>(
    executor: E,
    grace_secs: i64,
    limit: i64,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(&format!(
        "SELECT {} FROM posts \
         WHERE is_scheduled = TRUE AND is_published = FALSE \
           AND publish_error IS NULL \
           AND scheduled_at < NOW() - ($1::text || ' seconds')::interval \
         ORDER BY scheduled_at ASC \
         LIMIT $2",
        POST_COLUMNS
    ))
    .bind(grace_secs)
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// Stamp an overdue scheduled post so operators see it. Guarded so a publish
/// landing concurrently wins.
pub async fn stamp_missed_deadline<'e, E>(
    executor: E,
    post_id: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET publish_error = 'missed fire deadline', updated_at = NOW()
        WHERE id = $1 AND is_scheduled = TRUE AND is_published = FALSE
          AND publish_error IS NULL
        "#,
    )
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
