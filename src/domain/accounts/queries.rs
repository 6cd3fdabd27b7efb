//! Connected account domain - DB queries
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use super::models::{AccountTokens, ConnectedAccount, ProfileFields};

/// List a user's connected accounts in creation order.
/// The ordering is load-bearing: the resolver's no-active-pointer fallback
/// is "first account", which must be deterministic.
pub async fn list_accounts<'e, E>(
    executor: E,
    user_id: i64,
) -> Result<Vec<ConnectedAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, user_id, twitter_user_id, username, display_name,
               profile_image_url, verified, created_at
        FROM connected_accounts
        WHERE user_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

/// Get one account, scoped to its owner
pub async fn get_account<'e, E>(
    executor: E,
    account_id: i64,
    user_id: i64,
) -> Result<Option<ConnectedAccount>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, user_id, twitter_user_id, username, display_name,
               profile_image_url, verified, created_at
        FROM connected_accounts
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(account_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Insert or refresh a connected account after an OAuth exchange.
/// The external account id is unique per user, so reconnecting the same
/// identity updates profile fields and credentials in place.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_account<'e, E>(
    executor: E,
    user_id: i64,
    twitter_user_id: &str,
    profile: &ProfileFields,
    access_token: &str,
    refresh_token: Option<&str>,
    token_expires_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO connected_accounts
            (user_id, twitter_user_id, username, display_name, profile_image_url,
             verified, access_token, refresh_token, token_expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (user_id, twitter_user_id) DO UPDATE SET
            username = $3,
            display_name = $4,
            profile_image_url = $5,
            verified = $6,
            access_token = $7,
            refresh_token = COALESCE($8, connected_accounts.refresh_token),
            token_expires_at = $9
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(twitter_user_id)
    .bind(&profile.username)
    .bind(&profile.display_name)
    .bind(&profile.profile_image_url)
    .bind(profile.verified)
    .bind(access_token)
    .bind(refresh_token)
    .bind(token_expires_at)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

pub async fn get_account_tokens<'e, E>(
    executor: E,
    account_id: i64,
) -> Result<Option<AccountTokens>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT access_token, refresh_token, token_expires_at
        FROM connected_accounts WHERE id = $1
        "#,
    )
    .bind(account_id)
    .fetch_optional(executor)
    .await
}

pub async fn update_account_tokens<'e, E>(
    executor: E,
    account_id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    token_expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE connected_accounts SET
            access_token = $2,
            refresh_token = COALESCE($3, refresh_token),
            token_expires_at = $4
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(token_expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Write back lazily refreshed profile fields
pub async fn update_account_profile<'e, E>(
    executor: E,
    account_id: i64,
    profile: &ProfileFields,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE connected_accounts SET
            username = $2,
            display_name = $3,
            profile_image_url = $4,
            verified = $5
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(&profile.username)
    .bind(&profile.display_name)
    .bind(&profile.profile_image_url)
    .bind(profile.verified)
    .execute(executor)
    .await?;
    Ok(())
}

/// Delete an account row, scoped to its owner. The caller is responsible for
/// cancelling that account's scheduled posts and clearing the active pointer
/// in the same transaction.
pub async fn delete_account<'e, E>(
    executor: E,
    account_id: i64,
    user_id: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM connected_accounts
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(account_id)
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

// Active pointer + user rows

/// Create a bare user row (first account connect without a session)
pub async fn create_user<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO users DEFAULT VALUES
        RETURNING id
        "#,
    )
    .fetch_one(executor)
    .await?;
    Ok(row.0)
}

pub async fn user_exists<'e, E>(executor: E, user_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.is_some())
}

/// Find the oldest user who connected this external identity (login path)
pub async fn find_user_by_twitter_id<'e, E>(
    executor: E,
    twitter_user_id: &str,
) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT user_id FROM connected_accounts
        WHERE twitter_user_id = $1
        ORDER BY id ASC
        LIMIT 1
        "#,
    )
    .bind(twitter_user_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| r.0))
}

pub async fn active_account_id<'e, E>(
    executor: E,
    user_id: i64,
) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT active_account_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(executor)
            .await?;
    Ok(row.and_then(|r| r.0))
}

pub async fn set_active_account_id<'e, E>(
    executor: E,
    user_id: i64,
    account_id: Option<i64>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE users SET active_account_id = $2 WHERE id = $1")
        .bind(user_id)
        .bind(account_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Clear the active pointer only if it references the given account, so the
/// pointer can never dangle after a delete
pub async fn clear_active_if_account<'e, E>(
    executor: E,
    user_id: i64,
    account_id: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE users SET active_account_id = NULL
        WHERE id = $1 AND active_account_id = $2
        "#,
    )
    .bind(user_id)
    .bind(account_id)
    .execute(executor)
    .await?;
    Ok(())
}
