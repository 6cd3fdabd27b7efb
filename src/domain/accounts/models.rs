//! Connected account model definitions

use chrono::{DateTime, Utc};

/// A linked social identity with stored posting credentials.
/// Credentials live in a separate row projection (`AccountTokens`) so this
/// struct can be cached and serialized without leaking secrets.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectedAccount {
    pub id: i64,
    pub user_id: i64,
    pub twitter_user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Posting credentials for one connected account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
}

/// Freshly fetched profile fields for a lazy refresh
#[derive(Debug, Clone)]
pub struct ProfileFields {
    pub username: String,
    pub display_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub verified: bool,
}
