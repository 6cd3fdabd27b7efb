//! Post model definitions

use chrono::{DateTime, Utc};

/// A persisted post record. Exactly one of three lifecycle states holds at
/// any time, derived from the flag pair:
/// draft (`!is_scheduled && !is_published`), scheduled
/// (`is_scheduled && !is_published`), published (`is_published`).
/// Failed publishes stay in their prior state with `publish_error` set.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub text: String,
    pub media_ids: Vec<String>,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub queue_message_id: Option<String>,
    pub is_published: bool,
    pub platform_post_id: Option<String>,
    pub publish_error: Option<String>,
    pub publish_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
        }
    }
}

impl Post {
    pub fn status(&self) -> PostStatus {
        if self.is_published {
            PostStatus::Published
        } else if self.is_scheduled {
            PostStatus::Scheduled
        } else {
            PostStatus::Draft
        }
    }
}

/// Fields for inserting a new post record. The id is reserved from the
/// sequence before insertion so a scheduled post's queue job can carry it.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub text: String,
    pub media_ids: Vec<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub queue_message_id: Option<String>,
}
