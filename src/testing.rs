//! In-memory fakes for pipeline tests
//!
//! `MemoryStore`, `FakeQueue`, and `FakePlatform` implement the pipeline
//! seams over plain maps so the publish and scheduling flows can run
//! without Postgres, a queue, or the platform API. The fakes can be primed
//! to fail specific operations once.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::accounts::models::{AccountTokens, ConnectedAccount, ProfileFields};
use crate::domain::posts::models::{NewPost, Post};
use crate::services::platform::{Platform, PlatformError, PlatformProfile, RefreshedCredentials};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::store::{Store, StoreError};

pub fn test_account(id: i64, user_id: i64) -> ConnectedAccount {
    ConnectedAccount {
        id,
        user_id,
        twitter_user_id: format!("tw-{}", id),
        username: format!("user{}", id),
        display_name: Some(format!("User {}", id)),
        profile_image_url: None,
        verified: false,
        created_at: Utc::now(),
    }
}

#[derive(Default)]
struct MemoryState {
    accounts: Vec<ConnectedAccount>,
    tokens: std::collections::HashMap<i64, AccountTokens>,
    active: std::collections::HashMap<i64, Option<i64>>,
    posts: std::collections::HashMap<i64, Post>,
    next_post_id: i64,
    fail_next_insert: bool,
    fail_next_update: bool,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    list_account_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            list_account_calls: AtomicUsize::new(0),
        }
    }

    /// Register an account with usable tokens (valid for an hour).
    pub async fn add_account(&self, account: ConnectedAccount) {
        let mut state = self.state.lock().await;
        state.tokens.insert(
            account.id,
            AccountTokens {
                access_token: format!("token-{}", account.id),
                refresh_token: Some(format!("refresh-{}", account.id)),
                token_expires_at: Utc::now() + Duration::hours(1),
            },
        );
        state.accounts.push(account);
    }

    /// Overwrite an account's tokens with an already-expired access token.
    pub async fn expire_account_tokens(
        &self,
        account_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        state.tokens.insert(
            account_id,
            AccountTokens {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
                token_expires_at: Utc::now() - Duration::hours(1),
            },
        );
    }

    /// Insert a pending scheduled post directly (an hour out).
    pub async fn add_scheduled_post(
        &self,
        id: i64,
        user_id: i64,
        account_id: i64,
        text: &str,
        queue_message_id: &str,
    ) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.next_post_id = state.next_post_id.max(id);
        state.posts.insert(
            id,
            Post {
                id,
                user_id,
                account_id,
                text: text.to_string(),
                media_ids: Vec::new(),
                is_scheduled: true,
                scheduled_at: Some(now + Duration::hours(1)),
                queue_message_id: Some(queue_message_id.to_string()),
                is_published: false,
                platform_post_id: None,
                publish_error: None,
                publish_attempts: 0,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn fail_next_insert(&self) {
        self.state.lock().await.fail_next_insert = true;
    }

    pub async fn fail_next_update(&self) {
        self.state.lock().await.fail_next_update = true;
    }

    pub fn list_account_calls(&self) -> usize {
        self.list_account_calls.load(Ordering::SeqCst)
    }

    pub async fn post_count(&self) -> usize {
        self.state.lock().await.posts.len()
    }

    pub async fn all_posts(&self) -> Vec<Post> {
        let state = self.state.lock().await;
        let mut posts: Vec<Post> = state.posts.values().cloned().collect();
        posts.sort_by_key(|p| p.id);
        posts
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_accounts(&self, user_id: i64) -> Result<Vec<ConnectedAccount>, StoreError> {
        self.list_account_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        let mut accounts: Vec<ConnectedAccount> = state
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(accounts)
    }

    async fn get_account(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> Result<Option<ConnectedAccount>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .iter()
            .find(|a| a.id == account_id && a.user_id == user_id)
            .cloned())
    }

    async fn account_tokens(&self, account_id: i64) -> Result<Option<AccountTokens>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tokens.get(&account_id).cloned())
    }

    async fn update_account_tokens(
        &self,
        account_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let previous_refresh = state
            .tokens
            .get(&account_id)
            .and_then(|t| t.refresh_token.clone());
        state.tokens.insert(
            account_id,
            AccountTokens {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string).or(previous_refresh),
                token_expires_at: expires_at,
            },
        );
        Ok(())
    }

    async fn update_account_profile(
        &self,
        account_id: i64,
        profile: &ProfileFields,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) {
            account.username = profile.username.clone();
            account.display_name = profile.display_name.clone();
            account.profile_image_url = profile.profile_image_url.clone();
            account.verified = profile.verified;
        }
        Ok(())
    }

    async fn active_account_id(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active.get(&user_id).copied().flatten())
    }

    async fn set_active_account(
        &self,
        user_id: i64,
        account_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.active.insert(user_id, account_id);
        Ok(())
    }

    async fn delete_account_cascade(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let exists = state
            .accounts
            .iter()
            .any(|a| a.id == account_id && a.user_id == user_id);
        if !exists {
            return Ok(false);
        }

        state
            .posts
            .retain(|_, p| !(p.account_id == account_id && p.is_scheduled && !p.is_published));
        if state.active.get(&user_id).copied().flatten() == Some(account_id) {
            state.active.insert(user_id, None);
        }
        state.accounts.retain(|a| a.id != account_id);
        state.tokens.remove(&account_id);
        Ok(true)
    }

    async fn reserve_post_id(&self) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        state.next_post_id += 1;
        Ok(state.next_post_id)
    }

    async fn insert_post(&self, new: &NewPost) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_next_insert {
            state.fail_next_insert = false;
            return Err(StoreError::Unavailable(
                "injected insert failure".to_string(),
            ));
        }

        let now = Utc::now();
        state.posts.insert(
            new.id,
            Post {
                id: new.id,
                user_id: new.user_id,
                account_id: new.account_id,
                text: new.text.clone(),
                media_ids: new.media_ids.clone(),
                is_scheduled: new.scheduled_at.is_some(),
                scheduled_at: new.scheduled_at,
                queue_message_id: new.queue_message_id.clone(),
                is_published: false,
                platform_post_id: None,
                publish_error: None,
                publish_attempts: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_post(&self, post_id: i64, user_id: i64) -> Result<Option<Post>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .get(&post_id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn get_post_by_id(&self, post_id: i64) -> Result<Option<Post>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.posts.get(&post_id).cloned())
    }

    async fn get_scheduled_post(
        &self,
        post_id: i64,
        user_id: i64,
    ) -> Result<Option<Post>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .get(&post_id)
            .filter(|p| p.user_id == user_id && p.is_scheduled && !p.is_published)
            .cloned())
    }

    async fn scheduled_posts_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .values()
            .filter(|p| p.account_id == account_id && p.is_scheduled && !p.is_published)
            .cloned()
            .collect())
    }

    async fn mark_published(
        &self,
        post_id: i64,
        platform_post_id: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.posts.get_mut(&post_id) {
            Some(post) if !post.is_published => {
                post.is_published = true;
                post.platform_post_id = Some(platform_post_id.to_string());
                post.publish_error = None;
                post.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_publish_failure(&self, post_id: i64, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(post) = state.posts.get_mut(&post_id) {
            if !post.is_published {
                post.publish_error = Some(error.to_string());
                post.publish_attempts += 1;
                post.updated_at = Utc::now();
            }
        }
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
        let mut state = self.state.lock().await;
        if state.fail_next_update {
            state.fail_next_update = false;
            return Err(StoreError::Unavailable(
                "injected update failure".to_string(),
            ));
        }

        match state.posts.get_mut(&post_id) {
            Some(post) if post.user_id == user_id && post.is_scheduled && !post.is_published => {
                post.text = text.to_string();
                post.media_ids = media_ids.to_vec();
                post.scheduled_at = Some(scheduled_at);
                post.queue_message_id = Some(queue_message_id.to_string());
                post.publish_error = None;
                post.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_scheduled_post(&self, post_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let matches = state
            .posts
            .get(&post_id)
            .is_some_and(|p| p.user_id == user_id && p.is_scheduled && !p.is_published);
        if matches {
            state.posts.remove(&post_id);
        }
        Ok(matches)
    }
}

#[derive(Debug, Clone)]
pub struct PublishedJob {
    pub url: String,
    pub body: serde_json::Value,
    pub not_before: DateTime<Utc>,
    pub message_id: String,
}

#[derive(Default)]
struct QueueState {
    published: Vec<PublishedJob>,
    deleted: Vec<String>,
    fail_next_publish: Option<String>,
    fail_next_delete: Option<String>,
    notfound_next_delete: bool,
    next_id: usize,
}

pub struct FakeQueue {
    state: Mutex<QueueState>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }

    pub async fn published_jobs(&self) -> Vec<PublishedJob> {
        self.state.lock().await.published.clone()
    }

    pub async fn deleted_ids(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn fail_next_publish(&self, message: &str) {
        self.state.lock().await.fail_next_publish = Some(message.to_string());
    }

    pub async fn fail_next_delete(&self, message: &str) {
        self.state.lock().await.fail_next_delete = Some(message.to_string());
    }

    /// The next delete reports the message as already gone.
    pub async fn notfound_next_delete(&self) {
        self.state.lock().await.notfound_next_delete = true;
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn publish(
        &self,
        url: &str,
        body: serde_json::Value,
        not_before: DateTime<Utc>,
    ) -> Result<String, QueueError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.fail_next_publish.take() {
            return Err(QueueError::Api(message));
        }

        state.next_id += 1;
        let message_id = format!("fake-msg-{}", state.next_id);
        state.published.push(PublishedJob {
            url: url.to_string(),
            body,
            not_before,
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.fail_next_delete.take() {
            return Err(QueueError::Api(message));
        }
        if state.notfound_next_delete {
            state.notfound_next_delete = false;
            return Err(QueueError::NotFound);
        }

        state.deleted.push(message_id.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublishCall {
    pub access_token: String,
    pub text: String,
    pub media_ids: Vec<String>,
}

#[derive(Default)]
struct PlatformState {
    publish_calls: Vec<PublishCall>,
    fail_next_publish: Option<String>,
    fail_profiles: bool,
    next_id: usize,
}

pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
        }
    }

    pub async fn publish_calls(&self) -> Vec<PublishCall> {
        self.state.lock().await.publish_calls.clone()
    }

    pub async fn fail_next_publish(&self, message: &str) {
        self.state.lock().await.fail_next_publish = Some(message.to_string());
    }

    pub async fn fail_profile_fetches(&self) {
        self.state.lock().await.fail_profiles = true;
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn publish(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, PlatformError> {
        let mut state = self.state.lock().await;
        state.publish_calls.push(PublishCall {
            access_token: access_token.to_string(),
            text: text.to_string(),
            media_ids: media_ids.to_vec(),
        });

        if let Some(message) = state.fail_next_publish.take() {
            return Err(PlatformError::Api {
                status: 403,
                body: message,
            });
        }

        state.next_id += 1;
        Ok(format!("platform-post-{}", state.next_id))
    }

    async fn upload_media(
        &self,
        _access_token: &str,
        _data: &[u8],
        _mime: &str,
    ) -> Result<String, PlatformError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        Ok(format!("fake-media-{}", state.next_id))
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<PlatformProfile, PlatformError> {
        let state = self.state.lock().await;
        if state.fail_profiles {
            return Err(PlatformError::Api {
                status: 500,
                body: "profile fetch disabled".to_string(),
            });
        }
        Ok(PlatformProfile {
            external_id: "remote-1".to_string(),
            username: "remote_user".to_string(),
            display_name: Some("Remote User".to_string()),
            profile_image_url: Some("https://example.test/avatar.png".to_string()),
            verified: false,
        })
    }

    async fn refresh_credentials(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedCredentials, PlatformError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        Ok(RefreshedCredentials {
            access_token: format!("refreshed-{}", state.next_id),
            refresh_token: Some(format!("{}-rotated", refresh_token)),
            expires_in: 7200,
        })
    }
}
