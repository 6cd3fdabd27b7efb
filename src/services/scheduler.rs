//! Scheduled post pipeline
//!
//! Fire-later execution is delegated to the external delayed queue: each
//! scheduled post owns exactly one queue job that calls the worker endpoint
//! back at the scheduled time. The job is enqueued before the row is
//! persisted (with a pre-reserved id), because a row without a job would
//! silently never fire, while a job without a row is made harmless by the
//! fire-side guards.

use chrono::{DateTime, Duration, Utc};

use crate::constants::{MAX_SCHEDULE_HORIZON_DAYS, MIN_SCHEDULE_LEAD_SECS};
use crate::domain::posts::models::{NewPost, Post};
use crate::services::cache::AccountCache;
use crate::services::platform::Platform;
use crate::services::publisher::{self, PublishError};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::resolver::{self, ResolveError};
use crate::services::store::{Store, StoreError};

#[derive(Debug)]
pub enum ScheduleError {
    Publish(PublishError),
    InvalidScheduleTime(String),
    Resolve(ResolveError),
    Store(StoreError),
    /// A queue operation the pipeline depended on failed
    Queue(QueueError),
    /// No pending scheduled post with that id for this user
    NotFound,
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::Publish(e) => write!(f, "{}", e),
            ScheduleError::InvalidScheduleTime(msg) => {
                write!(f, "invalid schedule time: {}", msg)
            }
            ScheduleError::Resolve(e) => write!(f, "{}", e),
            ScheduleError::Store(e) => write!(f, "storage error: {}", e),
            ScheduleError::Queue(e) => write!(f, "queue operation failed: {}", e),
            ScheduleError::NotFound => write!(f, "scheduled post not found"),
        }
    }
}

impl std::error::Error for ScheduleError {}

impl From<PublishError> for ScheduleError {
    fn from(e: PublishError) -> Self {
        ScheduleError::Publish(e)
    }
}

impl From<ResolveError> for ScheduleError {
    fn from(e: ResolveError) -> Self {
        ScheduleError::Resolve(e)
    }
}

impl From<StoreError> for ScheduleError {
    fn from(e: StoreError) -> Self {
        ScheduleError::Store(e)
    }
}

impl From<QueueError> for ScheduleError {
    fn from(e: QueueError) -> Self {
        ScheduleError::Queue(e)
    }
}

/// What a worker callback did with a delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum FireOutcome {
    Published,
    /// Record missing or already published; nothing to do
    Skipped,
}

/// A schedule time must sit at least the minimum lead ahead of `now` and
/// inside the horizon. `now` is a parameter so the boundaries are testable.
pub fn validate_schedule_time(
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ScheduleError> {
    if scheduled_at < now + Duration::seconds(MIN_SCHEDULE_LEAD_SECS) {
        return Err(ScheduleError::InvalidScheduleTime(format!(
            "scheduled time must be at least {} seconds from now",
            MIN_SCHEDULE_LEAD_SECS
        )));
    }
    if scheduled_at > now + Duration::days(MAX_SCHEDULE_HORIZON_DAYS) {
        return Err(ScheduleError::InvalidScheduleTime(format!(
            "scheduled time is more than {} days out",
            MAX_SCHEDULE_HORIZON_DAYS
        )));
    }
    Ok(())
}

fn job_body(post_id: i64) -> serde_json::Value {
    serde_json::json!({ "post_id": post_id })
}

async fn best_effort_delete(queue: &dyn JobQueue, message_id: &str) {
    match queue.delete_message(message_id).await {
        Ok(()) | Err(QueueError::NotFound) => {}
        Err(e) => {
            eprintln!(
                "[scheduler] failed to delete queue job {}: {}",
                message_id, e
            );
        }
    }
}

/// Create a scheduled post: validate, resolve, enqueue the delayed job
/// with a pre-reserved post id, then persist the record. A persist failure
/// deletes the just-created job so it cannot fire for a row that never
/// existed.
pub async fn schedule_post(
    store: &dyn Store,
    queue: &dyn JobQueue,
    platform: &dyn Platform,
    cache: &AccountCache,
    worker_url: &str,
    user_id: i64,
    text: &str,
    media_ids: &[String],
    scheduled_at: DateTime<Utc>,
    explicit_account_id: Option<i64>,
) -> Result<Post, ScheduleError> {
    publisher::validate_post(text, media_ids.len())?;
    validate_schedule_time(scheduled_at, Utc::now())?;

    let account =
        resolver::resolve_target(store, cache, platform, user_id, explicit_account_id).await?;

    let post_id = store.reserve_post_id().await?;
    let message_id = queue
        .publish(worker_url, job_body(post_id), scheduled_at)
        .await?;

    let insert = store
        .insert_post(&NewPost {
            id: post_id,
            user_id,
            account_id: account.id,
            text: text.to_string(),
            media_ids: media_ids.to_vec(),
            scheduled_at: Some(scheduled_at),
            queue_message_id: Some(message_id.clone()),
        })
        .await;

    if let Err(e) = insert {
        best_effort_delete(queue, &message_id).await;
        return Err(e.into());
    }

    store
        .get_post_by_id(post_id)
        .await?
        .ok_or(ScheduleError::NotFound)
}

/// Change a scheduled post's text, media, or time.
///
/// The OLD queue job is deleted first: if the queue cannot confirm that
/// delete, the update aborts and the original schedule stands. A job the
/// queue no longer knows is fine to proceed past. A persist failure after
/// the new job is enqueued compensates by deleting the NEW job.
pub async fn update_scheduled(
    store: &dyn Store,
    queue: &dyn JobQueue,
    worker_url: &str,
    user_id: i64,
    post_id: i64,
    text: &str,
    media_ids: &[String],
    scheduled_at: DateTime<Utc>,
) -> Result<Post, ScheduleError> {
    let existing = store
        .get_scheduled_post(post_id, user_id)
        .await?
        .ok_or(ScheduleError::NotFound)?;

    publisher::validate_post(text, media_ids.len())?;
    validate_schedule_time(scheduled_at, Utc::now())?;

    if let Some(old_message_id) = existing.queue_message_id.as_deref() {
        match queue.delete_message(old_message_id).await {
            Ok(()) | Err(QueueError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let new_message_id = queue
        .publish(worker_url, job_body(post_id), scheduled_at)
        .await?;

    match store
        .update_scheduled_post(post_id, user_id, text, media_ids, scheduled_at, &new_message_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            // The row stopped being pending under us
            best_effort_delete(queue, &new_message_id).await;
            return Err(ScheduleError::NotFound);
        }
        Err(e) => {
            best_effort_delete(queue, &new_message_id).await;
            return Err(e.into());
        }
    }

    store
        .get_post_by_id(post_id)
        .await?
        .ok_or(ScheduleError::NotFound)
}

/// Cancel a scheduled post. A job the queue has already forgotten still
/// cancels cleanly, so retrying a cancel is safe.
pub async fn cancel_scheduled(
    store: &dyn Store,
    queue: &dyn JobQueue,
    user_id: i64,
    post_id: i64,
) -> Result<(), ScheduleError> {
    let existing = store
        .get_scheduled_post(post_id, user_id)
        .await?
        .ok_or(ScheduleError::NotFound)?;

    if let Some(message_id) = existing.queue_message_id.as_deref() {
        match queue.delete_message(message_id).await {
            Ok(()) | Err(QueueError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }

    store.delete_scheduled_post(post_id, user_id).await?;
    Ok(())
}

/// Worker callback body: publish a scheduled post when it is still due.
///
/// The queue promises at-least-once delivery, so terminal conditions are
/// quiet successes: a missing record means the post was cancelled or its
/// account disconnected, and an already-published record means a duplicate
/// delivery. Anything the queue should retry surfaces as an error.
pub async fn fire_scheduled(
    store: &dyn Store,
    platform: &dyn Platform,
    cache: &AccountCache,
    post_id: i64,
) -> Result<FireOutcome, ScheduleError> {
    let Some(post) = store.get_post_by_id(post_id).await? else {
        println!(
            "[scheduler] fire for missing post {}; treating as cancelled",
            post_id
        );
        return Ok(FireOutcome::Skipped);
    };

    if post.is_published {
        println!(
            "[scheduler] post {} already published; duplicate delivery ignored",
            post_id
        );
        return Ok(FireOutcome::Skipped);
    }

    // Credentials are re-resolved at fire time; the account may be gone
    if store
        .get_account(post.account_id, post.user_id)
        .await?
        .is_none()
    {
        let message = "account disconnected before scheduled publish";
        if let Err(e) = store.record_publish_failure(post_id, message).await {
            eprintln!(
                "[scheduler] failed to record fire failure for post {}: {}",
                post_id, e
            );
        }
        eprintln!("[scheduler] cannot fire post {}: {}", post_id, message);
        return Err(ScheduleError::Resolve(ResolveError::AccountNotFound));
    }

    publisher::publish_pending(store, platform, cache, &post).await?;
    Ok(FireOutcome::Published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::posts::models::PostStatus;
    use crate::testing::{FakePlatform, FakeQueue, MemoryStore, test_account};
    use std::time::Duration as StdDuration;

    const WORKER_URL: &str = "https://api.example.test/worker/publish";

    fn cache() -> AccountCache {
        AccountCache::new(StdDuration::from_secs(60))
    }

    fn in_one_hour() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[test]
    fn test_schedule_time_bounds() {
        let now = Utc::now();

        // Below the minimum lead
        assert!(matches!(
            validate_schedule_time(now + Duration::seconds(59), now),
            Err(ScheduleError::InvalidScheduleTime(_))
        ));
        assert!(matches!(
            validate_schedule_time(now - Duration::hours(1), now),
            Err(ScheduleError::InvalidScheduleTime(_))
        ));

        // Exactly at the minimum lead is allowed
        assert!(validate_schedule_time(now + Duration::seconds(60), now).is_ok());
        assert!(validate_schedule_time(now + Duration::days(30), now).is_ok());

        // Exactly at the horizon is allowed, past it is not
        assert!(validate_schedule_time(now + Duration::days(730), now).is_ok());
        assert!(matches!(
            validate_schedule_time(now + Duration::days(730) + Duration::seconds(1), now),
            Err(ScheduleError::InvalidScheduleTime(_))
        ));
    }

    #[tokio::test]
    async fn test_schedule_post_enqueues_then_persists() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let when = in_one_hour();
        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "later", &[], when, None,
        )
        .await
        .unwrap();

        assert_eq!(post.status(), PostStatus::Scheduled);
        assert_eq!(post.scheduled_at, Some(when));

        let jobs = queue.published_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].url, WORKER_URL);
        assert_eq!(jobs[0].not_before, when);
        assert_eq!(jobs[0].body["post_id"].as_i64(), Some(post.id));
        assert_eq!(post.queue_message_id.as_deref(), Some(jobs[0].message_id.as_str()));
    }

    #[tokio::test]
    async fn test_rejected_time_means_no_job_and_no_record() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let err = schedule_post(
            &store,
            &queue,
            &platform,
            &cache,
            WORKER_URL,
            7,
            "too soon",
            &[],
            Utc::now() + Duration::seconds(5),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScheduleError::InvalidScheduleTime(_)));
        assert!(queue.published_jobs().await.is_empty());
        assert_eq!(store.post_count().await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_persists_nothing() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;
        queue.fail_next_publish("qstash 500").await;

        let err = schedule_post(
            &store,
            &queue,
            &platform,
            &cache,
            WORKER_URL,
            7,
            "later",
            &[],
            in_one_hour(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScheduleError::Queue(QueueError::Api(_))));
        assert_eq!(store.post_count().await, 0);
    }

    #[tokio::test]
    async fn test_persist_failure_deletes_orphaned_job() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;
        store.fail_next_insert().await;

        let err = schedule_post(
            &store,
            &queue,
            &platform,
            &cache,
            WORKER_URL,
            7,
            "later",
            &[],
            in_one_hour(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScheduleError::Store(_)));
        assert_eq!(store.post_count().await, 0);

        // The job that went out before the insert is compensated away
        let jobs = queue.published_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(queue.deleted_ids().await.contains(&jobs[0].message_id));
    }

    #[tokio::test]
    async fn test_update_replaces_job_and_record() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "draft one", &[], in_one_hour(),
            None,
        )
        .await
        .unwrap();
        let old_message_id = post.queue_message_id.clone().unwrap();

        let new_time = Utc::now() + Duration::hours(6);
        let updated = update_scheduled(
            &store,
            &queue,
            WORKER_URL,
            7,
            post.id,
            "draft two",
            &[],
            new_time,
        )
        .await
        .unwrap();

        assert_eq!(updated.text, "draft two");
        assert_eq!(updated.scheduled_at, Some(new_time));
        assert_ne!(updated.queue_message_id.as_deref(), Some(old_message_id.as_str()));
        assert!(queue.deleted_ids().await.contains(&old_message_id));
        assert_eq!(queue.published_jobs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_update_aborts_when_old_job_delete_fails() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let when = in_one_hour();
        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "original", &[], when, None,
        )
        .await
        .unwrap();

        queue.fail_next_delete("connection reset").await;
        let err = update_scheduled(
            &store,
            &queue,
            WORKER_URL,
            7,
            post.id,
            "changed",
            &[],
            Utc::now() + Duration::hours(2),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScheduleError::Queue(_)));

        // The original schedule still stands
        let unchanged = store.get_post_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(unchanged.text, "original");
        assert_eq!(unchanged.scheduled_at, Some(when));
        assert_eq!(queue.published_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_proceeds_when_old_job_already_gone() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "original", &[], in_one_hour(),
            None,
        )
        .await
        .unwrap();

        queue.notfound_next_delete().await;
        let updated = update_scheduled(
            &store,
            &queue,
            WORKER_URL,
            7,
            post.id,
            "changed",
            &[],
            Utc::now() + Duration::hours(2),
        )
        .await
        .unwrap();

        assert_eq!(updated.text, "changed");
    }

    #[tokio::test]
    async fn test_cancel_removes_job_and_record() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "later", &[], in_one_hour(), None,
        )
        .await
        .unwrap();
        let message_id = post.queue_message_id.clone().unwrap();

        cancel_scheduled(&store, &queue, 7, post.id).await.unwrap();

        assert!(store.get_post_by_id(post.id).await.unwrap().is_none());
        assert!(queue.deleted_ids().await.contains(&message_id));
    }

    #[tokio::test]
    async fn test_cancel_succeeds_when_job_already_fired_off_queue() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "later", &[], in_one_hour(), None,
        )
        .await
        .unwrap();

        // The queue no longer knows the message
        queue.notfound_next_delete().await;
        cancel_scheduled(&store, &queue, 7, post.id).await.unwrap();
        assert!(store.get_post_by_id(post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_missing_post_is_not_found() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();

        assert!(matches!(
            cancel_scheduled(&store, &queue, 7, 999).await,
            Err(ScheduleError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_fire_missing_post_is_a_quiet_skip() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();

        let outcome = fire_scheduled(&store, &platform, &cache, 424242)
            .await
            .unwrap();
        assert_eq!(outcome, FireOutcome::Skipped);
        assert!(platform.publish_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_fire_already_published_post_does_not_republish() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "later", &[], in_one_hour(), None,
        )
        .await
        .unwrap();

        // First delivery publishes
        let first = fire_scheduled(&store, &platform, &cache, post.id)
            .await
            .unwrap();
        assert_eq!(first, FireOutcome::Published);

        // Duplicate delivery is a no-op
        let second = fire_scheduled(&store, &platform, &cache, post.id)
            .await
            .unwrap();
        assert_eq!(second, FireOutcome::Skipped);
        assert_eq!(platform.publish_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_post_fires_end_to_end() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "see you at launch", &[],
            in_one_hour(), None,
        )
        .await
        .unwrap();

        // Simulate the queue delivering the callback payload
        let jobs = queue.published_jobs().await;
        let post_id = jobs[0].body["post_id"].as_i64().unwrap();

        let outcome = fire_scheduled(&store, &platform, &cache, post_id)
            .await
            .unwrap();
        assert_eq!(outcome, FireOutcome::Published);

        let post = store.get_post_by_id(post_id).await.unwrap().unwrap();
        assert!(post.is_published);
        assert!(post.platform_post_id.is_some());
        assert_eq!(platform.publish_calls().await[0].text, "see you at launch");
    }

    #[tokio::test]
    async fn test_fire_with_account_gone_records_failure_loudly() {
        let store = MemoryStore::new();
        let platform = FakePlatform::new();
        let cache = cache();

        // Scheduled row exists but its account does not
        store
            .add_scheduled_post(500, 7, 99, "orphaned", "m-500")
            .await;

        let err = fire_scheduled(&store, &platform, &cache, 500)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::Resolve(ResolveError::AccountNotFound)
        ));

        let post = store.get_post_by_id(500).await.unwrap().unwrap();
        assert!(!post.is_published);
        assert!(post.publish_error.as_deref().unwrap().contains("disconnected"));
    }

    #[tokio::test]
    async fn test_update_persist_failure_compensates_new_job() {
        let store = MemoryStore::new();
        let queue = FakeQueue::new();
        let platform = FakePlatform::new();
        let cache = cache();
        store.add_account(test_account(1, 7)).await;

        let post = schedule_post(
            &store, &queue, &platform, &cache, WORKER_URL, 7, "original", &[], in_one_hour(),
            None,
        )
        .await
        .unwrap();

        store.fail_next_update().await;
        let err = update_scheduled(
            &store,
            &queue,
            WORKER_URL,
            7,
            post.id,
            "changed",
            &[],
            Utc::now() + Duration::hours(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScheduleError::Store(_)));

        // The replacement job was deleted again
        let jobs = queue.published_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert!(queue.deleted_ids().await.contains(&jobs[1].message_id));
    }
}
