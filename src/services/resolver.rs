//! Account resolution for the compose and publish paths
//!
//! Every operation that posts needs a concrete target account. Resolution
//! reads through the account cache and applies one precedence rule:
//! explicit account id, then the active pointer, then the first account by
//! connection order.

use chrono::Utc;

use crate::domain::accounts::models::{ConnectedAccount, ProfileFields};
use crate::services::cache::{AccountCache, CachedAccounts};
use crate::services::platform::Platform;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::store::{Store, StoreError};

#[derive(Debug)]
pub enum ResolveError {
    /// The user has no connected accounts at all
    NoAccountsConnected,
    /// The requested account does not exist for this user
    AccountNotFound,
    Store(StoreError),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NoAccountsConnected => {
                write!(f, "no connected accounts; connect an account first")
            }
            ResolveError::AccountNotFound => write!(f, "account not found"),
            ResolveError::Store(e) => write!(f, "account lookup failed: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<StoreError> for ResolveError {
    fn from(e: StoreError) -> Self {
        ResolveError::Store(e)
    }
}

/// Pick the target account from a user's connected accounts.
///
/// An explicitly requested id must match or the call fails; the active
/// pointer is trusted only if it still points at a live account, otherwise
/// resolution falls through to the first account by connection order.
pub fn select_target<'a>(
    accounts: &'a [ConnectedAccount],
    active_account_id: Option<i64>,
    explicit_account_id: Option<i64>,
) -> Result<&'a ConnectedAccount, ResolveError> {
    if accounts.is_empty() {
        return Err(ResolveError::NoAccountsConnected);
    }

    if let Some(id) = explicit_account_id {
        return accounts
            .iter()
            .find(|a| a.id == id)
            .ok_or(ResolveError::AccountNotFound);
    }

    if let Some(id) = active_account_id {
        if let Some(account) = accounts.iter().find(|a| a.id == id) {
            return Ok(account);
        }
    }

    // list_accounts orders by created_at, so index 0 is the oldest
    Ok(&accounts[0])
}

/// Read-through accounts lookup: cache hit returns immediately, a miss
/// loads from the store, refreshes profile fields best-effort, and
/// writes the assembled view back to the cache.
pub async fn user_accounts(
    store: &dyn Store,
    cache: &AccountCache,
    platform: &dyn Platform,
    user_id: i64,
) -> Result<CachedAccounts, StoreError> {
    if let Some(cached) = cache.get(user_id) {
        return Ok(cached);
    }

    let mut accounts = store.list_accounts(user_id).await?;
    let active_account_id = store.active_account_id(user_id).await?;

    for account in &mut accounts {
        refresh_profile(store, platform, account).await;
    }

    let view = CachedAccounts {
        accounts,
        active_account_id,
    };
    cache.put(user_id, view.clone());
    Ok(view)
}

/// Best-effort profile refresh. Platform or store failures leave the
/// stored values standing; an empty username falls back to a placeholder
/// derived from the external id so the UI always has something to show.
async fn refresh_profile(
    store: &dyn Store,
    platform: &dyn Platform,
    account: &mut ConnectedAccount,
) {
    if account.username.is_empty() {
        account.username = format!("user_{}", account.twitter_user_id);
    }

    let tokens = match store.account_tokens(account.id).await {
        Ok(Some(tokens)) => tokens,
        Ok(None) => return,
        Err(e) => {
            eprintln!(
                "[resolver] token lookup failed for account {}: {}",
                account.id, e
            );
            return;
        }
    };

    // Listing never spends a token refresh; that stays on the publish path
    if tokens.token_expires_at <= Utc::now() {
        return;
    }

    match platform.fetch_profile(&tokens.access_token).await {
        Ok(profile) => {
            let fields = ProfileFields::from(profile);
            account.username = fields.username.clone();
            account.display_name = fields.display_name.clone();
            account.profile_image_url = fields.profile_image_url.clone();
            account.verified = fields.verified;
            if let Err(e) = store.update_account_profile(account.id, &fields).await {
                eprintln!(
                    "[resolver] profile write-back failed for account {}: {}",
                    account.id, e
                );
            }
        }
        Err(e) => {
            eprintln!(
                "[resolver] profile refresh failed for account {}: {}",
                account.id, e
            );
        }
    }
}

/// Resolve the account a post should go out as.
pub async fn resolve_target(
    store: &dyn Store,
    cache: &AccountCache,
    platform: &dyn Platform,
    user_id: i64,
    explicit_account_id: Option<i64>,
) -> Result<ConnectedAccount, ResolveError> {
    let view = user_accounts(store, cache, platform, user_id).await?;
    let account = select_target(&view.accounts, view.active_account_id, explicit_account_id)?;
    Ok(account.clone())
}

/// Point the user's active marker at one of their accounts.
pub async fn set_active_account(
    store: &dyn Store,
    cache: &AccountCache,
    user_id: i64,
    account_id: i64,
) -> Result<(), ResolveError> {
    if store.get_account(account_id, user_id).await?.is_none() {
        return Err(ResolveError::AccountNotFound);
    }
    store.set_active_account(user_id, Some(account_id)).await?;
    cache.invalidate(user_id);
    Ok(())
}

/// Disconnect an account. Pending scheduled posts are cancelled at the
/// queue first (best-effort; the fire-side guards make a straggler
/// harmless), then the posts, the active pointer reference, and the
/// account row go in one transaction.
pub async fn disconnect_account(
    store: &dyn Store,
    cache: &AccountCache,
    queue: &dyn JobQueue,
    user_id: i64,
    account_id: i64,
) -> Result<(), ResolveError> {
    if store.get_account(account_id, user_id).await?.is_none() {
        return Err(ResolveError::AccountNotFound);
    }

    let scheduled = store.scheduled_posts_for_account(account_id).await?;
    for post in &scheduled {
        let Some(message_id) = post.queue_message_id.as_deref() else {
            continue;
        };
        match queue.delete_message(message_id).await {
            Ok(()) | Err(QueueError::NotFound) => {}
            Err(e) => {
                eprintln!(
                    "[resolver] failed to cancel queue job {} for post {}: {}",
                    message_id, post.id, e
                );
            }
        }
    }

    store.delete_account_cascade(account_id, user_id).await?;
    cache.invalidate(user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, FakeQueue, MemoryStore};
    use std::time::Duration;

    fn account(id: i64, user_id: i64) -> ConnectedAccount {
        ConnectedAccount {
            id,
            user_id,
            twitter_user_id: format!("tw-{}", id),
            username: format!("user{}", id),
            display_name: None,
            profile_image_url: None,
            verified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_accounts_is_an_error() {
        assert!(matches!(
            select_target(&[], None, None),
            Err(ResolveError::NoAccountsConnected)
        ));
        // Even an explicit request fails the same way with nothing connected
        assert!(matches!(
            select_target(&[], None, Some(7)),
            Err(ResolveError::NoAccountsConnected)
        ));
    }

    #[test]
    fn test_explicit_id_beats_active_pointer() {
        let accounts = vec![account(1, 1), account(2, 1)];
        let picked = select_target(&accounts, Some(1), Some(2)).unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn test_unknown_explicit_id_fails_even_with_accounts() {
        let accounts = vec![account(1, 1)];
        assert!(matches!(
            select_target(&accounts, Some(1), Some(99)),
            Err(ResolveError::AccountNotFound)
        ));
    }

    #[test]
    fn test_active_pointer_beats_first_account() {
        let accounts = vec![account(1, 1), account(2, 1)];
        let picked = select_target(&accounts, Some(2), None).unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn test_falls_back_to_first_account() {
        let accounts = vec![account(1, 1), account(2, 1)];
        let picked = select_target(&accounts, None, None).unwrap();
        assert_eq!(picked.id, 1);
    }

    #[test]
    fn test_stale_active_pointer_falls_back_to_first() {
        let accounts = vec![account(1, 1), account(2, 1)];
        let picked = select_target(&accounts, Some(42), None).unwrap();
        assert_eq!(picked.id, 1);
    }

    #[tokio::test]
    async fn test_user_accounts_reads_through_the_cache() {
        let store = MemoryStore::new();
        let cache = AccountCache::new(Duration::from_secs(60));
        let platform = FakePlatform::new();
        store.add_account(account(1, 7)).await;

        let first = user_accounts(&store, &cache, &platform, 7).await.unwrap();
        assert_eq!(first.accounts.len(), 1);
        assert_eq!(store.list_account_calls(), 1);

        // Second read is served from the cache
        let second = user_accounts(&store, &cache, &platform, 7).await.unwrap();
        assert_eq!(second.accounts.len(), 1);
        assert_eq!(store.list_account_calls(), 1);

        cache.invalidate(7);
        user_accounts(&store, &cache, &platform, 7).await.unwrap();
        assert_eq!(store.list_account_calls(), 2);
    }

    #[tokio::test]
    async fn test_profile_failure_does_not_block_listing() {
        let store = MemoryStore::new();
        let cache = AccountCache::new(Duration::from_secs(60));
        let platform = FakePlatform::new();
        platform.fail_profile_fetches().await;
        store.add_account(account(1, 7)).await;

        let view = user_accounts(&store, &cache, &platform, 7).await.unwrap();
        assert_eq!(view.accounts.len(), 1);
        assert_eq!(view.accounts[0].username, "user1");
    }

    #[tokio::test]
    async fn test_empty_username_gets_placeholder() {
        let store = MemoryStore::new();
        let cache = AccountCache::new(Duration::from_secs(60));
        let platform = FakePlatform::new();
        platform.fail_profile_fetches().await;
        let mut acct = account(3, 7);
        acct.username = String::new();
        store.add_account(acct).await;

        let view = user_accounts(&store, &cache, &platform, 7).await.unwrap();
        assert_eq!(view.accounts[0].username, "user_tw-3");
    }

    #[tokio::test]
    async fn test_set_active_account_validates_ownership() {
        let store = MemoryStore::new();
        let cache = AccountCache::new(Duration::from_secs(60));
        store.add_account(account(1, 7)).await;
        store.add_account(account(2, 8)).await;

        // Someone else's account is invisible
        assert!(matches!(
            set_active_account(&store, &cache, 7, 2).await,
            Err(ResolveError::AccountNotFound)
        ));

        set_active_account(&store, &cache, 7, 1).await.unwrap();
        assert_eq!(store.active_account_id(7).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_jobs_and_clears_pointer() {
        let store = MemoryStore::new();
        let cache = AccountCache::new(Duration::from_secs(60));
        let queue = FakeQueue::new();

        store.add_account(account(10, 1)).await;
        store.add_account(account(11, 1)).await;
        store.set_active_account(1, Some(10)).await.unwrap();
        store
            .add_scheduled_post(100, 1, 10, "going out later", "m-100")
            .await;
        store
            .add_scheduled_post(101, 1, 11, "other account", "m-101")
            .await;

        disconnect_account(&store, &cache, &queue, 1, 10)
            .await
            .unwrap();

        // The account, its scheduled posts, and the pointer are gone
        assert!(store.get_account(10, 1).await.unwrap().is_none());
        assert!(store.get_post_by_id(100).await.unwrap().is_none());
        assert_eq!(store.active_account_id(1).await.unwrap(), None);

        // Only the disconnected account's job was cancelled
        assert!(queue.deleted_ids().await.contains(&"m-100".to_string()));
        assert!(!queue.deleted_ids().await.contains(&"m-101".to_string()));
        assert!(store.get_post_by_id(101).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_account_is_not_found() {
        let store = MemoryStore::new();
        let cache = AccountCache::new(Duration::from_secs(60));
        let queue = FakeQueue::new();

        assert!(matches!(
            disconnect_account(&store, &cache, &queue, 1, 99).await,
            Err(ResolveError::AccountNotFound)
        ));
    }
}
