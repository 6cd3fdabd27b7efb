//! In-process cache for connected-account lookups
//!
//! The resolver reads accounts on every compose and publish, so entries are
//! kept per user with a short TTL. The cache is strictly advisory: every
//! entry is re-derivable from the database, and any mutation of a user's
//! accounts or active pointer must invalidate their entry.

use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::DEFAULT_ACCOUNT_CACHE_TTL_SECS;
use crate::domain::accounts::ConnectedAccount;

/// One user's cached view: their accounts plus the active pointer,
/// captured together so the two never disagree within an entry.
#[derive(Debug, Clone)]
pub struct CachedAccounts {
    pub accounts: Vec<ConnectedAccount>,
    pub active_account_id: Option<i64>,
}

struct Entry {
    value: CachedAccounts,
    expires_at: Instant,
}

pub struct AccountCache {
    ttl: Duration,
    entries: Mutex<HashMap<i64, Entry>>,
}

impl AccountCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(Duration::from_secs(cache_ttl_secs()))
    }

    /// Fresh entry for the user, or None when absent or expired.
    /// Expired entries are dropped on read.
    pub fn get(&self, user_id: i64) -> Option<CachedAccounts> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&user_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&user_id);
                None
            }
            None => None,
        }
    }

    /// Last write wins.
    pub fn put(&self, user_id: i64, value: CachedAccounts) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            user_id,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, user_id: i64) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&user_id);
    }
}

/// Entry TTL in seconds, from ACCOUNT_CACHE_TTL_SECS.
fn cache_ttl_secs() -> u64 {
    env::var("ACCOUNT_CACHE_TTL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_ACCOUNT_CACHE_TTL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    fn view(accounts: Vec<ConnectedAccount>, active: Option<i64>) -> CachedAccounts {
        CachedAccounts {
            accounts,
            active_account_id: active,
        }
    }

    #[test]
    fn test_get_returns_what_was_put() {
        let cache = AccountCache::new(Duration::from_secs(60));
        cache.put(1, view(vec![account(10, 1)], Some(10)));

        let got = cache.get(1).unwrap();
        assert_eq!(got.accounts.len(), 1);
        assert_eq!(got.accounts[0].id, 10);
        assert_eq!(got.active_account_id, Some(10));
    }

    #[test]
    fn test_miss_on_unknown_user() {
        let cache = AccountCache::new(Duration::from_secs(60));
        assert!(cache.get(42).is_none());
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = AccountCache::new(Duration::from_millis(10));
        cache.put(1, view(vec![account(10, 1)], None));

        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = AccountCache::new(Duration::from_secs(60));
        cache.put(1, view(vec![account(10, 1)], Some(10)));
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_invalidate_is_per_user() {
        let cache = AccountCache::new(Duration::from_secs(60));
        cache.put(1, view(vec![account(10, 1)], None));
        cache.put(2, view(vec![account(20, 2)], None));

        cache.invalidate(1);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn test_put_overwrites_previous_entry() {
        let cache = AccountCache::new(Duration::from_secs(60));
        cache.put(1, view(vec![account(10, 1)], Some(10)));
        cache.put(1, view(vec![account(10, 1), account(11, 1)], Some(11)));

        let got = cache.get(1).unwrap();
        assert_eq!(got.accounts.len(), 2);
        assert_eq!(got.active_account_id, Some(11));
    }
}
