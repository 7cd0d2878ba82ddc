use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DEFAULT_CACHE_TTL_MS;
use crate::version::error::CacheError;

/// Cached latest version for a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(version: &str, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            version: version.to_string(),
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache key for a package in a given registry, e.g. `npm:react`
pub fn cache_key(registry: &str, package_name: &str) -> String {
    format!("{}:{}", registry, package_name)
}

/// TTL from a millisecond setting; non-positive values fall back to 24 hours
pub fn cache_ttl(ttl_ms: i64) -> Duration {
    if ttl_ms <= 0 {
        Duration::from_millis(DEFAULT_CACHE_TTL_MS as u64)
    } else {
        Duration::from_millis(ttl_ms as u64)
    }
}

/// Short-lived key to version lookup.
///
/// Losing entries is always safe: a miss just means the next lookup goes to the registry.
pub trait VersionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, version: &str) -> Result<(), CacheError>;

    fn delete(&self, key: &str);

    fn clear(&self);

    fn keys(&self) -> Vec<String>;

    /// Drop every expired entry and return how many were removed
    fn clean_expired(&self) -> usize;

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entry map shared by the memory and file caches
pub(crate) struct EntryMap {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl EntryMap {
    pub(crate) fn new(ttl: Duration, entries: HashMap<String, CacheEntry>) -> Self {
        let ttl = if ttl.is_zero() {
            cache_ttl(0)
        } else {
            ttl
        };
        Self {
            entries: Mutex::new(entries),
            ttl,
        }
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    // A poisoned map only ever holds disposable entries, so keep using it.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the version and whether an expired entry was evicted
    pub(crate) fn get(&self, key: &str) -> (Option<String>, bool) {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(Utc::now()) => {
                debug!("Cache entry expired: {}", key);
                entries.remove(key);
                (None, true)
            }
            Some(entry) => (Some(entry.version.clone()), false),
            None => (None, false),
        }
    }

    pub(crate) fn set(&self, key: &str, version: &str) {
        let entry = CacheEntry::new(version, self.ttl);
        self.lock().insert(key.to_string(), entry);
    }

    pub(crate) fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub(crate) fn clear(&self) -> bool {
        let mut entries = self.lock();
        let had_entries = !entries.is_empty();
        entries.clear();
        had_entries
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn clean_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, CacheEntry> {
        self.lock().clone()
    }
}

/// Process-local cache guarded by a single mutex
pub struct MemoryCache {
    entries: EntryMap,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: EntryMap::new(ttl, HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.entries.ttl()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(cache_ttl(DEFAULT_CACHE_TTL_MS))
    }
}

impl VersionCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).0
    }

    fn set(&self, key: &str, version: &str) -> Result<(), CacheError> {
        self.entries.set(key, version);
        Ok(())
    }

    fn delete(&self, key: &str) {
        self.entries.delete(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys()
    }

    fn clean_expired(&self) -> usize {
        self.entries.clean_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn get_returns_value_within_ttl() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set("npm:react", "18.2.0").unwrap();

        assert_eq!(cache.get("npm:react"), Some("18.2.0".to_string()));
        assert_eq!(cache.get("npm:vue"), None);
    }

    #[test]
    fn get_purges_expired_entry() {
        let cache = MemoryCache::new(Duration::from_millis(20));
        cache.set("npm:react", "18.2.0").unwrap();

        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("npm:react"), None);
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn clean_expired_counts_removed_entries() {
        let cache = MemoryCache::new(Duration::from_millis(20));
        cache.set("npm:react", "18.2.0").unwrap();
        cache.set("go_proxy:gorm.io/gorm", "v1.25.0").unwrap();

        std::thread::sleep(Duration::from_millis(40));
        cache.set("github:nodejs/node", "v22.0.0").unwrap();

        assert_eq!(cache.clean_expired(), 2);
        assert_eq!(cache.keys(), vec!["github:nodejs/node".to_string()]);
    }

    #[test]
    fn delete_and_clear_remove_entries() {
        let cache = MemoryCache::default();
        cache.set("a", "1.0.0").unwrap();
        cache.set("b", "2.0.0").unwrap();

        cache.delete("a");
        assert_eq!(cache.keys(), vec!["b".to_string()]);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn set_overwrites_existing_value() {
        let cache = MemoryCache::default();
        cache.set("npm:react", "18.0.0").unwrap();
        cache.set("npm:react", "18.2.0").unwrap();

        assert_eq!(cache.get("npm:react"), Some("18.2.0".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[rstest]
    #[case(0, DEFAULT_CACHE_TTL_MS as u64)]
    #[case(-5, DEFAULT_CACHE_TTL_MS as u64)]
    #[case(1500, 1500)]
    fn cache_ttl_defaults_non_positive_values(#[case] input: i64, #[case] expected_ms: u64) {
        assert_eq!(cache_ttl(input), Duration::from_millis(expected_ms));
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        let cache = MemoryCache::new(Duration::ZERO);
        assert_eq!(cache.ttl(), cache_ttl(0));
    }
}
