//! Process-local [`CacheBackend`] with TTL support.
//!
//! Useful for single-process deployments and as the shared cache in tests.
//! `set_offline(true)` makes every primitive fail, which is how outages are
//! simulated.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    /// member -> score
    ZSet(BTreeMap<String, u64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
    pings: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            offline: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
        }
    }

    /// Simulate the cache going down (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Number of pings received so far.
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> CacheResult<()> {
        if self.is_offline() {
            Err(CacheError::Unavailable("memory cache is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Locks the map after dropping `key` if it has expired.
    fn live_entries(&self, key: &str) -> (MutexGuard<'_, HashMap<String, Entry>>, u64) {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        (entries, now)
    }

    fn expiry(now: u64, ttl: Duration) -> u64 {
        now.saturating_add(ttl.as_millis() as u64)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn ping(&self) -> CacheResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check_online()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_online()?;
        let (entries, _) = self.live_entries(key);
        match entries.get(key).map(|e| &e.value) {
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::ZSet(_)) => Err(CacheError::Protocol(format!(
                "key '{}' holds a sorted set",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.check_online()?;
        let (mut entries, now) = self.live_entries(key);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Self::expiry(now, t)),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_online()?;
        let (mut entries, now) = self.live_entries(key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Self::expiry(now, ttl)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check_online()?;
        let (mut entries, _) = self.live_entries(key);
        Ok(entries.remove(key).is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.check_online()?;
        let (mut entries, _) = self.live_entries(key);
        let matches = matches!(
            entries.get(key).map(|e| &e.value),
            Some(Value::Str(current)) if current == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check_online()?;
        let pattern = glob::Pattern::new(pattern).map_err(|e| {
            CacheError::Protocol(format!("invalid scan pattern {:?}: {}", pattern, e))
        })?;
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_online()?;
        let (mut entries, now) = self.live_entries(key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Self::expiry(now, ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: u64) -> CacheResult<()> {
        self.check_online()?;
        let (mut entries, _) = self.live_entries(key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::ZSet(BTreeMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::ZSet(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            Value::Str(_) => Err(CacheError::Protocol(format!(
                "key '{}' does not hold a sorted set",
                key
            ))),
        }
    }

    async fn zremrange_by_score(&self, key: &str, min: u64, max: u64) -> CacheResult<usize> {
        self.check_online()?;
        let (mut entries, _) = self.live_entries(key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::ZSet(set) = &mut entry.value else {
            return Err(CacheError::Protocol(format!(
                "key '{}' does not hold a sorted set",
                key
            )));
        };
        let before = set.len();
        set.retain(|_, score| *score < min || *score > max);
        let removed = before - set.len();
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> CacheResult<usize> {
        self.check_online()?;
        let (entries, _) = self.live_entries(key);
        match entries.get(key).map(|e| &e.value) {
            Some(Value::ZSet(set)) => Ok(set.len()),
            Some(Value::Str(_)) => Err(CacheError::Protocol(format!(
                "key '{}' does not hold a sorted set",
                key
            ))),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[tokio::test]
    async fn test_set_if_absent_respects_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = MemoryCache::with_clock(clock.clone());

        assert!(cache.set_if_absent("lock:a", "t1", Duration::from_secs(5)).await.unwrap());
        assert!(!cache.set_if_absent("lock:a", "t2", Duration::from_secs(5)).await.unwrap());

        clock.advance_ms(5_000);
        assert!(cache.set_if_absent("lock:a", "t2", Duration::from_secs(5)).await.unwrap());
        assert_eq!(cache.get("lock:a").await.unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_delete_if_equals_only_matching_token() {
        let cache = MemoryCache::new();
        cache.set("lock:a", "mine", None).await.unwrap();

        assert!(!cache.delete_if_equals("lock:a", "theirs").await.unwrap());
        assert!(cache.delete_if_equals("lock:a", "mine").await.unwrap());
        assert!(cache.get("lock:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_fails_every_primitive() {
        let cache = MemoryCache::new();
        cache.set_offline(true);

        assert!(matches!(cache.ping().await, Err(CacheError::Unavailable(_))));
        assert!(cache.get("k").await.is_err());
        assert!(cache.zcard("k").await.is_err());
    }

    #[tokio::test]
    async fn test_scan_matches_key_patterns() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set("session:abc", "1", None).await.unwrap();
        cache.set("session:a/b", "2", None).await.unwrap();
        cache.set("session:short", "3", Some(Duration::from_secs(1))).await.unwrap();
        cache.set("lock:abc", "t", None).await.unwrap();
        cache.set("lock:abbc", "t", None).await.unwrap();

        assert_eq!(
            cache.scan("session:*").await.unwrap(),
            vec!["session:a/b", "session:abc", "session:short"]
        );
        assert_eq!(cache.scan("lock:a?c").await.unwrap(), vec!["lock:abc"]);
        assert_eq!(cache.scan("*:abc").await.unwrap(), vec!["lock:abc", "session:abc"]);

        clock.advance_ms(1_000);
        assert_eq!(cache.scan("session:*").await.unwrap().len(), 2);

        assert!(matches!(cache.scan("lock:[").await, Err(CacheError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_sorted_set_prune() {
        let cache = MemoryCache::new();
        cache.zadd("z", "a", 10).await.unwrap();
        cache.zadd("z", "b", 20).await.unwrap();
        cache.zadd("z", "c", 30).await.unwrap();

        assert_eq!(cache.zremrange_by_score("z", 0, 20).await.unwrap(), 2);
        assert_eq!(cache.zcard("z").await.unwrap(), 1);
    }
}
