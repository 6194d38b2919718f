//! Best-effort key/value cache
//!
//! Cache failures never fail an operation: the JSON helpers log and fall
//! back to "miss". [`MemoryCache`] is a capacity-bounded LRU with per-entry
//! TTL and a synchronous eviction hook.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Read and decode a JSON value; any failure reads as a miss
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Encode and store a JSON value; failures are logged and dropped
pub async fn set_json<T: Serialize + ?Sized>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache value not serializable");
            return;
        }
    };
    if let Err(e) = cache.set(key, raw, ttl).await {
        tracing::warn!(key = %key, error = %e, "Cache write failed");
    }
}

/// Delete a key; failures are logged and dropped
pub async fn invalidate(cache: &dyn Cache, key: &str) {
    if let Err(e) = cache.delete(key).await {
        tracing::warn!(key = %key, error = %e, "Cache delete failed");
    }
}

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Capacity,
    Expired,
}

pub type EvictionHook = Box<dyn Fn(&str, EvictionReason) + Send + Sync>;

struct Entry {
    value: String,
    /// `None` when the TTL runs past what `Instant` can hold
    expires_at: Option<Instant>,
    tick: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, Entry>,
    /// Access order: oldest tick first
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruState {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// In-memory LRU cache with TTL
pub struct MemoryCache {
    capacity: usize,
    state: Mutex<LruState>,
    on_evict: Option<EvictionHook>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
            on_evict: None,
        }
    }

    /// Install a hook called (outside the lock) for each evicted key
    pub fn with_eviction_hook(mut self, hook: EvictionHook) -> Self {
        self.on_evict = Some(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut state = self.lock();
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys
        };
        for key in &expired {
            self.notify(key, EvictionReason::Expired);
        }
        expired.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, key: &str, reason: EvictionReason) {
        if let Some(hook) = &self.on_evict {
            hook(key, reason);
        }
    }

    fn get_sync(&self, key: &str) -> Option<String> {
        let mut expired = false;
        let value = {
            let mut state = self.lock();
            let lookup = state
                .entries
                .get(key)
                .map(|e| (e.is_expired(Instant::now()), e.value.clone()));
            match lookup {
                Some((true, _)) => {
                    state.remove(key);
                    expired = true;
                    None
                }
                Some((false, value)) => {
                    state.touch(key);
                    Some(value)
                }
                None => None,
            }
        };
        if expired {
            self.notify(key, EvictionReason::Expired);
        }
        value
    }

    fn set_sync(&self, key: &str, value: String, ttl: Duration) {
        let evicted: Vec<String> = {
            let mut state = self.lock();
            state.remove(key);
            let tick = state.next_tick;
            state.next_tick += 1;
            state.entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: Instant::now().checked_add(ttl),
                    tick,
                },
            );
            state.order.insert(tick, key.to_string());

            let mut evicted = Vec::new();
            while state.entries.len() > self.capacity {
                match state.pop_oldest() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
            evicted
        };
        for key in &evicted {
            self.notify(key, EvictionReason::Capacity);
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.get_sync(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.set_sync(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock().remove(key);
        Ok(())
    }
}
