//! Search result cache keyed by filter, schema and attribute set

use crate::metrics::names;
use dirauth_core::config::{CacheConfig, CachePolicy};
use dirauth_core::types::{Schema, SearchScope};
use dirauth_core::Result;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identifies one cached search.
///
/// The requested attribute set is part of the key, so a result fetched for
/// a narrow attribute list is never served to a wider request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    filter: String,
    schema: Schema,
    attributes: String,
    base: Option<(String, SearchScope)>,
}

impl CacheKey {
    pub fn new(filter: &str, schema: &Schema, attributes: &[String]) -> Self {
        let mut attrs: Vec<String> = attributes.iter().map(|a| a.to_lowercase()).collect();
        attrs.sort();
        attrs.dedup();
        Self {
            filter: filter.to_string(),
            schema: schema.clone(),
            attributes: attrs.join(","),
            base: None,
        }
    }

    /// Narrow the key to one search base
    pub fn within(mut self, base: &str, scope: SearchScope) -> Self {
        self.base = Some((base.to_lowercase(), scope));
        self
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }
}

struct Cached<V> {
    value: V,
    inserted: Instant,
    accessed: Instant,
}

/// Time-bounded cache in front of directory searches.
///
/// Producers run outside the lock; concurrent misses on one key may each
/// run their producer, the last write wins.
pub struct EntryCache<V> {
    policy: CachePolicy,
    duration: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, Cached<V>>>,
}

impl<V: Clone> EntryCache<V> {
    pub fn new(policy: CachePolicy, duration: Duration, capacity: usize) -> Self {
        Self {
            policy,
            duration,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.policy, config.duration(), config.max_entries)
    }

    pub fn disabled() -> Self {
        Self::new(CachePolicy::None, Duration::ZERO, 1)
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Cached value for `key`, or the producer's result (stored on success)
    pub async fn get_or_add<F, Fut>(&self, key: CacheKey, produce: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if self.policy == CachePolicy::None {
            return produce().await;
        }

        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = produce().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if self.policy == CachePolicy::None {
            return None;
        }

        let mut entries = self.entries.lock();
        let now = Instant::now();

        let expired = match entries.get(key) {
            None => {
                counter!(names::CACHE_MISSES_TOTAL).increment(1);
                return None;
            }
            Some(cached) => self.is_expired(cached, now),
        };

        if expired {
            trace!("Cache entry for {} expired", key.filter);
            entries.remove(key);
            counter!(names::CACHE_MISSES_TOTAL).increment(1);
            return None;
        }

        let cached = entries.get_mut(key)?;
        cached.accessed = now;
        counter!(names::CACHE_HITS_TOTAL).increment(1);
        Some(cached.value.clone())
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        if self.policy == CachePolicy::None {
            return;
        }

        let mut entries = self.entries.lock();
        let now = Instant::now();

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.retain(|_, cached| !self.is_expired(cached, now));
        }
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, cached)| cached.accessed)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting cache entry for {}", oldest.filter);
                entries.remove(&oldest);
                counter!(names::CACHE_EVICTIONS_TOTAL).increment(1);
            }
        }

        entries.insert(
            key,
            Cached {
                value,
                inserted: now,
                accessed: now,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, cached: &Cached<V>, now: Instant) -> bool {
        let since = match self.policy {
            CachePolicy::SlidingExpiration => cached.accessed,
            _ => cached.inserted,
        };
        now >= since + self.duration
    }
}
