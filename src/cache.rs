//! Short-lived metric cache
//!
//! Entries are keyed by `(host, credential, kind)` and are valid while
//! `now - captured_at < ttl`. Access to a key is serialized through
//! [`KeyedMutex`], so a slow collection holding a slot makes concurrent callers
//! for the same key wait and then observe the fresh entry instead of polling
//! the device a second time.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::EquipmentKind;
use crate::keyed::KeyedMutex;

/// What a cached value describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    ServerMetrics,
    SwitchInterfaces,
    Topology,
    /// Whole-device result at the poller level
    Device(EquipmentKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub host: String,
    pub credential: String,
    pub kind: CacheKind,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, credential: impl Into<String>, kind: CacheKind) -> Self {
        Self {
            host: host.into(),
            credential: credential.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub captured_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_valid(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

pub struct MetricCache<V> {
    ttl: Duration,
    entries: KeyedMutex<CacheKey, Option<CacheEntry<V>>>,
}

impl<V: Clone> MetricCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: KeyedMutex::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        let slot = self.entries.lock(key).await;
        slot.as_ref()
            .filter(|entry| entry.is_valid(Instant::now(), self.ttl))
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: &CacheKey, value: V) {
        let mut slot = self.entries.lock(key).await;
        *slot = Some(CacheEntry {
            value,
            captured_at: Instant::now(),
        });
    }

    /// Return the fresh value for `key` or compute, store and return a new one
    ///
    /// The key stays locked while `compute` runs. Errors are returned as-is and
    /// leave the slot untouched.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &CacheKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut slot = self.entries.lock(key).await;

        let now = Instant::now();
        if let Some(entry) = slot.as_ref().filter(|entry| entry.is_valid(now, self.ttl)) {
            trace!(host = %key.host, kind = ?key.kind, "cache hit");
            return Ok(entry.value.clone());
        }

        let value = compute().await?;
        *slot = Some(CacheEntry {
            value: value.clone(),
            captured_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop expired entries; returns how many slots remain
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries
            .retain(|_, slot| slot.as_ref().is_some_and(|entry| entry.is_valid(now, ttl)));
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
