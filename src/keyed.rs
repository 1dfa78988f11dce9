//! Per-key async locks
//!
//! Concurrent pollers may touch the same host at once (two equipment entries
//! with the same address, or an on-demand check racing the scheduled poll).
//! [`KeyedMutex`] hands out one `tokio::sync::Mutex` per key so that work on a
//! given key is serialized while different keys proceed in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

pub struct KeyedMutex<K, V> {
    slots: Mutex<HashMap<K, Arc<tokio::sync::Mutex<V>>>>,
}

impl<K, V> Default for KeyedMutex<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedMutex<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the slot for `key`, creating it with `V::default()` on first use
    ///
    /// The guard is owned so it can be held across `.await` points.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Drop every slot for which `keep` returns false
    ///
    /// Slots that are currently locked are always kept.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|key, slot| match slot.try_lock() {
            Ok(value) => keep(key, &value),
            Err(_) => true,
        });
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
