//! Per-key exclusive access to materialized state.
//!
//! Every variant, coupon and order has its own slot. A writer holds the slot's
//! mutex for the whole read-check-append-apply cycle, so two writers on the
//! same key never interleave. Acquisition is bounded by a timeout; multi-key
//! acquisition always proceeds in ascending key order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::DomainError;

pub type SlotGuard<V> = OwnedMutexGuard<V>;

#[derive(Debug)]
pub enum LockError<K> {
    Missing(K),
    Timeout { resource: String },
}

impl<K> LockError<K> {
    /// Converts into a domain error, using `missing` for unknown keys.
    pub fn or_missing(self, missing: impl FnOnce(K) -> DomainError) -> DomainError {
        match self {
            LockError::Missing(key) => missing(key),
            LockError::Timeout { resource } => DomainError::ConcurrencyTimeout { resource },
        }
    }
}

pub struct KeyedLocks<K, V> {
    resource: &'static str,
    slots: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> KeyedLocks<K, V>
where
    K: Eq + Hash + Ord + Clone + std::fmt::Display,
    V: Send + 'static,
{
    /// `resource` names the key space in errors and metrics (`"variant"`, ...).
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// Inserts a slot unless one exists. Returns `false` if the key was taken.
    pub async fn insert(&self, key: K, value: V) -> bool {
        let mut slots = self.slots.write().await;
        if slots.contains_key(&key) {
            return false;
        }
        slots.insert(key, Arc::new(Mutex::new(value)));
        true
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.slots.read().await.contains_key(key)
    }

    /// All keys in ascending order.
    pub async fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.slots.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Replaces every slot, used when rebuilding state from the journal.
    pub async fn replace_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let mut slots = self.slots.write().await;
        slots.clear();
        for (key, value) in entries {
            slots.insert(key, Arc::new(Mutex::new(value)));
        }
    }

    pub async fn lock(&self, key: &K, timeout: Duration) -> Result<SlotGuard<V>, LockError<K>> {
        let slot = self
            .slots
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| LockError::Missing(key.clone()))?;

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                let resource = format!("{}-{}", self.resource, key);
                metrics::counter!("lock_timeouts_total", "resource" => self.resource).increment(1);
                tracing::warn!(%resource, timeout_ms = timeout.as_millis() as u64, "lock wait timed out");
                Err(LockError::Timeout { resource })
            }
        }
    }

    /// Locks every key in ascending order. Duplicate keys are locked once.
    ///
    /// On failure every guard acquired so far is released.
    pub async fn lock_many(
        &self,
        keys: impl IntoIterator<Item = K>,
        timeout: Duration,
    ) -> Result<BTreeMap<K, SlotGuard<V>>, LockError<K>> {
        let ordered: BTreeSet<K> = keys.into_iter().collect();
        let mut guards = BTreeMap::new();
        for key in ordered {
            let guard = self.lock(&key, timeout).await?;
            guards.insert(key, guard);
        }
        Ok(guards)
    }
}

impl<K, V> KeyedLocks<K, V>
where
    K: Eq + Hash + Ord + Clone + std::fmt::Display,
    V: Clone + Send + 'static,
{
    /// Clones every slot's value in key order, locking each briefly.
    pub async fn read_all(&self, timeout: Duration) -> Result<Vec<(K, V)>, LockError<K>> {
        let mut out = Vec::new();
        for key in self.keys().await {
            let guard = self.lock(&key, timeout).await?;
            out.push((key, guard.clone()));
        }
        Ok(out)
    }

    pub async fn read(&self, key: &K, timeout: Duration) -> Result<V, LockError<K>> {
        Ok(self.lock(key, timeout).await?.clone())
    }
}
