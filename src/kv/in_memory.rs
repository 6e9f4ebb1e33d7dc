use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::{KeyValueStore, KvError};
use crate::health::{HealthCheck, HealthError};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    /// A TTL too large to represent as an instant never expires.
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory expiring map.
///
/// Expired entries behave as absent immediately and are dropped the next
/// time their key is written, or by [`purge_expired`](Self::purge_expired).
/// Cloning creates another handle to the same map.
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache becoming (un)reachable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), KvError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(KvError::Unavailable("in-memory cache unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.ensure_available()?;
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::LockPoisoned("get"))?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
        self.ensure_available()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::LockPoisoned("set"))?;
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, KvError> {
        self.ensure_available()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::LockPoisoned("delete"))?;
        let now = Instant::now();
        Ok(entries
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        self.ensure_available()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::LockPoisoned("set_if_absent"))?;

        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(true)
    }
}

impl HealthCheck for InMemoryKeyValueStore {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn check(&self) -> Result<(), HealthError> {
        self.ensure_available()
            .map_err(|err| HealthError::unavailable(self.name(), err))
    }
}
