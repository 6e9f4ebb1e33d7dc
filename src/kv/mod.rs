//! Key-value capability with per-key expiry.
//!
//! The consumer only needs one atomic primitive from its cache,
//! [`KeyValueStore::set_if_absent`]; the rest of the trait mirrors what a
//! Redis-style client exposes so other adapters can slot in.

mod in_memory;

use std::sync::Arc;
use std::time::Duration;

pub use in_memory::InMemoryKeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Insert or replace. `ttl = None` never expires.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Returns whether a live key was removed.
    fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Atomically insert `key` only if it is absent (or expired).
    /// Returns `true` when this call inserted it.
    fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<bool, KvError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool, KvError> {
        (**self).delete(key)
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        (**self).set_if_absent(key, value, ttl)
    }
}
