//! Idempotency guard - "have I already processed this delivery?"
//!
//! Keys are transport coordinates (`{topic}:{partition}:{offset}`), not
//! payload content. A verbatim redelivery of the same coordinate is caught;
//! a requeued copy of a message lives at a new offset and is not.
//!
//! Markers expire after their TTL. A redelivery arriving after that is
//! treated as new.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bus::Coordinate;
use crate::kv::{KeyValueStore, KvError};

/// Default dedup window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Prefix added to every key in the backing store.
pub const KEY_PREFIX: &str = "inbox:";

/// The guard key for a delivery coordinate.
pub fn idempotency_key(coordinate: &Coordinate) -> String {
    coordinate.to_string()
}

/// Result of [`IdempotencyGuard::try_mark_processed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key was absent and is now marked; go ahead.
    FirstSeen,
    /// The key was already marked; skip.
    Duplicate,
}

impl Admission {
    pub fn is_first(self) -> bool {
        matches!(self, Admission::FirstSeen)
    }
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn KeyValueStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Atomically mark `key` as processed for `ttl`.
    pub fn try_mark_processed(&self, key: &str, ttl: Duration) -> Result<Admission, KvError> {
        let inserted = self
            .store
            .set_if_absent(&storage_key(key), b"1".to_vec(), Some(ttl))?;

        if inserted {
            Ok(Admission::FirstSeen)
        } else {
            debug!(key, "idempotency_duplicate");
            Ok(Admission::Duplicate)
        }
    }

    /// Forget `key`, so the next delivery of it is admitted again.
    ///
    /// Only for deliveries whose outcome never left the process.
    pub fn release(&self, key: &str) -> Result<(), KvError> {
        self.store.delete(&storage_key(key))?;
        Ok(())
    }
}

fn storage_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}
