use std::sync::Arc;

use tracing::warn;

use super::message::{OutboxMessage, OutboxRow};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

/// Begin / commit / rollback over a transactional store.
///
/// The transaction is an explicit value handed to every participant as
/// `&mut Self::Tx`; nothing is stashed in thread-locals.
pub trait Transactor: Send + Sync {
    type Tx;

    fn begin(&self) -> Result<Self::Tx, StoreError>;

    fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Run `f` inside a transaction: commit when it returns `Ok`, roll back
    /// when it returns `Err`.
    ///
    /// ## Example
    ///
    /// ```ignore
    /// db.within_tx(|tx| {
    ///     tx.put("users", &user.id, user_json);
    ///     db.add(tx, &OutboxMessage::from_event("user.events", &created)?)?;
    ///     Ok(())
    /// })?;
    /// ```
    fn within_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                self.commit(tx)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback(tx) {
                    warn!(error = %rollback_err, "rollback_error");
                }
                Err(err)
            }
        }
    }
}

/// Write side of the outbox, used by domain services.
pub trait OutboxWriter {
    type Tx;

    /// Stage `message` in `tx`, next to the business write it describes.
    ///
    /// Never commits or rolls back. When this fails the caller is expected to
    /// roll back, discarding the business write with it.
    fn add(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<(), StoreError>;
}

/// Read / mark side of the outbox, used by the dispatcher.
pub trait OutboxStore: Send + Sync {
    /// The oldest `limit` rows with `sent_at == None`, ascending by id.
    ///
    /// No lease is taken: two concurrent readers see the same rows.
    fn list_unsent(&self, limit: usize) -> Result<Vec<OutboxRow>, StoreError>;

    /// Set `sent_at` if it is still `None`. Returns whether this call set it.
    fn mark_sent(&self, id: u64) -> Result<bool, StoreError>;
}

impl<S: OutboxStore + ?Sized> OutboxStore for Arc<S> {
    fn list_unsent(&self, limit: usize) -> Result<Vec<OutboxRow>, StoreError> {
        (**self).list_unsent(limit)
    }

    fn mark_sent(&self, id: u64) -> Result<bool, StoreError> {
        (**self).mark_sent(id)
    }
}
