//! Outbox - transactional staging of outgoing messages.
//!
//! A domain service writes its business rows and an [`OutboxMessage`] in the
//! same transaction. Either both are committed or neither is; publication
//! happens later, from the committed row, in the [`dispatcher`](crate::dispatcher).
//!
//! ```ignore
//! db.within_tx(|tx| {
//!     tx.put("users", &user.id, serde_json::to_vec(&user)?);
//!     db.add(tx, &OutboxMessage::from_event("user.events", &created)?)?;
//!     Ok(())
//! })?;
//! ```
//!
//! Rows are never deleted here; retention is someone else's job.

mod database;
mod message;
mod store;

pub use database::{InMemoryDatabase, Transaction};
pub use message::{OutboxMessage, OutboxRow};
pub use store::{OutboxStore, OutboxWriter, StoreError, Transactor};
