use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use super::message::{encode_headers, OutboxMessage, OutboxRow};
use super::store::{OutboxStore, OutboxWriter, StoreError, Transactor};
use crate::health::{HealthCheck, HealthError};

#[derive(Default)]
struct DatabaseState {
    /// table -> key -> value
    tables: HashMap<String, BTreeMap<String, Vec<u8>>>,
    /// Outbox table, ascending by id
    outbox: Vec<OutboxRow>,
    last_outbox_id: u64,
}

enum PendingWrite {
    Put {
        table: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        table: String,
        key: String,
    },
    Outbox {
        topic: String,
        msg_key: String,
        event_type: String,
        payload: Vec<u8>,
        headers: Vec<u8>,
    },
}

/// Writes buffered until [`Transactor::commit`].
///
/// Dropping a transaction without committing discards its writes.
#[derive(Default)]
pub struct Transaction {
    writes: Vec<PendingWrite>,
}

impl Transaction {
    /// Insert or replace a row in a business table.
    pub fn put(&mut self, table: impl Into<String>, key: impl Into<String>, value: Vec<u8>) {
        self.writes.push(PendingWrite::Put {
            table: table.into(),
            key: key.into(),
            value,
        });
    }

    pub fn delete(&mut self, table: impl Into<String>, key: impl Into<String>) {
        self.writes.push(PendingWrite::Delete {
            table: table.into(),
            key: key.into(),
        });
    }

    /// Number of outbox rows staged in this transaction.
    pub fn staged_outbox_rows(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| matches!(w, PendingWrite::Outbox { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// In-memory transactional store holding business tables and the outbox table.
///
/// Cloning creates another handle to the same storage (thread-safe via
/// `Arc<RwLock<...>>`). A transaction's writes become visible together at
/// commit; outbox ids are assigned then, so id order is commit order.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<DatabaseState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the database becoming (un)reachable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Read a committed business row.
    pub fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_available()?;
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    /// Snapshot of the whole outbox table.
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.outbox.clone()
    }

    pub fn outbox_row(&self, id: u64) -> Option<OutboxRow> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        find_row(&state.outbox, id).map(|idx| state.outbox[idx].clone())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory database unavailable".into()))
        } else {
            Ok(())
        }
    }
}

fn find_row(outbox: &[OutboxRow], id: u64) -> Option<usize> {
    outbox.binary_search_by_key(&id, |row| row.id).ok()
}

impl Transactor for InMemoryDatabase {
    type Tx = Transaction;

    fn begin(&self) -> Result<Transaction, StoreError> {
        self.ensure_available()?;
        Ok(Transaction::default())
    }

    fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        for write in tx.writes {
            match write {
                PendingWrite::Put { table, key, value } => {
                    state.tables.entry(table).or_default().insert(key, value);
                }
                PendingWrite::Delete { table, key } => {
                    if let Some(rows) = state.tables.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
                PendingWrite::Outbox {
                    topic,
                    msg_key,
                    event_type,
                    payload,
                    headers,
                } => {
                    state.last_outbox_id += 1;
                    let id = state.last_outbox_id;
                    state.outbox.push(OutboxRow {
                        id,
                        topic,
                        msg_key,
                        event_type,
                        payload,
                        headers,
                        sent_at: None,
                    });
                }
            }
        }

        Ok(())
    }

    fn rollback(&self, tx: Transaction) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }
}

impl OutboxWriter for InMemoryDatabase {
    type Tx = Transaction;

    fn add(&self, tx: &mut Transaction, message: &OutboxMessage) -> Result<(), StoreError> {
        self.ensure_available()?;
        if message.topic.is_empty() {
            return Err(StoreError::Constraint("outbox.topic must not be empty".into()));
        }

        tx.writes.push(PendingWrite::Outbox {
            topic: message.topic.clone(),
            msg_key: message.key.clone(),
            event_type: message.event_type.clone(),
            payload: message.payload.clone(),
            headers: encode_headers(&message.headers)?,
        });
        Ok(())
    }
}

impl OutboxStore for InMemoryDatabase {
    fn list_unsent(&self, limit: usize) -> Result<Vec<OutboxRow>, StoreError> {
        self.ensure_available()?;
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;

        Ok(state
            .outbox
            .iter()
            .filter(|row| row.sent_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_sent(&self, id: u64) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;

        let Some(idx) = find_row(&state.outbox, id) else {
            return Ok(false);
        };
        let row = &mut state.outbox[idx];
        if row.sent_at.is_some() {
            return Ok(false);
        }
        row.sent_at = Some(SystemTime::now());
        Ok(true)
    }
}

impl HealthCheck for InMemoryDatabase {
    fn name(&self) -> &'static str {
        "database"
    }

    fn check(&self) -> Result<(), HealthError> {
        self.ensure_available()
            .map_err(|err| HealthError::unavailable(self.name(), err))
    }
}
