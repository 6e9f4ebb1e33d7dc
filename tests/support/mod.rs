//! Shared fixtures: a user service that stages events, an audit handler
//! that consumes them, and a publisher that fails on demand.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use outbox_relay::bus::{Ack, BusError, ConsumedRecord, InMemoryBroker, Publisher, Record};
use outbox_relay::{
    DomainEvent, EventHandler, HandlerError, InMemoryDatabase, OutboxMessage, OutboxWriter,
    StoreError, Transactor,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const USER_TOPIC: &str = "user.events";
pub const DLQ_TOPIC: &str = "user.events.dlq";
pub const GROUP: &str = "user-events-consumer";

/// Poll `done` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

// =============================================================================
// Publisher with failure injection
// =============================================================================

/// Forwards to an [`InMemoryBroker`] unless told to fail.
#[derive(Clone)]
pub struct FlakyPublisher {
    inner: InMemoryBroker,
    failing_keys: Arc<Mutex<HashSet<String>>>,
    failing_topics: Arc<Mutex<HashSet<String>>>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyPublisher {
    pub fn new(inner: InMemoryBroker) -> Self {
        Self {
            inner,
            failing_keys: Arc::default(),
            failing_topics: Arc::default(),
            attempts: Arc::default(),
        }
    }

    /// Reject every record routed by `key`.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    /// Reject every record for `topic`.
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn heal(&self) {
        self.failing_keys.lock().unwrap().clear();
        self.failing_topics.lock().unwrap().clear();
    }

    /// Publish calls seen so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Publisher for FlakyPublisher {
    fn publish(&self, record: Record) -> Result<Ack, BusError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let key = String::from_utf8_lossy(&record.key).into_owned();
        if self.failing_keys.lock().unwrap().contains(&key) {
            return Err(BusError::Rejected(format!("key {key} rejected")));
        }
        if self.failing_topics.lock().unwrap().contains(&record.topic) {
            return Err(BusError::Timeout);
        }
        self.inner.publish(record)
    }
}

// =============================================================================
// Producing side: user service
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("name and email are required")]
    InvalidInput,
    #[error("email already registered")]
    EmailExists,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Creates users and stages a `UserCreated` event in the same transaction.
pub struct UserService {
    db: InMemoryDatabase,
    topic: String,
    next_id: AtomicU64,
    /// Makes the outbox insert fail, to exercise rollback.
    pub break_outbox: AtomicBool,
}

impl UserService {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self {
            db,
            topic: USER_TOPIC.to_string(),
            next_id: AtomicU64::new(1),
            break_outbox: AtomicBool::new(false),
        }
    }

    pub fn create(&self, name: &str, email: &str, request_id: &str) -> Result<User, UserError> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() || email.is_empty() {
            return Err(UserError::InvalidInput);
        }
        if self.db.get("users_by_email", &email)?.is_some() {
            return Err(UserError::EmailExists);
        }

        let user = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            email,
        };
        let topic = if self.break_outbox.load(Ordering::SeqCst) {
            ""
        } else {
            self.topic.as_str()
        };

        self.db.within_tx(|tx| {
            tx.put("users", user.id.to_string(), serde_json::to_vec(&user)?);
            tx.put("users_by_email", user.email.clone(), user.id.to_string().into_bytes());

            let event = DomainEvent::new(
                "UserCreated",
                user.id.to_string(),
                json!({"id": user.id, "name": user.name, "email": user.email}),
            );
            let message =
                OutboxMessage::from_event(topic, &event)?.with_header("request_id", request_id);
            self.db.add(tx, &message)?;
            Ok::<_, UserError>(())
        })?;

        Ok(user)
    }

    pub fn get(&self, id: u64) -> Result<Option<User>, UserError> {
        match self.db.get("users", &id.to_string())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Consuming side: audit handler
// =============================================================================

/// Writes an audit row per `UserCreated` event; ignores other event types.
pub struct AuditHandler {
    db: InMemoryDatabase,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
    delivered: Mutex<Vec<String>>,
}

impl AuditHandler {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self {
            db,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            always_fail: AtomicBool::new(false),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Coordinates handled successfully, in order.
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn audit_row(&self, event_key: &str) -> Option<serde_json::Value> {
        self.db
            .get("audit_logs", event_key)
            .unwrap()
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }

    fn should_fail(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl EventHandler for AuditHandler {
    type Event = DomainEvent;

    fn handle(&self, event: DomainEvent, record: &ConsumedRecord) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(HandlerError::failed("audit insert failed"));
        }
        if event.event_type != "UserCreated" {
            return Ok(());
        }

        self.db
            .within_tx(|tx| {
                tx.put(
                    "audit_logs",
                    event.key.clone(),
                    serde_json::to_vec(&json!({
                        "event_type": event.event_type,
                        "event_key": event.key,
                        "payload": event.payload,
                    }))?,
                );
                Ok::<_, StoreError>(())
            })
            .map_err(|err| HandlerError::Other(Box::new(err)))?;

        self.delivered
            .lock()
            .unwrap()
            .push(record.coordinate.to_string());
        Ok(())
    }
}
