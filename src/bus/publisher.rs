//! Core publisher trait for the broker.

use std::error::Error;
use std::sync::Arc;

use super::record::{Ack, Record};

/// Error type for broker operations (publish, fetch, commit).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The broker rejected the request
    #[error("rejected: {0}")]
    Rejected(String),
    /// Timeout waiting for acknowledgment
    #[error("timed out waiting for broker")]
    Timeout,
    /// Commit or fetch on a topic the consumer is not subscribed to
    #[error("not subscribed to topic {0}")]
    NotSubscribed(String),
    #[error("broker lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("broker error: {0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

/// Trait for publishing records to a partitioned log.
///
/// `publish` is synchronous: it returns only once the broker has acknowledged
/// the record (or failed to). Callers treat `Ok` as "durably appended".
///
/// One instance is shared between the outbox dispatcher and the consumer's
/// requeue / dead-letter paths, so implementations must tolerate concurrent
/// calls from several threads.
///
/// Implementations might include:
/// - `InMemoryBroker` - For testing and single-process scenarios
/// - A Kafka producer with `acks=all`
pub trait Publisher: Send + Sync {
    /// Publish a single record and wait for the acknowledgment.
    fn publish(&self, record: Record) -> Result<Ack, BusError>;

    /// Publish multiple records.
    ///
    /// Default implementation publishes sequentially and stops at the first
    /// failure; acks for the records already published are discarded.
    fn publish_batch(&self, records: Vec<Record>) -> Result<Vec<Ack>, BusError> {
        let mut acks = Vec::with_capacity(records.len());
        for record in records {
            acks.push(self.publish(record)?);
        }
        Ok(acks)
    }
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, record: Record) -> Result<Ack, BusError> {
        (**self).publish(record)
    }

    fn publish_batch(&self, records: Vec<Record>) -> Result<Vec<Ack>, BusError> {
        (**self).publish_batch(records)
    }
}
