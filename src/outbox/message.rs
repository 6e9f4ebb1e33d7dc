use std::time::SystemTime;

use serde::Serialize;

use crate::bus::{Headers, Record};
use crate::event::DomainEvent;

/// A message staged by a domain service, not yet persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutboxMessage {
    pub topic: String,
    /// Partition-routing key (`msg_key` column)
    pub key: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    /// Propagated to the broker as record headers (request ids, trace context, ...)
    pub headers: Headers,
}

impl OutboxMessage {
    /// Create a new outbox message with a raw bytes payload.
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            event_type: event_type.into(),
            payload,
            headers: Headers::new(),
        }
    }

    /// Create an outbox message with a JSON-serialized payload.
    pub fn encode<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(topic, key, event_type, bytes))
    }

    /// Stage a [`DomainEvent`]: key and type come from the event, the payload
    /// is the event's JSON encoding.
    pub fn from_event(topic: impl Into<String>, event: &DomainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            topic,
            event.key.clone(),
            event.event_type.clone(),
            event.encode()?,
        ))
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }
}

/// A persisted outbox row.
///
/// `sent_at` is `None` until a publish for this row was acknowledged, and is
/// never cleared afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRow {
    /// Monotonically increasing; defines FIFO staging order
    pub id: u64,
    pub topic: String,
    pub msg_key: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    /// JSON-encoded header map
    pub headers: Vec<u8>,
    pub sent_at: Option<SystemTime>,
}

impl OutboxRow {
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// Decode the header column. An empty column or a JSON `null` is an empty map.
    pub fn decode_headers(&self) -> Result<Headers, serde_json::Error> {
        if self.headers.is_empty() {
            return Ok(Headers::new());
        }
        let headers: Option<Headers> = serde_json::from_slice(&self.headers)?;
        Ok(headers.unwrap_or_default())
    }

    /// The broker record for this row, with the given headers.
    pub fn to_record(&self, headers: Headers) -> Record {
        Record::new(self.topic.as_str(), self.msg_key.as_bytes(), self.payload.clone())
            .with_headers(headers)
    }
}

pub(crate) fn encode_headers(headers: &Headers) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(headers)
}
