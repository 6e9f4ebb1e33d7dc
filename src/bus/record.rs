//! Records that travel over the broker, and where they live once they land.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// String headers carried alongside a record.
///
/// Headers are a map: inserting a key that is already present replaces the
/// old value, so a record never carries two `retry` headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert or replace a header, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A record to be published to a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Destination topic
    pub topic: String,
    /// Partition-routing key
    pub key: Vec<u8>,
    /// Opaque payload bytes (typically JSON)
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl Record {
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Headers::new(),
        }
    }

    /// Add or replace a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Transport coordinate of a delivered record.
///
/// Two deliveries of the same logical message at different offsets are
/// different coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Coordinate {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.topic, self.partition, self.offset)
    }
}

/// A record as fetched by a consumer, together with its coordinate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub coordinate: Coordinate,
    pub record: Record,
}

impl ConsumedRecord {
    pub fn topic(&self) -> &str {
        &self.coordinate.topic
    }

    pub fn headers(&self) -> &Headers {
        &self.record.headers
    }

    pub fn payload(&self) -> &[u8] {
        &self.record.payload
    }
}

/// Broker acknowledgment of a published record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}
