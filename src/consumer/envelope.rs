//! Retry envelope: the headers the consumer reads and writes on the wire.

use std::fmt;

use crate::bus::{ConsumedRecord, Headers, Record};

/// Attempt counter, decimal text. Absent means 0.
pub const RETRY_HEADER: &str = "retry";

/// Reason code, present only on dead-lettered records.
pub const DLQ_REASON_HEADER: &str = "dlq_reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// The payload could not be decoded. Never retried.
    UnmarshalError,
    /// The handler kept failing until the retry budget ran out.
    MaxRetriesExceeded,
}

impl DeadLetterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadLetterReason::UnmarshalError => "unmarshal_error",
            DeadLetterReason::MaxRetriesExceeded => "max_retries_exceeded",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The attempt counter in `headers`. Absent or unparsable is 0.
pub fn retry_count(headers: &Headers) -> u32 {
    headers
        .get(RETRY_HEADER)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Copy of `record` for its original topic with `retry` set to `retry`.
pub fn requeue_record(record: &ConsumedRecord, retry: u32) -> Record {
    let mut out = Record::new(
        record.topic(),
        record.record.key.clone(),
        record.record.payload.clone(),
    )
    .with_headers(record.headers().clone());
    out.headers.insert(RETRY_HEADER, retry.to_string());
    out
}

/// Copy of `record` for `dlq_topic`, tagged with the reason and the retry
/// count it failed at.
pub fn dead_letter_record(
    record: &ConsumedRecord,
    dlq_topic: &str,
    reason: DeadLetterReason,
    retry: u32,
) -> Record {
    let mut out = Record::new(dlq_topic, record.record.key.clone(), record.record.payload.clone())
        .with_headers(record.headers().clone());
    out.headers.insert(DLQ_REASON_HEADER, reason.as_str());
    out.headers.insert(RETRY_HEADER, retry.to_string());
    out
}
