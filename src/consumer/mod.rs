//! Consumer - dedup, handle, retry, dead-letter.
//!
//! Per fetched record:
//!
//! ```text
//! Received ──guard──► Duplicate ─────────────────────────────► commit
//!     │
//!     └──► New ──decode──✗──────────────► DLQ(unmarshal_error) ► commit
//!                  │
//!                  ✓──handle──✓──────────────────────────────► commit
//!                             │
//!                             ✗── retry+1 <  max ► requeue(retry+1) ► commit
//!                             └── retry+1 >= max ► DLQ(max_retries_exceeded) ► commit
//! ```
//!
//! A requeued copy is a new record at a new offset; the idempotency guard
//! does not link it to the original delivery. Decode failures skip the
//! retry budget entirely since retrying cannot fix the payload.

mod envelope;
mod event_consumer;
mod handler;
mod thread;

pub use envelope::{
    dead_letter_record, requeue_record, retry_count, DeadLetterReason, DLQ_REASON_HEADER,
    RETRY_HEADER,
};
pub use event_consumer::{BatchSummary, ConsumeError, ConsumerConfig, EventConsumer, RecordOutcome};
pub use handler::{EventHandler, HandlerError};
pub use thread::{ConsumerStats, ConsumerThread};
