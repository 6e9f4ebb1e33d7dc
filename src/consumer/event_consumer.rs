use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::envelope::{dead_letter_record, requeue_record, retry_count, DeadLetterReason};
use super::handler::EventHandler;
use crate::bus::{BusError, ConsumedRecord, Coordinate, Publisher, Subscriber};
use crate::idempotency::{idempotency_key, IdempotencyGuard, DEFAULT_TTL};
use crate::kv::KvError;
use crate::metrics::{Counter, MetricsRecorder, NoopMetrics};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub dlq_topic: String,
    /// Total attempts per logical message, the first delivery included.
    pub max_retries: u32,
    pub idempotency_ttl: Duration,
    pub fetch_max_records: usize,
    /// Longest a fetch waits for records before returning empty.
    pub fetch_timeout: Duration,
    /// Pause after a failed batch or fetch before polling again.
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            dlq_topic: "user.events.dlq".to_string(),
            max_retries: 3,
            idempotency_ttl: DEFAULT_TTL,
            fetch_max_records: 100,
            fetch_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl ConsumerConfig {
    pub fn new(dlq_topic: impl Into<String>) -> Self {
        Self {
            dlq_topic: dlq_topic.into(),
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn with_fetch_max_records(mut self, max: usize) -> Self {
        self.fetch_max_records = max;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// How a record left the consumer. Every variant has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Coordinate seen before; handler not invoked.
    Deduplicated,
    /// Handler succeeded.
    Committed,
    /// Handler failed; a copy with `retry` was published to the original topic.
    Requeued { retry: u32 },
    /// Published to the dead-letter topic.
    DeadLettered { reason: DeadLetterReason, retry: u32 },
}

/// A record whose offset was left uncommitted. The broker redelivers it.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("idempotency check for {coordinate} failed")]
    Guard {
        coordinate: Coordinate,
        #[source]
        source: KvError,
    },
    #[error("requeue of {coordinate} failed")]
    Requeue {
        coordinate: Coordinate,
        #[source]
        source: BusError,
    },
    #[error("dead-letter publish of {coordinate} failed")]
    DeadLetter {
        coordinate: Coordinate,
        #[source]
        source: BusError,
    },
    #[error("offset commit for {coordinate} failed")]
    Commit {
        coordinate: Coordinate,
        #[source]
        source: BusError,
    },
}

impl ConsumeError {
    pub fn coordinate(&self) -> &Coordinate {
        match self {
            ConsumeError::Guard { coordinate, .. }
            | ConsumeError::Requeue { coordinate, .. }
            | ConsumeError::DeadLetter { coordinate, .. }
            | ConsumeError::Commit { coordinate, .. } => coordinate,
        }
    }
}

/// What one [`EventConsumer::poll_once`] did.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub fetched: usize,
    pub committed: usize,
    pub deduplicated: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Records fetched but not looked at because an earlier one failed.
    pub abandoned: usize,
    /// The error that ended the batch early.
    pub failure: Option<ConsumeError>,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failure.is_none()
    }

    fn count(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Deduplicated => self.deduplicated += 1,
            RecordOutcome::Committed => self.committed += 1,
            RecordOutcome::Requeued { .. } => self.requeued += 1,
            RecordOutcome::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

/// Consumes one subscription: dedup, decode, handle, then commit.
///
/// An offset is committed only after the record's outcome is durable
/// elsewhere: the handler's effect, a requeued copy, or a dead-letter copy.
/// Whenever that cannot be achieved the offset stays uncommitted and the
/// broker redelivers the record.
///
/// Records are processed strictly one at a time. Throughput is bounded by
/// the sum of guard, handler and republish latency per record, and a slow or
/// stuck handler holds back the commit of everything behind it in the batch.
/// If that exceeds the consumer group's liveness budget the broker will
/// rebalance the partition away. Size `fetch_max_records` with this in mind.
pub struct EventConsumer<S, H> {
    subscriber: S,
    handler: H,
    publisher: Arc<dyn Publisher>,
    guard: IdempotencyGuard,
    metrics: Arc<dyn MetricsRecorder>,
    config: ConsumerConfig,
}

impl<S: Subscriber, H: EventHandler> EventConsumer<S, H> {
    pub fn new(
        subscriber: S,
        handler: H,
        publisher: Arc<dyn Publisher>,
        guard: IdempotencyGuard,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            subscriber,
            handler,
            publisher,
            guard,
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Fetch one batch and process it in order.
    ///
    /// Commits are positional, so once a record is left uncommitted nothing
    /// after it in the batch may be committed either. The rest of the batch
    /// is abandoned and the subscriber rewound to its last commit.
    pub fn poll_once(&self) -> Result<BatchSummary, BusError> {
        let batch = self
            .subscriber
            .fetch(self.config.fetch_max_records, self.config.fetch_timeout)
            .map_err(|err| {
                error!(error = %err, "kafka_fetch_error");
                err
            })?;

        let mut summary = BatchSummary {
            fetched: batch.len(),
            ..Default::default()
        };

        for (idx, record) in batch.iter().enumerate() {
            match self.process_record(record) {
                Ok(outcome) => summary.count(&outcome),
                Err(err) => {
                    summary.abandoned = batch.len() - idx - 1;
                    warn!(
                        coordinate = %record.coordinate,
                        abandoned = summary.abandoned,
                        error = %err,
                        "batch_abandoned"
                    );
                    summary.failure = Some(err);
                    self.subscriber.rewind()?;
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Run one record through dedup, decode, handle and the retry policy.
    ///
    /// `Ok` means the offset was committed. `Err` means it was not and the
    /// record must be redelivered.
    pub fn process_record(&self, record: &ConsumedRecord) -> Result<RecordOutcome, ConsumeError> {
        let coordinate = &record.coordinate;
        let key = idempotency_key(coordinate);

        let admission = self
            .guard
            .try_mark_processed(&key, self.config.idempotency_ttl)
            .map_err(|source| {
                error!(coordinate = %coordinate, error = %source, "idem_error");
                self.metrics.increment(Counter::ConsumerFailed, 1);
                ConsumeError::Guard {
                    coordinate: coordinate.clone(),
                    source,
                }
            })?;

        if !admission.is_first() {
            self.commit(record)?;
            info!(coordinate = %coordinate, "duplicate_skipped");
            self.metrics.increment(Counter::ConsumerDuplicate, 1);
            return Ok(RecordOutcome::Deduplicated);
        }

        let retry = retry_count(record.headers());

        let event: H::Event = match serde_json::from_slice(record.payload()) {
            Ok(event) => event,
            Err(err) => {
                error!(coordinate = %coordinate, retry, error = %err, "event_unmarshal_error");
                return self.dead_letter(record, &key, DeadLetterReason::UnmarshalError, retry);
            }
        };

        match self.handler.handle(event, record) {
            Ok(()) => {
                self.commit(record)?;
                debug!(coordinate = %coordinate, retry, "record_processed");
                self.metrics.increment(Counter::ConsumerProcessed, 1);
                Ok(RecordOutcome::Committed)
            }
            Err(err) => {
                warn!(coordinate = %coordinate, retry, error = %err, "handler_error");
                let next = retry.saturating_add(1);
                if next < self.config.max_retries {
                    self.requeue(record, &key, next)
                } else {
                    self.dead_letter(record, &key, DeadLetterReason::MaxRetriesExceeded, retry)
                }
            }
        }
    }

    fn requeue(&self, record: &ConsumedRecord, key: &str, retry: u32) -> Result<RecordOutcome, ConsumeError> {
        if let Err(source) = self.publisher.publish(requeue_record(record, retry)) {
            error!(coordinate = %record.coordinate, retry, error = %source, "requeue_error");
            self.release(key);
            self.metrics.increment(Counter::ConsumerFailed, 1);
            return Err(ConsumeError::Requeue {
                coordinate: record.coordinate.clone(),
                source,
            });
        }

        self.commit(record)?;
        info!(coordinate = %record.coordinate, retry, "record_requeued");
        self.metrics.increment(Counter::ConsumerRequeued, 1);
        self.metrics.increment(Counter::ConsumerProcessed, 1);
        Ok(RecordOutcome::Requeued { retry })
    }

    fn dead_letter(
        &self,
        record: &ConsumedRecord,
        key: &str,
        reason: DeadLetterReason,
        retry: u32,
    ) -> Result<RecordOutcome, ConsumeError> {
        let dlq = dead_letter_record(record, &self.config.dlq_topic, reason, retry);
        if let Err(source) = self.publisher.publish(dlq) {
            error!(
                coordinate = %record.coordinate,
                reason = %reason,
                retry,
                error = %source,
                "dlq_publish_error"
            );
            self.release(key);
            self.metrics.increment(Counter::ConsumerFailed, 1);
            return Err(ConsumeError::DeadLetter {
                coordinate: record.coordinate.clone(),
                source,
            });
        }

        self.commit(record)?;
        warn!(
            coordinate = %record.coordinate,
            dlq_topic = %self.config.dlq_topic,
            reason = %reason,
            retry,
            "record_dead_lettered"
        );
        self.metrics.increment(Counter::ConsumerDeadLettered, 1);
        self.metrics.increment(Counter::ConsumerProcessed, 1);
        Ok(RecordOutcome::DeadLettered { reason, retry })
    }

    fn commit(&self, record: &ConsumedRecord) -> Result<(), ConsumeError> {
        self.subscriber.commit(&record.coordinate).map_err(|source| {
            error!(coordinate = %record.coordinate, error = %source, "commit_error");
            self.metrics.increment(Counter::ConsumerFailed, 1);
            ConsumeError::Commit {
                coordinate: record.coordinate.clone(),
                source,
            }
        })
    }

    /// Drop the guard marker of a delivery whose outcome never left the
    /// process, so its redelivery is not mistaken for a duplicate.
    fn release(&self, key: &str) {
        if let Err(err) = self.guard.release(key) {
            warn!(key, error = %err, "idem_release_error");
        }
    }
}
