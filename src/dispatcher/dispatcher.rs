use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::bus::{Headers, Publisher};
use crate::metrics::{Counter, MetricsRecorder, NoopMetrics};
use crate::outbox::{OutboxStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Time between the end of one tick and the start of the next.
    pub poll_interval: Duration,
    /// Max rows read per tick.
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

impl DispatcherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

/// Result of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    /// Rows returned by `list_unsent`.
    pub polled: usize,
    /// Rows published and marked sent by this tick.
    pub published: usize,
    /// Rows published but found already marked by someone else.
    pub already_sent: usize,
    /// Id of the row whose publish failed; it and every later row stay unsent.
    pub halted_at: Option<u64>,
}

impl DrainResult {
    pub fn halted(&self) -> bool {
        self.halted_at.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("listing unsent outbox rows failed")]
    List(#[source] StoreError),
    #[error("marking outbox row {id} as sent failed")]
    MarkSent {
        id: u64,
        #[source]
        source: StoreError,
    },
}

/// Drains unsent outbox rows to the broker.
///
/// Each tick publishes rows in ascending id order and marks a row sent only
/// after its publish was acknowledged. The first publish failure ends the
/// tick: the failing row and everything after it stay unsent and are retried
/// from the same position next tick. Ordering wins over liveness here, so one
/// persistently failing row stalls the whole outbox until it is fixed; alert
/// on `outbox_failed_total`.
///
/// A crash between an ack and `mark_sent` republishes that row on restart
/// (at-least-once).
///
/// Only one dispatcher may run against a store. `list_unsent` takes no lease,
/// so a second instance would publish the same rows concurrently.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<dyn MetricsRecorder>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            store,
            publisher,
            metrics: Arc::new(NoopMetrics),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one tick.
    ///
    /// Publish failures are reported through [`DrainResult::halted_at`];
    /// store failures abort the tick with an error. Either way nothing is
    /// carried over: the next tick re-reads the store.
    pub fn drain_once(&self) -> Result<DrainResult, DispatchError> {
        let rows = self
            .store
            .list_unsent(self.config.batch_size)
            .map_err(|err| {
                error!(error = %err, "outbox_list_error");
                self.metrics.increment(Counter::OutboxFailed, 1);
                DispatchError::List(err)
            })?;

        let mut result = DrainResult {
            polled: rows.len(),
            ..Default::default()
        };
        self.metrics.increment(Counter::OutboxPolled, rows.len() as u64);

        for row in rows {
            let headers = row.decode_headers().unwrap_or_else(|err| {
                warn!(id = row.id, error = %err, "outbox_headers_decode_error");
                Headers::new()
            });

            let ack = match self.publisher.publish(row.to_record(headers)) {
                Ok(ack) => ack,
                Err(err) => {
                    error!(id = row.id, topic = %row.topic, error = %err, "outbox_publish_error");
                    self.metrics.increment(Counter::OutboxFailed, 1);
                    result.halted_at = Some(row.id);
                    break;
                }
            };

            match self.store.mark_sent(row.id) {
                Ok(true) => {
                    debug!(
                        id = row.id,
                        topic = %row.topic,
                        partition = ack.partition,
                        offset = ack.offset,
                        "outbox_sent"
                    );
                    self.metrics.increment(Counter::OutboxSent, 1);
                    result.published += 1;
                }
                Ok(false) => {
                    warn!(id = row.id, "outbox_already_marked_sent");
                    result.already_sent += 1;
                }
                Err(err) => {
                    error!(id = row.id, error = %err, "outbox_mark_sent_error");
                    self.metrics.increment(Counter::OutboxFailed, 1);
                    return Err(DispatchError::MarkSent {
                        id: row.id,
                        source: err,
                    });
                }
            }
        }

        Ok(result)
    }
}
