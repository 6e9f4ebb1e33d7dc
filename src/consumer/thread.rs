//! Background thread running the consumer loop.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use super::event_consumer::{BatchSummary, EventConsumer};
use super::handler::EventHandler;
use crate::bus::Subscriber;

/// Statistics from the consumer thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub polls: usize,
    pub fetched: usize,
    pub committed: usize,
    pub deduplicated: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Batches cut short by a record that could not be committed.
    pub failed_batches: usize,
    pub fetch_errors: usize,
}

impl ConsumerStats {
    fn absorb(&mut self, summary: &BatchSummary) {
        self.fetched += summary.fetched;
        self.committed += summary.committed;
        self.deduplicated += summary.deduplicated;
        self.requeued += summary.requeued;
        self.dead_lettered += summary.dead_lettered;
        if !summary.is_clean() {
            self.failed_batches += 1;
        }
    }
}

/// A background thread that fetches and processes records until stopped.
///
/// The stop signal is checked between fetches, so stopping takes up to one
/// `fetch_timeout` plus the time to finish the current batch. A record being
/// handled is never interrupted.
///
/// ## Example
///
/// ```ignore
/// let consumer = EventConsumer::new(
///     broker.subscribe("user-events-consumer", &["user.events"]),
///     AuditHandler::new(db.clone()),
///     publisher.clone(),
///     IdempotencyGuard::new(Arc::new(cache.clone())),
///     ConsumerConfig::new("user.events.dlq"),
/// );
///
/// let thread = ConsumerThread::spawn(consumer);
/// // ...
/// let stats = thread.stop();
/// ```
pub struct ConsumerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerThread {
    pub fn spawn<S, H>(consumer: EventConsumer<S, H>) -> Self
    where
        S: Subscriber + 'static,
        H: EventHandler + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = ConsumerStats::default();
            let backoff = consumer.config().error_backoff;
            info!(dlq_topic = %consumer.config().dlq_topic, "consumer_started");

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;
                let failed = match consumer.poll_once() {
                    Ok(summary) => {
                        stats.absorb(&summary);
                        !summary.is_clean()
                    }
                    Err(err) => {
                        warn!(error = %err, "consumer_poll_failed");
                        stats.fetch_errors += 1;
                        true
                    }
                };

                if failed {
                    match stop_rx.recv_timeout(backoff) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
            }

            info!(polls = stats.polls, committed = stats.committed, "consumer_stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait for the current batch to finish.
    pub fn stop(mut self) -> ConsumerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ConsumerStats::default(),
        }
    }

    /// Signal the loop to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ConsumedRecord, InMemoryBroker, Publisher, Record};
    use crate::consumer::{ConsumerConfig, HandlerError};
    use crate::idempotency::IdempotencyGuard;
    use crate::kv::InMemoryKeyValueStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl EventHandler for Counting {
        type Event = serde_json::Value;

        fn handle(&self, _event: serde_json::Value, _record: &ConsumedRecord) -> Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig::new("t.dlq")
            .with_fetch_timeout(Duration::from_millis(10))
            .with_error_backoff(Duration::from_millis(10))
    }

    #[test]
    fn processes_until_stopped() {
        let broker = InMemoryBroker::new();
        let handler = Arc::new(Counting::default());
        let consumer = EventConsumer::new(
            broker.subscribe("g", &["t"]),
            handler.clone(),
            Arc::new(broker.clone()),
            IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new())),
            config(),
        );
        let thread = ConsumerThread::spawn(consumer);

        for i in 0..3 {
            broker.publish(Record::new("t", "k", format!("{{\"n\":{i}}}").into_bytes())).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while broker.committed("g", "t", 0) != Some(3) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = thread.stop();

        assert_eq!(handler.0.load(Ordering::SeqCst), 3);
        assert_eq!(stats.committed, 3);
        assert_eq!(stats.fetch_errors, 0);
    }

    #[test]
    fn broker_outage_backs_off_and_recovers() {
        let broker = InMemoryBroker::new();
        broker.publish(Record::new("t", "k", b"{}".to_vec())).unwrap();
        broker.set_available(false);
        let consumer = EventConsumer::new(
            broker.subscribe("g", &["t"]),
            Counting::default(),
            Arc::new(broker.clone()),
            IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new())),
            config(),
        );
        let thread = ConsumerThread::spawn(consumer);

        thread::sleep(Duration::from_millis(40));
        broker.set_available(true);

        let deadline = Instant::now() + Duration::from_secs(2);
        while broker.committed("g", "t", 0) != Some(1) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = thread.stop();

        assert!(stats.fetch_errors >= 1);
        assert_eq!(stats.committed, 1);
    }
}
