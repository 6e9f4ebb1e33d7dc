//! In-memory partitioned log for testing and single-process scenarios.
//!
//! `InMemoryBroker` implements [`Publisher`], and hands out
//! [`InMemoryConsumer`]s that implement [`Subscriber`] with consumer-group
//! offset tracking, useful for:
//! - Unit and integration testing without a Kafka cluster
//! - Reproducing redelivery (crash before commit) deterministically
//! - Development and prototyping

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use super::publisher::{BusError, Publisher};
use super::record::{Ack, ConsumedRecord, Coordinate, Record};
use super::subscriber::Subscriber;
use crate::health::{HealthCheck, HealthError};

#[derive(Default)]
struct BrokerState {
    /// topic -> partitions -> append-only log
    topics: HashMap<String, Vec<Vec<Record>>>,
    /// (group, topic, partition) -> next offset to hand out after a rewind
    committed: HashMap<(String, String, i32), i64>,
}

/// In-memory partitioned log.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Topics are created on first publish with the broker's partition count
/// - Records are routed to a partition by hashing their key
/// - Consumer groups track committed offsets; consumers track fetch positions
///
/// ## Example
///
/// ```
/// use outbox_relay::bus::{InMemoryBroker, Publisher, Record, Subscriber};
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// broker.publish(Record::new("user.events", "42", br#"{"id":42}"#.to_vec())).unwrap();
///
/// let consumer = broker.subscribe("audit", &["user.events"]);
/// let batch = consumer.fetch(10, Duration::from_millis(50)).unwrap();
/// assert_eq!(batch.len(), 1);
/// assert_eq!(batch[0].coordinate.to_string(), "user.events:0:0");
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    partitions: usize,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker whose topics have a single partition.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Create a broker whose topics have `partitions` partitions.
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(BrokerState::default())),
            partitions: partitions.max(1),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the broker becoming (un)reachable. While unavailable, every
    /// publish, fetch and commit fails with `ConnectionFailed`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Join `group` as a consumer of `topics`.
    ///
    /// The consumer starts from the group's committed offsets (or the start
    /// of each partition if nothing was committed yet).
    pub fn subscribe(&self, group: impl Into<String>, topics: &[&str]) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            group: group.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// All records of a topic, partition by partition, in offset order.
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, record)| ConsumedRecord {
                    coordinate: Coordinate::new(topic, partition as i32, offset as i64),
                    record: record.clone(),
                })
            })
            .collect()
    }

    /// Total number of records in a topic across partitions.
    pub fn len(&self, topic: &str) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// The group's committed offset for a partition (the next offset to read).
    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn ensure_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::ConnectionFailed("in-memory broker unavailable".into()))
        }
    }

    fn partition_for(&self, key: &[u8]) -> usize {
        if self.partitions == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }
}

impl Publisher for InMemoryBroker {
    fn publish(&self, record: Record) -> Result<Ack, BusError> {
        self.ensure_available()?;
        let partition = self.partition_for(&record.key);

        let mut state = self
            .state
            .write()
            .map_err(|_| BusError::LockPoisoned("publish"))?;
        let partitions = state
            .topics
            .entry(record.topic.clone())
            .or_insert_with(|| vec![Vec::new(); self.partitions]);
        let log = &mut partitions[partition];
        log.push(record);

        Ok(Ack {
            partition: partition as i32,
            offset: log.len() as i64 - 1,
        })
    }
}

impl HealthCheck for InMemoryBroker {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn check(&self) -> Result<(), HealthError> {
        self.ensure_available()
            .map_err(|err| HealthError::unavailable(self.name(), err))
    }
}

/// A consumer-group member reading from an [`InMemoryBroker`].
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
    /// (topic, partition) -> next offset to fetch
    positions: Mutex<HashMap<(String, i32), i64>>,
}

impl InMemoryConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    fn fetch_available(&self, max: usize) -> Result<Vec<ConsumedRecord>, BusError> {
        let state = self
            .broker
            .state
            .read()
            .map_err(|_| BusError::LockPoisoned("fetch"))?;
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| BusError::LockPoisoned("fetch positions"))?;

        let mut batch = Vec::new();
        for topic in &self.topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };

            for (partition, log) in partitions.iter().enumerate() {
                let partition = partition as i32;
                let position = positions.entry((topic.clone(), partition)).or_insert_with(|| {
                    state
                        .committed
                        .get(&(self.group.clone(), topic.clone(), partition))
                        .copied()
                        .unwrap_or(0)
                });

                while (*position as usize) < log.len() && batch.len() < max {
                    batch.push(ConsumedRecord {
                        coordinate: Coordinate::new(topic.as_str(), partition, *position),
                        record: log[*position as usize].clone(),
                    });
                    *position += 1;
                }

                if batch.len() >= max {
                    return Ok(batch);
                }
            }
        }

        Ok(batch)
    }
}

impl Subscriber for InMemoryConsumer {
    fn fetch(&self, max: usize, timeout: Duration) -> Result<Vec<ConsumedRecord>, BusError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.broker.ensure_available()?;

            let batch = self.fetch_available(max)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            // Small sleep to avoid busy-waiting
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn commit(&self, coordinate: &Coordinate) -> Result<(), BusError> {
        self.broker.ensure_available()?;
        if !self.topics.iter().any(|t| t == &coordinate.topic) {
            return Err(BusError::NotSubscribed(coordinate.topic.clone()));
        }

        let mut state = self
            .broker
            .state
            .write()
            .map_err(|_| BusError::LockPoisoned("commit"))?;
        let committed = state
            .committed
            .entry((
                self.group.clone(),
                coordinate.topic.clone(),
                coordinate.partition,
            ))
            .or_insert(0);
        *committed = (*committed).max(coordinate.offset + 1);
        Ok(())
    }

    fn rewind(&self) -> Result<(), BusError> {
        self.positions
            .lock()
            .map_err(|_| BusError::LockPoisoned("rewind"))?
            .clear();
        Ok(())
    }
}
