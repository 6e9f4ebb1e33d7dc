pub mod bus;
pub mod config;
pub mod consumer;
pub mod dispatcher;
mod event;
pub mod health;
pub mod idempotency;
pub mod kv;
pub mod logging;
pub mod metrics;
pub mod outbox;
mod relay;

pub use bus::{BusError, ConsumedRecord, Coordinate, Headers, InMemoryBroker, Publisher, Record, Subscriber};
pub use config::{ConfigError, RelayConfig};
pub use consumer::{
    ConsumeError, ConsumerConfig, ConsumerThread, DeadLetterReason, EventConsumer, EventHandler,
    HandlerError, RecordOutcome,
};
pub use dispatcher::{DispatchError, DispatcherConfig, DispatcherThread, DrainResult, OutboxDispatcher};
pub use event::DomainEvent;
pub use health::{HealthCheck, HealthError, ReadinessReport};
pub use idempotency::{Admission, IdempotencyGuard};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, KvError};
pub use logging::init_tracing;
pub use metrics::{Counter, InMemoryMetrics, MetricsRecorder, NoopMetrics};
pub use outbox::{
    InMemoryDatabase, OutboxMessage, OutboxRow, OutboxStore, OutboxWriter, StoreError, Transaction,
    Transactor,
};
pub use relay::{Relay, RelayComponents, RelayHandle, RelayStats, StartupError};
