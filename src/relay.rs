//! Process wiring: one dispatcher loop and one consumer loop sharing a
//! single publisher.
//!
//! ```ignore
//! let config = RelayConfig::load("config.yaml")?;
//! init_tracing(&config.log)?;
//!
//! let publisher: Arc<dyn Publisher> = Arc::new(broker.clone());
//! let handle = Relay::start(&config, RelayComponents {
//!     store: Arc::new(db.clone()),
//!     publisher: publisher.clone(),
//!     subscriber: broker.subscribe(&config.consumer.group, &[config.consumer.topic.as_str()]),
//!     handler: AuditHandler::new(db.clone()),
//!     cache: Arc::new(cache.clone()),
//!     metrics: Arc::new(NoopMetrics),
//!     health_checks: vec![Arc::new(db), Arc::new(broker), Arc::new(cache)],
//! })?;
//!
//! // ... until a shutdown signal ...
//! let stats = handle.shutdown();
//! ```

use std::sync::Arc;

use tracing::{error, info};

use crate::bus::{Publisher, Subscriber};
use crate::config::{ConfigError, RelayConfig};
use crate::consumer::{ConsumerStats, ConsumerThread, EventConsumer, EventHandler};
use crate::dispatcher::{DispatcherStats, DispatcherThread, OutboxDispatcher};
use crate::health::{check_all, HealthCheck, HealthError, ReadinessReport};
use crate::idempotency::IdempotencyGuard;
use crate::kv::KeyValueStore;
use crate::metrics::MetricsRecorder;
use crate::outbox::OutboxStore;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("required infrastructure unavailable: {}", describe(.0))]
    Unavailable(Vec<HealthError>),
}

fn describe(failures: &[HealthError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything the relay needs from the outside.
pub struct RelayComponents<S, H> {
    pub store: Arc<dyn OutboxStore>,
    /// Shared by the dispatcher and the consumer's requeue / dead-letter paths.
    pub publisher: Arc<dyn Publisher>,
    /// Already subscribed to `consumer.topic` as `consumer.group`.
    pub subscriber: S,
    pub handler: H,
    pub cache: Arc<dyn KeyValueStore>,
    pub metrics: Arc<dyn MetricsRecorder>,
    /// Checked once before anything starts, and again by
    /// [`RelayHandle::readiness`].
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
}

pub struct Relay;

impl Relay {
    /// Validate `config`, check every dependency, then spawn both loops.
    ///
    /// An unreachable dependency at startup is fatal: nothing is spawned and
    /// the error is returned. After startup, outages are retried by the
    /// loops themselves.
    pub fn start<S, H>(
        config: &RelayConfig,
        components: RelayComponents<S, H>,
    ) -> Result<RelayHandle, StartupError>
    where
        S: Subscriber + 'static,
        H: EventHandler + 'static,
    {
        config.validate()?;

        let report = check_all(&components.health_checks);
        if !report.is_ready() {
            let failures: Vec<HealthError> = report.failures().cloned().collect();
            for failure in &failures {
                error!(error = %failure, "startup_dependency_unavailable");
            }
            return Err(StartupError::Unavailable(failures));
        }

        let dispatcher = OutboxDispatcher::new(components.store, components.publisher.clone())
            .with_config(config.dispatcher_config())
            .with_metrics(components.metrics.clone());

        let consumer = EventConsumer::new(
            components.subscriber,
            components.handler,
            components.publisher,
            IdempotencyGuard::new(components.cache),
            config.consumer_config(),
        )
        .with_metrics(components.metrics);

        let handle = RelayHandle {
            dispatcher: DispatcherThread::spawn(dispatcher),
            consumer: ConsumerThread::spawn(consumer),
            health_checks: components.health_checks,
        };

        info!(
            app = %config.app.name,
            env = %config.app.env,
            topic = %config.consumer.topic,
            group = %config.consumer.group,
            "relay_started"
        );
        Ok(handle)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub dispatcher: DispatcherStats,
    pub consumer: ConsumerStats,
}

/// Running relay. Dropping it signals both loops to stop without waiting.
pub struct RelayHandle {
    dispatcher: DispatcherThread,
    consumer: ConsumerThread,
    health_checks: Vec<Arc<dyn HealthCheck>>,
}

impl RelayHandle {
    /// Current status of every dependency.
    pub fn readiness(&self) -> ReadinessReport {
        check_all(&self.health_checks)
    }

    /// Stop both loops and wait for them. In-flight ticks and batches finish
    /// first.
    pub fn shutdown(self) -> RelayStats {
        self.dispatcher.signal_stop();
        self.consumer.signal_stop();

        let stats = RelayStats {
            dispatcher: self.dispatcher.stop(),
            consumer: self.consumer.stop(),
        };
        info!(
            published = stats.dispatcher.published,
            committed = stats.consumer.committed,
            "relay_stopped"
        );
        stats
    }
}
