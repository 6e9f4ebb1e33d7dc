//! The whole pipeline: user service -> outbox -> dispatcher -> broker ->
//! consumer -> audit handler, wired through `Relay::start`.

mod support;

use outbox_relay::bus::{InMemoryBroker, InMemoryConsumer, Publisher};
use outbox_relay::{
    ConfigError, Counter, HealthCheck, InMemoryDatabase, InMemoryKeyValueStore, InMemoryMetrics,
    OutboxStore, Relay, RelayComponents, RelayConfig, StartupError,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use support::{wait_until, AuditHandler, UserService, DLQ_TOPIC, USER_TOPIC};

const CONFIG: &str = r#"
app:
  name: relay-test
  env: test
dispatcher:
  poll_interval_ms: 10
  batch_size: 10
consumer:
  topic: user.events
  dlq_topic: user.events.dlq
  group: user-events-consumer
  max_retries: 3
  fetch_timeout_ms: 20
  error_backoff_ms: 10
"#;

struct World {
    config: RelayConfig,
    db: InMemoryDatabase,
    broker: InMemoryBroker,
    cache: InMemoryKeyValueStore,
    metrics: Arc<InMemoryMetrics>,
    handler: Arc<AuditHandler>,
}

impl World {
    fn new() -> Self {
        let db = InMemoryDatabase::new();
        Self {
            config: RelayConfig::from_yaml_str(CONFIG).unwrap(),
            handler: Arc::new(AuditHandler::new(db.clone())),
            db,
            broker: InMemoryBroker::new(),
            cache: InMemoryKeyValueStore::new(),
            metrics: Arc::new(InMemoryMetrics::new()),
        }
    }

    fn components(&self) -> RelayComponents<InMemoryConsumer, Arc<AuditHandler>> {
        let consumer = &self.config.consumer;
        let publisher: Arc<dyn Publisher> = Arc::new(self.broker.clone());
        RelayComponents {
            store: Arc::new(self.db.clone()),
            publisher,
            subscriber: self.broker.subscribe(&consumer.group, &[consumer.topic.as_str()]),
            handler: self.handler.clone(),
            cache: Arc::new(self.cache.clone()),
            metrics: self.metrics.clone(),
            health_checks: vec![
                Arc::new(self.db.clone()) as Arc<dyn HealthCheck>,
                Arc::new(self.broker.clone()),
                Arc::new(self.cache.clone()),
            ],
        }
    }
}

#[test]
fn created_users_reach_the_audit_log() {
    let world = World::new();
    let users = UserService::new(world.db.clone());
    world.handler.fail_next(1);

    let handle = Relay::start(&world.config, world.components()).unwrap();
    let alice = users.create("Alice", "alice@example.com", "req-1").unwrap();
    let bob = users.create("Bob", "bob@example.com", "req-2").unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        world.handler.audit_row(&alice.id.to_string()).is_some()
            && world.handler.audit_row(&bob.id.to_string()).is_some()
    }));
    let stats = handle.shutdown();

    // the first delivery failed once and was requeued
    assert_eq!(world.broker.len(USER_TOPIC), 3);
    assert!(world.broker.is_empty(DLQ_TOPIC));
    assert!(world.db.list_unsent(10).unwrap().is_empty());

    assert_eq!(stats.dispatcher.published, 2);
    assert_eq!(stats.consumer.committed, 2);
    assert_eq!(stats.consumer.requeued, 1);
    assert_eq!(stats.consumer.dead_lettered, 0);
    assert_eq!(world.metrics.get(Counter::OutboxSent), 2);
    assert_eq!(world.metrics.get(Counter::ConsumerRequeued), 1);

    let row = world.handler.audit_row(&alice.id.to_string()).unwrap();
    assert_eq!(row["event_type"], "UserCreated");
    assert_eq!(row["payload"]["email"], "alice@example.com");
}

#[test]
fn unavailable_dependency_aborts_startup() {
    let world = World::new();
    world.cache.set_available(false);
    UserService::new(world.db.clone())
        .create("Alice", "alice@example.com", "req-1")
        .unwrap();

    let err = Relay::start(&world.config, world.components()).err().unwrap();

    match err {
        StartupError::Unavailable(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].to_string().starts_with("cache unavailable"));
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }

    // nothing was spawned
    thread::sleep(Duration::from_millis(50));
    assert!(world.broker.is_empty(USER_TOPIC));
    assert_eq!(world.db.list_unsent(10).unwrap().len(), 1);
}

#[test]
fn invalid_config_aborts_startup() {
    let mut world = World::new();
    world.config.consumer.dlq_topic = world.config.consumer.topic.clone();

    let err = Relay::start(&world.config, world.components()).err().unwrap();

    assert!(matches!(err, StartupError::Config(ConfigError::Invalid(_))));
}

#[test]
fn readiness_tracks_dependencies_after_startup() {
    let world = World::new();
    let handle = Relay::start(&world.config, world.components()).unwrap();

    assert!(handle.readiness().is_ready());

    world.broker.set_available(false);
    let report = handle.readiness();
    assert!(!report.is_ready());
    let names: Vec<&str> = report
        .components
        .iter()
        .filter(|(_, status)| status.is_err())
        .map(|(name, _)| *name)
        .collect();
    assert_eq!(names, vec!["broker"]);

    world.broker.set_available(true);
    assert!(handle.readiness().is_ready());
    handle.shutdown();
}

#[test]
fn broker_outage_delays_but_does_not_lose_events() {
    let world = World::new();
    let users = UserService::new(world.db.clone());
    let handle = Relay::start(&world.config, world.components()).unwrap();

    world.broker.set_available(false);
    let user = users.create("Carol", "carol@example.com", "req-3").unwrap();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(world.db.list_unsent(10).unwrap().len(), 1);

    world.broker.set_available(true);
    assert!(wait_until(Duration::from_secs(5), || {
        world.handler.audit_row(&user.id.to_string()).is_some()
    }));
    let stats = handle.shutdown();

    assert!(stats.dispatcher.halted_ticks >= 1);
    assert!(stats.consumer.fetch_errors >= 1);
    assert_eq!(world.broker.len(USER_TOPIC), 1);
    assert_eq!(world.broker.committed(&world.config.consumer.group, USER_TOPIC, 0), Some(1));
}

#[test]
fn shutdown_on_an_idle_relay_returns_promptly() {
    let world = World::new();
    let handle = Relay::start(&world.config, world.components()).unwrap();
    thread::sleep(Duration::from_millis(30));

    let started = std::time::Instant::now();
    let stats = handle.shutdown();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(stats.dispatcher.ticks >= 1);
    assert_eq!(stats.dispatcher.published, 0);
    assert_eq!(stats.consumer.fetched, 0);
}
