//! Broker abstractions
//!
//! This module provides the traits the relay uses to talk to a partitioned
//! append log (Kafka or anything shaped like it), and an in-memory
//! implementation of both sides.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌───────────────────────────┐
//! │ OutboxDispatcher         │        │ EventConsumer             │
//! │  publish(row) → ack      │        │  fetch → handle → commit  │
//! └────────────┬─────────────┘        │  requeue / dead-letter ───┼──┐
//!              │                      └─────────────┬─────────────┘  │
//!              ▼                                    ▼                │
//! ┌─────────────────────────────────────────────────────────────┐   │
//! │ Publisher: publish(record) -> Ack   (shared, Send + Sync)    │◄──┘
//! │ Subscriber: fetch(max, timeout) / commit(coord) / rewind()  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                 │
//!          ▼                                 ▼
//! ┌──────────────────┐              ┌──────────────────────┐
//! │ InMemoryBroker   │              │ Kafka producer /     │
//! │ (included)       │              │ consumer (external)  │
//! └──────────────────┘              └──────────────────────┘
//! ```

mod in_memory_broker;
mod publisher;
mod record;
mod subscriber;

pub use in_memory_broker::{InMemoryBroker, InMemoryConsumer};
pub use publisher::{BusError, Publisher};
pub use record::{Ack, ConsumedRecord, Coordinate, Headers, Record};
pub use subscriber::Subscriber;
