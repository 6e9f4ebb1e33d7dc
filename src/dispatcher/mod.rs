//! Dispatcher - drains the outbox table to the broker.
//!
//! ```text
//!   outbox table            OutboxDispatcher              broker
//!  ┌──────────────┐  list   ┌──────────────┐  publish   ┌────────┐
//!  │ 10 unsent    │ ──────► │ for row in   │ ─────────► │ topic  │
//!  │ 11 unsent    │         │ ascending id │ ◄───────── │        │
//!  │ 12 unsent    │ ◄────── │  mark_sent   │    ack     └────────┘
//!  └──────────────┘         └──────────────┘
//! ```
//!
//! [`OutboxDispatcher::drain_once`] runs a single tick and is what tests
//! drive directly. [`DispatcherThread`] runs ticks on a background thread.

#[allow(clippy::module_inception)]
mod dispatcher;
mod thread;

pub use dispatcher::{DispatchError, DispatcherConfig, DrainResult, OutboxDispatcher};
pub use thread::{DispatcherStats, DispatcherThread};
