//! Core subscriber trait for consumer-group reads.

use std::time::Duration;

use super::publisher::BusError;
use super::record::{ConsumedRecord, Coordinate};

/// Trait for pulling records as a member of a consumer group.
///
/// Offsets are only ever committed explicitly through [`Subscriber::commit`];
/// implementations must not auto-commit.
pub trait Subscriber: Send + Sync {
    /// Fetch up to `max` records, blocking until at least one is available or
    /// `timeout` elapses. An empty vector means the timeout elapsed.
    fn fetch(&self, max: usize, timeout: Duration) -> Result<Vec<ConsumedRecord>, BusError>;

    /// Commit the record at `coordinate` as handled.
    ///
    /// Commits are positional: the group's committed offset for the partition
    /// becomes `coordinate.offset + 1`, covering every earlier record.
    fn commit(&self, coordinate: &Coordinate) -> Result<(), BusError>;

    /// Move fetch positions back to the last committed offsets so that every
    /// uncommitted record is delivered again.
    fn rewind(&self) -> Result<(), BusError>;
}
