//! Background thread running the dispatcher loop.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use super::dispatcher::OutboxDispatcher;

/// Statistics from the dispatcher thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub ticks: usize,
    pub published: usize,
    /// Ticks cut short by a publish failure.
    pub halted_ticks: usize,
    /// Ticks aborted by a store error.
    pub failed_ticks: usize,
}

/// A background thread that drains the outbox every `poll_interval`.
///
/// Ticks run one at a time on a single thread, so they never overlap. The
/// stop signal is only observed between ticks; a tick in progress always
/// runs to completion.
///
/// ## Example
///
/// ```ignore
/// let dispatcher = OutboxDispatcher::new(Arc::new(db.clone()), publisher.clone())
///     .with_config(DispatcherConfig::default().with_poll_interval(Duration::from_millis(50)));
///
/// let thread = DispatcherThread::spawn(dispatcher);
/// // ... stage outbox messages ...
/// let stats = thread.stop();
/// println!("published {} messages", stats.published);
/// ```
pub struct DispatcherThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<DispatcherStats>>,
}

impl DispatcherThread {
    /// Spawn the loop. The first tick runs immediately.
    pub fn spawn(dispatcher: OutboxDispatcher) -> Self {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = DispatcherStats::default();
            let interval = dispatcher.config().poll_interval;
            info!(
                poll_interval_ms = interval.as_millis() as u64,
                batch_size = dispatcher.config().batch_size,
                "dispatcher_started"
            );

            loop {
                stats.ticks += 1;
                match dispatcher.drain_once() {
                    Ok(result) => {
                        stats.published += result.published;
                        if result.halted() {
                            stats.halted_ticks += 1;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "dispatcher_tick_failed");
                        stats.failed_ticks += 1;
                    }
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(ticks = stats.ticks, published = stats.published, "dispatcher_stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait for the current tick to finish.
    pub fn stop(mut self) -> DispatcherStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => DispatcherStats::default(),
        }
    }

    /// Signal the loop to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
