//! Event logger contract.
//!
//! The decision path hands every serialized event to an [`EventLogger`]. A
//! logger must never block the caller indefinitely: saturation is reported
//! through [`EventLogger::is_full`] and through an immediate `append` error,
//! and the caller decides what to do about it.

use crossbeam_queue::ArrayQueue;

use crate::error::{LiveModelError, Result};

/// Default capacity of a [`QueueLogger`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 16 * 1024;

/// Sink for serialized decision and outcome events.
pub trait EventLogger: Send + Sync {
    /// Prepare the sink. Called once from `LiveModel::init`.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Hand one serialized event to the sink.
    ///
    /// Fails with a logging error when the sink is unreachable, saturated or
    /// the event is malformed.
    fn append(&self, event: &str) -> Result<()>;

    /// Best-effort, non-blocking saturation signal.
    fn is_full(&self) -> bool {
        false
    }
}

/// Logger that accepts and discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl EventLogger for NullLogger {
    fn append(&self, _event: &str) -> Result<()> {
        Ok(())
    }
}

/// Bounded in-memory logger.
///
/// Events wait in a lock-free queue until a consumer calls [`drain`]. When the
/// queue is full, `append` fails immediately instead of waiting.
///
/// [`drain`]: QueueLogger::drain
#[derive(Debug)]
pub struct QueueLogger {
    queue: ArrayQueue<String>,
}

impl QueueLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove and return all buffered events in arrival order.
    pub fn drain(&self) -> Vec<String> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }
}

impl Default for QueueLogger {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventLogger for QueueLogger {
    fn append(&self, event: &str) -> Result<()> {
        if event.is_empty() {
            return Err(LiveModelError::logging("refusing to log an empty event"));
        }
        self.queue.push(event.to_string()).map_err(|_| {
            LiveModelError::logging(format!(
                "event queue is full ({} events)",
                self.queue.capacity()
            ))
        })
    }

    fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}
