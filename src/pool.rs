//! Reusable object pool for the decision hot path.
//!
//! The decision path serializes every event into a scratch buffer. Buffers are
//! checked out of an [`ObjectPool`] and returned automatically when the
//! [`Pooled`] guard drops, so after warmup the path does not allocate.
//!
//! # Architecture
//!
//! ```text
//! ObjectPool<T, F>
//!   ├── factory: F              (constructs and resets instances)
//!   ├── idle: SegQueue<T>       (lock-free, unbounded idle set)
//!   └── created: AtomicUsize    (instances ever constructed)
//!
//! checkout() ──► Pooled<'_, T, F> ──drop──► factory.reset(&mut t); idle.push(t)
//! ```
//!
//! The pool trades memory for allocation avoidance; it never caps the number
//! of outstanding instances.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

/// Constructs and recycles pooled instances.
pub trait PoolFactory<T>: Send + Sync {
    /// Build a fresh instance when the idle set is empty.
    fn create(&self) -> T;

    /// Clear an instance before it re-enters the idle set.
    fn reset(&self, _object: &mut T) {}
}

/// Thread-safe pool of reusable `T`.
pub struct ObjectPool<T, F> {
    factory: F,
    idle: SegQueue<T>,
    created: AtomicUsize,
}

impl<T: Send, F: PoolFactory<T>> ObjectPool<T, F> {
    /// Create an empty pool backed by `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            idle: SegQueue::new(),
            created: AtomicUsize::new(0),
        }
    }

    /// Take an idle instance or construct a new one.
    ///
    /// The instance returns to the pool when the guard drops, on every exit
    /// path including early returns and unwinding.
    pub fn checkout(&self) -> Pooled<'_, T, F> {
        let object = self.idle.pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            self.factory.create()
        });
        Pooled {
            pool: self,
            object: Some(object),
        }
    }

    /// Number of instances ever constructed by this pool.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of instances currently idle.
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    fn release(&self, mut object: T) {
        self.factory.reset(&mut object);
        self.idle.push(object);
    }
}

impl<T, F> fmt::Debug for ObjectPool<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("created", &self.created.load(Ordering::Relaxed))
            .field("idle", &self.idle.len())
            .finish_non_exhaustive()
    }
}

/// Scoped checkout of a pooled instance.
pub struct Pooled<'a, T: Send, F: PoolFactory<T>> {
    pool: &'a ObjectPool<T, F>,
    object: Option<T>,
}

impl<T: Send, F: PoolFactory<T>> Deref for Pooled<'_, T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the object out.
        self.object.as_ref().expect("pooled object present until drop")
    }
}

impl<T: Send, F: PoolFactory<T>> DerefMut for Pooled<'_, T, F> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().expect("pooled object present until drop")
    }
}

impl<T: Send, F: PoolFactory<T>> Drop for Pooled<'_, T, F> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.release(object);
        }
    }
}
