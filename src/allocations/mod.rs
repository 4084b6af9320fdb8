//! Per-class allocation counters and optional user callback (component C4).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::adapter::ClassRef;


/// Which half of the allocation lifecycle a callback is being invoked
/// for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackEvent {
    New,
    Free,
}

/// A per-class user callback. Invoked with the class, which half of the
/// lifecycle fired, and (on `Free`) whatever the matching `New`
/// invocation returned. Must be fast, must not trigger a collection,
/// must not block; if it panics the engine catches and logs the panic
/// rather than propagating it (see [`crate::capture::Capture`]).
pub type Callback<D> = Box<dyn FnMut(ClassRef, CallbackEvent, Option<D>) -> Option<D>>;

/// Monotonic new/free counters for one class, plus the optional
/// callback attached to it via [`Allocations::track`].
///
/// `new_count` only ever increases. `free_count` is allowed to exceed
/// it transiently in bookkeeping terms (a duplicate or pre-tracking
/// `FREE`), but [`Allocations::retained_count`] always saturates rather
/// than underflowing.
pub struct Allocations<D> {
    new_count: AtomicU64,
    free_count: AtomicU64,
    callback: Option<Callback<D>>,
}

impl<D> Allocations<D> {
    pub fn new() -> Self {
        Allocations {
            new_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            callback: None,
        }
    }

    pub fn new_count(&self) -> u64 {
        self.new_count.load(Ordering::Relaxed)
    }

    pub fn free_count(&self) -> u64 {
        self.free_count.load(Ordering::Relaxed)
    }

    /// `saturating_sub(new_count, free_count)`. The only authoritative
    /// live-count this type exposes; it may transiently overstate
    /// liveness if `FREE` events are queued but not yet processed.
    pub fn retained_count(&self) -> u64 {
        self.new_count().saturating_sub(self.free_count())
    }

    pub(crate) fn record_new(&self) {
        self.new_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Attach (or replace) the callback invoked on every `new`/`free`
    /// this class goes through from now on.
    pub fn track(&mut self, callback: Callback<D>) {
        self.callback = Some(callback);
    }

    pub fn is_tracking(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn invoke_callback(&mut self, class: ClassRef, event: CallbackEvent, data: Option<D>) -> Option<D> {
        match &mut self.callback {
            Some(callback) => callback(class, event, data),
            None => None,
        }
    }

    /// Zero counts and drop the callback.
    pub fn clear(&mut self) {
        self.new_count.store(0, Ordering::Relaxed);
        self.free_count.store(0, Ordering::Relaxed);
        self.callback = None;
    }
}

impl<D> Default for Allocations<D> {
    fn default() -> Self {
        Self::new()
    }
}
