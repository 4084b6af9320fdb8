//! Double-buffered event queue (component C2).
//!
//! Two fixed-role buffers form a producer/consumer pair: the producer
//! (running inside the allocator or collector callback) always appends
//! to the *available* side; the consumer (running from the deferred
//! job) atomically swaps sides, then drains what was just made
//! unreachable to producers in FIFO order.
//!
//! The swap is a single `fetch_xor(1)` on the side selector, which is
//! the whole of the "atomic swap" the design calls for: toggling the
//! selector instantaneously redirects every subsequent `enqueue` to the
//! other buffer, while the consumer holds exclusive access to the side
//! it just took over.

use std::cell::UnsafeCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::adapter::{ClassRef, ObjectRef, RuntimeAdapter};

#[cfg(test)]
mod test;

/// Demultiplexing index for the [`crate::capture::Capture`] instance
/// that produced an event. The process-wide event queue singleton is
/// shared by every `Capture`; this is how the consumer routes an event
/// back to the right one.
///
/// Unlike `class`/`object`, this is never a host-managed reference (a
/// `Capture` is owned by application code, not by the host garbage
/// collector), so it is never marked or relocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A logically-consumed slot.
    None,
    New,
    Free,
}

#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub capture: CaptureId,
    pub class: Option<ClassRef>,
    pub object: ObjectRef,
}

impl Event {
    pub fn none() -> Self {
        Event {
            kind: EventKind::None,
            capture: CaptureId(0),
            class: None,
            object: ObjectRef::NONE,
        }
    }

    pub fn new_event(capture: CaptureId, class: ClassRef, object: ObjectRef) -> Self {
        Event {
            kind: EventKind::New,
            capture,
            class: Some(class),
            object,
        }
    }

    pub fn free_event(capture: CaptureId, object: ObjectRef) -> Self {
        Event {
            kind: EventKind::Free,
            capture,
            class: None,
            object,
        }
    }
}

/// Producer-safe, consumer-drained double buffer of [`Event`] records.
pub struct EventQueue {
    buffers: [UnsafeCell<Vec<Event>>; 2],
    /// Index (0 or 1) of the buffer producers currently append to.
    available: AtomicUsize,
    /// Soft cap on the available buffer's length; once reached,
    /// `enqueue` drops the new event and returns `false` rather than
    /// growing unboundedly under sustained pressure.
    max_events: Option<usize>,
}

// SAFETY: the engine's scheduling model guarantees at most one producer
// and at most one consumer are ever active concurrently on engine state
// (see spec §5); the `UnsafeCell` buffers are never aliased mutably.
unsafe impl Sync for EventQueue {}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EventQueue {
            buffers: [
                UnsafeCell::new(Vec::with_capacity(capacity)),
                UnsafeCell::new(Vec::with_capacity(capacity)),
            ],
            available: AtomicUsize::new(0),
            max_events: None,
        }
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }

    /// Producer-safe: append one event to the currently available
    /// buffer. Returns `false` (event silently dropped) on allocator
    /// failure or when `max_events` is already reached; callers must
    /// keep their own counters independent of queue success so a
    /// dropped event never skews `Allocations` totals.
    pub fn enqueue(&self, event: Event) -> bool {
        let side = self.available.load(Ordering::Acquire) & 1;
        // SAFETY: only the producer touches the available side between
        // swaps; `process_all` never mutates this side until it swaps
        // past it.
        let buf = unsafe { &mut *self.buffers[side].get() };
        if let Some(max) = self.max_events {
            if buf.len() >= max {
                return false;
            }
        }
        if buf.try_reserve(1).is_err() {
            return false;
        }
        buf.push(event);
        true
    }

    /// Consumer-only: swap buffers, then drain the side that was
    /// available a moment ago (now unreachable to new `enqueue` calls)
    /// in FIFO order, invoking `handler` for every not-`None` slot.
    /// Each slot is cleared after its handler runs (no panic escapes
    /// this call — a panicking handler is caught and logged, and
    /// processing continues with the next slot).
    pub fn process_all(&self, mut handler: impl FnMut(&Event)) {
        let draining_side = self.available.fetch_xor(1, Ordering::AcqRel) & 1;
        // SAFETY: the side just vacated by the producer is now
        // exclusively ours until the next `process_all` swaps again.
        let buf = unsafe { &mut *self.buffers[draining_side].get() };

        for event in buf.iter() {
            if matches!(event.kind, EventKind::None) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                log::warn!("event handler panicked; event dropped and processing continues");
            }
        }

        for event in buf.iter_mut() {
            *event = Event::none();
        }
        buf.clear();
    }

    /// Walk every not-`None` event in both buffers, contributing the
    /// references a GC mark phase must treat as reachable: `class`
    /// always, `object` only for `New` (a `Free` event's object is the
    /// very thing being collected and must not be kept alive by it).
    pub fn mark_refs(&self, mut mark: impl FnMut(ObjectRef)) {
        for buffer in &self.buffers {
            // SAFETY: marking runs with producer/consumer both quiesced
            // (the host collector only marks at a safepoint).
            let events = unsafe { &*buffer.get() };
            for event in events {
                match event.kind {
                    EventKind::None => continue,
                    EventKind::New => {
                        if let Some(class) = event.class {
                            mark(ObjectRef(class.0));
                        }
                        mark(event.object);
                    }
                    EventKind::Free => {
                        if let Some(class) = event.class {
                            mark(ObjectRef(class.0));
                        }
                    }
                }
            }
        }
    }

    /// Rewrite every marked reference in both buffers through the
    /// relocator after a compaction pass.
    pub fn relocate_refs(&self, adapter: &dyn RuntimeAdapter) {
        for buffer in &self.buffers {
            // SAFETY: as with `mark_refs`, compaction runs with both
            // producer and consumer quiesced.
            let events = unsafe { &mut *buffer.get() };
            for event in events.iter_mut() {
                match event.kind {
                    EventKind::None => continue,
                    EventKind::New => {
                        if let Some(class) = event.class {
                            event.class = Some(ClassRef(adapter.relocate(ObjectRef(class.0)).0));
                        }
                        event.object = adapter.relocate(event.object);
                    }
                    EventKind::Free => {
                        if let Some(class) = event.class {
                            event.class = Some(ClassRef(adapter.relocate(ObjectRef(class.0)).0));
                        }
                    }
                }
            }
        }
    }

    /// Number of not-yet-consumed events currently queued, across both
    /// buffers. Intended for diagnostics, not a hot path.
    pub fn len(&self) -> usize {
        self.buffers
            .iter()
            .map(|b| unsafe { &*b.get() }.iter().filter(|e| !matches!(e.kind, EventKind::None)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
