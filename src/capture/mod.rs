//! Engine front-end: attaches to a runtime, turns raw events into
//! `{object, class}` pairs, and applies them from the deferred consumer
//! (component C5).
//!
//! One `Capture<D>` owns its own event queue rather than sharing a
//! single process-wide one across every live `Capture` — see
//! `DESIGN.md` for why. `CaptureId` is kept on every event anyway so the
//! demultiplexing shape described by the design stays visible even
//! though this instance only ever sees its own events.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::adapter::{ClassRef, CollectionGuard, DeferredHandle, HookKind, ObjectRef, RawTraceArg, RuntimeAdapter};
use crate::allocations::{Allocations, Callback, CallbackEvent};
use crate::error::{EngineError, EngineResult};
use crate::queue::{CaptureId, Event, EventKind, EventQueue};
use crate::table::ObjectTable;

#[cfg(test)]
mod test;

static NEXT_CAPTURE_ID: AtomicUsize = AtomicUsize::new(1);

/// The producer half, installed as the runtime's `NEW`/`FREE` hooks.
/// Holds only what must be touched from inside the allocator callback:
/// resolving the event, the reentrancy counter, and the queue.
struct Producer {
    id: CaptureId,
    adapter: Arc<dyn RuntimeAdapter>,
    queue: Arc<EventQueue>,
    paused_depth: Arc<AtomicI32>,
    new_count: Arc<AtomicU64>,
    free_count: Arc<AtomicU64>,
}

// SAFETY: the engine's scheduling model (spec §5) guarantees the host
// runtime drives these hooks from a single thread at a time and never
// concurrently with the consumer; no two calls into `adapter` or
// `queue` ever actually race despite the `Send + Sync` bound
// `RuntimeAdapter::install_event_hook` places on its callback.
unsafe impl Send for Producer {}
unsafe impl Sync for Producer {}

impl Producer {
    fn on_new(&self, raw: RawTraceArg) {
        let object = self.adapter.resolve_object(raw);
        if !self.adapter.is_trackable(object) {
            return;
        }
        if self.paused_depth.load(Ordering::Acquire) > 0 {
            // A NEW fired from inside a user callback's own allocations;
            // invisible to the engine, never double-counted.
            return;
        }
        let class = match self.adapter.resolve_class(raw) {
            Some(class) => class,
            None => return,
        };
        self.new_count.fetch_add(1, Ordering::Relaxed);
        self.queue.enqueue(Event::new_event(self.id, class, object));
    }

    fn on_free(&self, raw: RawTraceArg) {
        let object = self.adapter.resolve_object(raw);
        if !self.adapter.is_trackable(object) {
            return;
        }
        self.free_count.fetch_add(1, Ordering::Relaxed);
        self.queue.enqueue(Event::free_event(self.id, object));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    pub tracked_count: usize,
    pub object_table_size: usize,
}

pub struct Capture<D> {
    id: CaptureId,
    adapter: Arc<dyn RuntimeAdapter>,
    queue: Arc<EventQueue>,
    producer: Arc<Producer>,
    paused_depth: Arc<AtomicI32>,
    new_count: Arc<AtomicU64>,
    free_count: Arc<AtomicU64>,
    running: Cell<bool>,
    tracked: RefCell<HashMap<usize, Allocations<D>>>,
    table: RefCell<ObjectTable<D>>,
}

impl<D: 'static> Capture<D> {
    pub fn new(adapter: Arc<dyn RuntimeAdapter>) -> Self {
        Self::with_queue(adapter, EventQueue::new())
    }

    pub fn with_max_events(adapter: Arc<dyn RuntimeAdapter>, max_events: usize) -> Self {
        Self::with_queue(adapter, EventQueue::new().with_max_events(max_events))
    }

    fn with_queue(adapter: Arc<dyn RuntimeAdapter>, queue: EventQueue) -> Self {
        let id = CaptureId(NEXT_CAPTURE_ID.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(queue);
        let paused_depth = Arc::new(AtomicI32::new(0));
        let new_count = Arc::new(AtomicU64::new(0));
        let free_count = Arc::new(AtomicU64::new(0));
        let producer = Arc::new(Producer {
            id,
            adapter: adapter.clone(),
            queue: queue.clone(),
            paused_depth: paused_depth.clone(),
            new_count: new_count.clone(),
            free_count: free_count.clone(),
        });

        Capture {
            id,
            adapter,
            queue,
            producer,
            paused_depth,
            new_count,
            free_count,
            running: Cell::new(false),
            tracked: RefCell::new(HashMap::new()),
            table: RefCell::new(ObjectTable::new()),
        }
    }

    pub fn start(&self) -> EngineResult<()> {
        if self.running.get() {
            return Err(EngineError::AlreadyRunning);
        }
        let handle = DeferredHandle(self.id.0);
        if !self.adapter.schedule_deferred(handle) {
            return Err(EngineError::DeferredSlotUnavailable);
        }

        let new_producer = self.producer.clone();
        self.adapter
            .install_event_hook(HookKind::New, Box::new(move |raw| new_producer.on_new(raw)));
        let free_producer = self.producer.clone();
        self.adapter
            .install_event_hook(HookKind::Free, Box::new(move |raw| free_producer.on_free(raw)));

        self.running.set(true);
        Ok(())
    }

    pub fn stop(&self) -> EngineResult<()> {
        if !self.running.get() {
            return Err(EngineError::NotRunning);
        }
        self.adapter.uninstall_event_hook(HookKind::New);
        self.adapter.uninstall_event_hook(HookKind::Free);
        self.drain();
        self.running.set(false);
        Ok(())
    }

    /// Reset counters and the object table. Refused while running: a
    /// queued event could still reference the table being cleared.
    pub fn clear(&self) -> EngineResult<()> {
        if self.running.get() {
            return Err(EngineError::ClearWhileRunning);
        }
        self.table.borrow_mut().clear();
        self.tracked.borrow_mut().clear();
        self.new_count.store(0, Ordering::Relaxed);
        self.free_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Drive the deferred consumer: swap the queue and apply every
    /// event it hands back. Called by `stop` and `each_object`
    /// directly; in steady state the runtime adapter's scheduled job
    /// calls it.
    pub fn drain(&self) {
        self.queue.process_all(|event| {
            if event.capture == self.id && !matches!(event.kind, EventKind::None) {
                self.process_event(event);
            }
        });
    }

    fn process_event(&self, event: &Event) {
        match event.kind {
            EventKind::New => self.process_new(event),
            EventKind::Free => self.process_free(event),
            EventKind::None => {}
        }
    }

    fn process_new(&self, event: &Event) {
        let class = event.class.expect("NEW event always carries a class");
        let object = event.object;

        self.paused_depth.fetch_add(1, Ordering::AcqRel);
        let data = {
            let mut tracked = self.tracked.borrow_mut();
            let allocations = tracked.entry(class.0).or_insert_with(Allocations::new);
            allocations.record_new();
            allocations.invoke_callback(class, CallbackEvent::New, None)
        };
        if let Err(err) = self.table.borrow_mut().insert(object, class, data) {
            log::error!("object table insert failed processing NEW: {err}");
        }
        self.paused_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn process_free(&self, event: &Event) {
        let object = event.object;

        self.paused_depth.fetch_add(1, Ordering::AcqRel);
        let removed = self.table.borrow_mut().delete(object);
        if let Some((class, data)) = removed {
            let mut tracked = self.tracked.borrow_mut();
            if let Some(allocations) = tracked.get_mut(&class.0) {
                allocations.record_free();
                if data.is_some() {
                    allocations.invoke_callback(class, CallbackEvent::Free, data);
                }
            }
            // Class untracked since the matching NEW: silently absorbed.
        }
        // No entry: pre-tracking allocation or duplicate FREE; absorbed.
        self.paused_depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Attach (or replace) the callback for `class`, creating its
    /// `Allocations` record if this is the first time `class` is seen.
    pub fn track(&self, class: ClassRef, callback: Option<Callback<D>>) {
        let mut tracked = self.tracked.borrow_mut();
        let allocations = tracked.entry(class.0).or_insert_with(Allocations::new);
        if let Some(callback) = callback {
            allocations.track(callback);
        }
    }

    pub fn untrack(&self, class: ClassRef) {
        self.tracked.borrow_mut().remove(&class.0);
    }

    pub fn tracking(&self, class: ClassRef) -> bool {
        self.tracked.borrow().get(&class.0).map(|a| a.is_tracking()).unwrap_or(false)
    }

    pub fn retained_count_of(&self, class: ClassRef) -> u64 {
        self.tracked.borrow().get(&class.0).map(|a| a.retained_count()).unwrap_or(0)
    }

    pub fn new_count(&self) -> u64 {
        self.new_count.load(Ordering::Relaxed)
    }

    pub fn free_count(&self) -> u64 {
        self.free_count.load(Ordering::Relaxed)
    }

    pub fn retained_count(&self) -> u64 {
        self.new_count().saturating_sub(self.free_count())
    }

    pub fn paused_depth(&self) -> i32 {
        self.paused_depth.load(Ordering::Acquire)
    }

    /// Borrow out the `Allocations` record for `class`, mirroring
    /// `Capture[class]`.
    pub fn get(&self, class: ClassRef) -> Option<Ref<'_, Allocations<D>>> {
        let tracked = self.tracked.borrow();
        if tracked.contains_key(&class.0) {
            Some(Ref::map(tracked, |t| t.get(&class.0).unwrap()))
        } else {
            None
        }
    }

    pub fn each(&self, mut f: impl FnMut(ClassRef, &Allocations<D>)) {
        for (&class, allocations) in self.tracked.borrow().iter() {
            f(ClassRef(class), allocations);
        }
    }

    /// Safe against concurrent allocator activity: drains the queue so
    /// the table reflects every event enqueued so far, then disables
    /// collection (re-enabled on every exit path, including a
    /// panicking `f`) for the duration of the walk.
    pub fn each_object(&self, class: Option<ClassRef>, mut f: impl FnMut(ObjectRef, &Option<D>)) {
        self.drain();
        let _guard = CollectionGuard::new(self.adapter.as_ref());
        let table = self.table.borrow();
        for entry in table.iter() {
            if class.map_or(true, |c| c == entry.class) {
                f(entry.object, entry.data);
            }
        }
    }

    /// The runtime adapter this capture attached to; used by
    /// [`crate::sampler::Sampler`] for stack capture and collection
    /// triggers.
    pub fn adapter(&self) -> Arc<dyn RuntimeAdapter> {
        self.adapter.clone()
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            tracked_count: self.tracked.borrow().len(),
            object_table_size: self.table.borrow().size(),
        }
    }
}
