//! Runtime adapter contract (component C1).
//!
//! This module specifies, but does not implement, the glue the engine
//! needs from a host managed runtime: allocation/free event hooks, a
//! deferred-job primitive that runs between allocator invocations, a
//! write-barrier call for references stored in engine-owned memory, a
//! relocator for compacting collectors, and stack-frame capture.
//!
//! Attaching to a concrete runtime (parsing its allocation-event API,
//! driving its GC hooks) is deliberately out of scope; only the
//! [`RuntimeAdapter`] trait such an attachment must satisfy is defined
//! here, plus a [`NullAdapter`] test double used throughout this crate's
//! own test suite.

use std::fmt;

mod null;

pub use null::NullAdapter;

/// Opaque identity of a single managed object, as seen from the host
/// runtime's allocator. Carries no type information — only equality and
/// a stable bit pattern until the next compaction.
///
/// `ObjectRef(0)` is reserved to mean "no object" (the empty table slot
/// sentinel); it is never a live object's identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectRef(pub usize);

impl ObjectRef {
    pub const NONE: ObjectRef = ObjectRef(0);

    /// The sentinel identity used to mark a tombstoned table slot. No
    /// live object may ever report this identity (real object addresses
    /// are never `usize::MAX` since that is not a valid allocation on
    /// any supported platform).
    pub const TOMBSTONE: ObjectRef = ObjectRef(usize::MAX);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.0)
    }
}

/// Opaque identity of a class/type, as seen from the host runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassRef(pub usize);

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassRef({:#x})", self.0)
    }
}

/// A raw argument handed to an allocation/free event hook by the host
/// runtime, before the adapter has resolved it into an [`ObjectRef`] /
/// [`ClassRef`]. Its shape is entirely runtime-specific; the engine
/// never inspects it directly.
#[derive(Clone, Copy)]
pub struct RawTraceArg(pub usize);

/// A single stack frame captured by the adapter for a stack-capturing
/// callback (used by [`crate::sampler::Sampler`] escalation).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    pub path: String,
    pub line: u32,
    pub label: Option<String>,
}

impl Frame {
    /// The call tree's deduplication key: `path:line[ in label]`.
    pub fn key(&self) -> String {
        match &self.label {
            Some(label) => format!("{}:{} in {}", self.path, self.line, label),
            None => format!("{}:{}", self.path, self.line),
        }
    }
}

/// Which of the two event kinds a hook is being installed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    New,
    Free,
}

/// Opaque handle identifying one registration of `schedule_deferred`.
/// The deferred-job slot is a process-wide scarce resource: at most one
/// handle may ever be registered, owned by the global `Events` singleton
/// (see [`crate::capture`]); every [`crate::capture::Capture`] instance
/// shares it and is demultiplexed by the `capture` field carried on
/// each queued event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeferredHandle(pub usize);

/// The uniform interface the engine needs from a host managed runtime.
///
/// Implementations bind real allocator/collector events; see
/// [`NullAdapter`] for the no-op test double used by this crate's own
/// tests.
pub trait RuntimeAdapter: 'static {
    /// Subscribe to allocation or free events. `callback` receives the
    /// raw trace argument for every matching event; it must be fast and
    /// must not itself allocate on the managed heap.
    fn install_event_hook(
        &self,
        kind: HookKind,
        callback: Box<dyn Fn(RawTraceArg) + Send + Sync>,
    );

    /// Remove a previously installed hook for `kind`. The host runtime
    /// guarantees no further callback invocations once this returns.
    fn uninstall_event_hook(&self, kind: HookKind);

    /// Resolve the object identity referenced by a raw trace argument.
    fn resolve_object(&self, raw: RawTraceArg) -> ObjectRef;

    /// Resolve the class of the object referenced by a raw trace
    /// argument. Only meaningful for `NEW` events; returns `None` if the
    /// class itself is not a normal, trackable class.
    fn resolve_class(&self, raw: RawTraceArg) -> Option<ClassRef>;

    /// Register (at most once per process) a deferred job that the
    /// runtime promises to invoke between allocator invocations, never
    /// inside one. Returns `None` if the runtime has no slot left.
    fn schedule_deferred(&self, handle: DeferredHandle) -> bool;

    /// Announce that a managed reference inside engine-owned memory was
    /// overwritten. Must be called every time such a store happens so a
    /// concurrent root-snapshotting collector can account for it.
    fn write_barrier(&self, container: ObjectRef, old_field: ObjectRef, new_field: ObjectRef);

    /// Map a possibly-stale managed reference to its current location.
    /// Returns the same reference when nothing has moved.
    fn relocate(&self, reference: ObjectRef) -> ObjectRef;

    /// Whether `object` is a normal, trackable object kind (as opposed
    /// to an internal kind: AST nodes, memoized internals, forwarding
    /// pointers, zombies, or uninitialized slots).
    fn is_trackable(&self, object: ObjectRef) -> bool;

    /// Disable collection for the duration of a scoped enumeration
    /// (`Capture::each_object`). Must be paired 1:1 with
    /// [`RuntimeAdapter::enable_collection`].
    fn disable_collection(&self);

    /// Re-enable collection previously disabled by
    /// [`RuntimeAdapter::disable_collection`].
    fn enable_collection(&self);

    /// Capture up to `depth` stack frames, outermost first, for the
    /// calling context. Used only by a class that has been escalated to
    /// stack-capturing mode.
    fn capture_stack(&self, depth: usize) -> Vec<Frame>;

    /// Trigger a full collection. Used only when explicitly requested by
    /// [`crate::sampler::Sampler::run`]; distorts allocation timing, so
    /// it is never called implicitly by the engine.
    fn trigger_collection(&self);
}

/// RAII guard pairing [`RuntimeAdapter::disable_collection`] with
/// [`RuntimeAdapter::enable_collection`] so collection is re-enabled on
/// every exit path — including an unwinding panic from inside a user
/// callback invoked during enumeration.
pub struct CollectionGuard<'a, A: RuntimeAdapter + ?Sized> {
    adapter: &'a A,
}

impl<'a, A: RuntimeAdapter + ?Sized> CollectionGuard<'a, A> {
    pub fn new(adapter: &'a A) -> Self {
        adapter.disable_collection();
        Self { adapter }
    }
}

impl<A: RuntimeAdapter + ?Sized> Drop for CollectionGuard<'_, A> {
    fn drop(&mut self) {
        self.adapter.enable_collection();
    }
}
