use std::cell::RefCell;
use std::collections::HashMap;

use super::{ClassRef, DeferredHandle, Frame, HookKind, ObjectRef, RawTraceArg, RuntimeAdapter};

/// A no-op [`RuntimeAdapter`] used to exercise the engine without a real
/// managed runtime attached. Object/class resolution is the identity
/// mapping on the raw trace argument; relocation, trackability, and
/// captured stacks are all driven by whatever the test installs.
#[derive(Default)]
pub struct NullAdapter {
    hooks: RefCell<HashMap<HookKind, Vec<Box<dyn Fn(RawTraceArg) + Send + Sync>>>>,
    relocations: RefCell<HashMap<usize, usize>>,
    untrackable: RefCell<Vec<usize>>,
    stack: RefCell<Vec<Frame>>,
    deferred_registered: RefCell<bool>,
    collection_depth: RefCell<i32>,
    collection_triggers: RefCell<u64>,
    /// Overrides `resolve_class`'s default (`raw.0` echoed back as the
    /// class id) so tests can put several distinct objects under one
    /// class.
    class_overrides: RefCell<HashMap<usize, usize>>,
}

impl NullAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the host firing an allocation/free event for `raw`.
    pub fn fire(&self, kind: HookKind, raw: RawTraceArg) {
        if let Some(hooks) = self.hooks.borrow().get(&kind) {
            for hook in hooks {
                hook(raw);
            }
        }
    }

    /// Make `old -> new` effective for the next [`RuntimeAdapter::relocate`] call.
    pub fn set_relocation(&self, old: usize, new: usize) {
        self.relocations.borrow_mut().insert(old, new);
    }

    /// Mark `object` as not trackable (an internal object kind).
    pub fn mark_untrackable(&self, object: usize) {
        self.untrackable.borrow_mut().push(object);
    }

    /// Set the frames the next [`RuntimeAdapter::capture_stack`] call returns.
    pub fn set_stack(&self, frames: Vec<Frame>) {
        *self.stack.borrow_mut() = frames;
    }

    pub fn collection_is_enabled(&self) -> bool {
        *self.collection_depth.borrow() == 0
    }

    pub fn collection_trigger_count(&self) -> u64 {
        *self.collection_triggers.borrow()
    }

    /// Make `resolve_class(RawTraceArg(object))` return `class` instead
    /// of the default `object` echo.
    pub fn set_class(&self, object: usize, class: usize) {
        self.class_overrides.borrow_mut().insert(object, class);
    }
}

impl RuntimeAdapter for NullAdapter {
    fn install_event_hook(&self, kind: HookKind, callback: Box<dyn Fn(RawTraceArg) + Send + Sync>) {
        self.hooks.borrow_mut().entry(kind).or_default().push(callback);
    }

    fn uninstall_event_hook(&self, kind: HookKind) {
        self.hooks.borrow_mut().remove(&kind);
    }

    fn resolve_object(&self, raw: RawTraceArg) -> ObjectRef {
        ObjectRef(raw.0)
    }

    fn resolve_class(&self, raw: RawTraceArg) -> Option<ClassRef> {
        match self.class_overrides.borrow().get(&raw.0) {
            Some(&class) => Some(ClassRef(class)),
            None => Some(ClassRef(raw.0)),
        }
    }

    fn schedule_deferred(&self, _handle: DeferredHandle) -> bool {
        let mut registered = self.deferred_registered.borrow_mut();
        if *registered {
            return false;
        }
        *registered = true;
        true
    }

    fn write_barrier(&self, _container: ObjectRef, _old_field: ObjectRef, _new_field: ObjectRef) {}

    fn relocate(&self, reference: ObjectRef) -> ObjectRef {
        match self.relocations.borrow().get(&reference.0) {
            Some(&new) => ObjectRef(new),
            None => reference,
        }
    }

    fn is_trackable(&self, object: ObjectRef) -> bool {
        !self.untrackable.borrow().contains(&object.0)
    }

    fn disable_collection(&self) {
        *self.collection_depth.borrow_mut() += 1;
    }

    fn enable_collection(&self) {
        *self.collection_depth.borrow_mut() -= 1;
    }

    fn capture_stack(&self, depth: usize) -> Vec<Frame> {
        let stack = self.stack.borrow();
        stack.iter().take(depth).cloned().collect()
    }

    fn trigger_collection(&self) {
        *self.collection_triggers.borrow_mut() += 1;
    }
}
