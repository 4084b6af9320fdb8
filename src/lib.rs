//! Event-driven retained-object tracking engine for managed-runtime
//! allocators.
//!
//! Answers, continuously and with low per-event cost: for every live
//! object of interest, where was it allocated, and what still retains
//! it? [`Capture`](capture::Capture) consumes `NEW`/`FREE` events from a
//! host runtime through a [`RuntimeAdapter`](adapter::RuntimeAdapter),
//! applies them from a deferred job so user callbacks never re-enter
//! the allocator, and keeps an [`ObjectTable`](table::ObjectTable) that
//! tolerates a moving collector. [`Sampler`](sampler::Sampler) turns raw
//! retained counts into a leak signal and escalates suspicious classes
//! to stack-capturing mode, recording allocation sites in a
//! [`CallTree`](calltree::CallTree).
//!
//! ## Example
//!
//! Track a class through a [`NullAdapter`](adapter::NullAdapter) (the
//! in-crate test double; a real embedding supplies its own
//! [`RuntimeAdapter`](adapter::RuntimeAdapter)), counting how many
//! instances are retained after a round of allocation and freeing.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use retain_track::adapter::{ClassRef, HookKind, NullAdapter, RawTraceArg};
//! use retain_track::capture::Capture;
//!
//! let adapter = Arc::new(NullAdapter::new());
//! let capture: Capture<()> = Capture::new(adapter.clone());
//! capture.start().unwrap();
//!
//! adapter.set_class(1, 100); // object 1 belongs to class 100
//! adapter.fire(HookKind::New, RawTraceArg(1));
//! capture.drain(); // normally driven by the adapter's deferred job
//!
//! assert_eq!(capture.retained_count_of(ClassRef(100)), 1);
//!
//! adapter.fire(HookKind::Free, RawTraceArg(1));
//! capture.drain();
//! assert_eq!(capture.retained_count_of(ClassRef(100)), 0);
//! ```
//!
//! ## Scope
//!
//! This crate is the tracking engine only. Attaching to a concrete host
//! runtime's allocation-event API, write barrier, and GC hooks is the
//! job of a [`RuntimeAdapter`](adapter::RuntimeAdapter) implementation
//! outside this crate; only the contract such an adapter must satisfy
//! is specified here. It is not a heap dumper and does not perform
//! reachability-graph traversal — attribution beyond allocation site
//! relies on external heap-dump correlation via
//! [`address_of`](util::address_of).

pub mod adapter;
pub mod allocations;
pub mod calltree;
pub mod capture;
pub mod error;
pub mod queue;
pub mod sampler;
pub mod table;
pub mod util;
