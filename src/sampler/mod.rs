//! Periodic control loop converting raw retained counts into a leak
//! signal, escalating suspicious classes to stack-capturing mode, and
//! keeping their call trees bounded (component C7).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;

use crate::adapter::{ClassRef, Frame};
use crate::allocations::{Callback, CallbackEvent};
use crate::calltree::{By, CallTree, Hotspot, Node, PathResult};
use crate::capture::Capture;
use crate::error::EngineResult;
use crate::util::address_of;

#[cfg(test)]
mod test;

const DEFAULT_THRESHOLD: u64 = 1000;
/// Upper bound on the frame buffer a stack-capturing callback fills in
/// before handing it to [`CallTree::record`], avoiding a heap
/// allocation on every escalated `NEW`. `depth` is still honored exactly
/// when it is within this bound, which comfortably covers any realistic
/// `Sampler::new` configuration.
const MAX_CAPTURE_DEPTH: usize = 128;

/// Tuning knobs for [`Sampler::new`], in the teacher's `config::Opts`
/// idiom: a plain, `Default`-able struct whose fields are set directly
/// rather than threaded through a long positional constructor.
///
/// ```rust
/// use retain_track::sampler::SamplerOpts;
///
/// let mut opts = SamplerOpts::default();
/// opts.depth = 16;
/// opts.increases_threshold = 5;
/// ```
#[derive(Clone)]
pub struct SamplerOpts {
    /// Stack depth captured by an escalated class's `NEW` callback.
    pub depth: usize,
    /// Optional predicate restricting which captured frames are kept
    /// (e.g. filtering out engine-internal frames).
    pub filter: Option<Rc<dyn Fn(&Frame) -> bool>>,
    /// Number of ratchet crossings (see [`Sample`]) before a class is
    /// escalated to stack-capturing mode.
    pub increases_threshold: u32,
    /// Children kept per call-tree node on each prune pass.
    pub prune_limit: usize,
    /// Call-tree insertion count that triggers the next prune pass.
    pub prune_threshold: u64,
    /// Trigger a full collection before every sample tick. Distorts
    /// allocation timing, so it defaults to off.
    pub gc: bool,
    /// Ratchet threshold a class's retained count must clear `max_observed`
    /// by before counting as an increase.
    pub threshold: u64,
}

impl Default for SamplerOpts {
    fn default() -> Self {
        SamplerOpts {
            depth: 32,
            filter: None,
            increases_threshold: 10,
            prune_limit: 1000,
            prune_threshold: 10_000,
            gc: false,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Per-class ratcheting state. `max_observed` only ever grows, and only
/// when `current` clears it by more than `threshold`; each such crossing
/// bumps `increases`.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub target: ClassRef,
    pub current: u64,
    pub max_observed: u64,
    pub increases: u32,
    pub samples_taken: u64,
    pub threshold: u64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocationsSnapshot {
    pub new: u64,
    pub free: u64,
    pub retained: u64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocationRoots {
    pub top_paths: Vec<PathResult>,
    pub hotspots: Vec<Hotspot>,
}

/// The result of [`Sampler::analyze`]; emittable as JSON for downstream
/// tooling when the crate's `serde` feature is enabled, the same way
/// the teacher's `sample::record` types derive `Serialize` behind that
/// feature.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalyzeReport {
    pub allocations: AllocationsSnapshot,
    pub allocation_roots: Option<AllocationRoots>,
    pub retained_addresses: Option<Vec<String>>,
}

/// Polls a [`Capture`]'s per-class retained counts, escalates classes
/// whose retained count keeps ratcheting upward to stack-capturing
/// mode, and prunes their call trees once they grow past
/// `prune_threshold` insertions.
///
/// Escalation is hard-wired to `Capture<Node>`: the whole point of
/// escalating is to hand the resulting call-tree leaf back as the
/// per-object `data` so `decrement_path` can run on free, and that
/// leaf's type is [`Node`].
pub struct Sampler {
    capture: Arc<Capture<Node>>,
    depth: usize,
    filter: Option<Rc<dyn Fn(&Frame) -> bool>>,
    increases_threshold: u32,
    prune_limit: usize,
    prune_threshold: u64,
    gc: bool,
    threshold: u64,
    samples: RefCell<HashMap<usize, Sample>>,
    trees: RefCell<HashMap<usize, Rc<RefCell<CallTree>>>>,
}

impl Sampler {
    pub fn new(capture: Arc<Capture<Node>>, opts: SamplerOpts) -> Self {
        Sampler {
            capture,
            depth: opts.depth,
            filter: opts.filter,
            increases_threshold: opts.increases_threshold,
            prune_limit: opts.prune_limit,
            prune_threshold: opts.prune_threshold,
            gc: opts.gc,
            threshold: opts.threshold,
            samples: RefCell::new(HashMap::new()),
            trees: RefCell::new(HashMap::new()),
        }
    }

    pub fn start(&self) -> EngineResult<()> {
        self.capture.start()
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.capture.stop()
    }

    /// Begin sampling `class`'s retained count; lazily creates its
    /// `Sample` ratchet state and call tree.
    pub fn track(&self, class: ClassRef) {
        self.samples.borrow_mut().entry(class.0).or_insert_with(|| Sample {
            target: class,
            current: 0,
            max_observed: 0,
            increases: 0,
            samples_taken: 0,
            threshold: self.threshold,
        });
        self.trees.borrow_mut().entry(class.0).or_insert_with(|| Rc::new(RefCell::new(CallTree::new())));
    }

    pub fn untrack(&self, class: ClassRef) {
        self.samples.borrow_mut().remove(&class.0);
        self.trees.borrow_mut().remove(&class.0);
        self.capture.untrack(class);
    }

    /// Take one sample of every tracked class's retained count, yield
    /// `(sample, increased)` to `on_sample`, escalate classes that just
    /// crossed `increases_threshold`, then prune trees that have grown
    /// past `prune_threshold` insertions.
    pub fn sample(&self, mut on_sample: impl FnMut(&Sample, bool)) {
        let class_ids: Vec<usize> = self.samples.borrow().keys().copied().collect();

        for class_id in class_ids {
            let class = ClassRef(class_id);
            let current = self.capture.retained_count_of(class);

            let mut increased = false;
            {
                let mut samples = self.samples.borrow_mut();
                if let Some(sample) = samples.get_mut(&class_id) {
                    sample.current = current;
                    sample.samples_taken += 1;
                    if current.saturating_sub(sample.max_observed) > sample.threshold {
                        sample.max_observed = current;
                        sample.increases += 1;
                        increased = true;
                    }
                }
            }

            let sample = match self.samples.borrow().get(&class_id).copied() {
                Some(sample) => sample,
                None => continue,
            };
            on_sample(&sample, increased);

            if sample.increases >= self.increases_threshold {
                self.escalate(class);
            }
        }

        self.prune_grown_trees();
    }

    fn escalate(&self, class: ClassRef) {
        if self.capture.tracking(class) {
            return;
        }

        let tree = self
            .trees
            .borrow_mut()
            .entry(class.0)
            .or_insert_with(|| Rc::new(RefCell::new(CallTree::new())))
            .clone();
        let adapter = self.capture.adapter();
        let depth = self.depth;
        let filter = self.filter.clone();

        let callback: Callback<Node> = Box::new(move |_class, event, data| match event {
            CallbackEvent::New => {
                let frames: ArrayVec<Frame, MAX_CAPTURE_DEPTH> = adapter
                    .capture_stack(depth.min(MAX_CAPTURE_DEPTH))
                    .into_iter()
                    .filter(|frame| filter.as_ref().map_or(true, |f| f(frame)))
                    .take(MAX_CAPTURE_DEPTH)
                    .collect();
                Some(tree.borrow_mut().record(&frames))
            }
            CallbackEvent::Free => {
                if let Some(node) = data {
                    node.decrement_path();
                }
                None
            }
        });
        self.capture.track(class, Some(callback));
    }

    fn prune_grown_trees(&self) {
        for tree in self.trees.borrow().values() {
            let mut tree = tree.borrow_mut();
            if tree.insertion_count() >= self.prune_threshold {
                let detached = tree.prune(self.prune_limit);
                if detached > 0 {
                    log::debug!("sampler pruned {detached} call tree nodes");
                }
                tree.reset_insertion_count();
            }
        }
    }

    /// Loop sampling every `interval` until the underlying capture is
    /// stopped. Optionally triggers a full collection before each
    /// sample if `gc` was set — this distorts allocation timing, which
    /// is why it is never done implicitly elsewhere in the engine.
    pub fn run(&self, interval: Duration, mut on_sample: impl FnMut(&Sample, bool)) {
        while self.capture.is_running() {
            if self.gc {
                self.capture.adapter().trigger_collection();
            }
            let tick_start = Instant::now();
            self.sample(&mut on_sample);
            if let Some(remaining) = interval.checked_sub(tick_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    /// Snapshot a tracked class for reporting. Returns `None` if its
    /// retained count is below `retained_minimum`.
    pub fn analyze(
        &self,
        class: ClassRef,
        allocation_roots: bool,
        retained_addresses: Option<usize>,
        retained_minimum: u64,
    ) -> Option<AnalyzeReport> {
        let retained = self.capture.retained_count_of(class);
        if retained < retained_minimum {
            return None;
        }

        let allocations = match self.capture.get(class) {
            Some(allocations) => AllocationsSnapshot {
                new: allocations.new_count(),
                free: allocations.free_count(),
                retained: allocations.retained_count(),
            },
            None => AllocationsSnapshot { new: 0, free: 0, retained },
        };

        let allocation_roots = allocation_roots
            .then(|| self.trees.borrow().get(&class.0).map(|tree| {
                let tree = tree.borrow();
                AllocationRoots {
                    top_paths: tree.top_paths(10, By::Retained),
                    hotspots: tree.hotspots(10, By::Retained),
                }
            }))
            .flatten();

        let retained_addresses = retained_addresses.map(|limit| {
            let mut addresses = Vec::new();
            self.capture.each_object(Some(class), |object, _| {
                if addresses.len() < limit {
                    addresses.push(address_of(object));
                }
            });
            addresses
        });

        Some(AnalyzeReport {
            allocations,
            allocation_roots,
            retained_addresses,
        })
    }
}
