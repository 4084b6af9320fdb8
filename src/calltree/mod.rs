//! Per-class call-path aggregation tree (component C6).
//!
//! Deduplicates common stack prefixes: each distinct sequence of frames
//! shares every node up to where it first diverges from a previously
//! recorded path. Every node on a path carries both `total` (permanent,
//! all-time history) and `retained` (shrinks as matching objects are
//! freed) counters, so hot allocation sites stay visible even once most
//! of their instances have been reclaimed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::adapter::Frame;


struct Inner {
    frame: Option<Frame>,
    parent: Option<Weak<RefCell<Inner>>>,
    total: u64,
    retained: u64,
    children: HashMap<String, Rc<RefCell<Inner>>>,
}

impl Inner {
    fn root() -> Rc<RefCell<Inner>> {
        Rc::new(RefCell::new(Inner {
            frame: None,
            parent: None,
            total: 0,
            retained: 0,
            children: HashMap::new(),
        }))
    }
}

/// A handle to one node in a [`CallTree`]. Cheap to clone (reference
/// counted); [`Node::decrement_path`] is the only mutating operation
/// available from outside the tree, matching the engine's need to walk
/// a single retained leaf back to the root on `FREE`.
#[derive(Clone)]
pub struct Node(Rc<RefCell<Inner>>);

impl Node {
    pub fn total(&self) -> u64 {
        self.0.borrow().total
    }

    pub fn retained(&self) -> u64 {
        self.0.borrow().retained
    }

    pub fn frame(&self) -> Option<Frame> {
        self.0.borrow().frame.clone()
    }

    /// Walk from this node to the root, decrementing only `retained`.
    /// `total` is permanent and is never touched here.
    pub fn decrement_path(&self) {
        let mut current = self.0.clone();
        loop {
            {
                let mut inner = current.borrow_mut();
                inner.retained = inner.retained.saturating_sub(1);
            }
            let parent = current.borrow().parent.clone().and_then(|weak| weak.upgrade());
            match parent {
                Some(p) => current = p,
                None => break,
            }
        }
    }
}

/// Which counter [`CallTree::top_paths`] / [`CallTree::hotspots`] sort by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum By {
    Total,
    Retained,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathResult {
    pub frames: Vec<Frame>,
    pub total: u64,
    pub retained: u64,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hotspot {
    pub frame: Frame,
    pub total: u64,
    pub retained: u64,
}

pub struct CallTree {
    root: Rc<RefCell<Inner>>,
    insertion_count: u64,
}

impl CallTree {
    pub fn new() -> Self {
        CallTree {
            root: Inner::root(),
            insertion_count: 0,
        }
    }

    /// `frames` is ordered outer-to-inner-most (the root call first).
    /// Walk from the root, creating missing children, then increment
    /// `total` and `retained` by one on every node on the path
    /// (including the root). Returns the deepest (leaf) node.
    pub fn record(&mut self, frames: &[Frame]) -> Node {
        let mut current = self.root.clone();
        for frame in frames {
            let key = frame.key();
            let next = {
                let mut node = current.borrow_mut();
                node.children
                    .entry(key)
                    .or_insert_with(|| {
                        Rc::new(RefCell::new(Inner {
                            frame: Some(frame.clone()),
                            parent: Some(Rc::downgrade(&current)),
                            total: 0,
                            retained: 0,
                            children: HashMap::new(),
                        }))
                    })
                    .clone()
            };
            current = next;
        }

        let leaf = current.clone();
        let mut cursor = Some(current);
        while let Some(node) = cursor {
            {
                let mut inner = node.borrow_mut();
                inner.total += 1;
                inner.retained += 1;
            }
            cursor = node.borrow().parent.clone().and_then(|weak| weak.upgrade());
        }

        self.insertion_count += 1;
        Node(leaf)
    }

    /// Every leaf path in the tree, sorted by the chosen metric
    /// descending, truncated to `limit`.
    pub fn top_paths(&self, limit: usize, by: By) -> Vec<PathResult> {
        let mut results = Vec::new();
        let mut path = Vec::new();
        collect_paths(&self.root, &mut path, &mut results);

        results.sort_by(|a, b| metric(b, by).cmp(&metric(a, by)));
        results.truncate(limit);
        results
    }

    /// Per-frame counts summed across every occurrence of that frame in
    /// the tree, sorted by the chosen metric descending, truncated to
    /// `limit`.
    pub fn hotspots(&self, limit: usize, by: By) -> Vec<Hotspot> {
        let mut map: HashMap<String, Hotspot> = HashMap::new();
        collect_hotspots(&self.root, &mut map);

        let mut results: Vec<Hotspot> = map.into_values().collect();
        results.sort_by(|a, b| {
            let (ak, bk) = match by {
                By::Total => (a.total, b.total),
                By::Retained => (a.retained, b.retained),
            };
            bk.cmp(&ak)
        });
        results.truncate(limit);
        results
    }

    /// At every internal node with more than `limit` children, keep the
    /// `limit` children with the largest retained counts and detach the
    /// rest, recursing into the survivors. Detached subtrees have their
    /// parent/children links cleared so nothing keeps them reachable.
    /// Returns the total number of nodes detached (each detached
    /// subtree counts all of its own descendants, not just its root).
    pub fn prune(&mut self, limit: usize) -> usize {
        prune_node(&self.root, limit)
    }

    pub fn clear(&mut self) {
        self.root = Inner::root();
        self.insertion_count = 0;
    }

    pub fn total_allocations(&self) -> u64 {
        self.root.borrow().total
    }

    pub fn retained_allocations(&self) -> u64 {
        self.root.borrow().retained
    }

    pub fn insertion_count(&self) -> u64 {
        self.insertion_count
    }

    pub fn reset_insertion_count(&mut self) {
        self.insertion_count = 0;
    }
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}

fn metric(path: &PathResult, by: By) -> u64 {
    match by {
        By::Total => path.total,
        By::Retained => path.retained,
    }
}

fn collect_paths(node: &Rc<RefCell<Inner>>, path: &mut Vec<Frame>, results: &mut Vec<PathResult>) {
    let inner = node.borrow();
    if inner.children.is_empty() {
        results.push(PathResult {
            frames: path.clone(),
            total: inner.total,
            retained: inner.retained,
        });
        return;
    }
    for child in inner.children.values() {
        let frame = child.borrow().frame.clone().expect("non-root node always has a frame");
        path.push(frame);
        collect_paths(child, path, results);
        path.pop();
    }
}

fn collect_hotspots(node: &Rc<RefCell<Inner>>, map: &mut HashMap<String, Hotspot>) {
    let inner = node.borrow();
    if let Some(frame) = &inner.frame {
        let entry = map.entry(frame.key()).or_insert_with(|| Hotspot {
            frame: frame.clone(),
            total: 0,
            retained: 0,
        });
        entry.total += inner.total;
        entry.retained += inner.retained;
    }
    for child in inner.children.values() {
        collect_hotspots(child, map);
    }
}

fn count_subtree(node: &Rc<RefCell<Inner>>) -> usize {
    1 + node.borrow().children.values().map(count_subtree).sum::<usize>()
}

fn prune_node(node: &Rc<RefCell<Inner>>, limit: usize) -> usize {
    let mut entries: Vec<(String, Rc<RefCell<Inner>>)> =
        node.borrow().children.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let mut detached = 0;
    if entries.len() > limit {
        entries.sort_by(|a, b| b.1.borrow().retained.cmp(&a.1.borrow().retained));
        let victims: Vec<String> = entries[limit..].iter().map(|(k, _)| k.clone()).collect();

        let mut node_mut = node.borrow_mut();
        for key in &victims {
            if let Some(removed) = node_mut.children.remove(key) {
                detached += count_subtree(&removed);
                removed.borrow_mut().parent = None;
                removed.borrow_mut().children.clear();
            }
        }
    }

    let survivors: Vec<Rc<RefCell<Inner>>> = node
        .borrow()
        .children
        .values()
        .take(limit.max(node.borrow().children.len()))
        .cloned()
        .collect();
    for child in &survivors {
        detached += prune_node(child, limit);
    }
    detached
}
