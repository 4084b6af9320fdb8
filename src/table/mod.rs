//! Open-addressed object table (component C3).
//!
//! Maps raw object identity to `{class, data}`. Weak by default: object
//! keys are not marked during GC, so the collector is free to reclaim
//! an object whose only reference is this table; the resulting `FREE`
//! event is what prunes the entry. A scoped strong mode
//! ([`ObjectTable::increment_strong`]) is provided for safe enumeration
//! under a moving collector.
//!
//! Linear probing, Fibonacci-mixed hash of the object pointer with its
//! low alignment bits shifted off, load factor capped at `0.5`
//! (tombstones counted against the cap), grow-by-doubling. Tombstones
//! let `delete` skip probe-chain repair at the cost of the load-factor
//! headroom they consume until the next resize, which drops them all.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::adapter::{ClassRef, ObjectRef, RuntimeAdapter};
use crate::error::{EngineError, EngineResult};


const INITIAL_CAPACITY: usize = 16;
const MAX_LOAD_FACTOR_NUM: usize = 1;
const MAX_LOAD_FACTOR_DEN: usize = 2;
const FIBONACCI_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;
/// Probes past this many slots emit a structured warning but continue.
const SOFT_PROBE_LIMIT: usize = 32;
/// Probes past this many slots abort and signal table corruption.
const HARD_PROBE_LIMIT: usize = 1024;

#[derive(Clone)]
enum Slot<D> {
    Empty,
    Tombstone,
    Occupied {
        object: ObjectRef,
        class: ClassRef,
        data: Option<D>,
    },
}

/// An occupied table entry, borrowed out of the table by
/// [`ObjectTable::get`].
pub struct EntryRef<'a, D> {
    pub object: ObjectRef,
    pub class: ClassRef,
    pub data: &'a Option<D>,
}

pub struct ObjectTable<D> {
    slots: Vec<Slot<D>>,
    count: usize,
    tombstones: usize,
    /// Toggles the table between weak (0, the usual state) and strong
    /// (>0, during a scoped enumeration) marking of object keys.
    strong_refs: AtomicU32,
}

impl<D> ObjectTable<D> {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(INITIAL_CAPACITY);
        ObjectTable {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            count: 0,
            tombstones: 0,
            strong_refs: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied entries only.
    pub fn size(&self) -> usize {
        self.count
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    fn hash(&self, object: ObjectRef) -> usize {
        // Alignment bits carry no entropy for pointer-derived keys.
        let key = (object.0 as u64) >> 3;
        let mixed = key.wrapping_mul(FIBONACCI_MULTIPLIER);
        let capacity = self.slots.len() as u64;
        // `capacity` is a power of two, so `capacity - 1` is a mask of
        // the low bits; use the high bits of the mix, which carry more
        // entropy from the multiplication.
        let shift = 64 - capacity.trailing_zeros();
        (mixed >> shift) as usize
    }

    fn over_load_factor(&self) -> bool {
        (self.count + self.tombstones) * MAX_LOAD_FACTOR_DEN >= self.slots.len() * MAX_LOAD_FACTOR_NUM
    }

    /// Insert a fresh entry for `object`, or overwrite the existing one.
    /// Returns the previous entry's data, if any. Grows the table first
    /// if doing so would exceed the 0.5 load factor cap.
    pub fn insert(&mut self, object: ObjectRef, class: ClassRef, data: Option<D>) -> EngineResult<Option<D>> {
        debug_assert!(!object.is_none());
        if self.over_load_factor() {
            self.grow()?;
        }
        self.raw_insert(object, class, data)
    }

    fn raw_insert(&mut self, object: ObjectRef, class: ClassRef, data: Option<D>) -> EngineResult<Option<D>> {
        let capacity = self.slots.len();
        let start = self.hash(object);
        let mut first_tombstone: Option<usize> = None;

        for probe in 0..capacity {
            let idx = (start + probe) % capacity;
            if probe == SOFT_PROBE_LIMIT {
                log::warn!("object table probe chain exceeded soft limit ({SOFT_PROBE_LIMIT} slots)");
            }
            if probe >= HARD_PROBE_LIMIT {
                return Err(EngineError::ProbeLimitExceeded(probe));
            }

            match &self.slots[idx] {
                Slot::Occupied { object: existing, .. } if *existing == object => {
                    let old = std::mem::replace(
                        &mut self.slots[idx],
                        Slot::Occupied { object, class, data },
                    );
                    return Ok(match old {
                        Slot::Occupied { data, .. } => data,
                        _ => unreachable!(),
                    });
                }
                Slot::Occupied { .. } => continue,
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Empty => {
                    let target = first_tombstone.unwrap_or(idx);
                    if first_tombstone.is_some() {
                        self.tombstones -= 1;
                    }
                    self.slots[target] = Slot::Occupied { object, class, data };
                    self.count += 1;
                    return Ok(None);
                }
            }
        }

        Err(EngineError::ProbeLimitExceeded(capacity))
    }

    /// Look up the entry for `object`, skipping tombstones.
    pub fn get(&self, object: ObjectRef) -> Option<EntryRef<'_, D>> {
        let capacity = self.slots.len();
        let start = self.hash(object);

        for probe in 0..capacity {
            let idx = (start + probe) % capacity;
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Tombstone => continue,
                Slot::Occupied { object: existing, class, data } => {
                    if *existing == object {
                        return Some(EntryRef {
                            object: *existing,
                            class: *class,
                            data,
                        });
                    }
                }
            }
        }
        None
    }

    pub fn contains(&self, object: ObjectRef) -> bool {
        self.get(object).is_some()
    }

    /// Delete the entry for `object`, if any, turning its slot into a
    /// tombstone (`O(1)`, no probe-chain repair). Returns the removed
    /// entry's class and data.
    pub fn delete(&mut self, object: ObjectRef) -> Option<(ClassRef, Option<D>)> {
        let capacity = self.slots.len();
        let start = self.hash(object);

        for probe in 0..capacity {
            let idx = (start + probe) % capacity;
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Tombstone => continue,
                Slot::Occupied { object: existing, .. } if *existing == object => {
                    let old = std::mem::replace(&mut self.slots[idx], Slot::Tombstone);
                    self.count -= 1;
                    self.tombstones += 1;
                    return match old {
                        Slot::Occupied { class, data, .. } => Some((class, data)),
                        _ => unreachable!(),
                    };
                }
                Slot::Occupied { .. } => continue,
            }
        }
        None
    }

    /// Grow the table, rehashing live entries and dropping all
    /// tombstones. Never shrinks.
    fn grow(&mut self) -> EngineResult<()> {
        let new_capacity = self.slots.len() * 2;
        let mut new_slots = Vec::new();
        new_slots
            .try_reserve_exact(new_capacity)
            .map_err(|_| EngineError::OutOfMemory("object table"))?;
        new_slots.extend((0..new_capacity).map(|_| Slot::Empty));

        let old_slots = std::mem::replace(&mut self.slots, new_slots);
        self.count = 0;
        self.tombstones = 0;

        for slot in old_slots {
            if let Slot::Occupied { object, class, data } = slot {
                self.raw_insert(object, class, data)?;
            }
        }
        Ok(())
    }

    /// Scoped strong mode: while any `increment_strong` call is
    /// outstanding, [`ObjectTable::mark`] also marks object keys,
    /// preventing the collector from reclaiming them mid-enumeration.
    pub fn increment_strong(&self) {
        self.strong_refs.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_strong(&self) {
        self.strong_refs.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_strong(&self) -> bool {
        self.strong_refs.load(Ordering::Acquire) > 0
    }

    /// Mark every occupied entry's class and data as reachable; object
    /// keys are marked too only while in strong mode (weak by default).
    pub fn mark(&self, mut mark_ref: impl FnMut(ObjectRef), data_ref: impl Fn(&D) -> Option<ObjectRef>) {
        let strong = self.is_strong();
        for slot in &self.slots {
            if let Slot::Occupied { object, class, data } = slot {
                mark_ref(ObjectRef(class.0));
                if let Some(data) = data {
                    if let Some(reference) = data_ref(data) {
                        mark_ref(reference);
                    }
                }
                if strong {
                    mark_ref(*object);
                }
            }
        }
    }

    /// Two-pass compaction: if nothing moved, this is a no-op; otherwise
    /// snapshot live entries, zero the table, and reinsert each at its
    /// relocated position (also relocating `class` and whatever
    /// managed reference `relocate_data` extracts from `data`). Never
    /// allocates from the managed heap — only from the table's own
    /// unmanaged backing storage.
    pub fn compact(
        &mut self,
        adapter: &dyn RuntimeAdapter,
        mut relocate_data: impl FnMut(D) -> D,
    ) -> EngineResult<bool> {
        let moved = self.slots.iter().any(|slot| match slot {
            Slot::Occupied { object, .. } => adapter.relocate(*object) != *object,
            _ => false,
        });
        if !moved {
            return Ok(false);
        }

        let capacity = self.slots.len();
        let old_slots = std::mem::replace(&mut self.slots, (0..capacity).map(|_| Slot::Empty).collect());
        self.count = 0;
        self.tombstones = 0;

        for slot in old_slots {
            if let Slot::Occupied { object, class, data } = slot {
                let new_object = adapter.relocate(object);
                let new_class = ClassRef(adapter.relocate(ObjectRef(class.0)).0);
                let new_data = data.map(&mut relocate_data);
                self.raw_insert(new_object, new_class, new_data)?;
            }
        }
        Ok(true)
    }

    /// Remove every entry, keeping the current capacity.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Empty;
        }
        self.count = 0;
        self.tombstones = 0;
    }

    /// Iterate occupied entries. Used by `Capture::each_object`, which
    /// is responsible for holding the table in strong mode and keeping
    /// the producer quiesced for the duration.
    pub fn iter(&self) -> impl Iterator<Item = EntryRef<'_, D>> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { object, class, data } => Some(EntryRef {
                object: *object,
                class: *class,
                data,
            }),
            _ => None,
        })
    }
}

impl<D> Default for ObjectTable<D> {
    fn default() -> Self {
        Self::new()
    }
}
