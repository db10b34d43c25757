//! Stable per-pid process registry.
//!
//! Every process ever observed gets exactly one entry, kept for the whole
//! run. Entries live in an append-only arena and are addressed by index; the
//! pid-to-entry function is an open-addressed probe table over those indices.
//! Tree links are rebuilt from scratch each sample (see `walk`), so nothing
//! here owns anything else and cyclic parent graphs cannot leak or dangle.

use tracing::debug;

/// Index of an entry in the registry arena.
pub type EntryId = usize;

/// One observed process.
///
/// `time` is CPU seconds (user + system), `memory` resident MB. `sampled`
/// is the sample sequence the entry was last observed in; an active entry
/// with a stale `sampled` has disappeared and is flushed by the accumulator.
#[derive(Debug, Clone, Default)]
pub struct ProcessEntry {
    pub pid: i32,
    pub ppid: i32,
    pub active: bool,
    pub fresh: bool,
    pub sampled: u64,
    pub time: f64,
    pub memory: f64,
    pub(crate) next_active: Option<EntryId>,
    pub(crate) parent: Option<EntryId>,
    pub(crate) first_child: Option<EntryId>,
    pub(crate) last_child: Option<EntryId>,
    pub(crate) next_sibling: Option<EntryId>,
    pub(crate) in_sampling_walk: bool,
    pub(crate) in_killing_walk: bool,
}

// Both coprime with any power-of-two table size, so the probe sequence
// visits every slot.
const PRIME1: u64 = 10007;
const PRIME2: u64 = 27;

/// Registry of all processes observed during the run.
pub struct Registry {
    slots: Vec<Option<EntryId>>,
    arena: Vec<ProcessEntry>,
    pub(crate) active_head: Option<EntryId>,
    pub(crate) active_tail: Option<EntryId>,
    pub(crate) accumulated_time: f64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            arena: Vec::new(),
            active_head: None,
            active_tail: None,
            accumulated_time: 0.0,
        }
    }

    /// Number of entries ever created.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// CPU seconds credited from processes that disappeared between samples.
    /// Monotonically non-decreasing.
    pub fn accumulated_time(&self) -> f64 {
        self.accumulated_time
    }

    pub fn entry(&self, id: EntryId) -> &ProcessEntry {
        &self.arena[id]
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> &mut ProcessEntry {
        &mut self.arena[id]
    }

    /// The probe slot holding `pid`, or the empty slot where it belongs.
    ///
    /// The table is never more than half full, so an empty slot always ends
    /// the probe sequence.
    fn slot_of(&self, pid: i32) -> usize {
        debug_assert!(self.slots.len().is_power_of_two());
        let mask = (self.slots.len() - 1) as u64;
        let mut pos = PRIME1.wrapping_mul(pid as u64) & mask;
        loop {
            match self.slots[pos as usize] {
                None => return pos as usize,
                Some(id) if self.arena[id].pid == pid => return pos as usize,
                Some(_) => pos = (pos + PRIME2) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let new_size = if self.slots.is_empty() {
            2
        } else {
            self.slots.len() * 2
        };
        debug!("resizing registry to {}", new_size);
        self.slots = vec![None; new_size];
        for id in 0..self.arena.len() {
            let pos = self.slot_of(self.arena[id].pid);
            debug_assert!(self.slots[pos].is_none());
            self.slots[pos] = Some(id);
        }
    }

    /// Looks up the entry for `pid`, if one was ever created.
    pub fn lookup(&self, pid: i32) -> Option<EntryId> {
        if self.slots.is_empty() {
            return None;
        }
        self.slots[self.slot_of(pid)]
    }

    /// Returns the entry for `pid`, creating a zeroed one on miss.
    ///
    /// This is also how inactive parents are synthesised during tree
    /// construction: a ppid that was never sampled still gets an entry.
    pub fn find_or_insert(&mut self, pid: i32) -> EntryId {
        if self.arena.len() >= self.slots.len() / 2 {
            self.grow();
        }
        let pos = self.slot_of(pid);
        if let Some(id) = self.slots[pos] {
            return id;
        }

        debug!("insert {}", pid);
        let id = self.arena.len();
        self.arena.push(ProcessEntry {
            pid,
            ..ProcessEntry::default()
        });
        self.slots[pos] = Some(id);
        id
    }

    /// Folds one snapshot record into the registry.
    ///
    /// A known active entry gets its usage refreshed (and its ppid, which can
    /// change when the original parent exits and the process is reparented).
    /// Anything else becomes active and joins the tail of the active list.
    pub fn add_process(&mut self, pid: i32, ppid: i32, time: f64, memory: f64, seq: u64) {
        debug_assert!(pid > 0);
        debug_assert!(ppid >= 0);

        let id = self.find_or_insert(pid);
        let entry = &mut self.arena[id];

        if entry.active {
            entry.fresh = false;
            if entry.ppid != ppid {
                entry.ppid = ppid;
                debug!("add (new parent) {} (parent {}, {:.3} sec, {:.3} MB)", pid, ppid, time, memory);
            } else {
                debug!("add {} (parent {}, {:.3} sec, {:.3} MB)", pid, ppid, time, memory);
            }
            entry.time = time;
            entry.memory = memory;
            entry.sampled = seq;
        } else {
            debug!("add (new) {} (parent {}, {:.3} sec, {:.3} MB)", pid, ppid, time, memory);
            entry.fresh = true;
            entry.active = true;
            entry.ppid = ppid;
            entry.time = time;
            entry.memory = memory;
            entry.sampled = seq;
            entry.next_active = None;

            match self.active_tail {
                Some(tail) => self.arena[tail].next_active = Some(id),
                None => {
                    debug_assert!(self.active_head.is_none());
                    self.active_head = Some(id);
                }
            }
            self.active_tail = Some(id);
        }
    }

    /// Active entries in discovery order of the most recent snapshot.
    pub fn active_ids(&self) -> Vec<EntryId> {
        let mut ids = Vec::new();
        let mut cursor = self.active_head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.arena[id].next_active;
        }
        ids
    }
}
