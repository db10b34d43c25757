//! Per-sample tree construction and the walks over it.
//!
//! The parent/child links are rebuilt from scratch on every sample: pids can
//! be recycled between samples, so an edge is only ever trusted for the
//! sample it was built in. Both recursive walks colour entries on the way
//! down and uncolour on the way back up, which bounds them even when the
//! reported parent pointers form a cycle.

use tracing::debug;

use crate::report::Report;
use crate::tree::registry::{EntryId, Registry};

/// Aggregate of one sampling walk.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SampleTotals {
    /// CPU seconds summed over entries observed this sample.
    pub time: f64,
    /// Resident MB summed over entries observed this sample.
    pub memory: f64,
    /// Entries observed this sample that the walk reached.
    pub visited: u64,
    /// Entries reached for the first time ever.
    pub fresh: u64,
}

impl Registry {
    /// Rebuilds parent/child links for the current active list.
    ///
    /// First pass clears the link fields of every active entry and of every
    /// referenced parent (which may be inactive, or synthesised here from the
    /// declared ppid). Second pass appends every active entry except the root
    /// child to its parent's child list, keeping sibling discovery order.
    pub fn connect_tree(&mut self, root_pid: i32) {
        let mut cursor = self.active_head;
        while let Some(id) = cursor {
            debug_assert!(self.entry(id).active);
            let ppid = self.entry(id).ppid;
            let parent = self.find_or_insert(ppid);
            self.clear_links(parent);
            self.clear_links(id);
            cursor = self.entry(id).next_active;
        }

        let mut connected = 0u64;
        let mut cursor = self.active_head;
        while let Some(id) = cursor {
            let next = self.entry(id).next_active;
            if self.entry(id).pid != root_pid {
                let ppid = self.entry(id).ppid;
                let parent = self.find_or_insert(ppid);
                self.entry_mut(id).parent = Some(parent);
                match self.entry(parent).last_child {
                    Some(last) => {
                        debug_assert!(self.entry(last).next_sibling.is_none());
                        self.entry_mut(last).next_sibling = Some(id);
                    }
                    None => self.entry_mut(parent).first_child = Some(id),
                }
                self.entry_mut(parent).last_child = Some(id);
                debug!("connect {} -> {}", ppid, self.entry(id).pid);
                connected += 1;
            }
            cursor = next;
        }
        debug!("connected {} processes", connected);
    }

    fn clear_links(&mut self, id: EntryId) {
        let entry = self.entry_mut(id);
        entry.parent = None;
        entry.first_child = None;
        entry.last_child = None;
        entry.next_sibling = None;
    }

    /// Sums usage over the tree rooted at `root` for sample `seq`.
    ///
    /// Only entries actually observed this sample contribute; entries reached
    /// through the tree with a stale `sampled` are skipped. A zero
    /// `totals.visited` means the sample was empty. Cyclic parent data is
    /// reported as a warning on the log sink.
    pub fn aggregate(&mut self, root: EntryId, seq: u64, report: &Report) -> SampleTotals {
        let mut totals = SampleTotals::default();
        self.aggregate_into(root, seq, &mut totals, report);
        totals
    }

    fn aggregate_into(&mut self, id: EntryId, seq: u64, totals: &mut SampleTotals, report: &Report) {
        if self.entry(id).in_sampling_walk {
            report.warning("cyclic process dependencies during sampling");
            return;
        }

        if self.entry(id).sampled == seq {
            let entry = self.entry(id);
            totals.time += entry.time;
            totals.memory += entry.memory;
            totals.visited += 1;
            if entry.fresh {
                totals.fresh += 1;
                debug!("sampling (new) {} ({:.3} sec, {:.3} MB)", entry.pid, entry.time, entry.memory);
            } else {
                debug!("sampling {} ({:.3} sec, {:.3} MB)", entry.pid, entry.time, entry.memory);
            }
        }

        self.entry_mut(id).in_sampling_walk = true;
        let mut child = self.entry(id).first_child;
        while let Some(c) = child {
            self.aggregate_into(c, seq, totals, report);
            child = self.entry(c).next_sibling;
        }
        self.entry_mut(id).in_sampling_walk = false;
    }

    /// Deactivates entries that sample `seq` did not observe.
    ///
    /// Their CPU time is folded into `accumulated_time`, so the aggregate
    /// count stays monotone when processes exit between samples. Returns the
    /// number of entries flushed.
    pub fn flush_inactive(&mut self, seq: u64) -> u64 {
        let mut flushed = 0u64;
        let mut prev: Option<EntryId> = None;
        let mut cursor = self.active_head;

        while let Some(id) = cursor {
            debug_assert!(self.entry(id).active);
            let next = self.entry(id).next_active;

            if self.entry(id).sampled == seq {
                prev = Some(id);
            } else {
                let entry = self.entry_mut(id);
                entry.active = false;
                entry.next_active = None;
                let pid = entry.pid;
                let time = entry.time;
                match prev {
                    Some(p) => self.entry_mut(p).next_active = next,
                    None => self.active_head = next,
                }
                debug!("deactivate {} ({:.3} sec)", pid, time);
                self.accumulated_time += time;
                flushed += 1;
            }

            cursor = next;
        }

        self.active_tail = prev;
        debug!("flushed {} processes", flushed);
        flushed
    }

    /// Collects the pids of the tree rooted at `root`, children before
    /// parents, visiting each entry at most once even on cyclic graphs.
    pub fn kill_order(&mut self, root: EntryId) -> Vec<i32> {
        let mut order = Vec::new();
        self.kill_order_into(root, &mut order);
        order
    }

    fn kill_order_into(&mut self, id: EntryId, order: &mut Vec<i32>) {
        if self.entry(id).in_killing_walk {
            return;
        }
        self.entry_mut(id).in_killing_walk = true;

        let mut child = self.entry(id).first_child;
        while let Some(c) = child {
            self.kill_order_into(c, order);
            child = self.entry(c).next_sibling;
        }

        self.entry_mut(id).in_killing_walk = false;
        order.push(self.entry(id).pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: i32 = 100;

    /// A file-backed sink so tests can assert what the walks log.
    fn sink() -> (Report, tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let report = Report::to_file(path.to_str().unwrap()).unwrap();
        (report, dir, path)
    }

    /// root 100 with children 101, 102; 101 has child 103.
    fn populated() -> Registry {
        let mut registry = Registry::new();
        registry.add_process(ROOT, 50, 1.0, 10.0, 1);
        registry.add_process(101, ROOT, 2.0, 20.0, 1);
        registry.add_process(102, ROOT, 4.0, 40.0, 1);
        registry.add_process(103, 101, 8.0, 80.0, 1);
        registry.connect_tree(ROOT);
        registry
    }

    #[test]
    fn connect_links_children_to_their_parents() {
        let registry = populated();
        // The root's declared parent gets a synthesised, inactive entry with
        // no children (the root is never linked under it).
        let parent = registry.lookup(50).unwrap();
        assert!(!registry.entry(parent).active);
        assert_eq!(registry.entry(parent).first_child, None);

        // 103's parent link points at 101's entry.
        let c = registry.lookup(103).unwrap();
        let p = registry.lookup(101).unwrap();
        assert_eq!(registry.entry(c).parent, Some(p));
        assert_eq!(registry.entry(p).first_child, Some(c));
        assert_eq!(registry.entry(p).last_child, Some(c));
    }

    #[test]
    fn connect_synthesises_unsampled_parent_entries() {
        let mut registry = Registry::new();
        registry.add_process(ROOT, 50, 0.0, 0.0, 1);
        registry.add_process(200, 150, 0.0, 0.0, 1); // parent 150 never observed
        registry.connect_tree(ROOT);

        let parent = registry.lookup(150).unwrap();
        assert!(!registry.entry(parent).active);
        assert_eq!(registry.entry(parent).first_child, registry.lookup(200));
    }

    #[test]
    fn aggregate_sums_the_whole_tree_once() {
        let mut registry = populated();
        let (report, _dir, path) = sink();
        let root = registry.lookup(ROOT).unwrap();
        let totals = registry.aggregate(root, 1, &report);

        assert_eq!(totals.visited, 4);
        assert_eq!(totals.fresh, 4);
        assert!((totals.time - 15.0).abs() < 1e-9);
        assert!((totals.memory - 150.0).abs() < 1e-9);

        // Walk colouring is clean afterwards and nothing was logged.
        for pid in [ROOT, 101, 102, 103] {
            let id = registry.lookup(pid).unwrap();
            assert!(!registry.entry(id).in_sampling_walk);
        }
        assert!(std::fs::read_to_string(&path).unwrap().is_empty());
    }

    #[test]
    fn aggregate_skips_entries_with_stale_samples() {
        let mut registry = populated();
        // Second sample: only 101 reobserved under the root.
        registry.add_process(ROOT, 50, 1.5, 10.0, 2);
        registry.add_process(101, ROOT, 2.5, 20.0, 2);
        registry.connect_tree(ROOT);

        let (report, _dir, _path) = sink();
        let root = registry.lookup(ROOT).unwrap();
        let totals = registry.aggregate(root, 2, &report);

        // 102/103 are still active and still linked into the tree but were
        // not observed in sample 2, so they contribute nothing.
        assert_eq!(totals.visited, 2);
        assert_eq!(totals.fresh, 0);
        assert!((totals.time - 4.0).abs() < 1e-9);
    }

    #[test]
    fn flush_moves_disappeared_time_into_accumulated() {
        let mut registry = populated();
        // Sample 2 reobserves everything except 103.
        registry.add_process(ROOT, 50, 1.5, 10.0, 2);
        registry.add_process(101, ROOT, 2.5, 20.0, 2);
        registry.add_process(102, ROOT, 4.5, 40.0, 2);

        let flushed = registry.flush_inactive(2);
        assert_eq!(flushed, 1);
        assert!((registry.accumulated_time() - 8.0).abs() < 1e-9);

        let gone = registry.lookup(103).unwrap();
        assert!(!registry.entry(gone).active);

        let pids: Vec<i32> = registry
            .active_ids()
            .iter()
            .map(|&id| registry.entry(id).pid)
            .collect();
        assert_eq!(pids, vec![ROOT, 101, 102]);
    }

    #[test]
    fn flush_of_everything_empties_the_active_list() {
        let mut registry = populated();
        let flushed = registry.flush_inactive(2);
        assert_eq!(flushed, 4);
        assert!(registry.active_ids().is_empty());
        assert!((registry.accumulated_time() - 15.0).abs() < 1e-9);

        // A flushed pid can come back; it rejoins the active list as fresh.
        registry.add_process(101, ROOT, 0.1, 1.0, 3);
        let id = registry.lookup(101).unwrap();
        assert!(registry.entry(id).fresh);
        assert_eq!(registry.active_ids(), vec![id]);
    }

    #[test]
    fn self_parent_cycle_terminates_both_walks() {
        let mut registry = Registry::new();
        registry.add_process(ROOT, 50, 0.0, 0.0, 1);
        registry.add_process(20, 20, 1.0, 2.0, 1); // claims to be its own parent
        registry.connect_tree(ROOT);

        let (report, _dir, path) = sink();
        let id = registry.lookup(20).unwrap();
        let totals = registry.aggregate(id, 1, &report);
        assert_eq!(totals.visited, 1);

        // The cycle lands on the log sink, not just on stderr.
        let out = std::fs::read_to_string(&path).unwrap();
        assert!(out.contains("runcap warning: cyclic process dependencies during sampling"));

        let order = registry.kill_order(id);
        assert_eq!(order, vec![20]);
        assert!(!registry.entry(id).in_killing_walk);
    }

    #[test]
    fn mutual_cycle_terminates_the_walks() {
        let mut registry = Registry::new();
        registry.add_process(ROOT, 50, 0.0, 0.0, 1);
        registry.add_process(11, 12, 1.0, 0.0, 1);
        registry.add_process(12, 11, 1.0, 0.0, 1);
        registry.connect_tree(ROOT);

        let (report, _dir, path) = sink();
        let a = registry.lookup(11).unwrap();
        let totals = registry.aggregate(a, 1, &report);
        // Each entry contributes at most once however the edges loop.
        assert!(totals.visited <= 2);
        assert!(totals.time <= 2.0 + 1e-9);
        assert!(std::fs::read_to_string(&path).unwrap().contains("runcap warning:"));

        let order = registry.kill_order(a);
        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());
    }

    #[test]
    fn kill_order_is_children_first() {
        let mut registry = populated();
        let root = registry.lookup(ROOT).unwrap();
        let order = registry.kill_order(root);

        assert_eq!(order, vec![103, 101, 102, ROOT]);
    }

    #[test]
    fn links_are_rebuilt_not_accumulated() {
        let mut registry = populated();
        // 103 is reparented to the root in the next sample.
        registry.add_process(ROOT, 50, 1.0, 10.0, 2);
        registry.add_process(101, ROOT, 2.0, 20.0, 2);
        registry.add_process(102, ROOT, 4.0, 40.0, 2);
        registry.add_process(103, ROOT, 8.0, 80.0, 2);
        registry.connect_tree(ROOT);

        let p101 = registry.lookup(101).unwrap();
        assert_eq!(registry.entry(p101).first_child, None);

        let root = registry.lookup(ROOT).unwrap();
        let order = registry.kill_order(root);
        assert_eq!(order, vec![101, 102, 103, ROOT]);
    }
}
