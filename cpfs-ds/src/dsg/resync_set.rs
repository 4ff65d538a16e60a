//! Inode resync bookkeeping.
//!
//! Tracks which inodes still await resync and which are being resynced right
//! now. The two sets live behind their own lock, separate from the state
//! lock: membership checks run on every inode request while state commits are
//! rare, and sharing one lock would serialize the two.
//!
//! Callers that replace the pending set as part of a transition into
//! `Resync` take the state write lock first and this lock second.

use cpfs_core::InodeNum;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::ops::Bound;

#[derive(Debug, Default)]
struct ResyncSets {
    /// Inodes awaiting resync, ordered so batches are admitted lowest first.
    to_resync: BTreeSet<InodeNum>,
    /// Inodes under resync. Always disjoint from `to_resync`.
    resyncing: HashSet<InodeNum>,
}

/// The `to_resync` / `resyncing` inode sets.
#[derive(Debug, Default)]
pub struct ResyncSetTracker {
    sets: RwLock<ResyncSets>,
}

impl ResyncSetTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the inodes pending resync and clear the in-progress set.
    ///
    /// A new resync round invalidates whatever the previous round had in
    /// flight. The old sets are freed after the lock is released.
    pub fn set_pending_inodes(&self, inodes: HashSet<InodeNum>) {
        let old = {
            let mut sets = self.sets.write();
            std::mem::replace(
                &mut *sets,
                ResyncSets {
                    to_resync: inodes.into_iter().collect(),
                    resyncing: HashSet::new(),
                },
            )
        };
        drop(old);
    }

    /// Whether an inode is waiting for resync.
    pub fn is_pending(&self, inode: InodeNum) -> bool {
        self.sets.read().to_resync.contains(&inode)
    }

    /// Start resyncing `inodes`.
    ///
    /// Each listed inode leaves the pending set. The previous in-progress set
    /// is replaced, not merged: its inodes are considered done.
    pub fn set_in_progress(&self, inodes: &[InodeNum]) {
        let resyncing: HashSet<InodeNum> = inodes.iter().copied().collect();
        let old = {
            let mut sets = self.sets.write();
            for inode in &resyncing {
                sets.to_resync.remove(inode);
            }
            std::mem::replace(&mut sets.resyncing, resyncing)
        };
        drop(old);
    }

    /// Move those `candidates` that are still pending to in progress.
    ///
    /// Returns the inodes admitted, or `None` without touching either set
    /// while an earlier batch is unacknowledged.
    pub fn try_admit(&self, candidates: &[InodeNum]) -> Option<Vec<InodeNum>> {
        let mut sets = self.sets.write();
        if !sets.resyncing.is_empty() {
            return None;
        }
        let mut admitted = Vec::with_capacity(candidates.len());
        for inode in candidates {
            if sets.to_resync.remove(inode) {
                sets.resyncing.insert(*inode);
                admitted.push(*inode);
            }
        }
        Some(admitted)
    }

    /// Put every in-progress inode back into the pending set.
    ///
    /// Returns how many inodes were requeued.
    pub fn requeue_in_progress(&self) -> usize {
        let mut sets = self.sets.write();
        let resyncing = std::mem::take(&mut sets.resyncing);
        let requeued = resyncing.len();
        sets.to_resync.extend(resyncing);
        requeued
    }

    /// Whether an inode is being resynced right now.
    pub fn is_in_progress(&self, inode: InodeNum) -> bool {
        self.sets.read().resyncing.contains(&inode)
    }

    /// Mark one in-progress inode as done.
    ///
    /// Returns false if the inode was not in progress, e.g. because a new
    /// round replaced the sets meanwhile.
    pub fn complete(&self, inode: InodeNum) -> bool {
        self.sets.write().resyncing.remove(&inode)
    }

    /// Number of inodes still awaiting resync.
    pub fn pending_count(&self) -> usize {
        self.sets.read().to_resync.len()
    }

    /// Number of inodes being resynced.
    pub fn in_progress_count(&self) -> usize {
        self.sets.read().resyncing.len()
    }

    /// Pending inodes in ascending order.
    pub fn pending_inodes(&self) -> Vec<InodeNum> {
        self.sets.read().to_resync.iter().copied().collect()
    }

    /// Up to `limit` pending inodes above `after`, in ascending order.
    pub fn pending_after(&self, after: Option<InodeNum>, limit: usize) -> Vec<InodeNum> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.sets
            .read()
            .to_resync
            .range((lower, Bound::Unbounded))
            .take(limit)
            .copied()
            .collect()
    }

    /// Drop both sets.
    pub fn clear(&self) {
        self.set_pending_inodes(HashSet::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inodes(raw: &[u64]) -> Vec<InodeNum> {
        raw.iter().copied().map(InodeNum::new).collect()
    }

    fn set(raw: &[u64]) -> HashSet<InodeNum> {
        inodes(raw).into_iter().collect()
    }

    #[test]
    fn replacement_clears_progress() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[1, 2, 3]));
        tracker.set_in_progress(&inodes(&[1]));
        assert!(tracker.is_in_progress(InodeNum::new(1)));

        tracker.set_pending_inodes(set(&[7, 8]));
        for raw in [1, 2, 3, 7, 8] {
            assert!(!tracker.is_in_progress(InodeNum::new(raw)));
        }
        assert!(tracker.is_pending(InodeNum::new(7)));
        assert!(tracker.is_pending(InodeNum::new(8)));
        assert!(!tracker.is_pending(InodeNum::new(2)));
    }

    #[test]
    fn in_progress_leaves_pending() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[10, 11, 12]));
        tracker.set_in_progress(&inodes(&[10, 11]));

        assert!(tracker.is_pending(InodeNum::new(12)));
        assert!(!tracker.is_pending(InodeNum::new(10)));
        assert!(tracker.is_in_progress(InodeNum::new(10)));
        assert!(tracker.is_in_progress(InodeNum::new(11)));
        assert!(!tracker.is_in_progress(InodeNum::new(12)));
        assert_eq!(tracker.pending_count(), 1);
        assert_eq!(tracker.in_progress_count(), 2);
    }

    #[test]
    fn next_batch_replaces_previous_batch() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[1, 2, 3, 4]));
        tracker.set_in_progress(&inodes(&[1, 2]));
        tracker.set_in_progress(&inodes(&[3]));

        assert!(!tracker.is_in_progress(InodeNum::new(1)));
        assert!(!tracker.is_pending(InodeNum::new(1)));
        assert!(tracker.is_in_progress(InodeNum::new(3)));
        assert_eq!(tracker.pending_inodes(), inodes(&[4]));
    }

    #[test]
    fn complete_removes_single_inode() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[5, 6]));
        tracker.set_in_progress(&inodes(&[5, 6]));

        assert!(tracker.complete(InodeNum::new(5)));
        assert!(!tracker.complete(InodeNum::new(5)));
        assert!(!tracker.is_in_progress(InodeNum::new(5)));
        assert!(tracker.is_in_progress(InodeNum::new(6)));
    }

    #[test]
    fn pending_inodes_are_sorted() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[30, 10, 20]));
        assert_eq!(tracker.pending_inodes(), inodes(&[10, 20, 30]));
    }

    #[test]
    fn try_admit_refuses_while_batch_unacknowledged() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[1, 2, 3, 4]));
        assert_eq!(tracker.try_admit(&inodes(&[1, 2, 9])), Some(inodes(&[1, 2])));

        assert_eq!(tracker.try_admit(&inodes(&[3])), None);
        assert_eq!(tracker.try_admit(&[]), None);
        assert!(tracker.is_in_progress(InodeNum::new(1)));
        assert!(tracker.is_pending(InodeNum::new(3)));

        tracker.complete(InodeNum::new(1));
        tracker.complete(InodeNum::new(2));
        assert_eq!(tracker.try_admit(&inodes(&[3])), Some(inodes(&[3])));
    }

    #[test]
    fn requeue_returns_batch_to_pending() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[1, 2, 3, 4, 5]));
        tracker.try_admit(&inodes(&[3, 4]));

        assert_eq!(tracker.requeue_in_progress(), 2);
        assert_eq!(tracker.in_progress_count(), 0);
        assert_eq!(tracker.pending_inodes(), inodes(&[1, 2, 3, 4, 5]));
        assert_eq!(tracker.requeue_in_progress(), 0);
    }

    #[test]
    fn pending_after_pages_in_order() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[40, 10, 30, 20]));
        assert_eq!(tracker.pending_after(None, 2), inodes(&[10, 20]));
        assert_eq!(tracker.pending_after(Some(InodeNum::new(20)), 2), inodes(&[30, 40]));
        assert_eq!(tracker.pending_after(Some(InodeNum::new(25)), 8), inodes(&[30, 40]));
        assert!(tracker.pending_after(Some(InodeNum::new(40)), 8).is_empty());
    }

    #[test]
    fn clear_empties_both_sets() {
        let tracker = ResyncSetTracker::new();
        tracker.set_pending_inodes(set(&[1, 2]));
        tracker.set_in_progress(&inodes(&[1]));
        tracker.clear();
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.in_progress_count(), 0);
    }
}
