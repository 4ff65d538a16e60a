//! The authoritative (epoch, state, failed role) triple.

use cpfs_core::{DsgState, GroupRole};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A consistent copy of the group state.
///
/// Two snapshots with equal epochs always carry the same state and role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    epoch: u64,
    state: DsgState,
    failed_role: Option<GroupRole>,
}

impl StateSnapshot {
    /// State change ID that led to this state.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The group state.
    pub fn state(&self) -> DsgState {
        self.state
    }

    /// The impaired role, for states that define one.
    pub fn failed_role(&self) -> Option<GroupRole> {
        self.failed_role
    }

    /// The impaired role of a state known to define one.
    ///
    /// # Panics
    /// Panics if the state does not define a failed role. Reading the role
    /// of a healthy group is a caller defect.
    pub fn expect_failed_role(&self) -> GroupRole {
        match self.failed_role {
            Some(role) => role,
            None => panic!("DSG state {} does not define a failed role", self.state),
        }
    }
}

/// DS group state protected by the state lock.
///
/// Reads take the shared lock and copy the triple out; commits take the
/// exclusive lock, write the whole triple and bump the epoch. Nothing here
/// blocks on anything but the lock itself.
#[derive(Debug)]
pub struct GroupState {
    inner: RwLock<StateSnapshot>,
}

impl GroupState {
    /// Create a group state at epoch 0.
    ///
    /// # Panics
    /// Panics if `initial` requires a failed role.
    pub fn new(initial: DsgState) -> Self {
        assert!(
            !initial.defines_failed_role(),
            "initial DSG state {initial} requires a failed role"
        );
        Self {
            inner: RwLock::new(StateSnapshot {
                epoch: 0,
                state: initial,
                failed_role: None,
            }),
        }
    }

    /// Copy the current triple.
    ///
    /// Shared holds are taken recursively here and in
    /// [`GroupState::current_state_if`] and [`GroupState::read_guard`], so a
    /// thread already holding a read guard can read again while a commit is
    /// queued.
    pub fn read(&self) -> StateSnapshot {
        *self.inner.read_recursive()
    }

    /// Commit a new state under an internal lock, returning the new epoch.
    ///
    /// # Panics
    /// Panics if `state` defines a failed role and none is given.
    pub fn commit(&self, state: DsgState, failed_role: Option<GroupRole>) -> u64 {
        self.write_guard().commit(state, failed_role)
    }

    /// Commit only if the epoch is still `expected`.
    ///
    /// Returns the new epoch, or `None` if another commit got there first.
    pub fn commit_if(
        &self,
        expected: u64,
        state: DsgState,
        failed_role: Option<GroupRole>,
    ) -> Option<u64> {
        self.write_guard().commit_if(expected, state, failed_role)
    }

    /// The current state if nothing was committed since `cached_epoch`.
    ///
    /// `None` means the caller's cached copy is outdated and must be re-read.
    pub fn current_state_if(&self, cached_epoch: u64) -> Option<DsgState> {
        let current = self.inner.read_recursive();
        (current.epoch == cached_epoch).then_some(current.state)
    }

    /// Hold the state lock shared across a compound read-then-act sequence.
    pub fn read_guard(&self) -> GroupStateReadGuard<'_> {
        GroupStateReadGuard {
            guard: self.inner.read_recursive(),
        }
    }

    /// Hold the state lock exclusively, e.g. to couple a commit with another
    /// update in one critical section.
    pub fn write_guard(&self) -> GroupStateWriteGuard<'_> {
        GroupStateWriteGuard {
            guard: self.inner.write(),
        }
    }
}

impl Default for GroupState {
    fn default() -> Self {
        Self::new(DsgState::Pending)
    }
}

/// Shared hold on the state lock. Commits wait until it is dropped.
pub struct GroupStateReadGuard<'a> {
    guard: RwLockReadGuard<'a, StateSnapshot>,
}

impl GroupStateReadGuard<'_> {
    /// The state as of when the guard was taken.
    pub fn snapshot(&self) -> StateSnapshot {
        *self.guard
    }
}

/// Exclusive hold on the state lock.
///
/// Commits made through the guard leave the lock held until the guard is
/// dropped.
pub struct GroupStateWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, StateSnapshot>,
}

impl GroupStateWriteGuard<'_> {
    /// The state as currently committed.
    pub fn snapshot(&self) -> StateSnapshot {
        *self.guard
    }

    /// Commit a new state, returning the new epoch.
    ///
    /// The role is dropped for states that do not define one.
    ///
    /// # Panics
    /// Panics if `state` defines a failed role and none is given.
    pub fn commit(&mut self, state: DsgState, failed_role: Option<GroupRole>) -> u64 {
        let failed_role = if state.defines_failed_role() {
            assert!(
                failed_role.is_some(),
                "committing DSG state {state} requires a failed role"
            );
            failed_role
        } else {
            None
        };
        let epoch = self.guard.epoch + 1;
        *self.guard = StateSnapshot {
            epoch,
            state,
            failed_role,
        };
        epoch
    }

    /// Commit only if the epoch is still `expected`.
    pub fn commit_if(
        &mut self,
        expected: u64,
        state: DsgState,
        failed_role: Option<GroupRole>,
    ) -> Option<u64> {
        if self.guard.epoch != expected {
            return None;
        }
        Some(self.commit(state, failed_role))
    }
}
