//! DataServer - the per-process data-server context.

use crate::collaborators::{
    Collaborators, ConnMgr, DataRecoveryMgr, DegradedCache, OpCompletionChecker,
    ReadyTimeKeeper, ResyncMgr, Store,
};
use crate::config::DataServerConfig;
use crate::dsg::{
    GroupState, GroupStateReadGuard, GroupStateWriteGuard, ResyncSetTracker, StateSnapshot,
};
use crate::error::{DsError, DsResult};
use cpfs_core::{DsgState, GroupRole, InodeNum};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A data server's shared context.
///
/// Owns the group state and the resync sets, holds the injected
/// collaborators, and carries the `opt_resync` and `distressed` flags.
/// Request handlers and control paths share one instance behind an `Arc`.
pub struct DataServer {
    config: DataServerConfig,
    group_state: GroupState,
    resync_sets: ResyncSetTracker,
    collaborators: Collaborators,
    opt_resync: AtomicBool,
    distressed: AtomicBool,
    resync_driver: AtomicBool,
}

/// Exclusive right to admit and resync batches, released on drop.
pub(crate) struct ResyncDriver<'a> {
    claimed: &'a AtomicBool,
}

impl Drop for ResyncDriver<'_> {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl DataServer {
    /// Start a data server.
    ///
    /// Validates the configuration and starts the collaborators in
    /// dependency order. The group starts `Pending` at epoch 0.
    pub fn start(config: DataServerConfig, collaborators: Collaborators) -> DsResult<Self> {
        config.validate().map_err(DsError::Config)?;
        collaborators.start()?;

        tracing::info!(
            group = %config.group_id,
            role = %config.role,
            opt_resync = config.opt_resync,
            "Data server started"
        );

        Ok(Self {
            opt_resync: AtomicBool::new(config.opt_resync),
            distressed: AtomicBool::new(false),
            resync_driver: AtomicBool::new(false),
            group_state: GroupState::new(DsgState::Pending),
            resync_sets: ResyncSetTracker::new(),
            collaborators,
            config,
        })
    }

    /// The configuration this server was started with.
    pub fn config(&self) -> &DataServerConfig {
        &self.config
    }

    // ==================== Group state ====================

    /// Commit a new group state, returning its epoch.
    ///
    /// # Panics
    /// Panics if `state` defines a failed role and none is given.
    pub fn commit_state(&self, state: DsgState, failed_role: Option<GroupRole>) -> u64 {
        let epoch = self.group_state.commit(state, failed_role);
        tracing::info!(epoch, state = %state, failed_role = ?failed_role, "DSG state committed");
        epoch
    }

    /// Commit only if nothing was committed since `expected`.
    pub fn commit_state_if(
        &self,
        expected: u64,
        state: DsgState,
        failed_role: Option<GroupRole>,
    ) -> Option<u64> {
        let epoch = self.group_state.commit_if(expected, state, failed_role);
        match epoch {
            Some(epoch) => {
                tracing::info!(epoch, state = %state, failed_role = ?failed_role, "DSG state committed")
            }
            None => tracing::debug!(expected, state = %state, "DSG commit skipped, epoch moved"),
        }
        epoch
    }

    /// Copy the current (epoch, state, failed role).
    pub fn read_state(&self) -> StateSnapshot {
        self.group_state.read()
    }

    /// Hold the state lock shared.
    pub fn read_guard(&self) -> GroupStateReadGuard<'_> {
        self.group_state.read_guard()
    }

    /// Hold the state lock exclusively.
    ///
    /// Take this before touching the resync sets when both must change
    /// together.
    pub fn write_guard(&self) -> GroupStateWriteGuard<'_> {
        self.group_state.write_guard()
    }

    /// The group state itself.
    pub fn group_state(&self) -> &GroupState {
        &self.group_state
    }

    // ==================== Resync sets ====================

    /// Replace the inodes pending resync and clear the in-progress set.
    ///
    /// Callers coupling this with a transition into `Resync` should hold the
    /// state write guard around both.
    pub fn set_pending_inodes(&self, inodes: HashSet<InodeNum>) {
        tracing::debug!(inode_count = inodes.len(), "Inodes pending resync replaced");
        self.resync_sets.set_pending_inodes(inodes);
    }

    /// Whether an inode awaits resync.
    pub fn is_pending(&self, inode: InodeNum) -> bool {
        self.resync_sets.is_pending(inode)
    }

    /// Move `inodes` from pending to in progress, replacing the previous batch.
    pub fn set_in_progress(&self, inodes: &[InodeNum]) {
        tracing::debug!(inode_count = inodes.len(), "Inodes resyncing replaced");
        self.resync_sets.set_in_progress(inodes);
    }

    /// Whether an inode is being resynced.
    pub fn is_in_progress(&self, inode: InodeNum) -> bool {
        self.resync_sets.is_in_progress(inode)
    }

    /// Record that one in-progress inode finished resyncing.
    pub fn complete_resync(&self, inode: InodeNum) -> bool {
        self.resync_sets.complete(inode)
    }

    /// The resync sets themselves.
    pub fn resync_sets(&self) -> &ResyncSetTracker {
        &self.resync_sets
    }

    /// Claim the resync driver role. `None` while another caller holds it.
    pub(crate) fn claim_resync_driver(&self) -> Option<ResyncDriver<'_>> {
        self.resync_driver
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ResyncDriver {
                claimed: &self.resync_driver,
            })
    }

    // ==================== Flags ====================

    /// Whether the optimized resync strategy is in use.
    pub fn opt_resync(&self) -> bool {
        self.opt_resync.load(Ordering::Relaxed)
    }

    /// Enable or disable the optimized resync strategy.
    pub fn set_opt_resync(&self, enabled: bool) {
        self.opt_resync.store(enabled, Ordering::Relaxed);
    }

    /// Whether this server reports itself distressed.
    pub fn distressed(&self) -> bool {
        self.distressed.load(Ordering::Relaxed)
    }

    /// Set or clear distressed mode.
    pub fn set_distressed(&self, distressed: bool) {
        if self.distressed.swap(distressed, Ordering::Relaxed) != distressed {
            tracing::info!(distressed, "Distressed mode changed");
        }
    }

    // ==================== Collaborators ====================

    /// Connection manager.
    pub fn conn_mgr(&self) -> &Arc<dyn ConnMgr> {
        self.collaborators.conn_mgr()
    }

    /// Local store.
    pub fn store(&self) -> &Arc<dyn Store> {
        self.collaborators.store()
    }

    /// Keeper of the last time the group was ready.
    pub fn ready_time_keeper(&self) -> &Arc<dyn ReadyTimeKeeper> {
        self.collaborators.ready_time_keeper()
    }

    /// Cache of reconstructed data.
    pub fn degraded_cache(&self) -> &Arc<dyn DegradedCache> {
        self.collaborators.degraded_cache()
    }

    /// Data recovery manager.
    pub fn data_recovery_mgr(&self) -> &Arc<dyn DataRecoveryMgr> {
        self.collaborators.data_recovery_mgr()
    }

    /// Op completion checker.
    pub fn op_completion_checker(&self) -> &Arc<dyn OpCompletionChecker> {
        self.collaborators.op_completion_checker()
    }

    /// Resync manager.
    pub fn resync_mgr(&self) -> &Arc<dyn ResyncMgr> {
        self.collaborators.resync_mgr()
    }

    // ==================== Lifecycle ====================

    /// Commit `ShuttingDown` unless already there. Returns the current epoch.
    pub fn begin_shutdown(&self) -> u64 {
        let mut guard = self.group_state.write_guard();
        let current = guard.snapshot();
        if current.state() == DsgState::ShuttingDown {
            return current.epoch();
        }
        let epoch = guard.commit(DsgState::ShuttingDown, None);
        drop(guard);
        tracing::info!(epoch, from = %current.state(), "DSG shutting down");
        epoch
    }

    /// Shut the server down, releasing collaborators in reverse start order.
    ///
    /// Safe to call more than once and through a shared handle. A server
    /// dropped without it still shuts its collaborators down in reverse
    /// order.
    pub fn shutdown(&self) {
        self.begin_shutdown();
        self.resync_sets.clear();
        if self.collaborators.shutdown() {
            tracing::info!(group = %self.config.group_id, role = %self.config.role, "Data server stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCollaborators;

    fn start() -> (DataServer, MockCollaborators) {
        let mocks = MockCollaborators::new();
        let config = DataServerConfig::builder()
            .opt_resync(true)
            .build()
            .unwrap();
        let server = DataServer::start(config, mocks.collaborators()).unwrap();
        (server, mocks)
    }

    #[test]
    fn starts_pending_with_config_flags() {
        let (server, _mocks) = start();
        let snap = server.read_state();
        assert_eq!(snap.epoch(), 0);
        assert_eq!(snap.state(), DsgState::Pending);
        assert!(server.opt_resync());
        assert!(!server.distressed());
    }

    #[test]
    fn flags_are_independent() {
        let (server, _mocks) = start();
        server.set_distressed(true);
        assert!(server.distressed());
        assert!(server.opt_resync());
        server.set_opt_resync(false);
        assert!(!server.opt_resync());
        assert!(server.distressed());
    }

    #[test]
    fn documented_scenario() {
        let (server, _mocks) = start();
        let role = GroupRole::new(2);
        let ino = InodeNum::new;

        assert_eq!(server.commit_state(DsgState::Ready, None), 1);
        let snap = server.read_state();
        assert_eq!((snap.epoch(), snap.state()), (1, DsgState::Ready));

        assert_eq!(server.commit_state(DsgState::Degraded, Some(role)), 2);
        server.set_pending_inodes([ino(10), ino(11), ino(12)].into_iter().collect());
        assert_eq!(server.commit_state(DsgState::Resync, Some(role)), 3);
        server.set_in_progress(&[ino(10), ino(11)]);

        assert!(server.is_pending(ino(12)));
        assert!(!server.is_pending(ino(10)));
        assert!(server.is_in_progress(ino(10)));
        assert!(!server.is_in_progress(ino(12)));
        assert_eq!(server.read_state().expect_failed_role(), role);

        assert_eq!(server.commit_state(DsgState::Ready, None), 4);
        assert_eq!(server.read_state().failed_role(), None);
    }

    #[test]
    fn commit_state_if_skips_stale_epoch() {
        let (server, _mocks) = start();
        server.commit_state(DsgState::Ready, None);
        assert_eq!(server.commit_state_if(0, DsgState::Pending, None), None);
        assert_eq!(server.commit_state_if(1, DsgState::Pending, None), Some(2));
        assert_eq!(server.read_state().state(), DsgState::Pending);
    }

    #[test]
    fn begin_shutdown_is_idempotent() {
        let (server, _mocks) = start();
        server.commit_state(DsgState::Ready, None);
        assert_eq!(server.begin_shutdown(), 2);
        assert_eq!(server.begin_shutdown(), 2);
        assert_eq!(server.read_state().state(), DsgState::ShuttingDown);
    }

    #[test]
    fn shutdown_through_shared_handle_runs_once() {
        let (server, mocks) = start();
        let server = Arc::new(server);
        server.shutdown();
        server.shutdown();

        let shutdowns = mocks
            .log
            .events()
            .into_iter()
            .filter(|e| e.starts_with("shutdown:"))
            .count();
        assert_eq!(shutdowns, 7);
        assert_eq!(server.read_state().state(), DsgState::ShuttingDown);
        drop(server);
        assert_eq!(mocks.log.events().len(), 14);
    }

    #[test]
    fn start_rejects_invalid_config() {
        let mocks = MockCollaborators::new();
        let config = DataServerConfig {
            group_size: 1,
            ..Default::default()
        };
        let err = DataServer::start(config, mocks.collaborators()).err().unwrap();
        assert!(matches!(err, DsError::Config(_)));
        assert!(mocks.log.events().is_empty());
    }
}
