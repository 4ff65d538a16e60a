//! Control paths driving the DS group through its states.
//!
//! This is the only place the transition policy is enforced; the group state
//! itself accepts any commit. Collaborator side effects (ready time stamping,
//! degraded cache activation) run after the state lock is released.

use crate::error::{DsError, DsResult};
use crate::server::DataServer;
use cpfs_core::{DsgState, GroupRole, InodeNum};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Drives group state transitions and resync rounds for one data server.
#[derive(Clone)]
pub struct GroupControl {
    server: Arc<DataServer>,
}

impl GroupControl {
    /// Create a controller over a shared server.
    pub fn new(server: Arc<DataServer>) -> Self {
        Self { server }
    }

    /// The server being controlled.
    pub fn server(&self) -> &Arc<DataServer> {
        &self.server
    }

    /// Move the group to `to`, checking the transition policy.
    ///
    /// A role-bearing target without an explicit role keeps the current
    /// failed role, e.g. `Degraded` to `Recovering`.
    ///
    /// # Errors
    ///
    /// - `Core(IllegalTransition)` if the policy forbids the move
    ///
    /// # Panics
    /// Panics if `to` defines a failed role and neither `failed_role` nor the
    /// current state supplies one.
    pub fn transition(&self, to: DsgState, failed_role: Option<GroupRole>) -> DsResult<u64> {
        let mut guard = self.server.write_guard();
        let from = guard.snapshot();
        if let Err(e) = from.state().check_transition(to) {
            tracing::warn!(epoch = from.epoch(), from = %from.state(), to = %to, "DSG transition rejected");
            return Err(e.into());
        }
        let role = failed_role.or(from.failed_role());
        let epoch = guard.commit(to, role);
        drop(guard);

        tracing::info!(epoch, from = %from.state(), state = %to, failed_role = ?role, "DSG state committed");
        self.apply_side_effects(to);
        Ok(epoch)
    }

    fn apply_side_effects(&self, state: DsgState) {
        match state {
            DsgState::Ready => {
                self.server.ready_time_keeper().touch();
                self.server.degraded_cache().deactivate();
            }
            DsgState::Degraded | DsgState::Recovering => self.server.degraded_cache().activate(),
            _ => self.server.degraded_cache().deactivate(),
        }
    }

    /// Inodes a resync of the rejoining role must cover.
    ///
    /// With `opt_resync` on and a known last-ready time, only inodes modified
    /// since then; otherwise every stored inode.
    pub fn plan_resync(&self) -> DsResult<HashSet<InodeNum>> {
        let store = self.server.store();
        let since = self
            .server
            .opt_resync()
            .then(|| self.server.ready_time_keeper().last_ready())
            .flatten();
        let inodes = match since {
            Some(since) => store.inodes_modified_since(since)?,
            None => store.inodes()?,
        };
        tracing::debug!(optimized = since.is_some(), inode_count = inodes.len(), "Resync planned");
        Ok(inodes.into_iter().collect())
    }

    /// Enter `Resync` for `role` with `inodes` pending.
    ///
    /// The pending set is replaced and the state committed under one hold of
    /// the state write lock, so no reader sees `Resync` with a stale set.
    ///
    /// # Errors
    ///
    /// - `RoleNotConnected` if the rejoining server is unreachable
    /// - `Core(IllegalTransition)` if the group cannot enter resync now
    pub fn enter_resync(&self, role: GroupRole, inodes: HashSet<InodeNum>) -> DsResult<u64> {
        if !self.server.conn_mgr().is_connected(role) {
            return Err(DsError::RoleNotConnected(role));
        }

        let inode_count = inodes.len();
        let mut guard = self.server.write_guard();
        let from = guard.snapshot();
        if let Err(e) = from.state().check_transition(DsgState::Resync) {
            tracing::warn!(epoch = from.epoch(), from = %from.state(), "Resync rejected");
            return Err(e.into());
        }
        self.server.set_pending_inodes(inodes);
        let epoch = guard.commit(DsgState::Resync, Some(role));
        drop(guard);

        tracing::info!(epoch, from = %from.state(), failed_role = %role, inode_count, "DSG entered resync");
        self.apply_side_effects(DsgState::Resync);
        Ok(epoch)
    }

    /// Admit the next batch of quiescent pending inodes.
    ///
    /// Up to `resync.batch_size` inodes, lowest first, move to in progress.
    /// Busy inodes stay pending. Nothing is admitted while the previous
    /// batch is unacknowledged.
    ///
    /// # Errors
    ///
    /// - `WrongState` if the group is not resyncing
    /// - `ResyncRunning` if a resync round is being driven
    /// - `ResyncInFlight` if the previous batch is unacknowledged
    pub fn admit_batch(&self) -> DsResult<Vec<InodeNum>> {
        let current = self.server.read_state();
        if current.state() != DsgState::Resync {
            return Err(DsError::WrongState {
                expected: DsgState::Resync,
                actual: current.state(),
            });
        }
        let _driver = self
            .server
            .claim_resync_driver()
            .ok_or(DsError::ResyncRunning)?;
        self.admit(current.epoch())
    }

    fn admit(&self, epoch: u64) -> DsResult<Vec<InodeNum>> {
        let batch_size = self.server.config().resync.batch_size;
        let sets = self.server.resync_sets();
        let checker = self.server.op_completion_checker();

        // Quiescence is checked outside the state lock. Candidates that left
        // the pending set meanwhile are dropped by `try_admit`.
        let mut candidates = Vec::with_capacity(batch_size);
        let mut after = None;
        while candidates.len() < batch_size {
            let page = sets.pending_after(after, batch_size);
            let Some(last) = page.last().copied() else {
                break;
            };
            after = Some(last);
            let room = batch_size - candidates.len();
            candidates.extend(
                page.into_iter()
                    .filter(|inode| checker.is_quiescent(*inode))
                    .take(room),
            );
        }

        let guard = self.server.read_guard();
        let current = guard.snapshot();
        if current.epoch() != epoch {
            return Err(DsError::StaleEpoch {
                expected: epoch,
                actual: current.epoch(),
            });
        }
        let Some(batch) = sets.try_admit(&candidates) else {
            return Err(DsError::ResyncInFlight(sets.in_progress_count()));
        };
        drop(guard);

        if !batch.is_empty() {
            tracing::debug!(epoch, inode_count = batch.len(), "Resync batch admitted");
        }
        Ok(batch)
    }

    async fn admit_with_retries(&self, epoch: u64) -> DsResult<Vec<InodeNum>> {
        let resync = &self.server.config().resync;
        let attempts = resync.quiesce_retries.max(1);
        let mut attempt = 0;
        loop {
            let batch = self.admit(epoch)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let Some(busy) = self.server.resync_sets().pending_after(None, 1).first().copied()
            else {
                return Ok(batch);
            };

            attempt += 1;
            if attempt >= attempts {
                tracing::warn!(epoch, inode = %busy, attempt, "Pending inodes never quiesced");
                return Err(DsError::NotQuiescent(busy));
            }
            tracing::debug!(epoch, attempt, "No quiescent inodes, backing off");
            tokio::time::sleep(Duration::from_millis(resync.retry_backoff_ms)).await;
        }
    }

    /// Apply the acknowledgements for `batch`, sent during `epoch`.
    fn settle_batch(&self, epoch: u64, batch: &[InodeNum], acked: &[InodeNum]) -> DsResult<()> {
        // Acks only count for the round that sent the batch.
        let guard = self.server.read_guard();
        let current = guard.snapshot();
        if current.epoch() != epoch {
            tracing::warn!(epoch, current = current.epoch(), "Resync batch outlived its round");
            return Err(DsError::StaleEpoch {
                expected: epoch,
                actual: current.epoch(),
            });
        }
        for inode in acked {
            self.server.complete_resync(*inode);
        }
        let missing = batch
            .iter()
            .copied()
            .find(|inode| self.server.is_in_progress(*inode));
        drop(guard);

        if let Some(missing) = missing {
            tracing::warn!(epoch, inode = %missing, "Resync batch not fully acknowledged");
            return Err(DsError::ResyncTransport {
                inode: missing,
                cause: "not acknowledged".to_string(),
            });
        }
        tracing::debug!(epoch, inode_count = batch.len(), "Resync batch completed");
        Ok(())
    }

    async fn resync_batches(&self, epoch: u64, target: GroupRole) -> DsResult<()> {
        loop {
            let batch = self.admit_with_retries(epoch).await?;
            if batch.is_empty() {
                return Ok(());
            }

            let acked = match self.server.resync_mgr().resync(target, &batch).await {
                Ok(acked) => acked,
                Err(e) => {
                    tracing::warn!(epoch, target = %target, error = %e, "Resync batch failed");
                    return Err(e);
                }
            };
            self.settle_batch(epoch, &batch, &acked)?;
        }
    }

    /// Check the group is resyncing and return inodes a failed earlier
    /// attempt left unacknowledged to the pending set.
    fn resume_round(&self) -> DsResult<(u64, GroupRole)> {
        let guard = self.server.read_guard();
        let start = guard.snapshot();
        if start.state() != DsgState::Resync {
            return Err(DsError::WrongState {
                expected: DsgState::Resync,
                actual: start.state(),
            });
        }
        let requeued = self.server.resync_sets().requeue_in_progress();
        drop(guard);

        if requeued > 0 {
            tracing::info!(epoch = start.epoch(), inode_count = requeued, "Unacknowledged inodes requeued");
        }
        Ok((start.epoch(), start.expect_failed_role()))
    }

    /// Commit `Ready` if the round at `epoch` is current and nothing is left
    /// to resync.
    fn finish_round(&self, epoch: u64) -> DsResult<u64> {
        let mut guard = self.server.write_guard();
        let current = guard.snapshot();
        if current.epoch() != epoch {
            return Err(DsError::StaleEpoch {
                expected: epoch,
                actual: current.epoch(),
            });
        }
        let sets = self.server.resync_sets();
        let (pending, in_progress) = (sets.pending_count(), sets.in_progress_count());
        if pending + in_progress > 0 {
            return Err(DsError::ResyncIncomplete {
                pending,
                in_progress,
            });
        }
        Ok(guard.commit(DsgState::Ready, None))
    }

    /// Resync every pending inode to the failed role, then commit `Ready`.
    ///
    /// Inodes a failed earlier attempt left in progress are sent again.
    /// Returns the epoch of the `Ready` commit.
    ///
    /// # Errors
    ///
    /// - `WrongState` if the group is not resyncing
    /// - `ResyncRunning` if another round is being driven
    /// - `StaleEpoch` if another commit happened during the round; acks that
    ///   arrive after it are discarded
    /// - `NotQuiescent` if pending inodes stayed busy through every retry
    /// - `ResyncTransport` if a batch failed or was not fully acknowledged;
    ///   the unacknowledged inodes stay in progress until the next attempt
    /// - `ResyncInFlight` or `ResyncIncomplete` if the sets were changed
    ///   behind the round's back
    pub async fn run_resync(&self) -> DsResult<u64> {
        let _driver = self
            .server
            .claim_resync_driver()
            .ok_or(DsError::ResyncRunning)?;
        let (epoch, target) = self.resume_round()?;
        tracing::info!(
            epoch,
            target = %target,
            inode_count = self.server.resync_sets().pending_count(),
            "Resync started"
        );

        self.resync_batches(epoch, target)
            .instrument(crate::resync_span!(epoch, target))
            .await?;

        let ready = self.finish_round(epoch)?;
        tracing::info!(epoch = ready, state = %DsgState::Ready, "DSG state committed");
        self.apply_side_effects(DsgState::Ready);
        tracing::info!(epoch = ready, target = %target, "Resync finished");
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DegradedCache, SegmentKey};
    use crate::config::DataServerConfig;
    use crate::testing::MockCollaborators;
    use cpfs_core::CoreError;
    use std::time::{Duration, SystemTime};

    fn control(config: DataServerConfig) -> (GroupControl, MockCollaborators) {
        let mocks = MockCollaborators::new();
        let server = DataServer::start(config, mocks.collaborators()).unwrap();
        (GroupControl::new(Arc::new(server)), mocks)
    }

    fn inodes(raw: &[u64]) -> HashSet<InodeNum> {
        raw.iter().copied().map(InodeNum::new).collect()
    }

    #[test]
    fn illegal_transition_is_rejected_without_commit() {
        let (control, _mocks) = control(DataServerConfig::default());
        let err = control
            .transition(DsgState::Degraded, Some(GroupRole::new(1)))
            .unwrap_err();
        assert!(matches!(
            err,
            DsError::Core(CoreError::IllegalTransition {
                from: DsgState::Pending,
                to: DsgState::Degraded
            })
        ));
        assert_eq!(control.server().read_state().epoch(), 0);
    }

    #[test]
    fn ready_stamps_time_keeper() {
        let (control, mocks) = control(DataServerConfig::default());
        assert_eq!(control.transition(DsgState::Ready, None).unwrap(), 1);
        assert_eq!(mocks.ready_time_keeper.touches(), 1);
    }

    #[test]
    fn degraded_cache_follows_state() {
        let (control, mocks) = control(DataServerConfig::default());
        let role = GroupRole::new(3);
        control.transition(DsgState::Ready, None).unwrap();
        assert!(!mocks.degraded_cache.is_active());

        control.transition(DsgState::Degraded, Some(role)).unwrap();
        assert!(mocks.degraded_cache.is_active());
        let key = SegmentKey {
            inode: InodeNum::new(1),
            offset: 0,
        };
        mocks.degraded_cache.put(key, vec![1, 2, 3]);

        control.transition(DsgState::Recovering, None).unwrap();
        assert!(mocks.degraded_cache.is_active());
        assert_eq!(control.server().read_state().failed_role(), Some(role));

        control.transition(DsgState::Ready, None).unwrap();
        assert!(!mocks.degraded_cache.is_active());
        assert!(mocks.degraded_cache.is_empty());
    }

    #[test]
    fn enter_resync_requires_connection() {
        let (control, mocks) = control(DataServerConfig::default());
        let role = GroupRole::new(2);
        control.transition(DsgState::Ready, None).unwrap();
        control.transition(DsgState::Degraded, Some(role)).unwrap();

        let err = control.enter_resync(role, inodes(&[1])).unwrap_err();
        assert!(matches!(err, DsError::RoleNotConnected(r) if r == role));

        mocks.conn_mgr.connect(role);
        assert_eq!(control.enter_resync(role, inodes(&[1, 2])).unwrap(), 3);
        let server = control.server();
        assert_eq!(server.read_state().state(), DsgState::Resync);
        assert!(server.is_pending(InodeNum::new(1)));
        assert!(server.is_pending(InodeNum::new(2)));
    }

    #[test]
    fn enter_resync_from_pending_leaves_sets_alone() {
        let (control, mocks) = control(DataServerConfig::default());
        let role = GroupRole::new(1);
        mocks.conn_mgr.connect(role);
        control.server().set_pending_inodes(inodes(&[9]));

        assert!(control.enter_resync(role, inodes(&[1])).is_err());
        assert!(control.server().is_pending(InodeNum::new(9)));
        assert!(!control.server().is_pending(InodeNum::new(1)));
    }

    #[test]
    fn admit_batch_skips_busy_inodes_and_caps_batch() {
        let config = DataServerConfig::builder()
            .resync_batch_size(2)
            .build()
            .unwrap();
        let (control, mocks) = control(config);
        let role = GroupRole::new(1);
        mocks.conn_mgr.connect(role);
        control.transition(DsgState::Ready, None).unwrap();
        control.enter_resync(role, inodes(&[1, 2, 3, 4])).unwrap();
        mocks.op_completion.mark_busy(InodeNum::new(1));

        let batch = control.admit_batch().unwrap();
        assert_eq!(batch, vec![InodeNum::new(2), InodeNum::new(3)]);
        let server = control.server();
        assert!(server.is_pending(InodeNum::new(1)));
        assert!(server.is_in_progress(InodeNum::new(2)));
        assert!(!server.is_pending(InodeNum::new(2)));
        assert!(server.is_pending(InodeNum::new(4)));
    }

    #[test]
    fn finish_round_refuses_leftover_inodes() {
        let (control, mocks) = control(DataServerConfig::default());
        let role = GroupRole::new(1);
        mocks.conn_mgr.connect(role);
        control.transition(DsgState::Ready, None).unwrap();
        let epoch = control.enter_resync(role, inodes(&[1, 2, 3])).unwrap();
        control.admit_batch().unwrap();
        control.server().complete_resync(InodeNum::new(1));

        let err = control.finish_round(epoch).unwrap_err();
        assert!(matches!(
            err,
            DsError::ResyncIncomplete {
                pending: 0,
                in_progress: 2
            }
        ));
        assert_eq!(control.server().read_state().state(), DsgState::Resync);
    }

    #[test]
    fn resume_round_requeues_unacknowledged_inodes() {
        let config = DataServerConfig::builder()
            .resync_batch_size(2)
            .build()
            .unwrap();
        let (control, mocks) = control(config);
        let role = GroupRole::new(1);
        mocks.conn_mgr.connect(role);
        control.transition(DsgState::Ready, None).unwrap();
        let epoch = control.enter_resync(role, inodes(&[1, 2, 3])).unwrap();
        assert_eq!(control.admit_batch().unwrap().len(), 2);

        assert_eq!(control.resume_round().unwrap(), (epoch, role));
        let server = control.server();
        assert_eq!(server.resync_sets().in_progress_count(), 0);
        assert_eq!(server.resync_sets().pending_count(), 3);
    }

    #[test]
    fn admit_batch_outside_resync_fails() {
        let (control, _mocks) = control(DataServerConfig::default());
        let err = control.admit_batch().unwrap_err();
        assert!(matches!(
            err,
            DsError::WrongState {
                expected: DsgState::Resync,
                actual: DsgState::Pending
            }
        ));
    }

    #[test]
    fn plan_resync_uses_last_ready_when_optimized() {
        let (control, mocks) = control(DataServerConfig::default());
        let now = SystemTime::now();
        mocks.store.insert(InodeNum::new(1), now - Duration::from_secs(60));
        mocks.store.insert(InodeNum::new(2), now);
        mocks
            .ready_time_keeper
            .set_last_ready(Some(now - Duration::from_secs(10)));

        assert_eq!(control.plan_resync().unwrap(), inodes(&[1, 2]));
        control.server().set_opt_resync(true);
        assert_eq!(control.plan_resync().unwrap(), inodes(&[2]));

        mocks.ready_time_keeper.set_last_ready(None);
        assert_eq!(control.plan_resync().unwrap(), inodes(&[1, 2]));
    }
}
