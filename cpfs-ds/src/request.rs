//! Request-path gating on the group state.

use crate::collaborators::RecoveryRequest;
use crate::dsg::StateSnapshot;
use crate::error::DsResult;
use crate::server::DataServer;
use cpfs_core::{DsgState, GroupRole, InodeNum};
use std::sync::Arc;

/// How a data request on one inode should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDisposition {
    /// Serve from local data.
    Serve,
    /// Refuse; the group cannot serve in this state.
    Reject(DsgState),
    /// Reconstruct the failed role's data from the survivors.
    Reconstruct {
        /// Role whose data must be rebuilt.
        failed_role: GroupRole,
    },
    /// Retry later; the inode is being resynced.
    Defer,
}

/// A disposition together with the epoch it was decided at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    epoch: u64,
    disposition: RequestDisposition,
}

impl Decision {
    /// Epoch the decision was based on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// What to do with the request.
    pub fn disposition(&self) -> RequestDisposition {
        self.disposition
    }
}

/// Decides how requests are handled given the current group state.
#[derive(Clone)]
pub struct RequestGate {
    server: Arc<DataServer>,
}

impl RequestGate {
    /// Create a gate over a shared server.
    pub fn new(server: Arc<DataServer>) -> Self {
        Self { server }
    }

    /// Classify a request on `inode`.
    ///
    /// The state and the resync sets are read under one shared hold of the
    /// state lock, so a `Resync` decision never pairs with a set from another
    /// epoch.
    pub fn classify(&self, inode: InodeNum) -> Decision {
        let guard = self.server.read_guard();
        let current = guard.snapshot();
        let disposition = match current.state() {
            DsgState::Pending | DsgState::Failed | DsgState::ShuttingDown => {
                RequestDisposition::Reject(current.state())
            }
            DsgState::Ready => RequestDisposition::Serve,
            DsgState::Degraded | DsgState::Recovering => RequestDisposition::Reconstruct {
                failed_role: current.expect_failed_role(),
            },
            DsgState::Resync => {
                if self.server.is_pending(inode) || self.server.is_in_progress(inode) {
                    RequestDisposition::Defer
                } else {
                    RequestDisposition::Serve
                }
            }
        };
        drop(guard);

        tracing::debug!(epoch = current.epoch(), inode = %inode, ?disposition, "Request classified");
        Decision {
            epoch: current.epoch(),
            disposition,
        }
    }

    /// Run `f` only if nothing was committed since `epoch`.
    ///
    /// `f` runs under a shared hold of the state lock, so no commit lands
    /// while it runs. It may read the state again or classify other requests,
    /// but must not commit or take the write guard: that waits on its own
    /// hold. Returns `None` when the caller's view is outdated.
    pub fn with_state_unchanged<R>(
        &self,
        epoch: u64,
        f: impl FnOnce(StateSnapshot) -> R,
    ) -> Option<R> {
        let guard = self.server.read_guard();
        let current = guard.snapshot();
        (current.epoch() == epoch).then(|| f(current))
    }

    /// Read data of the failed `role`, from the degraded cache if present,
    /// else reconstructed by the recovery manager.
    ///
    /// # Errors
    ///
    /// - `RecoveryUnavailable` if reconstruction is not possible
    pub async fn read_degraded(
        &self,
        role: GroupRole,
        request: &RecoveryRequest,
    ) -> DsResult<Vec<u8>> {
        let cache = self.server.degraded_cache();
        if let Some(data) = cache.get(request.key()) {
            return Ok(data);
        }
        let data = self.server.data_recovery_mgr().recover(role, request).await?;
        cache.put(request.key(), data.clone());
        Ok(data)
    }
}
