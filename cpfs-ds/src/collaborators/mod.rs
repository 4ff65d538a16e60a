//! Collaborators injected into the data server.
//!
//! Every capability the server relies on but does not implement itself is
//! supplied once at startup through [`Collaborators`]. Components start in
//! dependency order, connections and storage before the managers that use
//! them, and are released in exactly the reverse order.

mod traits;

pub use traits::{
    CollabFuture, Component, ConnMgr, DataRecoveryMgr, DegradedCache, OpCompletionChecker,
    ReadyTimeKeeper, RecoveryRequest, ResyncMgr, SegmentKey, Store,
};

use crate::error::{DsError, DsResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handles to every collaborator of a data server.
///
/// A started set is shut down exactly once, by [`Collaborators::shutdown`],
/// [`Collaborators::release`] or on drop, whichever comes first.
pub struct Collaborators {
    // Declared in reverse start order: fields drop top to bottom.
    resync_mgr: Arc<dyn ResyncMgr>,
    op_completion_checker: Arc<dyn OpCompletionChecker>,
    data_recovery_mgr: Arc<dyn DataRecoveryMgr>,
    degraded_cache: Arc<dyn DegradedCache>,
    ready_time_keeper: Arc<dyn ReadyTimeKeeper>,
    store: Arc<dyn Store>,
    conn_mgr: Arc<dyn ConnMgr>,
    running: AtomicBool,
}

impl Collaborators {
    /// Create a new builder.
    pub fn builder() -> CollaboratorsBuilder {
        CollaboratorsBuilder::default()
    }

    /// Connection manager.
    pub fn conn_mgr(&self) -> &Arc<dyn ConnMgr> {
        &self.conn_mgr
    }

    /// Local store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Ready time keeper.
    pub fn ready_time_keeper(&self) -> &Arc<dyn ReadyTimeKeeper> {
        &self.ready_time_keeper
    }

    /// Degraded cache.
    pub fn degraded_cache(&self) -> &Arc<dyn DegradedCache> {
        &self.degraded_cache
    }

    /// Data recovery manager.
    pub fn data_recovery_mgr(&self) -> &Arc<dyn DataRecoveryMgr> {
        &self.data_recovery_mgr
    }

    /// Op completion checker.
    pub fn op_completion_checker(&self) -> &Arc<dyn OpCompletionChecker> {
        &self.op_completion_checker
    }

    /// Resync manager.
    pub fn resync_mgr(&self) -> &Arc<dyn ResyncMgr> {
        &self.resync_mgr
    }

    fn components(&self) -> [&dyn Component; 7] {
        [
            &*self.conn_mgr,
            &*self.store,
            &*self.ready_time_keeper,
            &*self.degraded_cache,
            &*self.data_recovery_mgr,
            &*self.op_completion_checker,
            &*self.resync_mgr,
        ]
    }

    /// Start every component in dependency order.
    ///
    /// If one fails, those already started are shut down in reverse order
    /// and the error is returned.
    pub fn start(&self) -> DsResult<()> {
        let components = self.components();
        for (started, component) in components.iter().enumerate() {
            if let Err(e) = component.start() {
                tracing::warn!(component = component.name(), error = %e, "Component failed to start");
                for prior in components[..started].iter().rev() {
                    tracing::debug!(component = prior.name(), "Shutting down component");
                    prior.shutdown();
                }
                return Err(e);
            }
            tracing::debug!(component = component.name(), "Component started");
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Shut down every component in reverse start order.
    ///
    /// Returns false, doing nothing, if the set was never started or is
    /// already shut down.
    pub fn shutdown(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        for component in self.components().iter().rev() {
            tracing::debug!(component = component.name(), "Shutting down component");
            component.shutdown();
        }
        true
    }

    /// Shut down every component in reverse start order and drop the handles
    /// in the same order.
    pub fn release(self) {
        self.shutdown();
    }
}

impl Drop for Collaborators {
    fn drop(&mut self) {
        if self.shutdown() {
            tracing::debug!("Collaborators shut down on drop");
        }
    }
}

/// Builder for Collaborators.
#[derive(Default)]
pub struct CollaboratorsBuilder {
    conn_mgr: Option<Arc<dyn ConnMgr>>,
    store: Option<Arc<dyn Store>>,
    ready_time_keeper: Option<Arc<dyn ReadyTimeKeeper>>,
    degraded_cache: Option<Arc<dyn DegradedCache>>,
    data_recovery_mgr: Option<Arc<dyn DataRecoveryMgr>>,
    op_completion_checker: Option<Arc<dyn OpCompletionChecker>>,
    resync_mgr: Option<Arc<dyn ResyncMgr>>,
}

impl CollaboratorsBuilder {
    /// Set the connection manager.
    pub fn conn_mgr(mut self, conn_mgr: Arc<dyn ConnMgr>) -> Self {
        self.conn_mgr = Some(conn_mgr);
        self
    }

    /// Set the local store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the ready time keeper.
    pub fn ready_time_keeper(mut self, keeper: Arc<dyn ReadyTimeKeeper>) -> Self {
        self.ready_time_keeper = Some(keeper);
        self
    }

    /// Set the degraded cache.
    pub fn degraded_cache(mut self, cache: Arc<dyn DegradedCache>) -> Self {
        self.degraded_cache = Some(cache);
        self
    }

    /// Set the data recovery manager.
    pub fn data_recovery_mgr(mut self, mgr: Arc<dyn DataRecoveryMgr>) -> Self {
        self.data_recovery_mgr = Some(mgr);
        self
    }

    /// Set the op completion checker.
    pub fn op_completion_checker(mut self, checker: Arc<dyn OpCompletionChecker>) -> Self {
        self.op_completion_checker = Some(checker);
        self
    }

    /// Set the resync manager.
    pub fn resync_mgr(mut self, mgr: Arc<dyn ResyncMgr>) -> Self {
        self.resync_mgr = Some(mgr);
        self
    }

    /// Build the collaborator set.
    ///
    /// # Errors
    /// Returns `MissingCollaborator` naming the first handle not supplied.
    pub fn build(self) -> DsResult<Collaborators> {
        Ok(Collaborators {
            running: AtomicBool::new(false),
            conn_mgr: self
                .conn_mgr
                .ok_or(DsError::MissingCollaborator("conn_mgr"))?,
            store: self.store.ok_or(DsError::MissingCollaborator("store"))?,
            ready_time_keeper: self
                .ready_time_keeper
                .ok_or(DsError::MissingCollaborator("ready_time_keeper"))?,
            degraded_cache: self
                .degraded_cache
                .ok_or(DsError::MissingCollaborator("degraded_cache"))?,
            data_recovery_mgr: self
                .data_recovery_mgr
                .ok_or(DsError::MissingCollaborator("data_recovery_mgr"))?,
            op_completion_checker: self
                .op_completion_checker
                .ok_or(DsError::MissingCollaborator("op_completion_checker"))?,
            resync_mgr: self
                .resync_mgr
                .ok_or(DsError::MissingCollaborator("resync_mgr"))?,
        })
    }
}
