//! In-memory collaborators for tests.
//!
//! Each mock records what it was asked to do so tests can assert on it, and
//! all of them can share a [`LifecycleLog`] to check start and shutdown
//! ordering.

use crate::collaborators::{
    CollabFuture, Collaborators, Component, ConnMgr, DataRecoveryMgr, DegradedCache,
    OpCompletionChecker, ReadyTimeKeeper, RecoveryRequest, ResyncMgr, SegmentKey, Store,
};
use crate::config::DataServerConfig;
use crate::error::{DsError, DsResult};
use cpfs_core::{GroupRole, InodeNum};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

/// Shared record of lifecycle events, e.g. `"start:store"`.
#[derive(Debug, Clone, Default)]
pub struct LifecycleLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl LifecycleLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: &str, name: &str) {
        self.events.lock().push(format!("{event}:{name}"));
    }

    /// All events so far.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

macro_rules! impl_component {
    ($ty:ty, $name:literal) => {
        impl Component for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn start(&self) -> DsResult<()> {
                self.log.record("start", $name);
                if self.fail_start.load(Ordering::SeqCst) {
                    return Err(DsError::Config(format!("{} refused to start", $name)));
                }
                Ok(())
            }

            fn shutdown(&self) {
                self.log.record("shutdown", $name);
            }
        }
    };
}

/// Connection manager with a settable set of connected roles.
#[derive(Default)]
pub struct MockConnMgr {
    log: LifecycleLog,
    fail_start: AtomicBool,
    connected: Mutex<HashSet<GroupRole>>,
}

impl MockConnMgr {
    /// Mark a role as connected.
    pub fn connect(&self, role: GroupRole) {
        self.connected.lock().insert(role);
    }

    /// Mark a role as disconnected.
    pub fn disconnect(&self, role: GroupRole) {
        self.connected.lock().remove(&role);
    }
}

impl_component!(MockConnMgr, "conn_mgr");

impl ConnMgr for MockConnMgr {
    fn is_connected(&self, role: GroupRole) -> bool {
        self.connected.lock().contains(&role)
    }
}

/// Store holding inode modification times.
#[derive(Default)]
pub struct MockStore {
    log: LifecycleLog,
    fail_start: AtomicBool,
    inodes: Mutex<BTreeMap<InodeNum, SystemTime>>,
}

impl MockStore {
    /// Record an inode as last modified at `modified`.
    pub fn insert(&self, inode: InodeNum, modified: SystemTime) {
        self.inodes.lock().insert(inode, modified);
    }

    /// Make the next `start` call fail.
    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }
}

impl_component!(MockStore, "store");

impl Store for MockStore {
    fn inodes(&self) -> DsResult<Vec<InodeNum>> {
        Ok(self.inodes.lock().keys().copied().collect())
    }

    fn inodes_modified_since(&self, since: SystemTime) -> DsResult<Vec<InodeNum>> {
        Ok(self
            .inodes
            .lock()
            .iter()
            .filter(|(_, modified)| **modified >= since)
            .map(|(inode, _)| *inode)
            .collect())
    }
}

/// Time keeper with a settable last-ready time.
#[derive(Default)]
pub struct MockReadyTimeKeeper {
    log: LifecycleLog,
    fail_start: AtomicBool,
    last_ready: Mutex<Option<SystemTime>>,
    touches: AtomicU64,
}

impl MockReadyTimeKeeper {
    /// Override the last-ready time.
    pub fn set_last_ready(&self, at: Option<SystemTime>) {
        *self.last_ready.lock() = at;
    }

    /// How many times the group was recorded ready.
    pub fn touches(&self) -> u64 {
        self.touches.load(Ordering::SeqCst)
    }
}

impl_component!(MockReadyTimeKeeper, "ready_time_keeper");

impl ReadyTimeKeeper for MockReadyTimeKeeper {
    fn touch(&self) {
        self.touches.fetch_add(1, Ordering::SeqCst);
        *self.last_ready.lock() = Some(SystemTime::now());
    }

    fn last_ready(&self) -> Option<SystemTime> {
        *self.last_ready.lock()
    }
}

/// Bounded in-memory degraded cache.
pub struct MemoryDegradedCache {
    log: LifecycleLog,
    fail_start: AtomicBool,
    capacity: usize,
    active: AtomicBool,
    entries: Mutex<HashMap<SegmentKey, Vec<u8>>>,
}

impl MemoryDegradedCache {
    /// Create an inactive cache holding at most `capacity` segments.
    pub fn new(capacity: usize) -> Self {
        Self {
            log: LifecycleLog::default(),
            fail_start: AtomicBool::new(false),
            capacity,
            active: AtomicBool::new(false),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached segments.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryDegradedCache {
    fn default() -> Self {
        Self::new(DataServerConfig::default().degraded_cache_entries)
    }
}

impl_component!(MemoryDegradedCache, "degraded_cache");

impl DegradedCache for MemoryDegradedCache {
    fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.entries.lock().clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn get(&self, key: SegmentKey) -> Option<Vec<u8>> {
        self.entries.lock().get(&key).cloned()
    }

    fn put(&self, key: SegmentKey, data: Vec<u8>) {
        if !self.is_active() {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() < self.capacity || entries.contains_key(&key) {
            entries.insert(key, data);
        }
    }
}

/// Recovery manager that fills the requested range with the role index.
#[derive(Default)]
pub struct MockDataRecovery {
    log: LifecycleLog,
    fail_start: AtomicBool,
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl MockDataRecovery {
    /// Make recovery fail with `RecoveryUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of recover calls made.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl_component!(MockDataRecovery, "data_recovery_mgr");

impl DataRecoveryMgr for MockDataRecovery {
    fn recover<'a>(
        &'a self,
        role: GroupRole,
        request: &'a RecoveryRequest,
    ) -> CollabFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(DsError::RecoveryUnavailable {
                    role,
                    inode: request.inode,
                    cause: "not enough surviving roles".to_string(),
                });
            }
            Ok(vec![role.index() as u8; request.size as usize])
        })
    }
}

/// Op tracker with a settable set of busy inodes.
#[derive(Default)]
pub struct MockOpCompletion {
    log: LifecycleLog,
    fail_start: AtomicBool,
    busy: Mutex<HashSet<InodeNum>>,
}

impl MockOpCompletion {
    /// Mark an inode as having operations in flight.
    pub fn mark_busy(&self, inode: InodeNum) {
        self.busy.lock().insert(inode);
    }

    /// Mark an inode as quiescent.
    pub fn mark_idle(&self, inode: InodeNum) {
        self.busy.lock().remove(&inode);
    }
}

impl_component!(MockOpCompletion, "op_completion_checker");

impl OpCompletionChecker for MockOpCompletion {
    fn is_quiescent(&self, inode: InodeNum) -> bool {
        !self.busy.lock().contains(&inode)
    }
}

/// Hook run by [`MockResyncMgr`] before acknowledging a batch.
pub type ResyncHook = Arc<dyn Fn(&[InodeNum]) + Send + Sync>;

/// Resync manager that acknowledges every inode unless told otherwise.
#[derive(Default)]
pub struct MockResyncMgr {
    log: LifecycleLog,
    fail_start: AtomicBool,
    batches: Mutex<Vec<(GroupRole, Vec<InodeNum>)>>,
    fail_on: Mutex<Option<InodeNum>>,
    withhold: Mutex<Option<InodeNum>>,
    hook: Mutex<Option<ResyncHook>>,
}

impl MockResyncMgr {
    /// Fail the batch containing `inode` with a transport error.
    pub fn fail_on(&self, inode: InodeNum) {
        *self.fail_on.lock() = Some(inode);
    }

    /// Stop failing batches.
    pub fn clear_fault(&self) {
        *self.fail_on.lock() = None;
    }

    /// Leave `inode` out of the acknowledgements.
    pub fn withhold_ack(&self, inode: InodeNum) {
        *self.withhold.lock() = Some(inode);
    }

    /// Run `hook` with every batch before acknowledging it.
    pub fn on_resync(&self, hook: ResyncHook) {
        *self.hook.lock() = Some(hook);
    }

    /// Batches sent so far.
    pub fn batches(&self) -> Vec<(GroupRole, Vec<InodeNum>)> {
        self.batches.lock().clone()
    }
}

impl_component!(MockResyncMgr, "resync_mgr");

impl ResyncMgr for MockResyncMgr {
    fn resync<'a>(
        &'a self,
        target: GroupRole,
        inodes: &'a [InodeNum],
    ) -> CollabFuture<'a, Vec<InodeNum>> {
        Box::pin(async move {
            self.batches.lock().push((target, inodes.to_vec()));
            let hook = self.hook.lock().clone();
            if let Some(hook) = hook {
                hook(inodes);
            }
            if let Some(bad) = *self.fail_on.lock() {
                if inodes.contains(&bad) {
                    return Err(DsError::ResyncTransport {
                        inode: bad,
                        cause: "connection reset".to_string(),
                    });
                }
            }
            let withheld = *self.withhold.lock();
            Ok(inodes
                .iter()
                .copied()
                .filter(|inode| Some(*inode) != withheld)
                .collect())
        })
    }
}

/// One of each mock, sharing a lifecycle log.
pub struct MockCollaborators {
    /// Shared lifecycle log.
    pub log: LifecycleLog,
    /// Connection manager.
    pub conn_mgr: Arc<MockConnMgr>,
    /// Store.
    pub store: Arc<MockStore>,
    /// Ready time keeper.
    pub ready_time_keeper: Arc<MockReadyTimeKeeper>,
    /// Degraded cache.
    pub degraded_cache: Arc<MemoryDegradedCache>,
    /// Data recovery manager.
    pub data_recovery: Arc<MockDataRecovery>,
    /// Op completion checker.
    pub op_completion: Arc<MockOpCompletion>,
    /// Resync manager.
    pub resync_mgr: Arc<MockResyncMgr>,
}

impl MockCollaborators {
    /// Create a fresh set of mocks sized by the default configuration.
    pub fn new() -> Self {
        Self::with_config(&DataServerConfig::default())
    }

    /// Create a fresh set of mocks sized by `config`.
    pub fn with_config(config: &DataServerConfig) -> Self {
        let log = LifecycleLog::new();
        Self {
            conn_mgr: Arc::new(MockConnMgr {
                log: log.clone(),
                ..Default::default()
            }),
            store: Arc::new(MockStore {
                log: log.clone(),
                ..Default::default()
            }),
            ready_time_keeper: Arc::new(MockReadyTimeKeeper {
                log: log.clone(),
                ..Default::default()
            }),
            degraded_cache: Arc::new(MemoryDegradedCache {
                log: log.clone(),
                ..MemoryDegradedCache::new(config.degraded_cache_entries)
            }),
            data_recovery: Arc::new(MockDataRecovery {
                log: log.clone(),
                ..Default::default()
            }),
            op_completion: Arc::new(MockOpCompletion {
                log: log.clone(),
                ..Default::default()
            }),
            resync_mgr: Arc::new(MockResyncMgr {
                log: log.clone(),
                ..Default::default()
            }),
            log,
        }
    }

    /// Build a collaborator set sharing these mocks.
    pub fn collaborators(&self) -> Collaborators {
        // All handles are supplied, so the build cannot fail.
        let built = Collaborators::builder()
            .conn_mgr(self.conn_mgr.clone())
            .store(self.store.clone())
            .ready_time_keeper(self.ready_time_keeper.clone())
            .degraded_cache(self.degraded_cache.clone())
            .data_recovery_mgr(self.data_recovery.clone())
            .op_completion_checker(self.op_completion.clone())
            .resync_mgr(self.resync_mgr.clone())
            .build();
        match built {
            Ok(collaborators) => collaborators,
            Err(e) => unreachable!("complete collaborator set failed to build: {e}"),
        }
    }
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}
