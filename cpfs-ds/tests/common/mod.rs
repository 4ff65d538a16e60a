//! Common test utilities for integration tests.

#![allow(dead_code)]

use cpfs_ds::testing::MockCollaborators;
use cpfs_ds::{DataServer, DataServerConfig, GroupControl, GroupRole, InodeNum, RequestGate};
use std::collections::HashSet;
use std::sync::Arc;

/// A started server with its mocks and both front ends.
pub struct TestServer {
    pub server: Arc<DataServer>,
    pub mocks: MockCollaborators,
    pub control: GroupControl,
    pub gate: RequestGate,
}

/// Start a server with `config` over fresh mocks.
pub fn start_server(config: DataServerConfig) -> TestServer {
    let mocks = MockCollaborators::with_config(&config);
    let server = Arc::new(DataServer::start(config, mocks.collaborators()).unwrap());
    TestServer {
        control: GroupControl::new(server.clone()),
        gate: RequestGate::new(server.clone()),
        server,
        mocks,
    }
}

/// Start a server with the default configuration.
pub fn default_server() -> TestServer {
    start_server(DataServerConfig::default())
}

/// Config with small resync batches and no backoff delay.
pub fn resync_config(batch_size: usize) -> DataServerConfig {
    DataServerConfig::builder()
        .resync_batch_size(batch_size)
        .quiesce_retries(3)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

/// Shorthand for an inode set.
pub fn inode_set(raw: impl IntoIterator<Item = u64>) -> HashSet<InodeNum> {
    raw.into_iter().map(InodeNum::new).collect()
}

/// Shorthand for an inode list.
pub fn inode_vec(raw: impl IntoIterator<Item = u64>) -> Vec<InodeNum> {
    raw.into_iter().map(InodeNum::new).collect()
}

/// Drive `ts` from Pending through Ready and Degraded into Resync for
/// `role`, with `pending` to resync. Returns the Resync epoch.
pub fn into_resync(ts: &TestServer, role: GroupRole, pending: HashSet<InodeNum>) -> u64 {
    use cpfs_ds::DsgState;

    ts.mocks.conn_mgr.connect(role);
    ts.control.transition(DsgState::Ready, None).unwrap();
    ts.control.transition(DsgState::Degraded, Some(role)).unwrap();
    ts.control.enter_resync(role, pending).unwrap()
}
