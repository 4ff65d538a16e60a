//! Capability traits consumed by the data server.

use crate::error::DsResult;
use cpfs_core::{GroupRole, InodeNum};
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

/// Type alias for async collaborator futures.
pub type CollabFuture<'a, T> = Pin<Box<dyn Future<Output = DsResult<T>> + Send + 'a>>;

/// Lifecycle hooks shared by every collaborator.
pub trait Component: Send + Sync {
    /// Short name used in lifecycle logs.
    fn name(&self) -> &'static str;

    /// Called once at startup, after the components it depends on.
    fn start(&self) -> DsResult<()> {
        Ok(())
    }

    /// Called once at shutdown, before the components it depends on.
    fn shutdown(&self) {}
}

/// Connections to the other data servers of the group.
pub trait ConnMgr: Component {
    /// Whether a live connection to the server holding `role` exists.
    fn is_connected(&self, role: GroupRole) -> bool;
}

/// The local object store.
pub trait Store: Component {
    /// Every inode stored locally.
    fn inodes(&self) -> DsResult<Vec<InodeNum>>;

    /// Inodes whose data changed at or after `since`.
    fn inodes_modified_since(&self, since: SystemTime) -> DsResult<Vec<InodeNum>>;
}

/// Remembers when the group was last fully ready.
pub trait ReadyTimeKeeper: Component {
    /// Record that the group is ready now.
    fn touch(&self);

    /// When the group was last recorded ready, if ever.
    fn last_ready(&self) -> Option<SystemTime>;
}

/// Key of a reconstructed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    /// Inode the segment belongs to.
    pub inode: InodeNum,
    /// Byte offset of the segment within the inode.
    pub offset: u64,
}

/// Holds data reconstructed for a lost role while the group is degraded.
pub trait DegradedCache: Component {
    /// Start caching.
    fn activate(&self);

    /// Stop caching and drop everything cached.
    fn deactivate(&self);

    /// Whether the cache is accepting entries.
    fn is_active(&self) -> bool;

    /// Look up a reconstructed segment.
    fn get(&self, key: SegmentKey) -> Option<Vec<u8>>;

    /// Store a reconstructed segment. Ignored while inactive.
    fn put(&self, key: SegmentKey, data: Vec<u8>);
}

/// A read that must be served by reconstructing a lost role's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRequest {
    /// Inode being read.
    pub inode: InodeNum,
    /// Byte offset of the read.
    pub offset: u64,
    /// Number of bytes requested.
    pub size: u32,
}

impl RecoveryRequest {
    /// Cache key of the segment this request reads.
    pub fn key(&self) -> SegmentKey {
        SegmentKey {
            inode: self.inode,
            offset: self.offset,
        }
    }
}

/// Reconstructs data of a lost role from the surviving roles.
pub trait DataRecoveryMgr: Component {
    /// Reconstruct the data `request` would have read from `role`.
    ///
    /// # Errors
    ///
    /// - `RecoveryUnavailable` if the surviving roles cannot supply it
    fn recover<'a>(
        &'a self,
        role: GroupRole,
        request: &'a RecoveryRequest,
    ) -> CollabFuture<'a, Vec<u8>>;
}

/// Tracks operations in flight per inode.
pub trait OpCompletionChecker: Component {
    /// Whether every operation on `inode` has completed.
    fn is_quiescent(&self, inode: InodeNum) -> bool;
}

/// Copies inode data to a role that rejoined the group.
pub trait ResyncMgr: Component {
    /// Resync `inodes` to the server holding `target`.
    ///
    /// Returns the inodes the target acknowledged.
    ///
    /// # Errors
    ///
    /// - `ResyncTransport` if the exchange failed
    fn resync<'a>(
        &'a self,
        target: GroupRole,
        inodes: &'a [InodeNum],
    ) -> CollabFuture<'a, Vec<InodeNum>>;
}
