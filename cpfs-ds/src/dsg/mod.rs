//! DS group state machine and its inode resync bookkeeping.
//!
//! ## Locking
//!
//! Two independent reader-writer locks:
//!
//! - the **state lock** in [`GroupState`] guards (epoch, state, failed role);
//! - the **data lock** in [`ResyncSetTracker`] guards the two inode sets.
//!
//! Neither component ever takes the other's lock. A caller that must update
//! both atomically takes the state write lock first, then touches the inode
//! sets, then commits through the still-held write guard:
//!
//! ```ignore
//! let mut guard = group_state.write_guard();      // state lock
//! tracker.set_pending_inodes(inodes);             // data lock, nested
//! guard.commit(DsgState::Resync, Some(role));
//! drop(guard);
//! ```
//!
//! Taking them in the other order anywhere would allow a lock-order inversion.

mod group_state;
mod resync_set;

pub use group_state::{GroupState, GroupStateReadGuard, GroupStateWriteGuard, StateSnapshot};
pub use resync_set::ResyncSetTracker;
