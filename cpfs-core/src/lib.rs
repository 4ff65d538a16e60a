//! CPFS Core Library
//!
//! Shared definitions for CPFS data servers:
//!
//! - **Types**: strongly-typed identifiers for inodes, group roles and groups
//! - **State**: the DS group (DSG) state enum, its numeric codes and the
//!   transition policy enforced by control paths
//! - **Error**: coded errors for misuse of the above
//!
//! The state machine itself, with its locking discipline, lives in the
//! `cpfs-ds` crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod state;
pub mod types;

pub use error::{CoreError, Result};
pub use state::{DsgState, OUTDATED_CODE, observed_code};
pub use types::{GroupId, GroupRole, InodeNum};
