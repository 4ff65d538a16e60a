//! Error types for data-server operations.

use cpfs_core::{CoreError, DsgState, GroupRole, InodeNum};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for data-server operations.
pub type DsResult<T> = std::result::Result<T, DsError>;

/// Errors that can occur in data-server control and request paths.
///
/// The group state and resync bookkeeping never produce these themselves;
/// they are raised by control paths and by collaborators.
#[derive(Debug, Error)]
pub enum DsError {
    /// State decoding or transition policy error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reconstruction of a lost role's data is not possible right now.
    #[error("Recovery unavailable for {role} on inode {inode}: {cause}")]
    RecoveryUnavailable {
        /// The lost role.
        role: GroupRole,
        /// The inode whose data was requested.
        inode: InodeNum,
        /// Reason reported by the recovery manager.
        cause: String,
    },

    /// The resync transport failed for an inode.
    #[error("Resync of inode {inode} failed: {cause}")]
    ResyncTransport {
        /// The inode being resynced.
        inode: InodeNum,
        /// Reason reported by the transport.
        cause: String,
    },

    /// In-flight operations on an inode did not quiesce.
    #[error("Inode {0} still has operations in flight")]
    NotQuiescent(InodeNum),

    /// Another caller is already driving resync.
    #[error("A resync round is already running")]
    ResyncRunning,

    /// The previous resync batch still has unacknowledged inodes.
    #[error("{0} inodes of the previous resync batch are unacknowledged")]
    ResyncInFlight(usize),

    /// A resync round ended with inodes not yet resynced.
    #[error("Resync incomplete: {pending} inodes pending, {in_progress} in progress")]
    ResyncIncomplete {
        /// Inodes still awaiting resync.
        pending: usize,
        /// Inodes sent but not acknowledged.
        in_progress: usize,
    },

    /// No live connection to the server holding a role.
    #[error("{0} is not connected")]
    RoleNotConnected(GroupRole),

    /// A control path ran while the group was in the wrong state.
    #[error("DSG is {actual}, expected {expected}")]
    WrongState {
        /// State the operation requires.
        expected: DsgState,
        /// State currently committed.
        actual: DsgState,
    },

    /// A collaborator required for startup was not supplied.
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The group state changed under a control path.
    #[error("Stale DSG state: expected epoch {expected}, found {actual}")]
    StaleEpoch {
        /// Epoch the caller based its decision on.
        expected: u64,
        /// Epoch currently committed.
        actual: u64,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to parse an inline configuration document.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[source] serde_yaml::Error),

    /// Failed to read a configuration file.
    #[error("Failed to read configuration at {}: {source}", .path.display())]
    ConfigRead {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse configuration at {}: {source}", .path.display())]
    ConfigFile {
        /// File the document was read from.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn error_is_send_sync() {
        _assert_send_sync::<DsError>();
    }

    #[test]
    fn core_errors_pass_through() {
        let err: DsError = CoreError::IllegalTransition {
            from: DsgState::Pending,
            to: DsgState::Resync,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "E003: Illegal DSG transition from Pending to Data Resync"
        );
    }

    #[test]
    fn wrong_state_uses_display_names() {
        let err = DsError::WrongState {
            expected: DsgState::Resync,
            actual: DsgState::ShuttingDown,
        };
        assert_eq!(err.to_string(), "DSG is Shutting Down, expected Data Resync");
    }

    #[test]
    fn parse_error_mentions_path() {
        let source = serde_yaml::from_str::<u32>("not a number").unwrap_err();
        let err = DsError::ConfigFile {
            path: PathBuf::from("/etc/cpfs/ds.yaml"),
            source,
        };
        assert!(err.to_string().contains("at /etc/cpfs/ds.yaml"));
    }
}
