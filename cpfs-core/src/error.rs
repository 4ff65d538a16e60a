//! Error types for CPFS core definitions.

use crate::state::DsgState;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised when decoding or checking DS group states.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A numeric state code that maps to no state and is not the outdated marker.
    #[error("E001: Unknown DSG state code {0}")]
    UnknownStateCode(i32),

    /// The outdated marker was supplied where a stored state is required.
    #[error("E002: Outdated marker cannot be used as a DSG state")]
    OutdatedState,

    /// The transition is not permitted by the group policy.
    #[error("E003: Illegal DSG transition from {from} to {to}")]
    IllegalTransition {
        /// The state the group is currently in.
        from: DsgState,
        /// The requested state.
        to: DsgState,
    },
}
