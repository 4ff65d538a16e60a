//! DS group states.
//!
//! A DS group (DSG) is the set of data-server roles that jointly hold one
//! replication unit. Its collective health is one of the [`DsgState`]
//! variants. The "outdated" marker used on the wire to tell a peer that its
//! cached state must be re-fetched is deliberately not a variant: it is
//! represented as `None` wherever an observed state is exchanged, so it can
//! never reach a commit.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric code of the outdated marker.
pub const OUTDATED_CODE: i32 = -1;

/// Current state of a DS group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DsgState {
    /// Some role is still free for assignment.
    Pending,
    /// All roles assigned and active.
    Ready,
    /// All roles assigned, one is lost; reads are served by reconstruction.
    Degraded,
    /// All roles assigned, the lost role's data is being rebuilt.
    Recovering,
    /// All roles assigned, more than one is lost.
    Failed,
    /// The group is tearing down.
    ShuttingDown,
    /// A rejoined role is catching up on inode data while the group serves.
    Resync,
}

impl DsgState {
    /// All stored states, in code order.
    pub const ALL: [DsgState; 7] = [
        DsgState::Pending,
        DsgState::Ready,
        DsgState::Degraded,
        DsgState::Recovering,
        DsgState::Failed,
        DsgState::ShuttingDown,
        DsgState::Resync,
    ];

    /// Numeric code of this state.
    #[must_use]
    pub const fn to_code(self) -> i32 {
        match self {
            DsgState::Pending => 0,
            DsgState::Ready => 1,
            DsgState::Degraded => 2,
            DsgState::Recovering => 3,
            DsgState::Failed => 4,
            DsgState::ShuttingDown => 5,
            DsgState::Resync => 6,
        }
    }

    /// Decode a numeric state code.
    ///
    /// Returns `Ok(None)` for the outdated marker.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownStateCode`] for any other unmapped code.
    pub fn from_code(code: i32) -> Result<Option<Self>> {
        if code == OUTDATED_CODE {
            return Ok(None);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.to_code() == code)
            .map(Some)
            .ok_or(CoreError::UnknownStateCode(code))
    }

    /// Decode a code that must name a stored state.
    ///
    /// # Errors
    /// Returns [`CoreError::OutdatedState`] for the outdated marker and
    /// [`CoreError::UnknownStateCode`] for unmapped codes.
    pub fn from_stored_code(code: i32) -> Result<Self> {
        Self::from_code(code)?.ok_or(CoreError::OutdatedState)
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DsgState::Pending => "Pending",
            DsgState::Ready => "Ready",
            DsgState::Degraded => "Degraded",
            DsgState::Recovering => "Recovering",
            DsgState::Failed => "Failed",
            DsgState::ShuttingDown => "Shutting Down",
            DsgState::Resync => "Data Resync",
        }
    }

    /// Whether a failed role is meaningful in this state.
    #[must_use]
    pub const fn defines_failed_role(self) -> bool {
        matches!(
            self,
            DsgState::Degraded | DsgState::Recovering | DsgState::Resync
        )
    }

    /// Whether the group policy permits moving from `self` to `to`.
    ///
    /// Re-committing the current state is always permitted except out of
    /// `ShuttingDown`, which is terminal apart from itself.
    #[must_use]
    pub const fn is_transition_allowed(self, to: DsgState) -> bool {
        use DsgState::*;
        match (self, to) {
            (ShuttingDown, ShuttingDown) => true,
            (ShuttingDown, _) => false,
            (_, ShuttingDown) => true,
            (Pending, Pending | Ready) => true,
            (Ready, Ready | Pending | Degraded | Resync) => true,
            (Degraded, Degraded | Recovering | Failed | Resync) => true,
            (Recovering, Recovering | Ready | Degraded | Failed | Resync) => true,
            (Failed, Failed | Degraded | Pending) => true,
            (Resync, Resync | Ready | Degraded | Failed) => true,
            _ => false,
        }
    }

    /// Check a transition against the group policy.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] if the policy forbids it.
    pub fn check_transition(self, to: DsgState) -> Result<()> {
        if self.is_transition_allowed(to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition { from: self, to })
        }
    }
}

impl fmt::Display for DsgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for DsgState {
    type Error = CoreError;

    fn try_from(code: i32) -> Result<Self> {
        Self::from_stored_code(code)
    }
}

/// Encode an observed state, mapping `None` to the outdated marker.
#[must_use]
pub fn observed_code(state: Option<DsgState>) -> i32 {
    state.map_or(OUTDATED_CODE, DsgState::to_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        for (i, state) in DsgState::ALL.iter().enumerate() {
            assert_eq!(state.to_code(), i as i32);
            assert_eq!(DsgState::from_code(i as i32), Ok(Some(*state)));
        }
    }

    #[test]
    fn outdated_marker_decodes_to_none() {
        assert_eq!(DsgState::from_code(OUTDATED_CODE), Ok(None));
        assert_eq!(observed_code(None), OUTDATED_CODE);
        assert_eq!(observed_code(Some(DsgState::Resync)), 6);
        assert_eq!(
            DsgState::from_stored_code(OUTDATED_CODE),
            Err(CoreError::OutdatedState)
        );
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(DsgState::from_code(7), Err(CoreError::UnknownStateCode(7)));
        assert_eq!(
            DsgState::try_from(-2),
            Err(CoreError::UnknownStateCode(-2))
        );
    }

    #[test]
    fn names() {
        assert_eq!(DsgState::ShuttingDown.to_string(), "Shutting Down");
        assert_eq!(DsgState::Resync.to_string(), "Data Resync");
        assert_eq!(DsgState::Pending.name(), "Pending");
    }

    #[test]
    fn failed_role_is_defined_only_for_impaired_states() {
        let with_role: Vec<_> = DsgState::ALL
            .iter()
            .filter(|s| s.defines_failed_role())
            .copied()
            .collect();
        assert_eq!(
            with_role,
            vec![DsgState::Degraded, DsgState::Recovering, DsgState::Resync]
        );
    }

    #[test]
    fn typical_sequences_are_allowed() {
        use DsgState::*;
        let paths: &[&[DsgState]] = &[
            &[Pending, Ready],
            &[Ready, Degraded, Recovering, Ready],
            &[Degraded, Failed, Degraded],
            &[Ready, Resync, Ready],
            &[Degraded, Resync, Ready],
            &[Recovering, Resync, Ready],
        ];
        for path in paths {
            for pair in path.windows(2) {
                assert!(
                    pair[0].is_transition_allowed(pair[1]),
                    "{} -> {} should be allowed",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn shutting_down_is_terminal() {
        for state in DsgState::ALL {
            assert!(state.is_transition_allowed(DsgState::ShuttingDown));
            if state != DsgState::ShuttingDown {
                assert!(!DsgState::ShuttingDown.is_transition_allowed(state));
            }
        }
    }

    #[test]
    fn check_transition_reports_both_ends() {
        let err = DsgState::Pending
            .check_transition(DsgState::Degraded)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::IllegalTransition {
                from: DsgState::Pending,
                to: DsgState::Degraded,
            }
        );
        assert!(err.to_string().starts_with("E003"));
    }
}
