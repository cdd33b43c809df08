//! Error types for the call-sequence guard

use crate::automaton::layout::StateId;
use std::io;
use thiserror::Error;

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Why a region was rejected as a whole
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionFault {
    /// No region, or fewer bytes than a header
    #[error("region is absent or smaller than its header")]
    Absent,

    /// Stream ended before the nominal region size
    #[error("short read: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Nominal region size
        expected: usize,
        /// Bytes actually read
        actual: usize,
    },

    /// Stream or buffer is longer than the nominal region size
    #[error("input exceeds region capacity of {capacity} bytes")]
    Oversized {
        /// Nominal region size
        capacity: usize,
    },

    /// Header magic does not match
    #[error("bad header magic {0:#x}")]
    BadMagic(u64),

    /// Unsupported format version
    #[error("unsupported format version {0}")]
    BadVersion(u64),

    /// Header total size disagrees with the region
    #[error("header declares {declared} bytes, region holds {capacity}")]
    SizeMismatch {
        /// Size recorded in the header
        declared: u64,
        /// Actual region capacity
        capacity: usize,
    },

    /// A record would extend past the end of the region
    #[error("record at offset {offset} runs past the region end")]
    OutOfBounds {
        /// Offset of the offending record
        offset: u64,
    },
}

/// Why a state-related precondition failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateFault {
    /// Region has not been finalized
    #[error("region not finalized")]
    NotFinalized,

    /// State id is outside the admissible range
    #[error("state {0} out of range")]
    OutOfRange(StateId),

    /// No record exists for this state id
    #[error("state {0} not present")]
    Missing(StateId),

    /// `reset` has not been called on this instance
    #[error("no current state, automaton was never reset")]
    NoCursor,
}

/// Errors that can occur while building, loading or walking an automaton
#[derive(Error, Debug)]
pub enum GuardError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Absent or corrupt region
    #[error("Invalid region: {0}")]
    InvalidRegion(RegionFault),

    /// Unfinalized region or bad state id
    #[error("Invalid state: {0}")]
    InvalidState(StateFault),

    /// State record magic mismatch
    #[error("Invalid state record #{position} at offset {offset}")]
    InvalidNode {
        /// Position of the record in the state table
        position: u64,
        /// Byte offset of the record
        offset: u64,
    },

    /// Transition record magic mismatch
    #[error("Invalid transition {index} of state {state}")]
    InvalidTransition {
        /// Owning state id
        state: StateId,
        /// Position of the transition within the state
        index: u64,
    },

    /// Builder ran out of room
    #[error("Arena capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        /// Bytes requested
        requested: usize,
        /// Bytes left in the arena
        available: usize,
    },

    /// State id added twice
    #[error("Duplicate state id {0}")]
    DuplicateState(StateId),

    /// No transition for this call from the current state
    #[error("Policy violation: call {label} not permitted from state {state}")]
    PolicyViolation {
        /// State the subject was in
        state: StateId,
        /// Intercepted call label
        label: u64,
    },

    /// No automaton is attached for this subject
    #[error("No automaton attached to subject {0}")]
    UnknownSubject(u64),

    /// Environment refused an allocation
    #[error("Allocation of {requested} bytes refused by {environment} environment")]
    AllocationFailed {
        /// Bytes requested
        requested: usize,
        /// Environment name
        environment: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GuardError {
    /// Whether this is the runtime security signal rather than a fault
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, GuardError::PolicyViolation { .. })
    }
}

impl From<RegionFault> for GuardError {
    fn from(fault: RegionFault) -> Self {
        GuardError::InvalidRegion(fault)
    }
}

impl From<StateFault> for GuardError {
    fn from(fault: StateFault) -> Self {
        GuardError::InvalidState(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_classification() {
        let violation = GuardError::PolicyViolation { state: 1, label: 99 };
        assert!(violation.is_policy_violation());
        assert_eq!(
            violation.to_string(),
            "Policy violation: call 99 not permitted from state 1"
        );

        let fault: GuardError = StateFault::NotFinalized.into();
        assert!(!fault.is_policy_violation());
        assert_eq!(fault.to_string(), "Invalid state: region not finalized");
    }

    #[test]
    fn test_region_fault_message() {
        let err: GuardError = RegionFault::Truncated {
            expected: 1024,
            actual: 10,
        }
        .into();
        assert!(err.to_string().contains("expected 1024 bytes, got 10"));
    }
}
