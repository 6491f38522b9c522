//! Chopper phase tags attached to every raw record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Load seen by the receiver during one phase of a calibration cycle.
///
/// The two antenna looks of a CAHA cycle are kept apart so that records
/// from the first and second half of the cycle can be told apart downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseTag {
    Cold,
    Hot,
    Antenna0,
    Antenna1,
    Reference,
}

impl PhaseTag {
    /// True for phases whose power is calibrated against the hot and cold loads.
    pub fn is_target(&self) -> bool {
        matches!(
            self,
            PhaseTag::Antenna0 | PhaseTag::Antenna1 | PhaseTag::Reference
        )
    }

    /// Short code used in record names and logs ("C0", "A1", ...).
    pub fn code(&self) -> &'static str {
        match self {
            PhaseTag::Cold => "C0",
            PhaseTag::Hot => "H0",
            PhaseTag::Antenna0 => "A0",
            PhaseTag::Antenna1 => "A1",
            PhaseTag::Reference => "R0",
        }
    }
}

impl fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_phases() {
        assert!(PhaseTag::Antenna0.is_target());
        assert!(PhaseTag::Antenna1.is_target());
        assert!(PhaseTag::Reference.is_target());
        assert!(!PhaseTag::Cold.is_target());
        assert!(!PhaseTag::Hot.is_target());
    }

    #[test]
    fn test_codes() {
        assert_eq!(PhaseTag::Antenna1.to_string(), "A1");
        assert_eq!(PhaseTag::Cold.code(), "C0");
    }
}
