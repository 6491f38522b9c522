//! Position actuators: the load chopper and the path-length wobbler.

use crate::{Device, DeviceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Load selected by the chopper mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChopperTarget {
    #[default]
    Cold,
    Hot,
    Antenna,
    Reference,
}

impl ChopperTarget {
    /// Single-letter position code used on the chopper's serial protocol.
    pub fn code(&self) -> char {
        match self {
            ChopperTarget::Cold => 'C',
            ChopperTarget::Hot => 'H',
            ChopperTarget::Antenna => 'A',
            ChopperTarget::Reference => 'R',
        }
    }
}

impl fmt::Display for ChopperTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChopperTarget::Cold => "cold",
            ChopperTarget::Hot => "hot",
            ChopperTarget::Antenna => "antenna",
            ChopperTarget::Reference => "reference",
        };
        write!(f, "{name}")
    }
}

/// Wobbler position in motor steps.
pub type WobblerSteps = i32;

/// A mechanism driven to discrete target positions.
///
/// `set_position` only issues the command; callers that need the mechanism
/// at rest follow it with [`wait_until_settled`](Self::wait_until_settled).
pub trait PositionActuator<P: Copy>: Device {
    /// Command a move to `target`.
    fn set_position(&mut self, target: P) -> DeviceResult<()>;

    /// Query the current position.
    fn get_position(&mut self) -> DeviceResult<P>;

    /// Block until the last commanded move has completed.
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait before reporting a timeout
    fn wait_until_settled(&mut self, timeout: Duration) -> DeviceResult<()>;

    /// Last target commanded, if any.
    fn last_target(&self) -> Option<P>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chopper_codes() {
        let codes: String = [
            ChopperTarget::Reference,
            ChopperTarget::Antenna,
            ChopperTarget::Hot,
            ChopperTarget::Cold,
        ]
        .iter()
        .map(|t| t.code())
        .collect();
        assert_eq!(codes, "RAHC");
    }

    #[test]
    fn test_default_target_is_cold() {
        assert_eq!(ChopperTarget::default(), ChopperTarget::Cold);
        assert_eq!(ChopperTarget::Hot.to_string(), "hot");
    }
}
