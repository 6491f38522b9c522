//! Device error types.

use std::time::Duration;
use thiserror::Error;

/// Misuse of the backend integration protocol.
///
/// These indicate a bug in the caller, not a device fault, and are never
/// absorbed by substitution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequencingError {
    #[error("{backend}: start_integration while an integration is pending")]
    StartWhilePending { backend: String },

    #[error("{backend}: fetch without a pending integration")]
    FetchWithoutPending { backend: String },

    #[error("{backend}: copy slot {slot} out of range (0..{slots})")]
    SlotOutOfRange {
        backend: String,
        slot: usize,
        slots: usize,
    },

    #[error("{backend}: used before initialization")]
    NotInitialized { backend: String },
}

/// Errors reported by device drivers.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("{device}: connection failed: {reason}")]
    Connection { device: String, reason: String },

    #[error("{device}: command '{command}' rejected: {reason}")]
    Command {
        device: String,
        command: String,
        reason: String,
    },

    #[error("{device}: no response within {waited:?}")]
    Timeout { device: String, waited: Duration },

    #[error("{device}: incomplete readout, got {got} of {expected} values")]
    ShortRead {
        device: String,
        got: usize,
        expected: usize,
    },

    #[error("{device}: requested {requested} outside range [{min}, {max}]")]
    OutOfRange {
        device: String,
        requested: f64,
        min: f64,
        max: f64,
    },

    #[error(transparent)]
    Sequencing(#[from] SequencingError),

    #[error("{device}: I/O error: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

impl DeviceError {
    /// A short or incomplete readout: only the current phase is lost.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::ShortRead { .. })
    }

    /// Errors caused by the request rather than the device.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DeviceError::Sequencing(_) | DeviceError::OutOfRange { .. }
        )
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let short = DeviceError::ShortRead {
            device: "CTS".to_string(),
            got: 10,
            expected: 20,
        };
        assert!(short.is_transient());
        assert!(!short.is_caller_error());

        let seq: DeviceError = SequencingError::FetchWithoutPending {
            backend: "CTS".to_string(),
        }
        .into();
        assert!(seq.is_caller_error());
        assert!(!seq.is_transient());

        let timeout = DeviceError::Timeout {
            device: "chopper".to_string(),
            waited: Duration::from_secs(1),
        };
        assert!(!timeout.is_transient());
        assert!(!timeout.is_caller_error());
    }

    #[test]
    fn test_display_names_device() {
        let err = DeviceError::ShortRead {
            device: "AFFTS".to_string(),
            got: 3,
            expected: 8,
        };
        assert_eq!(
            err.to_string(),
            "AFFTS: incomplete readout, got 3 of 8 values"
        );
    }
}
