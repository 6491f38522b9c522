//! Acquisition error types.

use hardware::{DeviceError, SequencingError};
use radiometry::{CalibrationError, QuantizationError};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable session configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid backend '{spec}': {reason}")]
    BackendSpec { spec: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure writing acquired records.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("no output file is open")]
    NoOpenFile,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that stop an acquisition session.
///
/// Device faults never appear here while a stand-in can take over; only
/// caller mistakes and unrecoverable conditions do.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("controller is not initialized")]
    NotInitialized,

    #[error("controller is already initialized")]
    AlreadyInitialized,

    #[error("no healthy backend among {total} configured")]
    NoHealthyBackend { total: usize },

    #[error("{device}: {source}")]
    Sequencing {
        device: String,
        #[source]
        source: SequencingError,
    },

    #[error("{device} rejected request: {source}")]
    Device {
        device: String,
        #[source]
        source: DeviceError,
    },

    #[error("cannot tune to {sky_ghz} GHz: {source}")]
    FrequencyOutOfBounds {
        sky_ghz: f64,
        #[source]
        source: DeviceError,
    },

    #[error("{backend}: {source}")]
    Quantization {
        backend: String,
        #[source]
        source: QuantizationError,
    },

    #[error("{backend}: {source}")]
    Calibration {
        backend: String,
        #[source]
        source: CalibrationError,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AcquisitionError {
    /// Wraps an error a device slot refused to absorb.
    pub(crate) fn from_device(device: &str, source: DeviceError) -> Self {
        match source {
            DeviceError::Sequencing(source) => AcquisitionError::Sequencing {
                device: device.to_string(),
                source,
            },
            source => AcquisitionError::Device {
                device: device.to_string(),
                source,
            },
        }
    }
}

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

/// Failures of the worker thread handle itself.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("acquisition worker is no longer running")]
    Disconnected,

    #[error("acquisition worker panicked")]
    Panicked,
}
