//! acquisition - Calibration-cycle acquisition for a chopped radiometer
//!
//! - **config** - Immutable session settings from flags or JSON
//! - **devices** - The instrument set handed to a controller
//! - **session** - Counters, sweep stepping and wobbler pattern
//! - **records** - Raw phase records and record sinks
//! - **controller** - Four-phase cycle sequencing with device substitution
//! - **worker** - Command-driven background thread around the controller

pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod records;
pub mod session;
pub mod worker;

pub use config::{BackendConfig, BackendFamily, ChopperMode, PhaseStep, SessionConfig};
pub use controller::{
    AcquisitionController, CloseReport, CycleOutcome, CycleReport, DeviceFailure, PhaseReport,
    UpdateReport,
};
pub use devices::{DeviceSet, SimFaults};
pub use error::{AcquisitionError, AcquisitionResult, ConfigError, SinkError, WorkerError};
pub use records::{JsonLinesSink, MemorySink, RawRecord, RecordSink, StoredRecord};
pub use session::{advance_frequency, wobbler_pattern, SessionState};
pub use worker::{AcquisitionWorker, WorkerCommand, WorkerStatus};
