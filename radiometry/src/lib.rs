//! radiometry - Numerical core of a chopped total-power radiometer
//!
//! This crate turns raw backend output into calibrated brightness
//! temperatures:
//!
//! - **Phase** - Chopper phase tags shared by acquisition and calibration
//! - **Quantization** - Van Vleck style correction of three-level correlator lag sums
//! - **Calibration** - Hot/cold load calibration, noise temperature, running means
//! - **Averaging** - Channel binning, block means and frequency-sweep means
//!
//! # Example
//!
//! ```text
//! use radiometry::{CalibrationState, LoadTemperatures, PhaseTag};
//!
//! let mut state = CalibrationState::new(LoadTemperatures::default());
//! state.record_phase(&cold, PhaseTag::Cold)?;
//! state.record_phase(&hot, PhaseTag::Hot)?;
//! let spectrum = state.record_phase(&sky, PhaseTag::Antenna0)?;
//! ```

pub mod averaging;
pub mod calibration;
pub mod phase;
pub mod quantization;

// Re-export commonly used types
pub use averaging::{bin_channels, SweepAverager, SweepMean};
pub use calibration::{
    calibrate, noise_temperature, CalibratedSpectrum, CalibrationError, CalibrationState,
    LoadTemperatures, RunningMean,
};
pub use phase::PhaseTag;
pub use quantization::{
    correct_three_level, corrected_channel_count, power_scale, relative_power, threshold_value,
    LagSums, PolynomialCoefficients, QuantizationError, ThresholdRates,
};
