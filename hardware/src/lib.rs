//! Device capabilities for a chopped spectral radiometer.
//!
//! Every instrument is a [`Device`] plus one capability trait:
//! [`PositionActuator`] for the chopper and wobbler, [`IntegratorBackend`]
//! for spectrometers and correlators, [`Housekeeping`] for sensor boards and
//! [`Frontend`] for the tunable receiver. Devices are owned through a
//! [`DeviceSlot`], which swaps in an inert stand-in the first time a device
//! fails.

pub mod actuator;
pub mod backend;
pub mod error;
pub mod sim;
pub mod slot;
pub mod standin;

pub use actuator::{ChopperTarget, PositionActuator, WobblerSteps};
pub use backend::{
    BackendDescriptor, BackendKind, CopySlots, CorrelatorReadout, IntegratorBackend,
    NormalizedReadout, RawSpectrum, CORRELATOR_HEADER_WORDS, DEFAULT_COPY_SLOTS,
};
pub use error::{DeviceError, DeviceResult, SequencingError};
pub use slot::{DeviceHealth, DeviceSlot, Outcome, SlotState, Substitutable};
pub use standin::{StandInActuator, StandInBackend, StandInFrontend, StandInHousekeeping};

/// Lifecycle shared by all devices.
pub trait Device: Send {
    /// Name used in logs and error reports.
    fn label(&self) -> &str;

    /// Open the connection and bring the device to a known state.
    fn init(&mut self) -> DeviceResult<()>;

    fn close(&mut self) -> DeviceResult<()>;
}

/// Sensor board sampled once per phase.
pub trait Housekeeping: Device {
    fn channel_names(&self) -> &[String];

    /// One value per entry of [`channel_names`](Self::channel_names).
    fn sample(&mut self) -> DeviceResult<Vec<f32>>;
}

/// Tunable receiver frontend.
pub trait Frontend: Device {
    /// Tune to `sky_ghz` with an intermediate frequency of `if_ghz`.
    ///
    /// Returns the reference oscillator frequency in GHz.
    fn tune(&mut self, sky_ghz: f64, if_ghz: f64) -> DeviceResult<f64>;
}
