//! Simulated radiometer front end
//!
//! A [`SimBench`] models the optics shared by all simulated devices: the
//! chopper decides which load the receiver sees, and every backend derives
//! its output power from that load's temperature plus the receiver noise.
//! All device actions are appended to one [`EventLog`] so tests can check
//! ordering across devices.
//!
//! # Modules
//!
//! - `actuators` - Chopper and wobbler
//! - `backends` - Power spectrometer and three-level correlator
//! - `peripherals` - Housekeeping sensors and the tunable frontend

mod actuators;
mod backends;
mod peripherals;

pub use actuators::{SimChopper, SimWobbler, WOBBLER_TRAVEL};
pub use backends::{SimCorrelator, SimSpectrometer};
pub use peripherals::{SimFrontend, SimHousekeeping, HOUSEKEEPING_CHANNELS};

use crate::actuator::ChopperTarget;
use crate::error::{DeviceError, DeviceResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Temperatures and gain that set the simulated receiver output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadModel {
    pub cold_k: f64,
    pub hot_k: f64,
    pub sky_k: f64,
    pub reference_k: f64,
    pub receiver_k: f64,
    /// Output counts per kelvin of system temperature.
    pub gain: f64,
}

impl Default for LoadModel {
    fn default() -> Self {
        Self {
            cold_k: 21.0,
            hot_k: 295.0,
            sky_k: 150.0,
            reference_k: 200.0,
            receiver_k: 300.0,
            gain: 1.0,
        }
    }
}

impl LoadModel {
    pub fn load_temperature(&self, target: ChopperTarget) -> f64 {
        match target {
            ChopperTarget::Cold => self.cold_k,
            ChopperTarget::Hot => self.hot_k,
            ChopperTarget::Antenna => self.sky_k,
            ChopperTarget::Reference => self.reference_k,
        }
    }

    /// Total power seen with the chopper at `target`.
    pub fn power(&self, target: ChopperTarget) -> f64 {
        self.gain * (self.load_temperature(target) + self.receiver_k)
    }
}

/// Device action recorded by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    ChopperMoved(ChopperTarget),
    WobblerMoved(i32),
    WobblerSettled(i32),
    Triggered(String),
    HousekeepingSampled,
    Fetched { backend: String, slot: usize },
    Tuned { sky_ghz: f64, reference_ghz: f64 },
    Closed(String),
}

/// Shared, ordered log of device actions.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl EventLog {
    fn lock(&self) -> MutexGuard<'_, Vec<DeviceEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, event: DeviceEvent) {
        self.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<DeviceEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[derive(Debug)]
struct BenchState {
    chopper: ChopperTarget,
    loads: LoadModel,
}

/// Optics shared by the simulated devices.
#[derive(Debug, Clone)]
pub struct SimBench {
    state: Arc<Mutex<BenchState>>,
    events: EventLog,
}

impl Default for SimBench {
    fn default() -> Self {
        Self::new(LoadModel::default())
    }
}

impl SimBench {
    pub fn new(loads: LoadModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(BenchState {
                chopper: ChopperTarget::Cold,
                loads,
            })),
            events: EventLog::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn loads(&self) -> LoadModel {
        self.lock().loads
    }

    pub fn set_loads(&self, loads: LoadModel) {
        self.lock().loads = loads;
    }

    pub fn chopper(&self) -> ChopperTarget {
        self.lock().chopper
    }

    fn set_chopper(&self, target: ChopperTarget) {
        self.lock().chopper = target;
    }

    /// Power reaching the receiver right now.
    pub fn power(&self) -> f64 {
        let state = self.lock();
        state.loads.power(state.chopper)
    }
}

/// Scripted failures for a simulated device.
///
/// Operation and fetch numbers are 1-based and count calls made after a
/// successful init.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    fail_init: bool,
    fail_close: bool,
    fail_at_operation: Option<usize>,
    short_read_at_fetch: Option<usize>,
    operations: usize,
    fetches: usize,
}

impl FaultPlan {
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Fail the `n`-th operation and every one after it.
    pub fn failing_at_operation(mut self, n: usize) -> Self {
        self.fail_at_operation = Some(n);
        self
    }

    /// Return an incomplete readout on the `n`-th fetch only.
    pub fn short_read_at_fetch(mut self, n: usize) -> Self {
        self.short_read_at_fetch = Some(n);
        self
    }

    fn check_init(&self, device: &str) -> DeviceResult<()> {
        if self.fail_init {
            return Err(DeviceError::Connection {
                device: device.to_string(),
                reason: "simulated connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn check_close(&self, device: &str) -> DeviceResult<()> {
        if self.fail_close {
            return Err(DeviceError::Command {
                device: device.to_string(),
                command: "close".to_string(),
                reason: "simulated close failure".to_string(),
            });
        }
        Ok(())
    }

    fn check_operation(&mut self, device: &str, command: &str) -> DeviceResult<()> {
        self.operations += 1;
        match self.fail_at_operation {
            Some(n) if self.operations >= n => Err(DeviceError::Command {
                device: device.to_string(),
                command: command.to_string(),
                reason: "simulated device fault".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn next_fetch_is_short(&mut self) -> bool {
        self.fetches += 1;
        self.short_read_at_fetch == Some(self.fetches)
    }
}

/// Error for commands sent to a simulated device before `init`.
fn not_initialized(device: &str, command: &str) -> DeviceError {
    DeviceError::Command {
        device: device.to_string(),
        command: command.to_string(),
        reason: "device not initialized".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_model_powers() {
        let loads = LoadModel::default();
        assert_eq!(loads.power(ChopperTarget::Cold), 321.0);
        assert_eq!(loads.power(ChopperTarget::Hot), 595.0);
        assert_eq!(loads.power(ChopperTarget::Antenna), 450.0);
    }

    #[test]
    fn test_bench_follows_chopper() {
        let bench = SimBench::default();
        assert_eq!(bench.power(), 321.0);
        bench.set_chopper(ChopperTarget::Hot);
        assert_eq!(bench.clone().power(), 595.0);
    }

    #[test]
    fn test_event_log_shared_between_clones() {
        let log = EventLog::default();
        let other = log.clone();
        other.record(DeviceEvent::HousekeepingSampled);
        assert_eq!(log.snapshot(), vec![DeviceEvent::HousekeepingSampled]);
        log.clear();
        assert!(other.snapshot().is_empty());
    }

    #[test]
    fn test_fault_plan_operation_count() {
        let mut plan = FaultPlan::default().failing_at_operation(3);
        assert!(plan.check_operation("d", "x").is_ok());
        assert!(plan.check_operation("d", "x").is_ok());
        assert!(plan.check_operation("d", "x").is_err());
        assert!(plan.check_operation("d", "x").is_err());
    }

    #[test]
    fn test_fault_plan_short_fetch_once() {
        let mut plan = FaultPlan::default().short_read_at_fetch(2);
        assert!(!plan.next_fetch_is_short());
        assert!(plan.next_fetch_is_short());
        assert!(!plan.next_fetch_is_short());
    }
}
