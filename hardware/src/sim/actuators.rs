use super::{not_initialized, DeviceEvent, FaultPlan, SimBench};
use crate::actuator::{ChopperTarget, PositionActuator, WobblerSteps};
use crate::error::{DeviceError, DeviceResult};
use crate::Device;
use std::time::Duration;
use tracing::debug;

/// Mechanical travel of the wobbler in motor steps.
pub const WOBBLER_TRAVEL: (WobblerSteps, WobblerSteps) = (0, 40_000);

/// Simulated chopper mirror.
pub struct SimChopper {
    label: String,
    bench: SimBench,
    faults: FaultPlan,
    settle_time: Duration,
    antenna_offset: i32,
    target: Option<ChopperTarget>,
    initialized: bool,
}

impl SimChopper {
    pub fn new(bench: SimBench) -> Self {
        Self {
            label: "chopper".to_string(),
            bench,
            faults: FaultPlan::default(),
            settle_time: Duration::ZERO,
            antenna_offset: 0,
            target: None,
            initialized: false,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Motor offset of the antenna position from the mirror's home.
    pub fn with_antenna_offset(mut self, steps: i32) -> Self {
        self.antenna_offset = steps;
        self
    }

    /// Time the mirror takes to reach a new position.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }
}

impl Device for SimChopper {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.faults.check_init(&self.label)?;
        self.initialized = true;
        debug!(
            "{} initialized, antenna offset {} steps",
            self.label, self.antenna_offset
        );
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.faults.check_close(&self.label)?;
        self.initialized = false;
        self.bench
            .events()
            .record(DeviceEvent::Closed(self.label.clone()));
        Ok(())
    }
}

impl PositionActuator<ChopperTarget> for SimChopper {
    fn set_position(&mut self, target: ChopperTarget) -> DeviceResult<()> {
        if !self.initialized {
            return Err(not_initialized(&self.label, "set_position"));
        }
        self.faults.check_operation(&self.label, "set_position")?;
        self.bench.set_chopper(target);
        self.target = Some(target);
        self.bench.events().record(DeviceEvent::ChopperMoved(target));
        Ok(())
    }

    fn get_position(&mut self) -> DeviceResult<ChopperTarget> {
        if !self.initialized {
            return Err(not_initialized(&self.label, "get_position"));
        }
        Ok(self.bench.chopper())
    }

    fn wait_until_settled(&mut self, timeout: Duration) -> DeviceResult<()> {
        if self.settle_time > timeout {
            std::thread::sleep(timeout);
            return Err(DeviceError::Timeout {
                device: self.label.clone(),
                waited: timeout,
            });
        }
        std::thread::sleep(self.settle_time);
        Ok(())
    }

    fn last_target(&self) -> Option<ChopperTarget> {
        self.target
    }
}

/// Simulated wobbler. Moves take `step_period` per step of travel.
pub struct SimWobbler {
    label: String,
    bench: SimBench,
    faults: FaultPlan,
    step_period: Duration,
    position: WobblerSteps,
    target: Option<WobblerSteps>,
    moving_from: WobblerSteps,
    initialized: bool,
}

impl SimWobbler {
    pub fn new(bench: SimBench) -> Self {
        Self {
            label: "wobbler".to_string(),
            bench,
            faults: FaultPlan::default(),
            step_period: Duration::ZERO,
            position: WOBBLER_TRAVEL.0,
            target: None,
            moving_from: WOBBLER_TRAVEL.0,
            initialized: false,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_step_period(mut self, step_period: Duration) -> Self {
        self.step_period = step_period;
        self
    }
}

impl Device for SimWobbler {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.faults.check_init(&self.label)?;
        self.initialized = true;
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.faults.check_close(&self.label)?;
        self.initialized = false;
        self.bench
            .events()
            .record(DeviceEvent::Closed(self.label.clone()));
        Ok(())
    }
}

impl PositionActuator<WobblerSteps> for SimWobbler {
    fn set_position(&mut self, target: WobblerSteps) -> DeviceResult<()> {
        if !self.initialized {
            return Err(not_initialized(&self.label, "set_position"));
        }
        let (min, max) = WOBBLER_TRAVEL;
        if !(min..=max).contains(&target) {
            return Err(DeviceError::OutOfRange {
                device: self.label.clone(),
                requested: target as f64,
                min: min as f64,
                max: max as f64,
            });
        }
        self.faults.check_operation(&self.label, "set_position")?;
        self.moving_from = self.position;
        self.position = target;
        self.target = Some(target);
        self.bench.events().record(DeviceEvent::WobblerMoved(target));
        Ok(())
    }

    fn get_position(&mut self) -> DeviceResult<WobblerSteps> {
        if !self.initialized {
            return Err(not_initialized(&self.label, "get_position"));
        }
        Ok(self.position)
    }

    fn wait_until_settled(&mut self, timeout: Duration) -> DeviceResult<()> {
        let travel = self.position.abs_diff(self.moving_from);
        let needed = self.step_period * travel;
        if needed > timeout {
            std::thread::sleep(timeout);
            return Err(DeviceError::Timeout {
                device: self.label.clone(),
                waited: timeout,
            });
        }
        std::thread::sleep(needed);
        self.moving_from = self.position;
        self.bench
            .events()
            .record(DeviceEvent::WobblerSettled(self.position));
        Ok(())
    }

    fn last_target(&self) -> Option<WobblerSteps> {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chopper_moves_bench() {
        let bench = SimBench::default();
        let mut chopper = SimChopper::new(bench.clone());
        chopper.init().unwrap();
        chopper.set_position(ChopperTarget::Antenna).unwrap();
        chopper.wait_until_settled(Duration::from_millis(10)).unwrap();
        assert_eq!(chopper.get_position().unwrap(), ChopperTarget::Antenna);
        assert_eq!(bench.power(), 450.0);
        assert_eq!(
            bench.events().snapshot(),
            vec![DeviceEvent::ChopperMoved(ChopperTarget::Antenna)]
        );
    }

    #[test]
    fn test_chopper_requires_init() {
        let mut chopper = SimChopper::new(SimBench::default());
        assert!(chopper.set_position(ChopperTarget::Hot).is_err());
        assert_eq!(chopper.last_target(), None);
    }

    #[test]
    fn test_chopper_settle_timeout() {
        let mut chopper =
            SimChopper::new(SimBench::default()).with_settle_time(Duration::from_millis(50));
        chopper.init().unwrap();
        chopper.set_position(ChopperTarget::Hot).unwrap();
        let err = chopper.wait_until_settled(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, DeviceError::Timeout { .. }));
    }

    #[test]
    fn test_wobbler_range_is_caller_error() {
        let mut wobbler = SimWobbler::new(SimBench::default());
        wobbler.init().unwrap();
        let err = wobbler.set_position(40_001).unwrap_err();
        assert!(err.is_caller_error());
        wobbler.set_position(4_000).unwrap();
        wobbler.wait_until_settled(Duration::from_millis(10)).unwrap();
        assert_eq!(wobbler.get_position().unwrap(), 4_000);
        assert_eq!(wobbler.last_target(), Some(4_000));
    }

    #[test]
    fn test_wobbler_fault_after_operations() {
        let mut wobbler =
            SimWobbler::new(SimBench::default()).with_faults(FaultPlan::default().failing_at_operation(2));
        wobbler.init().unwrap();
        wobbler.set_position(100).unwrap();
        let err = wobbler.set_position(200).unwrap_err();
        assert!(!err.is_caller_error());
        assert!(!err.is_transient());
    }
}
