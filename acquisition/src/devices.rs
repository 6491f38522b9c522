//! The set of instruments a controller drives.

use crate::config::{BackendFamily, SessionConfig};
use hardware::sim::{
    FaultPlan, SimBench, SimChopper, SimCorrelator, SimFrontend, SimHousekeeping,
    SimSpectrometer, SimWobbler,
};
use hardware::{
    ChopperTarget, Frontend, Housekeeping, IntegratorBackend, PositionActuator, WobblerSteps,
};
use std::collections::HashMap;

/// Device handles before they are wrapped in health slots.
pub struct DeviceSet {
    pub chopper: Box<dyn PositionActuator<ChopperTarget>>,
    pub wobbler: Box<dyn PositionActuator<WobblerSteps>>,
    pub housekeeping: Box<dyn Housekeeping>,
    pub frontend: Box<dyn Frontend>,
    pub backends: Vec<Box<dyn IntegratorBackend>>,
}

impl DeviceSet {
    /// Number of devices, backends included.
    pub fn device_count(&self) -> usize {
        4 + self.backends.len()
    }

    /// Simulated instruments for every configured backend, all healthy.
    pub fn simulated(config: &SessionConfig, bench: &SimBench) -> Self {
        Self::simulated_with_faults(config, bench, SimFaults::default())
    }

    /// Simulated instruments with scripted failures.
    pub fn simulated_with_faults(
        config: &SessionConfig,
        bench: &SimBench,
        mut faults: SimFaults,
    ) -> Self {
        let backends = config
            .backends
            .iter()
            .map(|b| {
                let descriptor = b.descriptor(config.integration_time());
                let plan = faults.backends.remove(&b.name).unwrap_or_default();
                let backend: Box<dyn IntegratorBackend> = match b.family {
                    BackendFamily::Power => Box::new(
                        SimSpectrometer::new(descriptor, bench.clone()).with_faults(plan),
                    ),
                    BackendFamily::Correlator => Box::new(
                        SimCorrelator::new(descriptor, bench.clone()).with_faults(plan),
                    ),
                };
                backend
            })
            .collect();

        Self {
            chopper: Box::new(
                SimChopper::new(bench.clone())
                    .with_antenna_offset(config.antenna_offset)
                    .with_faults(faults.chopper),
            ),
            wobbler: Box::new(SimWobbler::new(bench.clone()).with_faults(faults.wobbler)),
            housekeeping: Box::new(
                SimHousekeeping::new(bench.clone()).with_faults(faults.housekeeping),
            ),
            frontend: Box::new(SimFrontend::new(bench.clone()).with_faults(faults.frontend)),
            backends,
        }
    }
}

/// Fault plans for a simulated device set. Backends are keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    pub chopper: FaultPlan,
    pub wobbler: FaultPlan,
    pub housekeeping: FaultPlan,
    pub frontend: FaultPlan,
    pub backends: HashMap<String, FaultPlan>,
}

impl SimFaults {
    pub fn backend(mut self, name: &str, plan: FaultPlan) -> Self {
        self.backends.insert(name.to_string(), plan);
        self
    }
}
