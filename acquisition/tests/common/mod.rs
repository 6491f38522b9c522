//! Shared fixtures for acquisition integration tests.

#![allow(dead_code)]

use acquisition::{AcquisitionController, DeviceSet, MemorySink, SessionConfig, SimFaults};
use hardware::sim::SimBench;

/// Session with millisecond integrations and no idle waits.
pub fn fast_config(backends: &[&str]) -> SessionConfig {
    SessionConfig {
        integration_time_ms: 2,
        blank_time_ms: 0,
        retune_wait_ms: 0,
        settle_timeout_ms: 200,
        records_per_file: 8,
        backends: backends
            .iter()
            .map(|b| b.parse().expect("valid backend spec"))
            .collect(),
        ..SessionConfig::default()
    }
}

/// A controller over simulated devices plus handles to inspect them.
pub struct Rig {
    pub controller: AcquisitionController,
    pub bench: SimBench,
    pub sink: MemorySink,
}

pub fn rig_with_faults(config: SessionConfig, faults: SimFaults) -> Rig {
    test_helpers::init_tracing();
    let bench = SimBench::default();
    let sink = MemorySink::new();
    let devices = DeviceSet::simulated_with_faults(&config, &bench, faults);
    let controller = AcquisitionController::new(config, devices, Box::new(sink.clone()))
        .expect("valid session configuration");
    Rig {
        controller,
        bench,
        sink,
    }
}

pub fn rig(config: SessionConfig) -> Rig {
    rig_with_faults(config, SimFaults::default())
}

/// Initializes at the configured wobbler start and clears the event log.
pub fn initialized(config: SessionConfig, faults: SimFaults) -> Rig {
    let start = config.wobbler_start;
    let mut rig = rig_with_faults(config, faults);
    rig.controller
        .initialize(start)
        .expect("initialization succeeds");
    rig.bench.events().clear();
    rig
}

/// Runs `cycles` complete cycles, each followed by an update.
pub fn run_cycles(controller: &mut AcquisitionController, cycles: usize) {
    for _ in 0..cycles {
        let outcome = controller.run_cycle().expect("cycle runs");
        assert!(outcome.is_completed());
        controller.update().expect("update runs");
    }
}

/// Mean over channels of a backend's integrated temperature.
pub fn mean_temperature(controller: &AcquisitionController, backend: &str) -> f64 {
    controller
        .calibration(backend)
        .and_then(|c| c.integrated_temperature())
        .and_then(|t| t.mean())
        .expect("backend has an integrated spectrum")
}
