//! A backend driver that breaks the trigger/fetch protocol must stop the
//! cycle instead of being substituted.

use acquisition::{AcquisitionController, AcquisitionError, DeviceSet, MemorySink, SessionConfig};
use hardware::sim::{SimBench, SimChopper, SimFrontend, SimHousekeeping, SimSpectrometer, SimWobbler};
use hardware::{
    BackendDescriptor, BackendKind, Device, DeviceHealth, DeviceResult, IntegratorBackend,
    RawSpectrum, SequencingError,
};
use std::time::Duration;

/// Triggers its spectrometer twice per start request.
struct DoubleTrigger(SimSpectrometer);

impl Device for DoubleTrigger {
    fn label(&self) -> &str {
        self.0.label()
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.0.init()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.0.close()
    }
}

impl IntegratorBackend for DoubleTrigger {
    fn descriptor(&self) -> &BackendDescriptor {
        self.0.descriptor()
    }

    fn start_integration(&mut self) -> DeviceResult<()> {
        self.0.start_integration()?;
        self.0.start_integration()
    }

    fn integration_complete(&mut self) -> DeviceResult<bool> {
        self.0.integration_complete()
    }

    fn fetch(&mut self, slot: usize) -> DeviceResult<RawSpectrum> {
        self.0.fetch(slot)
    }

    fn slot_data(&self, slot: usize) -> Option<&RawSpectrum> {
        self.0.slot_data(slot)
    }
}

#[test]
fn test_sequencing_violation_stops_cycle() {
    test_helpers::init_tracing();
    let config = SessionConfig {
        integration_time_ms: 2,
        blank_time_ms: 0,
        backends: vec!["power:CTS:8".parse().unwrap()],
        ..SessionConfig::default()
    };
    let bench = SimBench::default();
    let descriptor = BackendDescriptor::new(
        "CTS",
        BackendKind::PowerSpectrometer { channels: 8 },
        Duration::from_millis(2),
    );
    let backend: Box<dyn IntegratorBackend> =
        Box::new(DoubleTrigger(SimSpectrometer::new(descriptor, bench.clone())));
    let devices = DeviceSet {
        chopper: Box::new(SimChopper::new(bench.clone())),
        wobbler: Box::new(SimWobbler::new(bench.clone())),
        housekeeping: Box::new(SimHousekeeping::new(bench.clone())),
        frontend: Box::new(SimFrontend::new(bench.clone())),
        backends: vec![backend],
    };
    let sink = MemorySink::new();
    let mut controller =
        AcquisitionController::new(config, devices, Box::new(sink.clone())).unwrap();
    controller.initialize(4000).unwrap();

    let err = controller.run_cycle().unwrap_err();
    match err {
        AcquisitionError::Sequencing { device, source } => {
            assert_eq!(device, "CTS");
            assert!(matches!(source, SequencingError::StartWhilePending { .. }));
        }
        other => panic!("expected a sequencing error, got {other}"),
    }
    assert!(controller
        .health()
        .contains(&("CTS".to_string(), DeviceHealth::Real)));
    assert!(controller.failures().is_empty());
    assert!(sink.is_empty());
}
