//! Calibration-cycle controller
//!
//! Walks the four chopper phases of a cycle. Within one phase the order is
//! fixed: chopper move and settle, trigger every healthy backend, start the
//! wobbler move, sample housekeeping, then poll and fetch every triggered
//! backend and wait for the wobbler. Fetched data goes to the record sink,
//! through the quantization corrector for correlators, and into the
//! per-backend calibration state.
//!
//! Device failures are absorbed by the health slots. Only caller mistakes,
//! malformed readouts and sink errors stop a cycle, and a stopped phase
//! still fetches every backend it triggered.

use crate::config::{PhaseStep, SessionConfig};
use crate::devices::DeviceSet;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::records::{RawRecord, RecordSink, HK_IF_GHZ, HK_REFERENCE_GHZ, HK_SKY_GHZ};
use crate::session::{wobbler_pattern, SessionState};
use chrono::Utc;
use hardware::{
    ChopperTarget, CorrelatorReadout, Device, DeviceHealth, DeviceResult, DeviceSlot, Frontend,
    Housekeeping, IntegratorBackend, Outcome, PositionActuator, RawSpectrum, Substitutable,
    WobblerSteps,
};
use radiometry::{
    correct_three_level, CalibrationState, LagSums, PhaseTag, SweepAverager, SweepMean,
    ThresholdRates,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sleep between two completion polls of a backend.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Slack on top of twice the integration time before a backend is given up.
const FETCH_GRACE: Duration = Duration::from_millis(200);

/// A device that was replaced by its stand-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFailure {
    pub device: String,
    pub capability: String,
    pub reason: String,
}

/// What happened to the backends in one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub tag: PhaseTag,
    pub target: ChopperTarget,
    /// Backends whose data was stored.
    pub recorded: Vec<String>,
    /// Backends without data this phase (substituted or short read).
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleReport {
    pub cycle_index: u64,
    pub phases: Vec<PhaseReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Stopped at a phase boundary; the report covers the phases that ran.
    Interrupted(CycleReport),
}

impl CycleOutcome {
    pub fn report(&self) -> &CycleReport {
        match self {
            CycleOutcome::Completed(r) | CycleOutcome::Interrupted(r) => r,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateReport {
    pub retuned_to: Option<f64>,
    pub rotated_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: usize,
    pub total: usize,
}

impl fmt::Display for CloseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "closed {}/{} devices", self.closed, self.total)
    }
}

struct BackendChannel {
    slot: DeviceSlot<dyn IntegratorBackend>,
    calibration: CalibrationState,
    sweep: SweepAverager,
    triggered: bool,
}

/// Runs an operation through a slot and records a resulting substitution.
fn operate<D, T, F>(
    slot: &mut DeviceSlot<D>,
    failures: &mut Vec<DeviceFailure>,
    capability: &str,
    op: F,
) -> AcquisitionResult<Outcome<T>>
where
    D: Device + Substitutable + ?Sized,
    F: FnMut(&mut D) -> DeviceResult<T>,
{
    let was_real = slot.is_real();
    let outcome = slot
        .operate(capability, op)
        .map_err(|e| AcquisitionError::from_device(slot.label(), e))?;
    note_substitution(slot, failures, capability, was_real);
    Ok(outcome)
}

fn note_substitution<D>(
    slot: &DeviceSlot<D>,
    failures: &mut Vec<DeviceFailure>,
    capability: &str,
    was_real: bool,
) where
    D: Device + Substitutable + ?Sized,
{
    if was_real && !slot.is_real() {
        failures.push(DeviceFailure {
            device: slot.label().to_string(),
            capability: capability.to_string(),
            reason: slot.failure().unwrap_or("unknown").to_string(),
        });
    }
}

/// Quantization-corrected power of a correlator readout, `None` if the
/// readout holds no integrations.
fn correct_readout(
    backend: &str,
    readout: &CorrelatorReadout,
) -> AcquisitionResult<Option<Vec<f64>>> {
    let Some(norm) = readout.normalized() else {
        warn!(backend, "correlator readout holds no integrations, record skipped");
        return Ok(None);
    };
    let [i_high, q_high, i_low, q_low, i_err, q_err] = norm.rates;
    let rates = ThresholdRates {
        i_high,
        q_high,
        i_low,
        q_low,
        i_err,
        q_err,
    };
    let lags = LagSums::new(norm.ii, norm.qi, norm.iq, norm.qq);
    correct_three_level(&lags, &rates)
        .map(Some)
        .map_err(|source| AcquisitionError::Quantization {
            backend: backend.to_string(),
            source,
        })
}

/// Owns every device of a session and sequences calibration cycles.
pub struct AcquisitionController {
    config: SessionConfig,
    plan: [PhaseStep; 4],
    wobbler_positions: [WobblerSteps; 4],
    chopper: DeviceSlot<dyn PositionActuator<ChopperTarget>>,
    wobbler: DeviceSlot<dyn PositionActuator<WobblerSteps>>,
    housekeeping: DeviceSlot<dyn Housekeeping>,
    frontend: DeviceSlot<dyn Frontend>,
    backends: Vec<BackendChannel>,
    sink: Box<dyn RecordSink>,
    session: SessionState,
    failures: Vec<DeviceFailure>,
    sweep_means: Vec<(String, SweepMean)>,
    initialized: bool,
}

impl AcquisitionController {
    /// Validates `config` and takes ownership of the devices and the sink.
    pub fn new(
        config: SessionConfig,
        devices: DeviceSet,
        sink: Box<dyn RecordSink>,
    ) -> AcquisitionResult<Self> {
        config.validate()?;
        let loads = config.loads();
        let backends = devices
            .backends
            .into_iter()
            .map(|device| BackendChannel {
                slot: DeviceSlot::new(device),
                calibration: CalibrationState::new(loads),
                sweep: SweepAverager::new(),
                triggered: false,
            })
            .collect();

        Ok(Self {
            plan: config.chopper_mode.plan(),
            wobbler_positions: wobbler_pattern(
                config.wobbler_start,
                config.wobbler_step,
                config.wobbler_max,
            ),
            chopper: DeviceSlot::new(devices.chopper),
            wobbler: DeviceSlot::new(devices.wobbler),
            housekeeping: DeviceSlot::new(devices.housekeeping),
            frontend: DeviceSlot::new(devices.frontend),
            backends,
            sink,
            session: SessionState::new(config.frequency_ghz),
            failures: Vec::new(),
            sweep_means: Vec::new(),
            initialized: false,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn device_count(&self) -> usize {
        4 + self.backends.len()
    }

    pub fn healthy_backends(&self) -> usize {
        self.backends.iter().filter(|b| b.slot.is_real()).count()
    }

    /// Health of every device, actuators first.
    pub fn health(&self) -> Vec<(String, DeviceHealth)> {
        let mut health = vec![
            (self.chopper.label().to_string(), self.chopper.health()),
            (self.wobbler.label().to_string(), self.wobbler.health()),
            (
                self.housekeeping.label().to_string(),
                self.housekeeping.health(),
            ),
            (self.frontend.label().to_string(), self.frontend.health()),
        ];
        health.extend(
            self.backends
                .iter()
                .map(|b| (b.slot.label().to_string(), b.slot.health())),
        );
        health
    }

    pub fn failures(&self) -> &[DeviceFailure] {
        &self.failures
    }

    /// Calibration state of the backend called `name`.
    pub fn calibration(&self, name: &str) -> Option<&CalibrationState> {
        self.backends
            .iter()
            .find(|b| b.slot.label() == name)
            .map(|b| &b.calibration)
    }

    /// Per-frequency means collected in sweep mode, tagged with the backend name.
    pub fn sweep_means(&self) -> &[(String, SweepMean)] {
        &self.sweep_means
    }

    /// Restarts the running means of every backend.
    pub fn reset_integration(&mut self) {
        for backend in &mut self.backends {
            backend.calibration.reset_integration();
        }
    }

    /// Brings up all devices and parks the wobbler at `start_position`.
    ///
    /// Devices that fail to initialize are substituted. The session is
    /// aborted, with every device closed again, only when no backend is
    /// left healthy.
    pub fn initialize(&mut self, start_position: WobblerSteps) -> AcquisitionResult<()> {
        if self.initialized {
            return Err(AcquisitionError::AlreadyInitialized);
        }
        info!("Initializing {} devices", self.device_count());

        operate(&mut self.chopper, &mut self.failures, "init", |d| d.init())?;
        operate(&mut self.wobbler, &mut self.failures, "init", |d| d.init())?;
        operate(&mut self.housekeeping, &mut self.failures, "init", |d| d.init())?;
        operate(&mut self.frontend, &mut self.failures, "init", |d| d.init())?;
        for backend in &mut self.backends {
            operate(&mut backend.slot, &mut self.failures, "init", |d| d.init())?;
        }

        let total = self.backends.len();
        let healthy = self.healthy_backends();
        if healthy == 0 {
            error!("No backend came up, aborting session");
            let report = self.close();
            warn!("{report}");
            return Err(AcquisitionError::NoHealthyBackend { total });
        }

        if let Err(e) = self.start_session(start_position) {
            error!("Session start failed, closing devices: {e}");
            let report = self.close();
            warn!("{report}");
            return Err(e);
        }

        self.initialized = true;
        info!(
            healthy,
            total,
            wobbler = ?self.wobbler_positions,
            "Initialized, {healthy}/{total} backends healthy"
        );
        Ok(())
    }

    /// Parks the wobbler, tunes the frontend and opens the first file.
    fn start_session(&mut self, start_position: WobblerSteps) -> AcquisitionResult<()> {
        let settle = self.config.settle_timeout();
        operate(&mut self.wobbler, &mut self.failures, "set_position", |w| {
            w.set_position(start_position)?;
            w.wait_until_settled(settle)
        })?;
        self.wobbler_positions =
            wobbler_pattern(start_position, self.config.wobbler_step, self.config.wobbler_max);

        self.session = SessionState::new(self.config.frequency_ghz);
        self.tune(self.config.frequency_ghz)?;

        for backend in &mut self.backends {
            backend.calibration.reset();
            backend.sweep = SweepAverager::new();
        }
        self.sweep_means.clear();

        let path = self.session.file_path(&self.config);
        self.sink.open_file(&path)?;
        Ok(())
    }

    fn tune(&mut self, sky_ghz: f64) -> AcquisitionResult<()> {
        let if_ghz = self.config.if_offset_ghz;
        let was_real = self.frontend.is_real();
        let outcome = self
            .frontend
            .operate("tune", |f| f.tune(sky_ghz, if_ghz))
            .map_err(|source| AcquisitionError::FrequencyOutOfBounds { sky_ghz, source })?;
        note_substitution(&self.frontend, &mut self.failures, "tune", was_real);

        match outcome {
            Outcome::Real(reference_ghz) => {
                self.session.reference_ghz = reference_ghz;
                info!(sky_ghz, reference_ghz, "Tuned frontend");
            }
            Outcome::StandIn(_) => warn!(sky_ghz, "Frontend substituted, frequency not set"),
            Outcome::Skipped(e) => warn!(sky_ghz, "Tuning skipped: {e}"),
        }
        self.session.frequency_ghz = sky_ghz;
        Ok(())
    }

    /// Runs one full cycle.
    pub fn run_cycle(&mut self) -> AcquisitionResult<CycleOutcome> {
        self.run_cycle_with(|| false)
    }

    /// Runs one cycle, checking `interrupt` before every phase.
    pub fn run_cycle_with<F>(&mut self, mut interrupt: F) -> AcquisitionResult<CycleOutcome>
    where
        F: FnMut() -> bool,
    {
        if !self.initialized {
            return Err(AcquisitionError::NotInitialized);
        }

        let mut report = CycleReport {
            cycle_index: self.session.cycle_index,
            phases: Vec::with_capacity(self.plan.len()),
        };
        let plan = self.plan;
        for (index, (target, tag)) in plan.into_iter().enumerate() {
            if interrupt() {
                info!(
                    cycle = report.cycle_index,
                    phase = index,
                    "Cycle interrupted"
                );
                return Ok(CycleOutcome::Interrupted(report));
            }
            report.phases.push(self.run_phase(index, target, tag)?);
        }

        self.session.cycle_index += 1;
        debug!(cycle = report.cycle_index, "Cycle complete");
        Ok(CycleOutcome::Completed(report))
    }

    fn run_phase(
        &mut self,
        index: usize,
        target: ChopperTarget,
        tag: PhaseTag,
    ) -> AcquisitionResult<PhaseReport> {
        let settle = self.config.settle_timeout();

        operate(&mut self.chopper, &mut self.failures, "set_position", |c| {
            c.set_position(target)?;
            c.wait_until_settled(settle)
        })?;
        std::thread::sleep(self.config.blank_time());

        for i in 0..self.backends.len() {
            let backend = &mut self.backends[i];
            backend.triggered = false;
            if !backend.slot.is_real() {
                continue;
            }
            let started = operate(
                &mut backend.slot,
                &mut self.failures,
                "start_integration",
                |b| b.start_integration(),
            );
            match started {
                Ok(outcome) => self.backends[i].triggered = outcome.is_real(),
                Err(e) => {
                    self.discard_pending(index);
                    return Err(e);
                }
            }
        }

        let position = self.wobbler_positions[index];
        let housekeeping = operate(&mut self.wobbler, &mut self.failures, "set_position", |w| {
            w.set_position(position)
        })
        .and_then(|_| self.sample_housekeeping());
        let housekeeping = match housekeeping {
            Ok(values) => values,
            Err(e) => {
                self.discard_pending(index);
                return Err(e);
            }
        };
        let timestamp = Utc::now().timestamp();
        let record_index = self.session.record_index;

        let mut phase = PhaseReport {
            tag,
            target,
            recorded: Vec::new(),
            skipped: Vec::new(),
        };
        // Every triggered backend is fetched even after a failure, so none
        // is left with a pending integration. The first error is returned.
        let mut first_error = None;
        for i in 0..self.backends.len() {
            let name = self.backends[i].slot.label().to_string();
            if !std::mem::take(&mut self.backends[i].triggered) {
                phase.skipped.push(name);
                continue;
            }
            let recorded = self.fetch_backend(i, index).and_then(|raw| match raw {
                Some(raw) => {
                    self.record_backend(i, raw, tag, timestamp, record_index, &housekeeping)
                }
                None => Ok(false),
            });
            match recorded {
                Ok(true) => phase.recorded.push(name),
                Ok(false) => phase.skipped.push(name),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!(backend = %name, "Further failure in phase {tag}: {e}"),
            }
        }

        let settled = operate(
            &mut self.wobbler,
            &mut self.failures,
            "wait_until_settled",
            |w| w.wait_until_settled(settle),
        );

        if !phase.recorded.is_empty() {
            self.session.record_index += 1;
            self.session.records_in_file += 1;
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        settled?;
        info!(
            phase = %tag,
            recorded = phase.recorded.len(),
            skipped = phase.skipped.len(),
            "Phase complete"
        );
        Ok(phase)
    }

    fn sample_housekeeping(&mut self) -> AcquisitionResult<Vec<f32>> {
        let outcome = operate(
            &mut self.housekeeping,
            &mut self.failures,
            "sample",
            |h| h.sample(),
        )?;
        let mut values = outcome
            .value()
            .unwrap_or_else(|| vec![0.0; self.housekeeping.device().channel_names().len()]);
        if values.len() > HK_IF_GHZ {
            values[HK_REFERENCE_GHZ] = self.session.reference_ghz as f32;
            values[HK_SKY_GHZ] = self.session.frequency_ghz as f32;
            values[HK_IF_GHZ] = self.config.if_offset_ghz as f32;
        }
        Ok(values)
    }

    /// Fetches and drops the data of every backend still triggered in this
    /// phase, leaving no integration pending.
    fn discard_pending(&mut self, slot: usize) {
        for i in 0..self.backends.len() {
            if !std::mem::take(&mut self.backends[i].triggered) {
                continue;
            }
            if let Err(e) = self.fetch_backend(i, slot) {
                warn!(
                    backend = %self.backends[i].slot.label(),
                    "Failed to discard pending integration: {e}"
                );
            }
        }
    }

    /// Waits for backend `i` to finish and fetches into `slot`.
    ///
    /// Returns `None` when the phase produced no real data for this backend.
    fn fetch_backend(&mut self, i: usize, slot: usize) -> AcquisitionResult<Option<RawSpectrum>> {
        let limit = self.config.integration_time() * 2 + FETCH_GRACE;
        let deadline = Instant::now() + limit;
        let backend = &mut self.backends[i];

        loop {
            let outcome = operate(
                &mut backend.slot,
                &mut self.failures,
                "integration_complete",
                |b| b.integration_complete(),
            )?;
            match outcome {
                Outcome::Real(true) => break,
                Outcome::StandIn(_) => return Ok(None),
                Outcome::Real(false) | Outcome::Skipped(_) => {}
            }
            if Instant::now() >= deadline {
                backend.slot.substitute(
                    "integration_complete",
                    format!("integration not complete after {limit:?}"),
                );
                note_substitution(
                    &backend.slot,
                    &mut self.failures,
                    "integration_complete",
                    true,
                );
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let outcome = operate(&mut backend.slot, &mut self.failures, "fetch", |b| {
            b.fetch(slot)
        })?;
        Ok(outcome.real())
    }

    fn record_backend(
        &mut self,
        i: usize,
        raw: RawSpectrum,
        tag: PhaseTag,
        timestamp: i64,
        record_index: u64,
        housekeeping: &[f32],
    ) -> AcquisitionResult<bool> {
        let backend = &mut self.backends[i];
        let name = backend.slot.label().to_string();

        let (channel_data, test_data, power) = match raw {
            RawSpectrum::Power(values) => {
                let power: Vec<f64> = values.iter().map(|&v| v as f64).collect();
                (values, None, power)
            }
            RawSpectrum::Correlator(readout) => {
                let Some(power) = correct_readout(&name, &readout)? else {
                    return Ok(false);
                };
                let channel_data = power.iter().map(|&v| v as f32).collect();
                (channel_data, Some(readout.to_words()), power)
            }
        };

        let record = RawRecord {
            timestamp,
            housekeeping: housekeeping.to_vec(),
            channel_data,
            test_data,
            tag,
        };
        self.sink.append(&name, record_index, &record)?;

        let calibrated = backend
            .calibration
            .record_phase(&power, tag)
            .map_err(|source| AcquisitionError::Calibration {
                backend: name.clone(),
                source,
            })?;

        if let Some(spectrum) = calibrated {
            debug!(
                backend = %name,
                phase = %tag,
                mean_k = spectrum.temperature.mean().unwrap_or(0.0),
                "Calibrated"
            );
            if self.config.sweep {
                let temperature = spectrum.temperature.to_vec();
                if let Some(mean) =
                    backend
                        .sweep
                        .push(timestamp, self.session.frequency_ghz, &temperature)
                {
                    info!(
                        backend = %name,
                        frequency_ghz = mean.frequency_ghz,
                        count = mean.count,
                        "Sweep point complete"
                    );
                    self.sweep_means.push((name, mean));
                }
            }
        }
        Ok(true)
    }

    /// Advances the sweep frequency and rotates the output file when due.
    ///
    /// Call once after every completed cycle.
    pub fn update(&mut self) -> AcquisitionResult<UpdateReport> {
        if !self.initialized {
            return Err(AcquisitionError::NotInitialized);
        }
        let mut report = UpdateReport::default();

        if self.session.sweep_due(&self.config) {
            let next = self.session.next_frequency(&self.config);
            self.tune(next)?;
            self.reset_integration();
            std::thread::sleep(self.config.retune_wait());
            report.retuned_to = Some(next);
        }

        if self.session.file_full(self.config.records_per_file) {
            self.sink.flush()?;
            self.session.rotate_file();
            let path = self.session.file_path(&self.config);
            self.sink.open_file(&path)?;
            info!(
                sequence = self.session.file_sequence,
                "Rotated output to {}",
                path.display()
            );
            report.rotated_file = Some(path);
        }
        Ok(report)
    }

    /// Closes every device, continuing past individual failures.
    pub fn close(&mut self) -> CloseReport {
        let mut closed = 0;
        closed += usize::from(self.chopper.close());
        closed += usize::from(self.wobbler.close());
        closed += usize::from(self.housekeeping.close());
        closed += usize::from(self.frontend.close());
        for backend in &mut self.backends {
            closed += usize::from(backend.slot.close());
            if let Some(mean) = backend.sweep.finish() {
                self.sweep_means.push((backend.slot.label().to_string(), mean));
            }
        }
        if let Err(e) = self.sink.flush() {
            warn!("Failed to flush records: {}", e);
        }
        self.initialized = false;

        let report = CloseReport {
            closed,
            total: self.device_count(),
        };
        info!("{report}");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemorySink;
    use hardware::sim::SimBench;

    fn controller(backends: &[&str]) -> AcquisitionController {
        let config = SessionConfig {
            integration_time_ms: 1,
            blank_time_ms: 0,
            retune_wait_ms: 0,
            backends: backends.iter().map(|b| b.parse().unwrap()).collect(),
            ..SessionConfig::default()
        };
        let devices = DeviceSet::simulated(&config, &SimBench::default());
        AcquisitionController::new(config, devices, Box::new(MemorySink::new())).unwrap()
    }

    #[test]
    fn test_close_report_display() {
        let report = CloseReport {
            closed: 3,
            total: 5,
        };
        assert_eq!(report.to_string(), "closed 3/5 devices");
    }

    #[test]
    fn test_cycle_requires_initialization() {
        let mut c = controller(&["power:CTS:8"]);
        assert!(matches!(
            c.run_cycle(),
            Err(AcquisitionError::NotInitialized)
        ));
        assert!(matches!(c.update(), Err(AcquisitionError::NotInitialized)));
    }

    #[test]
    fn test_double_initialize_rejected() {
        let mut c = controller(&["power:CTS:8"]);
        c.initialize(4000).unwrap();
        assert!(matches!(
            c.initialize(4000),
            Err(AcquisitionError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_health_lists_every_device() {
        let c = controller(&["power:CTS:8", "correlator:ACS:8"]);
        let labels: Vec<String> = c.health().into_iter().map(|(l, _)| l).collect();
        assert_eq!(
            labels,
            ["chopper", "wobbler", "housekeeping", "frontend", "CTS", "ACS"]
        );
        assert_eq!(c.device_count(), 6);
    }

    #[test]
    fn test_correct_readout_skips_empty() {
        let readout = CorrelatorReadout::zeros(4);
        assert!(correct_readout("ACS", &readout).unwrap().is_none());
    }

    #[test]
    fn test_interrupt_before_first_phase() {
        let mut c = controller(&["power:CTS:8"]);
        c.initialize(4000).unwrap();
        let outcome = c.run_cycle_with(|| true).unwrap();
        assert!(!outcome.is_completed());
        assert!(outcome.report().phases.is_empty());
        assert_eq!(c.session().cycle_index, 0);
    }
}
