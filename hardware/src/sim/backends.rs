use super::{not_initialized, DeviceEvent, FaultPlan, SimBench};
use crate::backend::{
    BackendDescriptor, BackendKind, CopySlots, CorrelatorReadout, IntegratorBackend, RawSpectrum,
};
use crate::error::{DeviceError, DeviceResult};
use crate::Device;
use statrs::function::erf::erfc;
use std::f64::consts::{PI, SQRT_2};
use std::time::Instant;
use tracing::debug;

/// Samples accumulated by the simulated correlator per integration.
const CORRELATOR_SAMPLES: i32 = 1_000_000;

/// Integration in flight: when it started and the power it is integrating.
#[derive(Debug, Clone, Copy)]
struct Exposure {
    started: Instant,
    power: f64,
}

/// Protocol bookkeeping shared by both simulated backend families.
struct SimIntegrator {
    descriptor: BackendDescriptor,
    bench: SimBench,
    faults: FaultPlan,
    slots: CopySlots,
    exposure: Option<Exposure>,
}

impl SimIntegrator {
    fn new(descriptor: BackendDescriptor, bench: SimBench) -> Self {
        Self {
            slots: CopySlots::new(descriptor.copy_slots),
            descriptor,
            bench,
            faults: FaultPlan::default(),
            exposure: None,
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.faults.check_init(&self.descriptor.name)?;
        self.descriptor.mark_initialized();
        self.slots.clear();
        debug!(
            address = self.descriptor.address.as_deref().unwrap_or("sim"),
            "{} initialized with {} channels",
            self.descriptor.name,
            self.descriptor.channel_count()
        );
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.faults.check_close(&self.descriptor.name)?;
        self.descriptor.mark_closed();
        self.exposure = None;
        self.bench
            .events()
            .record(DeviceEvent::Closed(self.descriptor.name.clone()));
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.descriptor.begin_integration()?;
        if let Err(e) = self.faults.check_operation(&self.descriptor.name, "start_integration") {
            self.descriptor.mark_closed();
            return Err(e);
        }
        self.exposure = Some(Exposure {
            started: Instant::now(),
            power: self.bench.power(),
        });
        self.bench
            .events()
            .record(DeviceEvent::Triggered(self.descriptor.name.clone()));
        Ok(())
    }

    fn complete(&mut self) -> DeviceResult<bool> {
        if !self.descriptor.is_initialized() {
            return Err(not_initialized(self.name(), "integration_complete"));
        }
        Ok(self
            .exposure
            .map(|e| e.started.elapsed() >= self.descriptor.integration_time)
            .unwrap_or(false))
    }

    /// Ends the pending integration and returns the integrated power.
    ///
    /// Blocks for the remainder of the integration time if called early.
    fn finish(&mut self, slot: usize) -> DeviceResult<f64> {
        self.descriptor.finish_integration(slot)?;
        let exposure = self.exposure.take().ok_or_else(|| DeviceError::Command {
            device: self.descriptor.name.clone(),
            command: "fetch".to_string(),
            reason: "no exposure recorded".to_string(),
        })?;
        let remaining = self
            .descriptor
            .integration_time
            .saturating_sub(exposure.started.elapsed());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.faults.check_operation(&self.descriptor.name, "fetch")?;
        Ok(exposure.power)
    }

    fn store(&mut self, slot: usize, data: RawSpectrum) -> RawSpectrum {
        self.slots.store(slot, data.clone());
        self.bench.events().record(DeviceEvent::Fetched {
            backend: self.descriptor.name.clone(),
            slot,
        });
        data
    }
}

/// Simulated power spectrometer with a fixed bandpass ripple.
pub struct SimSpectrometer {
    inner: SimIntegrator,
}

impl SimSpectrometer {
    pub fn new(descriptor: BackendDescriptor, bench: SimBench) -> Self {
        Self {
            inner: SimIntegrator::new(descriptor, bench),
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.inner.faults = faults;
        self
    }

    fn bandpass(channel: usize, channels: usize) -> f64 {
        1.0 + 0.1 * (PI * channel as f64 / channels.max(1) as f64).sin()
    }
}

impl Device for SimSpectrometer {
    fn label(&self) -> &str {
        self.inner.name()
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.inner.init()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }
}

impl IntegratorBackend for SimSpectrometer {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.inner.descriptor
    }

    fn start_integration(&mut self) -> DeviceResult<()> {
        self.inner.start()
    }

    fn integration_complete(&mut self) -> DeviceResult<bool> {
        self.inner.complete()
    }

    fn fetch(&mut self, slot: usize) -> DeviceResult<RawSpectrum> {
        let power = self.inner.finish(slot)?;
        let channels = self.inner.descriptor.channel_count();
        if self.inner.faults.next_fetch_is_short() {
            return Err(DeviceError::ShortRead {
                device: self.inner.name().to_string(),
                got: channels / 2,
                expected: channels,
            });
        }
        let data = (0..channels)
            .map(|k| (power * Self::bandpass(k, channels)) as f32)
            .collect();
        Ok(self.inner.store(slot, RawSpectrum::Power(data)))
    }

    fn slot_data(&self, slot: usize) -> Option<&RawSpectrum> {
        self.inner.slots.get(slot)
    }
}

/// Simulated complex three-level correlator fed with white noise.
///
/// The quantizer thresholds sit at the RMS level of `nominal_power`, so
/// crossing rates rise with the input power.
pub struct SimCorrelator {
    inner: SimIntegrator,
    nominal_power: f64,
}

impl SimCorrelator {
    pub fn new(descriptor: BackendDescriptor, bench: SimBench) -> Self {
        let nominal_power = bench.loads().power(crate::ChopperTarget::Hot);
        Self {
            inner: SimIntegrator::new(descriptor, bench),
            nominal_power,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.inner.faults = faults;
        self
    }

    fn lags(&self) -> usize {
        match self.inner.descriptor.kind {
            BackendKind::ThreeLevelCorrelator { lags } => lags,
            BackendKind::PowerSpectrometer { channels } => channels,
        }
    }

    /// Word stream the correlator would emit after integrating `power`.
    fn readout_words(&self, power: f64) -> Vec<i32> {
        let sigma = (power / self.nominal_power).sqrt();
        let rate = 0.5 * erfc(1.0 / (sigma * SQRT_2));
        let count = |fraction: f64| (fraction * CORRELATOR_SAMPLES as f64).round() as i32;

        let mut readout = CorrelatorReadout::zeros(self.lags());
        readout.integration_count = CORRELATOR_SAMPLES;
        readout.threshold_counts = [count(rate), count(rate), count(rate), count(rate), 0, 0];
        if let (Some(ii), Some(qq)) = (readout.ii.first_mut(), readout.qq.first_mut()) {
            *ii = count(2.0 * rate);
            *qq = count(2.0 * rate);
        }
        readout.to_words()
    }
}

impl Device for SimCorrelator {
    fn label(&self) -> &str {
        self.inner.name()
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.inner.init()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }
}

impl IntegratorBackend for SimCorrelator {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.inner.descriptor
    }

    fn start_integration(&mut self) -> DeviceResult<()> {
        self.inner.start()
    }

    fn integration_complete(&mut self) -> DeviceResult<bool> {
        self.inner.complete()
    }

    fn fetch(&mut self, slot: usize) -> DeviceResult<RawSpectrum> {
        let power = self.inner.finish(slot)?;
        let mut words = self.readout_words(power);
        if self.inner.faults.next_fetch_is_short() {
            words.truncate(words.len() / 2);
        }
        let readout = CorrelatorReadout::from_words(self.inner.name(), &words, self.lags())?;
        Ok(self.inner.store(slot, RawSpectrum::Correlator(readout)))
    }

    fn slot_data(&self, slot: usize) -> Option<&RawSpectrum> {
        self.inner.slots.get(slot)
    }
}
