//! Integrator backends (spectrometers and correlators)
//!
//! Every backend follows the same protocol: `start_integration` arms one
//! integration, `integration_complete` polls it without blocking, and
//! `fetch` copies the result into one of a few copy slots. A backend never
//! has more than one integration in flight.

use crate::error::{DeviceError, DeviceResult, SequencingError};
use crate::Device;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of copy slots, one per phase of a calibration cycle.
pub const DEFAULT_COPY_SLOTS: usize = 4;

/// Words preceding the lag data in a correlator readout.
pub const CORRELATOR_HEADER_WORDS: usize = 17;

/// Word holding the integration count.
const INTEGRATION_COUNT_WORD: usize = 1;

/// First of the six threshold-crossing counters.
const THRESHOLD_WORD: usize = 3;

/// Backend family, fixing the shape of its raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Returns one power value per channel (FFT or chirp-transform spectrometer).
    PowerSpectrometer { channels: usize },
    /// Returns threshold counts and lag sums of a three-level correlator.
    ThreeLevelCorrelator { lags: usize },
}

impl BackendKind {
    /// Length of the spectrum derived from one readout.
    pub fn channel_count(&self) -> usize {
        match self {
            BackendKind::PowerSpectrometer { channels } => *channels,
            BackendKind::ThreeLevelCorrelator { lags } => (2 * lags).saturating_sub(1),
        }
    }
}

/// Static description plus protocol state of one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    pub integration_time: Duration,
    pub copy_slots: usize,
    /// Where the device is reached, e.g. `host:port` or a serial path.
    pub address: Option<String>,
    initialized: bool,
    pending: bool,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, kind: BackendKind, integration_time: Duration) -> Self {
        Self {
            name: name.into(),
            kind,
            integration_time,
            copy_slots: DEFAULT_COPY_SLOTS,
            address: None,
            initialized: false,
            pending: false,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn channel_count(&self) -> usize {
        self.kind.channel_count()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
        self.pending = false;
    }

    pub fn mark_closed(&mut self) {
        self.initialized = false;
        self.pending = false;
    }

    /// Arms an integration, rejecting a second one while the first is pending.
    pub fn begin_integration(&mut self) -> Result<(), SequencingError> {
        if !self.initialized {
            return Err(SequencingError::NotInitialized {
                backend: self.name.clone(),
            });
        }
        if self.pending {
            return Err(SequencingError::StartWhilePending {
                backend: self.name.clone(),
            });
        }
        self.pending = true;
        Ok(())
    }

    /// Ends the pending integration at fetch time.
    ///
    /// The pending flag is cleared even if the readout that follows turns
    /// out to be incomplete, so the next phase can start afresh.
    pub fn finish_integration(&mut self, slot: usize) -> Result<(), SequencingError> {
        if !self.pending {
            return Err(SequencingError::FetchWithoutPending {
                backend: self.name.clone(),
            });
        }
        if slot >= self.copy_slots {
            return Err(SequencingError::SlotOutOfRange {
                backend: self.name.clone(),
                slot,
                slots: self.copy_slots,
            });
        }
        self.pending = false;
        Ok(())
    }
}

/// Raw readout of a three-level correlator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatorReadout {
    pub integration_count: i32,
    /// I-high, Q-high, I-low, Q-low, I-err, Q-err
    pub threshold_counts: [i32; 6],
    pub ii: Vec<i32>,
    pub qi: Vec<i32>,
    pub iq: Vec<i32>,
    pub qq: Vec<i32>,
}

/// Readout divided by its integration count.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReadout {
    /// I-high, Q-high, I-low, Q-low, I-err, Q-err
    pub rates: [f64; 6],
    pub ii: Vec<f64>,
    pub qi: Vec<f64>,
    pub iq: Vec<f64>,
    pub qq: Vec<f64>,
}

impl CorrelatorReadout {
    /// All-zero readout of the given lag count.
    pub fn zeros(lags: usize) -> Self {
        Self {
            integration_count: 0,
            threshold_counts: [0; 6],
            ii: vec![0; lags],
            qi: vec![0; lags],
            iq: vec![0; lags],
            qq: vec![0; lags],
        }
    }

    pub fn lag_count(&self) -> usize {
        self.ii.len()
    }

    /// Parses the correlator word stream.
    ///
    /// # Arguments
    /// * `device` - Name used in error reports
    /// * `words` - Header followed by interleaved II, QI, IQ, QQ quadruples
    /// * `lags` - Expected lag count
    ///
    /// # Errors
    /// [`DeviceError::ShortRead`] if the stream is truncated.
    pub fn from_words(device: &str, words: &[i32], lags: usize) -> DeviceResult<Self> {
        let expected = CORRELATOR_HEADER_WORDS + 4 * lags;
        if words.len() != expected || lags == 0 {
            return Err(DeviceError::ShortRead {
                device: device.to_string(),
                got: words.len(),
                expected,
            });
        }

        let mut threshold_counts = [0; 6];
        threshold_counts.copy_from_slice(&words[THRESHOLD_WORD..THRESHOLD_WORD + 6]);

        let body = &words[CORRELATOR_HEADER_WORDS..];
        let column = |offset: usize| -> Vec<i32> {
            body.chunks_exact(4).map(|quad| quad[offset]).collect()
        };

        Ok(Self {
            integration_count: words[INTEGRATION_COUNT_WORD],
            threshold_counts,
            ii: column(0),
            qi: column(1),
            iq: column(2),
            qq: column(3),
        })
    }

    /// Serializes back into the correlator word layout.
    pub fn to_words(&self) -> Vec<i32> {
        let mut words = vec![0; CORRELATOR_HEADER_WORDS];
        words[INTEGRATION_COUNT_WORD] = self.integration_count;
        words[THRESHOLD_WORD..THRESHOLD_WORD + 6].copy_from_slice(&self.threshold_counts);
        words.reserve(4 * self.lag_count());
        for k in 0..self.lag_count() {
            words.extend_from_slice(&[self.ii[k], self.qi[k], self.iq[k], self.qq[k]]);
        }
        words
    }

    /// Rates and lag sums per integration sample, or `None` for an empty readout.
    pub fn normalized(&self) -> Option<NormalizedReadout> {
        if self.integration_count <= 0 {
            return None;
        }
        let n = self.integration_count as f64;
        let scale = |v: &[i32]| -> Vec<f64> { v.iter().map(|&x| x as f64 / n).collect() };
        let mut rates = [0.0; 6];
        for (rate, &count) in rates.iter_mut().zip(&self.threshold_counts) {
            *rate = count as f64 / n;
        }
        Some(NormalizedReadout {
            rates,
            ii: scale(&self.ii),
            qi: scale(&self.qi),
            iq: scale(&self.iq),
            qq: scale(&self.qq),
        })
    }
}

/// Data fetched from one integration.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSpectrum {
    Power(Vec<f32>),
    Correlator(CorrelatorReadout),
}

impl RawSpectrum {
    /// Zero-valued data with the shape a backend of `kind` produces.
    pub fn placeholder(kind: &BackendKind) -> Self {
        match kind {
            BackendKind::PowerSpectrometer { channels } => RawSpectrum::Power(vec![0.0; *channels]),
            BackendKind::ThreeLevelCorrelator { lags } => {
                RawSpectrum::Correlator(CorrelatorReadout::zeros(*lags))
            }
        }
    }
}

/// Fixed ring of copy slots holding the latest fetch per phase.
#[derive(Debug, Clone)]
pub struct CopySlots {
    slots: Vec<Option<RawSpectrum>>,
}

impl CopySlots {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    pub fn store(&mut self, slot: usize, data: RawSpectrum) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(data);
        }
    }

    pub fn get(&self, slot: usize) -> Option<&RawSpectrum> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

/// Capability interface shared by every backend family.
pub trait IntegratorBackend: Device {
    fn descriptor(&self) -> &BackendDescriptor;

    /// Arm one integration of `descriptor().integration_time`.
    fn start_integration(&mut self) -> DeviceResult<()>;

    /// Non-blocking poll of the pending integration.
    fn integration_complete(&mut self) -> DeviceResult<bool>;

    /// Read the finished integration into copy slot `slot` and return it.
    fn fetch(&mut self, slot: usize) -> DeviceResult<RawSpectrum>;

    /// Data last fetched into `slot`.
    fn slot_data(&self, slot: usize) -> Option<&RawSpectrum>;
}
