//! Two-load calibration of total-power spectra
//!
//! Every backend keeps one [`CalibrationState`]. Cold and hot load looks
//! refresh the reference powers; each antenna or reference look is then
//! converted to brightness temperature against the latest pair and folded
//! into running means of the calibrated and noise temperature traces.

use crate::phase::PhaseTag;
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Physical temperature of the liquid-nitrogen cold load.
pub const DEFAULT_COLD_LOAD_K: f64 = 21.0;

/// Physical temperature of the ambient hot load.
pub const DEFAULT_HOT_LOAD_K: f64 = 295.0;

/// Offset applied to a Y-factor of exactly one.
const Y_FACTOR_EPSILON: f64 = 1e-4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("{context}: spectrum has {got} channels, expected {expected}")]
    ChannelMismatch {
        context: String,
        got: usize,
        expected: usize,
    },
}

/// Temperatures of the two calibration loads in kelvin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadTemperatures {
    pub cold_k: f64,
    pub hot_k: f64,
}

impl Default for LoadTemperatures {
    fn default() -> Self {
        Self {
            cold_k: DEFAULT_COLD_LOAD_K,
            hot_k: DEFAULT_HOT_LOAD_K,
        }
    }
}

/// Brightness temperature of `measured` against the cold and hot powers.
///
/// Channels where the hot and cold powers coincide are set to zero.
pub fn calibrate(
    measured: &Array1<f64>,
    cold: &Array1<f64>,
    hot: &Array1<f64>,
    loads: &LoadTemperatures,
) -> Array1<f64> {
    let span = loads.hot_k - loads.cold_k;
    Zip::from(measured)
        .and(cold)
        .and(hot)
        .map_collect(|&pm, &pc, &ph| {
            if ph == pc {
                0.0
            } else {
                loads.cold_k + (pm - pc) / (ph - pc) * span
            }
        })
}

/// Receiver noise temperature from the Y-factor `hot / cold`.
///
/// A Y-factor of exactly one is nudged by a small epsilon. Channels without
/// cold power have no defined Y-factor and are reported as zero.
pub fn noise_temperature(
    cold: &Array1<f64>,
    hot: &Array1<f64>,
    loads: &LoadTemperatures,
) -> Array1<f64> {
    Zip::from(cold).and(hot).map_collect(|&pc, &ph| {
        let mut y = ph / pc;
        if y == 1.0 {
            y += Y_FACTOR_EPSILON;
        }
        let t = (loads.hot_k - loads.cold_k * y) / (y - 1.0);
        if t.is_finite() {
            t
        } else {
            0.0
        }
    })
}

/// Cumulative mean over successive spectra.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    count: u64,
    mean: Option<Array1<f64>>,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `value` in as `mean <- (mean·(n-1) + value)/n`.
    pub fn update(&mut self, value: &Array1<f64>) -> Result<&Array1<f64>, CalibrationError> {
        let mean = match self.mean.take() {
            Some(mean) if self.count > 0 => {
                if mean.len() != value.len() {
                    let expected = mean.len();
                    self.mean = Some(mean);
                    return Err(CalibrationError::ChannelMismatch {
                        context: "running mean".to_string(),
                        got: value.len(),
                        expected,
                    });
                }
                let n = (self.count + 1) as f64;
                (mean * (n - 1.0) + value) / n
            }
            _ => value.clone(),
        };
        self.count += 1;
        Ok(self.mean.insert(mean))
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        if self.count == 0 {
            None
        } else {
            self.mean.as_ref()
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.mean = None;
    }
}

/// Result of calibrating one target look.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedSpectrum {
    pub tag: PhaseTag,
    pub temperature: Array1<f64>,
    pub noise: Array1<f64>,
}

/// Per-backend calibration state.
#[derive(Debug, Clone)]
pub struct CalibrationState {
    loads: LoadTemperatures,
    cold: Option<Array1<f64>>,
    hot: Option<Array1<f64>>,
    last_target: Option<Array1<f64>>,
    temperature: Option<Array1<f64>>,
    noise: Option<Array1<f64>>,
    temperature_mean: RunningMean,
    noise_mean: RunningMean,
}

impl CalibrationState {
    pub fn new(loads: LoadTemperatures) -> Self {
        Self {
            loads,
            cold: None,
            hot: None,
            last_target: None,
            temperature: None,
            noise: None,
            temperature_mean: RunningMean::new(),
            noise_mean: RunningMean::new(),
        }
    }

    pub fn loads(&self) -> &LoadTemperatures {
        &self.loads
    }

    fn expected_channels(&self) -> Option<usize> {
        self.cold
            .as_ref()
            .or(self.hot.as_ref())
            .or(self.last_target.as_ref())
            .map(|a| a.len())
    }

    /// Stores the power of one phase and calibrates target looks.
    ///
    /// Cold and hot looks only refresh the reference powers. A target look
    /// (antenna or reference load) returns the calibrated spectrum once both
    /// references are known, and `None` before that. All-zero spectra come
    /// from stand-in devices and are ignored.
    ///
    /// # Errors
    /// Returns [`CalibrationError::ChannelMismatch`] when the channel count
    /// differs from earlier phases.
    pub fn record_phase(
        &mut self,
        power: &[f64],
        tag: PhaseTag,
    ) -> Result<Option<CalibratedSpectrum>, CalibrationError> {
        if power.iter().all(|&p| p == 0.0) {
            debug!(%tag, "ignoring empty spectrum");
            return Ok(None);
        }
        if let Some(expected) = self.expected_channels() {
            if power.len() != expected {
                return Err(CalibrationError::ChannelMismatch {
                    context: format!("phase {}", tag),
                    got: power.len(),
                    expected,
                });
            }
        }

        let power = Array1::from(power.to_vec());
        match tag {
            PhaseTag::Cold => {
                self.cold = Some(power);
                Ok(None)
            }
            PhaseTag::Hot => {
                self.hot = Some(power);
                Ok(None)
            }
            PhaseTag::Antenna0 | PhaseTag::Antenna1 | PhaseTag::Reference => {
                self.last_target = Some(power);
                self.calibrate_target(tag)
            }
        }
    }

    fn calibrate_target(
        &mut self,
        tag: PhaseTag,
    ) -> Result<Option<CalibratedSpectrum>, CalibrationError> {
        let (Some(cold), Some(hot), Some(target)) = (&self.cold, &self.hot, &self.last_target)
        else {
            return Ok(None);
        };

        let temperature = calibrate(target, cold, hot, &self.loads);
        let noise = noise_temperature(cold, hot, &self.loads);

        self.temperature_mean.update(&temperature)?;
        self.noise_mean.update(&noise)?;
        self.temperature = Some(temperature.clone());
        self.noise = Some(noise.clone());

        Ok(Some(CalibratedSpectrum {
            tag,
            temperature,
            noise,
        }))
    }

    /// Latest calibrated spectrum, undefined until both loads have been seen.
    pub fn calibrated_temperature(&self) -> Option<&Array1<f64>> {
        self.temperature.as_ref()
    }

    pub fn noise_temperature(&self) -> Option<&Array1<f64>> {
        self.noise.as_ref()
    }

    pub fn integrated_temperature(&self) -> Option<&Array1<f64>> {
        self.temperature_mean.mean()
    }

    pub fn integrated_noise(&self) -> Option<&Array1<f64>> {
        self.noise_mean.mean()
    }

    pub fn integration_count(&self) -> u64 {
        self.temperature_mean.count()
    }

    /// Restarts both running means. Reference powers are kept.
    pub fn reset_integration(&mut self) {
        self.temperature_mean.reset();
        self.noise_mean.reset();
        info!("integration reset");
    }

    /// Forgets everything, as on session reinitialization.
    pub fn reset(&mut self) {
        *self = Self::new(self.loads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn filled(n: usize, v: f64) -> Vec<f64> {
        vec![v; n]
    }

    #[test]
    fn test_calibration_example() {
        let mut state = CalibrationState::new(LoadTemperatures::default());
        assert!(state.record_phase(&filled(8, 100.0), PhaseTag::Cold).unwrap().is_none());
        assert!(state.record_phase(&filled(8, 200.0), PhaseTag::Hot).unwrap().is_none());

        let result = state
            .record_phase(&filled(8, 150.0), PhaseTag::Antenna0)
            .unwrap()
            .expect("both loads known");
        for t in result.temperature.iter() {
            assert_abs_diff_eq!(*t, 158.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_equal_loads_give_zero() {
        let loads = LoadTemperatures::default();
        let out = calibrate(
            &array![150.0, 150.0],
            &array![100.0, 100.0],
            &array![100.0, 200.0],
            &loads,
        );
        assert_eq!(out[0], 0.0);
        assert_abs_diff_eq!(out[1], 158.0, epsilon = 1e-12);
    }

    #[test]
    fn test_undefined_until_both_loads_seen() {
        let mut state = CalibrationState::new(LoadTemperatures::default());
        assert!(state
            .record_phase(&filled(4, 150.0), PhaseTag::Antenna0)
            .unwrap()
            .is_none());
        state.record_phase(&filled(4, 100.0), PhaseTag::Cold).unwrap();
        assert!(state
            .record_phase(&filled(4, 150.0), PhaseTag::Antenna1)
            .unwrap()
            .is_none());
        assert!(state.calibrated_temperature().is_none());
        assert!(state.noise_temperature().is_none());
        assert!(state.integrated_temperature().is_none());
    }

    #[test]
    fn test_noise_temperature_y_factor() {
        let loads = LoadTemperatures::default();
        // y = 2: (295 - 21·2)/(2 - 1) = 253
        let noise = noise_temperature(&array![100.0], &array![200.0], &loads);
        assert_abs_diff_eq!(noise[0], 253.0, epsilon = 1e-12);
    }

    #[test]
    fn test_noise_temperature_unit_y_is_finite() {
        let loads = LoadTemperatures::default();
        let noise = noise_temperature(&array![100.0], &array![100.0], &loads);
        assert!(noise[0].is_finite());
        assert_abs_diff_eq!(noise[0], (295.0 - 21.0 * 1.0001) / 1e-4, epsilon = 1e-3);
    }

    #[test]
    fn test_noise_temperature_without_cold_power() {
        let loads = LoadTemperatures::default();
        let noise = noise_temperature(&array![0.0, 0.0], &array![100.0, 0.0], &loads);
        assert_eq!(noise[0], 0.0);
        assert_eq!(noise[1], 0.0);
    }

    #[test]
    fn test_running_mean_constant() {
        for k in 1..20 {
            let mut mean = RunningMean::new();
            for _ in 0..k {
                mean.update(&array![3.7, -1.25]).unwrap();
            }
            let m = mean.mean().unwrap();
            assert_abs_diff_eq!(m[0], 3.7, epsilon = 1e-12);
            assert_abs_diff_eq!(m[1], -1.25, epsilon = 1e-12);
            assert_eq!(mean.count(), k);
        }
    }

    #[test]
    fn test_running_mean_average() {
        let mut mean = RunningMean::new();
        mean.update(&array![1.0]).unwrap();
        mean.update(&array![2.0]).unwrap();
        mean.update(&array![6.0]).unwrap();
        assert_abs_diff_eq!(mean.mean().unwrap()[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_running_mean_rejects_length_change() {
        let mut mean = RunningMean::new();
        mean.update(&array![1.0, 2.0]).unwrap();
        assert!(mean.update(&array![1.0]).is_err());
        assert_eq!(mean.count(), 1);
        assert!(mean.mean().is_some());
    }

    #[test]
    fn test_reset_integration_keeps_loads() {
        let mut state = CalibrationState::new(LoadTemperatures::default());
        state.record_phase(&filled(2, 100.0), PhaseTag::Cold).unwrap();
        state.record_phase(&filled(2, 200.0), PhaseTag::Hot).unwrap();
        state.record_phase(&filled(2, 150.0), PhaseTag::Antenna0).unwrap();
        state.record_phase(&filled(2, 160.0), PhaseTag::Antenna1).unwrap();
        assert_eq!(state.integration_count(), 2);

        state.reset_integration();
        assert_eq!(state.integration_count(), 0);
        assert!(state.integrated_temperature().is_none());

        // Loads survive, so the next target calibrates immediately
        let result = state
            .record_phase(&filled(2, 150.0), PhaseTag::Antenna0)
            .unwrap();
        assert!(result.is_some());
        assert_abs_diff_eq!(
            state.integrated_temperature().unwrap()[0],
            158.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_reference_phase_is_calibrated() {
        let mut state = CalibrationState::new(LoadTemperatures::default());
        state.record_phase(&filled(3, 100.0), PhaseTag::Cold).unwrap();
        state.record_phase(&filled(3, 200.0), PhaseTag::Hot).unwrap();
        let result = state
            .record_phase(&filled(3, 200.0), PhaseTag::Reference)
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(result.temperature[0], 295.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_spectrum_ignored() {
        let mut state = CalibrationState::new(LoadTemperatures::default());
        state.record_phase(&filled(3, 100.0), PhaseTag::Cold).unwrap();
        state.record_phase(&filled(3, 0.0), PhaseTag::Cold).unwrap();
        state.record_phase(&filled(3, 200.0), PhaseTag::Hot).unwrap();
        let result = state
            .record_phase(&filled(3, 150.0), PhaseTag::Antenna0)
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(result.temperature[1], 158.0, epsilon = 1e-12);
    }

    #[test]
    fn test_channel_mismatch_is_error() {
        let mut state = CalibrationState::new(LoadTemperatures::default());
        state.record_phase(&filled(3, 100.0), PhaseTag::Cold).unwrap();
        let err = state.record_phase(&filled(4, 200.0), PhaseTag::Hot).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::ChannelMismatch {
                got: 4,
                expected: 3,
                ..
            }
        ));
    }
}
