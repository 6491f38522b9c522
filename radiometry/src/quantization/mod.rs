//! Three-level correlator quantization correction
//!
//! A complex three-level correlator reports four lag-sum channels (II, QI,
//! IQ, QQ) together with the rates at which the I and Q comparators crossed
//! their high and low thresholds. The coarse quantization compresses the
//! measured correlation nonlinearly. This module inverts that compression
//! lag by lag and turns the corrected autocorrelation into a power spectrum.
//!
//! # Modules
//!
//! - `coefficients` - Threshold levels, relative power and the quantizer polynomial
//! - `roots` - Physical-root selection for the per-lag cubic
//! - `spectrum` - Interleaving, windowing and the Hermitian transform

mod coefficients;
mod roots;
mod spectrum;

pub use coefficients::{
    power_scale, relative_power, threshold_value, CorrelationProduct, PolynomialCoefficients,
    ThresholdRates,
};
pub use roots::solve_physical_root;
pub use spectrum::{hann_window, hermitian_transform, interleave_autocorrelation};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Malformed correlator input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantizationError {
    #[error("lag channel {channel} has {got} lags, expected {expected}")]
    LengthMismatch {
        channel: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("correlator readout contains no lags")]
    Empty,
}

/// Lag sums of the four correlation products, normalized by the integration count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagSums {
    pub ii: Vec<f64>,
    pub qi: Vec<f64>,
    pub iq: Vec<f64>,
    pub qq: Vec<f64>,
}

impl LagSums {
    pub fn new(ii: Vec<f64>, qi: Vec<f64>, iq: Vec<f64>, qq: Vec<f64>) -> Self {
        Self { ii, qi, iq, qq }
    }

    /// Number of lags, after checking that all four channels agree.
    pub fn lag_count(&self) -> Result<usize, QuantizationError> {
        let expected = self.ii.len();
        if expected == 0 {
            return Err(QuantizationError::Empty);
        }
        for (channel, values) in [("QI", &self.qi), ("IQ", &self.iq), ("QQ", &self.qq)] {
            if values.len() != expected {
                return Err(QuantizationError::LengthMismatch {
                    channel,
                    got: values.len(),
                    expected,
                });
            }
        }
        Ok(expected)
    }

    fn channel(&self, product: CorrelationProduct) -> &[f64] {
        match product {
            CorrelationProduct::II => &self.ii,
            CorrelationProduct::QI => &self.qi,
            CorrelationProduct::IQ => &self.iq,
            CorrelationProduct::QQ => &self.qq,
        }
    }
}

/// Number of spectral channels produced from `lags` lags.
pub fn corrected_channel_count(lags: usize) -> usize {
    (2 * lags).saturating_sub(1)
}

/// Corrects one correlator readout and returns its one-sided power spectrum.
///
/// Each lag is mapped back to a true correlation coefficient in [-1, 1],
/// the corrected channels are interleaved into an autocorrelation of
/// length 2N, Hann-windowed, transformed, and scaled by the input power
/// recovered from the threshold rates. The output has `2N - 1` channels.
///
/// # Errors
/// Returns [`QuantizationError`] if the channels are empty or of different lengths.
pub fn correct_three_level(
    lags: &LagSums,
    rates: &ThresholdRates,
) -> Result<Vec<f64>, QuantizationError> {
    let n = lags.lag_count()?;

    let corrected = |product: CorrelationProduct| -> Vec<f64> {
        let coefficients = PolynomialCoefficients::for_product(rates, product);
        lags.channel(product)
            .iter()
            .map(|&measured| solve_physical_root(&coefficients, measured))
            .collect()
    };
    let ii = corrected(CorrelationProduct::II);
    let qi = corrected(CorrelationProduct::QI);
    let iq = corrected(CorrelationProduct::IQ);
    let qq = corrected(CorrelationProduct::QQ);

    let scale = power_scale(rates);
    debug!(lags = n, scale, "quantization correction");

    let autocorrelation = interleave_autocorrelation(&ii, &qi, &iq, &qq);
    Ok(spectrum::one_sided_spectrum(&autocorrelation, scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_helpers::white_noise_lag_channels;

    fn white_noise_lags(n: usize, zero_lag: f64) -> LagSums {
        let (ii, qi, iq, qq) = white_noise_lag_channels(n, zero_lag);
        LagSums::new(ii, qi, iq, qq)
    }

    #[test]
    fn test_flat_spectrum_for_uncorrelated_input() {
        let rates = ThresholdRates::symmetric(0.2);
        let n = 16;
        // Measured zero-lag value equal to the polynomial at r = 1, zero elsewhere
        let c = PolynomialCoefficients::for_product(&rates, CorrelationProduct::II);
        let lags = white_noise_lags(n, c.evaluate(1.0));

        let spectrum = correct_three_level(&lags, &rates).unwrap();
        let expected = power_scale(&rates) * hann_window(4 * n)[2 * n];

        assert_eq!(spectrum.len(), corrected_channel_count(n));
        for v in &spectrum {
            assert_relative_eq!(*v, expected, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_output_is_finite_and_bounded_before_scaling() {
        let rates = ThresholdRates {
            i_high: 0.18,
            q_high: 0.21,
            i_low: 0.2,
            q_low: 0.17,
            i_err: 0.0,
            q_err: 0.0,
        };
        let n = 32;
        let ramp = |offset: f64| -> Vec<f64> {
            (0..n)
                .map(|k| offset + 0.9 * (-(k as f64) / 6.0).exp() * (k as f64 * 0.7).cos())
                .collect()
        };
        let lags = LagSums::new(ramp(0.0), ramp(0.01), ramp(-0.02), ramp(0.03));

        let spectrum = correct_three_level(&lags, &rates).unwrap();
        let scale = power_scale(&rates);
        assert_eq!(spectrum.len(), 2 * n - 1);
        for v in &spectrum {
            assert!(v.is_finite());
            // |R| <= 1 per lag bounds every transform bin by the window sum
            assert!(*v / scale <= 2.0 * n as f64 * 2.0);
        }
    }

    #[test]
    fn test_correction_is_deterministic() {
        let rates = ThresholdRates::symmetric(0.22);
        let lags = LagSums::new(
            vec![0.6, 0.2, -0.1, 0.05],
            vec![0.0, 0.1, 0.02, -0.01],
            vec![0.0, -0.05, 0.03, 0.0],
            vec![0.58, 0.18, -0.12, 0.04],
        );
        let a = correct_three_level(&lags, &rates).unwrap();
        let b = correct_three_level(&lags, &rates).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let lags = LagSums::new(vec![0.0; 4], vec![0.0; 4], vec![0.0; 3], vec![0.0; 4]);
        let err = correct_three_level(&lags, &ThresholdRates::symmetric(0.2)).unwrap_err();
        assert_eq!(
            err,
            QuantizationError::LengthMismatch {
                channel: "IQ",
                got: 3,
                expected: 4
            }
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        let lags = LagSums::new(vec![], vec![], vec![], vec![]);
        assert!(matches!(
            correct_three_level(&lags, &ThresholdRates::symmetric(0.2)),
            Err(QuantizationError::Empty)
        ));
    }

    #[test]
    fn test_nan_lag_does_not_panic() {
        let mut lags = white_noise_lags(8, 0.5);
        lags.ii[3] = f64::NAN;
        let spectrum = correct_three_level(&lags, &ThresholdRates::symmetric(0.2)).unwrap();
        assert_eq!(spectrum.len(), 15);
    }
}
