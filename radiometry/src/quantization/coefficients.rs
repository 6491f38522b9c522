//! Quantizer thresholds and the Gaussian-integral polynomial that maps the
//! true correlation coefficient onto the measured three-level correlation.

use serde::{Deserialize, Serialize};
use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

/// Relative power of a three-level quantizer at the optimum threshold spacing.
const RELATIVE_POWER_CONSTANT: f64 = 1.819745692478292;

/// Threshold level, in units of the input RMS, that is crossed at `rate`.
///
/// `rate` is the fraction of samples beyond the threshold, normalized by the
/// integration count.
pub fn threshold_value(rate: f64) -> f64 {
    SQRT_2 * erfc_inv(2.0 * rate)
}

/// Input power relative to the nominal level, from one channel's high and
/// low crossing rates.
pub fn relative_power(high_rate: f64, low_rate: f64) -> f64 {
    let spacing = threshold_value(high_rate) + threshold_value(low_rate);
    RELATIVE_POWER_CONSTANT / (spacing * spacing)
}

/// Threshold-crossing rates of both quantizers, normalized by the integration count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRates {
    pub i_high: f64,
    pub q_high: f64,
    pub i_low: f64,
    pub q_low: f64,
    /// Error counters are carried for completeness and unused by the correction.
    pub i_err: f64,
    pub q_err: f64,
}

impl ThresholdRates {
    /// Same crossing rate on every comparator.
    pub fn symmetric(rate: f64) -> Self {
        Self {
            i_high: rate,
            q_high: rate,
            i_low: rate,
            q_low: rate,
            i_err: 0.0,
            q_err: 0.0,
        }
    }

    fn i(&self) -> (f64, f64) {
        (self.i_high, self.i_low)
    }

    fn q(&self) -> (f64, f64) {
        (self.q_high, self.q_low)
    }

    /// (x, y) comparator pairs feeding one correlation product.
    pub(crate) fn pair(&self, product: CorrelationProduct) -> ((f64, f64), (f64, f64)) {
        match product {
            CorrelationProduct::QQ => (self.q(), self.q()),
            CorrelationProduct::II => (self.i(), self.i()),
            CorrelationProduct::IQ => (self.i(), self.q()),
            CorrelationProduct::QI => (self.q(), self.i()),
        }
    }
}

/// Scale factor applied to a corrected spectrum to restore input power.
pub fn power_scale(rates: &ThresholdRates) -> f64 {
    let q = relative_power(rates.q_high, rates.q_low);
    let i = relative_power(rates.i_high, rates.i_low);
    (q * i).sqrt()
}

/// The four correlation products of a complex three-level correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationProduct {
    II,
    QI,
    IQ,
    QQ,
}

impl CorrelationProduct {
    pub const ALL: [CorrelationProduct; 4] = [
        CorrelationProduct::II,
        CorrelationProduct::QI,
        CorrelationProduct::IQ,
        CorrelationProduct::QQ,
    ];
}

/// Coefficients of `tc0 + tc1·r + tc2·r² + tc3·r³`, the measured correlation
/// as a function of the true correlation coefficient `r`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialCoefficients {
    pub tc0: f64,
    pub tc1: f64,
    pub tc2: f64,
    pub tc3: f64,
}

impl PolynomialCoefficients {
    /// Coefficients for a product of comparators x and y, each given as
    /// (high rate, low rate).
    pub fn for_channel(x: (f64, f64), y: (f64, f64)) -> Self {
        let xh = threshold_value(x.0);
        let xl = -threshold_value(x.1);
        let yh = threshold_value(y.0);
        let yl = -threshold_value(y.1);

        let x1 = erfc(FRAC_1_SQRT_2 * xh);
        let x2 = erfc(-FRAC_1_SQRT_2 * xl);
        let y1 = erfc(FRAC_1_SQRT_2 * yh);
        let y2 = erfc(-FRAC_1_SQRT_2 * yl);

        let gauss = |t: f64| (-0.5 * t * t).exp();
        let (gxh, gxl, gyh, gyl) = (gauss(xh), gauss(xl), gauss(yh), gauss(yl));

        let tc0 = 0.25 * (x1 * y1 + x2 * y2 - x1 * y2 - x2 * y1);
        let tc1 = (gxh + gxl) * (gyh + gyl) / (2.0 * PI);
        let tc2 = (xh * gxh + xl * gxl) * (yh * gyh + yl * gyl) / (4.0 * PI);
        let tc3 = ((1.0 - xh * xh) * gxh + (1.0 - xl * xl) * gxl)
            * ((1.0 - yh * yh) * gyh + (1.0 - yl * yl) * gyl)
            / (12.0 * PI);

        Self { tc0, tc1, tc2, tc3 }
    }

    pub fn for_product(rates: &ThresholdRates, product: CorrelationProduct) -> Self {
        let (x, y) = rates.pair(product);
        Self::for_channel(x, y)
    }

    /// Measured correlation predicted for a true coefficient `r`.
    pub fn evaluate(&self, r: f64) -> f64 {
        self.tc0 + r * (self.tc1 + r * (self.tc2 + r * self.tc3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_threshold_value_at_half_rate_is_zero() {
        assert_abs_diff_eq!(threshold_value(0.5), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_threshold_value_one_sigma() {
        // P(x > 1σ) for a unit Gaussian
        assert_abs_diff_eq!(threshold_value(0.158655253931457), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_threshold_decreases_with_rate() {
        assert!(threshold_value(0.1) > threshold_value(0.2));
        assert!(threshold_value(0.2) > threshold_value(0.3));
    }

    #[test]
    fn test_relative_power_grows_with_crossing_rate() {
        // Higher input power crosses fixed thresholds more often
        assert!(relative_power(0.3, 0.3) > relative_power(0.2, 0.2));
    }

    #[test]
    fn test_power_scale_symmetric_equals_relative_power() {
        let rates = ThresholdRates::symmetric(0.2);
        assert_abs_diff_eq!(
            power_scale(&rates),
            relative_power(0.2, 0.2),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_symmetric_thresholds_have_odd_polynomial() {
        let c = PolynomialCoefficients::for_channel((0.2, 0.2), (0.2, 0.2));
        assert_abs_diff_eq!(c.tc0, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.tc2, 0.0, epsilon = 1e-12);
        assert!(c.tc1 > 0.0);
        assert_abs_diff_eq!(c.evaluate(0.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_asymmetric_thresholds_offset_polynomial() {
        let c = PolynomialCoefficients::for_channel((0.1, 0.3), (0.1, 0.3));
        assert!(c.tc0.abs() > 1e-6);
    }

    #[test]
    fn test_product_pairs() {
        let rates = ThresholdRates {
            i_high: 0.1,
            q_high: 0.2,
            i_low: 0.15,
            q_low: 0.25,
            i_err: 0.0,
            q_err: 0.0,
        };
        assert_eq!(
            rates.pair(CorrelationProduct::IQ),
            ((0.1, 0.15), (0.2, 0.25))
        );
        assert_eq!(
            rates.pair(CorrelationProduct::QI),
            ((0.2, 0.25), (0.1, 0.15))
        );
    }
}
