//! Reassembly of corrected lag coefficients into a one-sided power spectrum.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Interleaves corrected lags into a real sequence of length 2N.
///
/// Even entries carry `II + QQ`, odd entries `IQ + QI` with the QI channel
/// advanced by one lag and its zero-lag term dropped. The sum is halved
/// since each of the I and Q channels carries half the correlation.
pub fn interleave_autocorrelation(ii: &[f64], qi: &[f64], iq: &[f64], qq: &[f64]) -> Vec<f64> {
    let n = ii.len();
    let mut out = vec![0.0; 2 * n];
    for k in 0..n {
        let qi_next = if k + 1 < n { qi[k + 1] } else { 0.0 };
        out[2 * k] = 0.5 * (ii[k] + qq[k]);
        out[2 * k + 1] = 0.5 * (iq[k] + qi_next);
    }
    out
}

/// Symmetric Hann window of length `len`.
pub fn hann_window(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f64;
            (0..len)
                .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / denom).cos())
                .collect()
        }
    }
}

/// Transform of a Hermitian-symmetric sequence given by its first half.
///
/// For a real input `x` of length m the output has `2·(m-1)` real samples,
/// obtained as the forward FFT of the even extension of `x`.
pub fn hermitian_transform(half: &[f64]) -> Vec<f64> {
    let m = half.len();
    if m < 2 {
        return half.to_vec();
    }
    let n = 2 * (m - 1);
    let mut buffer: Vec<Complex<f64>> = (0..n)
        .map(|j| {
            let source = if j < m { j } else { n - j };
            Complex::new(half[source], 0.0)
        })
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    buffer.into_iter().map(|c| c.re).collect()
}

/// Windows the autocorrelation, transforms it and keeps the upper half of
/// the magnitude spectrum.
pub fn one_sided_spectrum(autocorrelation: &[f64], scale: f64) -> Vec<f64> {
    let m = autocorrelation.len();
    let window = hann_window(2 * m);
    let windowed: Vec<f64> = autocorrelation
        .iter()
        .zip(&window[m..])
        .map(|(r, w)| r * w)
        .collect();

    let mut spectrum: Vec<f64> = hermitian_transform(&windowed)
        .into_iter()
        .map(|v| scale * v.abs())
        .collect();

    if spectrum.len() > 1 {
        spectrum[0] = spectrum[1];
    }
    let half = spectrum.len() / 2;
    spectrum.split_off(half)
}
