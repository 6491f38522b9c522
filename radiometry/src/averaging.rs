//! Averaging of calibrated spectra over time and frequency channels.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default plausibility window for calibrated brightness temperatures.
pub const DEFAULT_PLAUSIBLE_RANGE_K: (f64, f64) = (50.0, 250.0);

/// Averages groups of `bin` adjacent channels.
///
/// If the length is not a multiple of `bin`, channels are dropped
/// alternately from the front and the back until it is.
pub fn bin_channels(spectrum: &[f64], bin: usize) -> Vec<f64> {
    if bin <= 1 {
        return spectrum.to_vec();
    }
    let mut start = 0;
    let mut end = spectrum.len();
    let mut from_front = true;
    while (end - start) % bin != 0 {
        if from_front {
            start += 1;
        } else {
            end -= 1;
        }
        from_front = !from_front;
    }
    spectrum[start..end]
        .chunks_exact(bin)
        .map(|chunk| chunk.iter().sum::<f64>() / bin as f64)
        .collect()
}

/// Mean of all accepted spectra taken at one sweep frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepMean {
    pub frequency_ghz: f64,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    pub count: usize,
    pub mean: Vec<f64>,
}

#[derive(Debug)]
struct SweepGroup {
    frequency_ghz: f64,
    first_timestamp: i64,
    last_timestamp: i64,
    count: usize,
    sum: Vec<f64>,
}

/// Groups consecutive calibrated spectra by sweep frequency.
///
/// A group closes when the frequency changes. Spectra with any channel
/// outside the plausibility range are rejected before grouping.
#[derive(Debug)]
pub struct SweepAverager {
    plausible_range: (f64, f64),
    channel_bin: usize,
    current: Option<SweepGroup>,
    rejected: usize,
}

impl SweepAverager {
    pub fn new() -> Self {
        Self {
            plausible_range: DEFAULT_PLAUSIBLE_RANGE_K,
            channel_bin: 1,
            current: None,
            rejected: 0,
        }
    }

    pub fn with_plausible_range(mut self, low_k: f64, high_k: f64) -> Self {
        self.plausible_range = (low_k, high_k);
        self
    }

    pub fn with_channel_bin(mut self, bin: usize) -> Self {
        self.channel_bin = bin.max(1);
        self
    }

    /// Number of spectra dropped by the plausibility check.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    fn plausible(&self, spectrum: &[f64]) -> bool {
        let (low, high) = self.plausible_range;
        spectrum.iter().all(|&t| t >= low && t <= high)
    }

    /// Adds one spectrum, returning the finished group if the frequency moved on.
    pub fn push(
        &mut self,
        timestamp: i64,
        frequency_ghz: f64,
        spectrum: &[f64],
    ) -> Option<SweepMean> {
        if !self.plausible(spectrum) {
            self.rejected += 1;
            debug!(timestamp, frequency_ghz, "rejecting implausible spectrum");
            return None;
        }

        if let Some(group) = self.current.as_mut() {
            if group.frequency_ghz == frequency_ghz && group.sum.len() == spectrum.len() {
                for (s, v) in group.sum.iter_mut().zip(spectrum) {
                    *s += v;
                }
                group.count += 1;
                group.last_timestamp = timestamp;
                return None;
            }
        }

        let finished = self.current.take().map(|g| self.close(g));
        self.current = Some(SweepGroup {
            frequency_ghz,
            first_timestamp: timestamp,
            last_timestamp: timestamp,
            count: 1,
            sum: spectrum.to_vec(),
        });
        finished
    }

    /// Closes the open group, if any.
    pub fn finish(&mut self) -> Option<SweepMean> {
        self.current.take().map(|g| self.close(g))
    }

    fn close(&self, group: SweepGroup) -> SweepMean {
        let n = group.count as f64;
        let mean: Vec<f64> = group.sum.iter().map(|s| s / n).collect();
        SweepMean {
            frequency_ghz: group.frequency_ghz,
            first_timestamp: group.first_timestamp,
            last_timestamp: group.last_timestamp,
            count: group.count,
            mean: bin_channels(&mean, self.channel_bin),
        }
    }
}

impl Default for SweepAverager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bin_channels_even() {
        assert_eq!(bin_channels(&[1.0, 3.0, 5.0, 7.0], 2), vec![2.0, 6.0]);
    }

    #[test]
    fn test_bin_channels_trims_alternately() {
        // 7 channels, bin 3: only the first is dropped
        let spectrum = [100.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(bin_channels(&spectrum, 3), vec![2.0, 5.0]);

        // 6 channels, bin 4: drop first, last
        let spectrum = [100.0, 1.0, 2.0, 3.0, 4.0, 200.0];
        assert_eq!(bin_channels(&spectrum, 4), vec![2.5]);
    }

    #[test]
    fn test_bin_of_one_is_identity() {
        assert_eq!(bin_channels(&[1.0, 2.0], 1), vec![1.0, 2.0]);
    }

    #[test]
    fn test_sweep_groups_by_frequency() {
        let mut avg = SweepAverager::new();
        assert!(avg.push(0, 214.0, &[100.0, 110.0]).is_none());
        assert!(avg.push(1, 214.0, &[120.0, 130.0]).is_none());

        let first = avg.push(2, 214.2, &[200.0, 200.0]).unwrap();
        assert_eq!(first.count, 2);
        assert_eq!(first.first_timestamp, 0);
        assert_eq!(first.last_timestamp, 1);
        assert_abs_diff_eq!(first.frequency_ghz, 214.0);
        assert_abs_diff_eq!(first.mean[0], 110.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.mean[1], 120.0, epsilon = 1e-12);

        let last = avg.finish().unwrap();
        assert_eq!(last.count, 1);
        assert_abs_diff_eq!(last.frequency_ghz, 214.2);
        assert!(avg.finish().is_none());
    }

    #[test]
    fn test_sweep_rejects_implausible() {
        let mut avg = SweepAverager::new();
        avg.push(0, 214.0, &[100.0, 100.0]);
        avg.push(1, 214.0, &[100.0, 400.0]);
        avg.push(2, 214.0, &[10.0, 100.0]);
        assert_eq!(avg.rejected(), 2);
        assert_eq!(avg.finish().unwrap().count, 1);
    }

    #[test]
    fn test_sweep_applies_channel_bin() {
        let mut avg = SweepAverager::new()
            .with_plausible_range(0.0, 1000.0)
            .with_channel_bin(2);
        avg.push(0, 1.0, &[1.0, 3.0, 5.0, 7.0]);
        assert_eq!(avg.finish().unwrap().mean, vec![2.0, 6.0]);
    }
}
