//! Test helpers for the radiometer workspace
//!
//! Shared fixtures for unit and integration tests: one-time tracing setup,
//! synthetic correlator inputs, float comparisons and scratch directories.

use once_cell::sync::Lazy;
use std::path::PathBuf;
use tempfile::TempDir;

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("failed to create scratch directory: {0}")]
    ScratchDir(#[from] std::io::Error),
}

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // Another harness may already own the global subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Installs a test-writer tracing subscriber once per process.
///
/// Honours `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Lag channels (II, QI, IQ, QQ) of uncorrelated noise.
///
/// Only the zero lag of II and QQ is non-zero.
pub fn white_noise_lag_channels(
    lags: usize,
    zero_lag: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut ii = vec![0.0; lags];
    let qi = vec![0.0; lags];
    let iq = vec![0.0; lags];
    let mut qq = vec![0.0; lags];
    if lags > 0 {
        ii[0] = zero_lag;
        qq[0] = zero_lag;
    }
    (ii, qi, iq, qq)
}

/// Asserts element-wise agreement within `tolerance`.
///
/// # Panics
/// On length mismatch or on the first element outside tolerance.
pub fn assert_all_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {}: {} differs from {} by more than {}",
            i,
            a,
            e,
            tolerance
        );
    }
}

/// Temporary output directory that is removed when dropped.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> Result<Self, TestHelperError> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("radiometer-").tempdir()?,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_noise_channels() {
        let (ii, qi, iq, qq) = white_noise_lag_channels(4, 0.4);
        assert_eq!(ii, vec![0.4, 0.0, 0.0, 0.0]);
        assert_eq!(qq, ii);
        assert!(qi.iter().chain(iq.iter()).all(|&v| v == 0.0));
    }

    #[test]
    fn test_white_noise_channels_empty() {
        let (ii, _, _, qq) = white_noise_lag_channels(0, 1.0);
        assert!(ii.is_empty());
        assert!(qq.is_empty());
    }

    #[test]
    fn test_assert_all_close_passes() {
        assert_all_close(&[1.0, 2.0], &[1.0 + 1e-12, 2.0], 1e-9);
    }

    #[test]
    #[should_panic(expected = "element 1")]
    fn test_assert_all_close_reports_element() {
        assert_all_close(&[1.0, 2.0], &[1.0, 2.5], 1e-3);
    }

    #[test]
    fn test_scratch_dir_exists_until_drop() {
        let scratch = ScratchDir::new().unwrap();
        let path = scratch.path();
        assert!(path.is_dir());
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
