//! Session configuration.
//!
//! A [`SessionConfig`] is given once, either as command-line flags or as a
//! JSON document, and stays immutable for the life of a controller.

use crate::error::ConfigError;
use clap::{Args, ValueEnum};
use hardware::{BackendDescriptor, BackendKind, ChopperTarget, WobblerSteps};
use radiometry::{LoadTemperatures, PhaseTag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// One chopper position of the calibration cycle and the tag its data carries.
pub type PhaseStep = (ChopperTarget, PhaseTag);

/// Which loads the four phases of a cycle look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChopperMode {
    /// Cold, antenna, hot, antenna
    #[default]
    Antenna,
    /// Cold, reference, hot, reference
    Reference,
    /// Cold, antenna, reference, hot
    Mixed,
}

impl ChopperMode {
    pub fn plan(&self) -> [PhaseStep; 4] {
        use ChopperTarget as C;
        match self {
            ChopperMode::Antenna => [
                (C::Cold, PhaseTag::Cold),
                (C::Antenna, PhaseTag::Antenna0),
                (C::Hot, PhaseTag::Hot),
                (C::Antenna, PhaseTag::Antenna1),
            ],
            ChopperMode::Reference => [
                (C::Cold, PhaseTag::Cold),
                (C::Reference, PhaseTag::Reference),
                (C::Hot, PhaseTag::Hot),
                (C::Reference, PhaseTag::Reference),
            ],
            ChopperMode::Mixed => [
                (C::Cold, PhaseTag::Cold),
                (C::Antenna, PhaseTag::Antenna0),
                (C::Reference, PhaseTag::Reference),
                (C::Hot, PhaseTag::Hot),
            ],
        }
    }
}

/// Backend families known to the acquisition software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFamily {
    /// FFT or chirp-transform spectrometer returning channel powers.
    Power,
    /// Complex three-level autocorrelator returning lag sums.
    Correlator,
}

/// One backend, parsed from `kind:name:channels[@host:port]`.
///
/// For correlators `channels` is the lag count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub family: BackendFamily,
    pub name: String,
    pub channels: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self.family {
            BackendFamily::Power => BackendKind::PowerSpectrometer {
                channels: self.channels,
            },
            BackendFamily::Correlator => BackendKind::ThreeLevelCorrelator {
                lags: self.channels,
            },
        }
    }

    pub fn descriptor(&self, integration_time: Duration) -> BackendDescriptor {
        let descriptor = BackendDescriptor::new(self.name.clone(), self.kind(), integration_time);
        match &self.address {
            Some(address) => descriptor.with_address(address.clone()),
            None => descriptor,
        }
    }
}

impl FromStr for BackendConfig {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::BackendSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (body, address) = match spec.split_once('@') {
            Some((body, address)) if !address.is_empty() => (body, Some(address.to_string())),
            Some(_) => return Err(invalid("empty address after '@'")),
            None => (spec, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        let [kind, name, channels] = parts.as_slice() else {
            return Err(invalid("expected kind:name:channels"));
        };

        let family = match kind.to_ascii_lowercase().as_str() {
            "power" | "fft" | "cts" => BackendFamily::Power,
            "correlator" | "acs" => BackendFamily::Correlator,
            _ => return Err(invalid("kind must be 'power' or 'correlator'")),
        };
        if name.is_empty() {
            return Err(invalid("empty backend name"));
        }
        let channels: usize = channels
            .parse()
            .map_err(|_| invalid("channel count is not a number"))?;
        if channels == 0 {
            return Err(invalid("channel count must be positive"));
        }

        Ok(Self {
            family,
            name: name.to_string(),
            channels,
            address,
        })
    }
}

impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.family {
            BackendFamily::Power => "power",
            BackendFamily::Correlator => "correlator",
        };
        write!(f, "{kind}:{}:{}", self.name, self.channels)?;
        if let Some(address) = &self.address {
            write!(f, "@{address}")?;
        }
        Ok(())
    }
}

/// Immutable settings of one acquisition session.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[arg(
        long,
        default_value = "5000",
        help = "Integration time per phase in milliseconds"
    )]
    pub integration_time_ms: u64,

    #[arg(
        long,
        default_value = "5",
        help = "Blanking time after each chopper move in milliseconds"
    )]
    pub blank_time_ms: u64,

    #[arg(
        long,
        default_value = "1000",
        help = "Chopper antenna position offset in motor steps"
    )]
    pub antenna_offset: i32,

    #[arg(long, value_enum, default_value = "antenna", help = "Loads visited per cycle")]
    pub chopper_mode: ChopperMode,

    #[arg(long, help = "Step the sky frequency through the configured range")]
    pub sweep: bool,

    #[arg(long, default_value = "214.0", help = "Initial sky frequency in GHz")]
    pub frequency_ghz: f64,

    #[arg(long, default_value = "0.2", help = "Sweep frequency step in GHz")]
    pub frequency_step_ghz: f64,

    #[arg(long, default_value = "214.0", help = "Lower sweep bound in GHz")]
    pub frequency_min_ghz: f64,

    #[arg(long, default_value = "270.0", help = "Upper sweep bound in GHz")]
    pub frequency_max_ghz: f64,

    #[arg(
        long,
        default_value = "10",
        help = "Cycles spent at each sweep frequency",
        long_help = "Number of completed calibration cycles between two frequency steps \
            in sweep mode. The frequency wraps to the opposite bound once it leaves \
            the configured range."
    )]
    pub sweep_step: u64,

    #[arg(long, default_value = "6.0", help = "Intermediate frequency offset in GHz")]
    pub if_offset_ghz: f64,

    #[arg(
        long,
        default_value = "4000",
        help = "Records per output file (multiple of 4)",
        long_help = "Number of phase records written before the output file is rotated. \
            Must be a multiple of 4 so every file holds whole calibration cycles."
    )]
    pub records_per_file: u64,

    #[arg(
        long,
        default_value = "100",
        help = "Wait after retuning the frontend in milliseconds"
    )]
    pub retune_wait_ms: u64,

    #[arg(long, default_value = "4000", help = "Wobbler start position in steps")]
    pub wobbler_start: WobblerSteps,

    #[arg(long, default_value = "2000", help = "Wobbler path-length step in steps")]
    pub wobbler_step: WobblerSteps,

    #[arg(long, default_value = "40000", help = "Wobbler travel limit in steps")]
    pub wobbler_max: WobblerSteps,

    #[arg(
        long,
        default_value = "2000",
        help = "Maximum wait for an actuator to settle in milliseconds"
    )]
    pub settle_timeout_ms: u64,

    #[arg(long, default_value = "21.0", help = "Cold load temperature in K")]
    pub t_cold_k: f64,

    #[arg(long, default_value = "295.0", help = "Hot load temperature in K")]
    pub t_hot_k: f64,

    #[arg(long, default_value = "data", help = "Directory for record files")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = "radiometer", help = "Prefix of record file names")]
    pub file_prefix: String,

    #[arg(
        long = "backend",
        value_name = "KIND:NAME:CHANNELS[@HOST:PORT]",
        help = "Backend to acquire from (repeatable)",
        long_help = "Backend specification. KIND is 'power' for FFT and chirp-transform \
            spectrometers or 'correlator' for three-level autocorrelators, in which case \
            CHANNELS is the lag count. May be given several times."
    )]
    pub backends: Vec<BackendConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            integration_time_ms: 5000,
            blank_time_ms: 5,
            antenna_offset: 1000,
            chopper_mode: ChopperMode::Antenna,
            sweep: false,
            frequency_ghz: 214.0,
            frequency_step_ghz: 0.2,
            frequency_min_ghz: 214.0,
            frequency_max_ghz: 270.0,
            sweep_step: 10,
            if_offset_ghz: 6.0,
            records_per_file: 4000,
            retune_wait_ms: 100,
            wobbler_start: 4000,
            wobbler_step: 2000,
            wobbler_max: 40_000,
            settle_timeout_ms: 2000,
            t_cold_k: radiometry::calibration::DEFAULT_COLD_LOAD_K,
            t_hot_k: radiometry::calibration::DEFAULT_HOT_LOAD_K,
            output_dir: PathBuf::from("data"),
            file_prefix: "radiometer".to_string(),
            backends: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Reads a JSON configuration and validates it.
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| Err(ConfigError::Invalid { field, reason });

        if self.integration_time_ms == 0 {
            return invalid("integration_time_ms", "must be positive".to_string());
        }
        if self.records_per_file == 0 || self.records_per_file % 4 != 0 {
            return invalid(
                "records_per_file",
                format!("{} is not a positive multiple of 4", self.records_per_file),
            );
        }
        if !(self.frequency_min_ghz < self.frequency_max_ghz) {
            return invalid(
                "frequency range",
                format!(
                    "[{}, {}] GHz is empty",
                    self.frequency_min_ghz, self.frequency_max_ghz
                ),
            );
        }
        if self.sweep_step == 0 {
            return invalid("sweep_step", "must be positive".to_string());
        }
        if self.sweep && self.frequency_step_ghz == 0.0 {
            return invalid("frequency_step_ghz", "sweep needs a non-zero step".to_string());
        }
        if self.backends.is_empty() {
            return invalid("backends", "at least one backend is required".to_string());
        }
        for (i, backend) in self.backends.iter().enumerate() {
            if self.backends[..i].iter().any(|b| b.name == backend.name) {
                return invalid("backends", format!("duplicate backend name {}", backend.name));
            }
        }
        if self.wobbler_max <= 0 {
            return invalid("wobbler_max", "must be positive".to_string());
        }
        let travel = 0..=self.wobbler_max;
        if !travel.contains(&self.wobbler_start) {
            return invalid(
                "wobbler_start",
                format!("{} outside travel 0..={}", self.wobbler_start, self.wobbler_max),
            );
        }
        if let Some(p) = crate::session::wobbler_pattern(
            self.wobbler_start,
            self.wobbler_step,
            self.wobbler_max,
        )
        .into_iter()
        .find(|p| !travel.contains(p))
        {
            return invalid(
                "wobbler_step",
                format!("position {p} outside travel 0..={}", self.wobbler_max),
            );
        }
        Ok(())
    }

    pub fn integration_time(&self) -> Duration {
        Duration::from_millis(self.integration_time_ms)
    }

    pub fn blank_time(&self) -> Duration {
        Duration::from_millis(self.blank_time_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn retune_wait(&self) -> Duration {
        Duration::from_millis(self.retune_wait_ms)
    }

    pub fn loads(&self) -> LoadTemperatures {
        LoadTemperatures {
            cold_k: self.t_cold_k,
            hot_k: self.t_hot_k,
        }
    }

    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends
            .iter()
            .map(|b| b.descriptor(self.integration_time()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        session: SessionConfig,
    }

    fn valid() -> SessionConfig {
        SessionConfig {
            backends: vec!["power:AFFTS:64".parse().unwrap()],
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_backend_spec_parsing() {
        let b: BackendConfig = "correlator:ACS:512@10.0.0.5:1788".parse().unwrap();
        assert_eq!(b.family, BackendFamily::Correlator);
        assert_eq!(b.name, "ACS");
        assert_eq!(b.kind(), BackendKind::ThreeLevelCorrelator { lags: 512 });
        assert_eq!(b.address.as_deref(), Some("10.0.0.5:1788"));
        assert_eq!(b.to_string(), "correlator:ACS:512@10.0.0.5:1788");

        let b: BackendConfig = "fft:CTS:8192".parse().unwrap();
        assert_eq!(b.kind(), BackendKind::PowerSpectrometer { channels: 8192 });
        assert!(b.address.is_none());
    }

    #[test]
    fn test_descriptors_carry_address() {
        let config = SessionConfig {
            backends: vec![
                "correlator:ACS:512@10.0.0.5:1788".parse().unwrap(),
                "power:CTS:8".parse().unwrap(),
            ],
            ..SessionConfig::default()
        };
        let descriptors = config.descriptors();
        assert_eq!(descriptors[0].address.as_deref(), Some("10.0.0.5:1788"));
        assert_eq!(descriptors[0].integration_time, config.integration_time());
        assert!(descriptors[1].address.is_none());
    }

    #[test]
    fn test_backend_spec_rejects_garbage() {
        for spec in ["power:AFFTS", "laser:X:8", "power::8", "power:X:0", "power:X:abc", "power:X:8@"] {
            assert!(spec.parse::<BackendConfig>().is_err(), "{spec} should fail");
        }
    }

    #[test]
    fn test_plans_have_four_phases_starting_cold() {
        for mode in [ChopperMode::Antenna, ChopperMode::Reference, ChopperMode::Mixed] {
            let plan = mode.plan();
            assert_eq!(plan[0], (ChopperTarget::Cold, PhaseTag::Cold));
            assert!(plan.iter().any(|(_, t)| *t == PhaseTag::Hot));
        }
        let tags: Vec<&str> = ChopperMode::Antenna.plan().iter().map(|(_, t)| t.code()).collect();
        assert_eq!(tags, ["C0", "A0", "H0", "A1"]);
    }

    #[test]
    fn test_defaults_match_cli_defaults() {
        let cli = Cli::parse_from(["radiometer", "--backend", "power:AFFTS:64"]);
        assert_eq!(cli.session, valid());
        cli.session.validate().unwrap();
    }

    #[test]
    fn test_validation_rules() {
        let mut c = valid();
        c.records_per_file = 10;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.backends.clear();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.frequency_max_ghz = c.frequency_min_ghz;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.wobbler_start = 45_000;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.integration_time_ms = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.backends.push("correlator:AFFTS:16".parse().unwrap());
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"{"integration_time_ms": 20, "chopper_mode": "mixed",
                "backends": [{"family": "correlator", "name": "ACS", "channels": 32}]}"#,
        )
        .unwrap();

        let config = SessionConfig::load_json(&path).unwrap();
        assert_eq!(config.integration_time(), Duration::from_millis(20));
        assert_eq!(config.chopper_mode, ChopperMode::Mixed);
        assert_eq!(config.records_per_file, 4000);
        assert_eq!(config.descriptors()[0].channel_count(), 63);
    }

    #[test]
    fn test_invalid_json_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"records_per_file": 6, "backends": []}"#).unwrap();
        assert!(matches!(
            SessionConfig::load_json(&path),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            SessionConfig::load_json(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
