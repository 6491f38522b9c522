//! Mutable bookkeeping of a running session.

use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use hardware::WobblerSteps;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tolerance for accumulated floating-point error in sweep bounds.
const FREQUENCY_EPSILON_GHZ: f64 = 1e-9;

/// Wobbler positions for the four phases of a cycle.
///
/// Alternates between `start + step` and `start`, so every cycle ends where
/// it began. The step points back into the travel range when the start lies
/// in its upper half.
pub fn wobbler_pattern(
    start: WobblerSteps,
    step: WobblerSteps,
    max: WobblerSteps,
) -> [WobblerSteps; 4] {
    let delta = if start > max / 2 { -step } else { step };
    let moved = start.saturating_add(delta);
    [moved, start, moved, start]
}

/// Next sweep frequency, wrapping to the opposite bound past either end.
pub fn advance_frequency(current: f64, step: f64, min: f64, max: f64) -> f64 {
    let next = current + step;
    if next > max + FREQUENCY_EPSILON_GHZ {
        min
    } else if next < min - FREQUENCY_EPSILON_GHZ {
        max
    } else {
        next
    }
}

/// Counters and tuning owned by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub cycle_index: u64,
    pub record_index: u64,
    pub frequency_ghz: f64,
    /// Last LO reference frequency reported by the frontend.
    pub reference_ghz: f64,
    pub file_sequence: u32,
    pub records_in_file: u64,
    pub started: DateTime<Utc>,
}

impl SessionState {
    pub fn new(frequency_ghz: f64) -> Self {
        Self {
            cycle_index: 0,
            record_index: 0,
            frequency_ghz,
            reference_ghz: 0.0,
            file_sequence: 0,
            records_in_file: 0,
            started: Utc::now(),
        }
    }

    /// True once the current file holds `capacity` records.
    pub fn file_full(&self, capacity: u64) -> bool {
        self.records_in_file >= capacity
    }

    /// True when the cycle just completed ends a dwell at one sweep frequency.
    pub fn sweep_due(&self, config: &SessionConfig) -> bool {
        config.sweep && self.cycle_index > 0 && self.cycle_index % config.sweep_step == 0
    }

    pub fn next_frequency(&self, config: &SessionConfig) -> f64 {
        advance_frequency(
            self.frequency_ghz,
            config.frequency_step_ghz,
            config.frequency_min_ghz,
            config.frequency_max_ghz,
        )
    }

    /// Path of the record file for the current sequence number.
    pub fn file_path(&self, config: &SessionConfig) -> PathBuf {
        let stamp = self.started.format("%Y%m%d_%H%M%S");
        config.output_dir.join(format!(
            "{}_{}_{:04}.jsonl",
            config.file_prefix, stamp, self.file_sequence
        ))
    }

    /// Moves on to a new file.
    pub fn rotate_file(&mut self) {
        self.file_sequence += 1;
        self.records_in_file = 0;
    }
}
