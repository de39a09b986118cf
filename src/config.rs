//! Capture session configuration
//!
//! Every section falls back to the values the capture protocol ships with, so an
//! empty TOML or JSON document yields a complete configuration.

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::grid::{midpoint, GRID_CELLS};

/// Default expected code
pub const DEFAULT_CODE: &str = "1379";

/// Default expected grid pattern (a "Z" across the grid)
pub const DEFAULT_PATTERN: [u8; 7] = [1, 2, 3, 5, 7, 8, 9];

/// Default motion sampling rate in Hz
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 60.0;

/// Accepted sampling rates in Hz
pub const MIN_SAMPLE_RATE_HZ: f64 = 0.001;
pub const MAX_SAMPLE_RATE_HZ: f64 = 1000.0;

/// Default bound on messages held while the channel is closed
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Full configuration for a capture session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub code: CodeStageConfig,
    pub pattern: PatternStageConfig,
    pub gesture: GestureStageConfig,
    pub sampling: SamplingConfig,
    pub delivery: DeliveryConfig,
}

/// Code-entry stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeStageConfig {
    /// Digits the subject must enter
    pub expected: String,
    /// Number of successful entries required
    pub repetitions: u32,
}

impl Default for CodeStageConfig {
    fn default() -> Self {
        Self {
            expected: DEFAULT_CODE.to_string(),
            repetitions: 2,
        }
    }
}

/// Grid-pattern stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternStageConfig {
    /// Exact cell sequence the subject must swipe
    pub expected: Vec<u8>,
    /// Number of successful swipes required
    pub repetitions: u32,
    /// Hit radius as a fraction of the smaller cell dimension
    pub hit_radius_fraction: f64,
    /// Lower bound on the hit radius in pixels
    pub min_hit_radius_px: f64,
}

impl Default for PatternStageConfig {
    fn default() -> Self {
        Self {
            expected: DEFAULT_PATTERN.to_vec(),
            repetitions: 3,
            hit_radius_fraction: 0.16,
            min_hit_radius_px: 12.0,
        }
    }
}

/// Free-gesture stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureStageConfig {
    /// Number of saved gestures required
    pub repetitions: u32,
    /// Strokes with fewer points are rejected on save
    pub min_points: usize,
}

impl Default for GestureStageConfig {
    fn default() -> Self {
        Self {
            repetitions: 3,
            min_points: 5,
        }
    }
}

/// Motion sampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub rate_hz: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rate_hz: DEFAULT_SAMPLE_RATE_HZ,
        }
    }
}

/// Delivery channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum number of messages queued while the channel is closed
    pub queue_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl CaptureConfig {
    /// Parse and validate a TOML configuration document
    pub fn from_toml_str(toml_str: &str) -> Result<Self, CaptureError> {
        let config: CaptureConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: CaptureConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, CaptureError> {
        toml::to_string_pretty(self).map_err(|e| CaptureError::InvalidConfig(e.to_string()))
    }

    /// Check the configuration for values a session cannot run with
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.code.expected.is_empty() {
            return Err(CaptureError::InvalidConfig(
                "code.expected must not be empty".to_string(),
            ));
        }
        if !self.code.expected.chars().all(|c| c.is_ascii_digit()) {
            return Err(CaptureError::InvalidConfig(format!(
                "code.expected must contain only digits, got {:?}",
                self.code.expected
            )));
        }

        for (name, reps) in [
            ("code", self.code.repetitions),
            ("pattern", self.pattern.repetitions),
            ("gesture", self.gesture.repetitions),
        ] {
            if reps == 0 {
                return Err(CaptureError::InvalidConfig(format!(
                    "{name}.repetitions must be at least 1"
                )));
            }
        }

        validate_pattern(&self.pattern.expected)?;

        let fraction = self.pattern.hit_radius_fraction;
        if !(fraction > 0.0 && fraction <= 0.5) {
            return Err(CaptureError::InvalidConfig(format!(
                "pattern.hit_radius_fraction must be in (0, 0.5], got {fraction}"
            )));
        }
        let min_radius = self.pattern.min_hit_radius_px;
        if min_radius.is_nan() || min_radius < 0.0 {
            return Err(CaptureError::InvalidConfig(
                "pattern.min_hit_radius_px must be non-negative".to_string(),
            ));
        }

        if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&self.sampling.rate_hz) {
            return Err(CaptureError::InvalidConfig(format!(
                "sampling.rate_hz must be between {MIN_SAMPLE_RATE_HZ} and {MAX_SAMPLE_RATE_HZ}, \
                 got {}",
                self.sampling.rate_hz
            )));
        }

        if self.delivery.queue_capacity == 0 {
            return Err(CaptureError::InvalidConfig(
                "delivery.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// A pattern is reachable only if its cells are unique, in range, and each step
/// is either adjacent or bridged by a midpoint already visited.
fn validate_pattern(pattern: &[u8]) -> Result<(), CaptureError> {
    if pattern.is_empty() {
        return Err(CaptureError::InvalidConfig(
            "pattern.expected must not be empty".to_string(),
        ));
    }

    for (i, &cell) in pattern.iter().enumerate() {
        if !(1..=GRID_CELLS).contains(&cell) {
            return Err(CaptureError::InvalidConfig(format!(
                "pattern.expected cell {cell} is outside 1-{GRID_CELLS}"
            )));
        }
        if pattern[..i].contains(&cell) {
            return Err(CaptureError::InvalidConfig(format!(
                "pattern.expected repeats cell {cell}"
            )));
        }
        if i > 0 {
            if let Some(mid) = midpoint(pattern[i - 1], cell) {
                if !pattern[..i].contains(&mid) {
                    return Err(CaptureError::InvalidConfig(format!(
                        "pattern.expected step {}->{} skips cell {mid}",
                        pattern[i - 1],
                        cell
                    )));
                }
            }
        }
    }

    Ok(())
}
