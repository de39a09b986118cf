//! Capture data types
//!
//! This module defines the values that flow through the capture core: stages and
//! their attempt labels, raw motion readings, the samples recorded from them,
//! gesture stroke points and the outbound messages sent to the collector.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional digits kept for acceleration and rotation values
pub const SAMPLE_PRECISION_DIGITS: i32 = 4;

/// Stages of a capture session, in the order a subject walks through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    User,
    Code,
    Pattern,
    Gesture,
    Done,
}

impl Stage {
    /// The stage that follows this one. `Done` is terminal.
    pub fn next(self) -> Stage {
        match self {
            Stage::User => Stage::Code,
            Stage::Code => Stage::Pattern,
            Stage::Pattern => Stage::Gesture,
            Stage::Gesture | Stage::Done => Stage::Done,
        }
    }

    /// Label prefix for stages that take attempts
    pub fn label_code(self) -> Option<&'static str> {
        match self {
            Stage::Code => Some("CODE"),
            Stage::Pattern => Some("PAT"),
            Stage::Gesture => Some("GES"),
            Stage::User | Stage::Done => None,
        }
    }

    /// Whether this stage runs repeated attempts
    pub fn is_attempt_stage(self) -> bool {
        self.label_code().is_some()
    }
}

/// Identifies one attempt: stage code plus 1-based attempt number, e.g. `PAT7`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageLabel {
    pub stage: Stage,
    pub attempt: u32,
}

impl StageLabel {
    pub fn new(stage: Stage, attempt: u32) -> Self {
        Self { stage, attempt }
    }
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.stage.label_code().unwrap_or("STAGE");
        write!(f, "{}{}", code, self.attempt)
    }
}

/// Device rotation rate in degrees per second
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationRate {
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
}

/// Linear acceleration including gravity, in m/s²
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

/// The most recent rotation/acceleration pair reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    pub rotation: RotationRate,
    pub acceleration: Acceleration,
}

/// One motion sample tagged with subject and attempt.
///
/// Field names on the wire follow the collector's `imu_log` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Subject identifier
    #[serde(rename = "uid")]
    pub subject_id: String,
    /// Attempt label active when the sample was taken
    #[serde(rename = "stage")]
    pub stage_label: String,
    #[serde(rename = "accX")]
    pub acc_x: f64,
    #[serde(rename = "accY")]
    pub acc_y: f64,
    #[serde(rename = "accZ")]
    pub acc_z: f64,
    #[serde(rename = "gyroX")]
    pub gyro_x: f64,
    #[serde(rename = "gyroY")]
    pub gyro_y: f64,
    #[serde(rename = "gyroZ")]
    pub gyro_z: f64,
    /// Capture time in epoch milliseconds
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
}

impl Sample {
    /// Build a sample from a motion reading.
    ///
    /// Gyro axes map from the device's rotation angles as x = beta, y = gamma,
    /// z = alpha. Missing or non-finite values become zero.
    pub fn from_reading(
        subject_id: &str,
        stage_label: &str,
        reading: &MotionReading,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            stage_label: stage_label.to_string(),
            acc_x: round_fixed(reading.acceleration.x),
            acc_y: round_fixed(reading.acceleration.y),
            acc_z: round_fixed(reading.acceleration.z),
            gyro_x: round_fixed(reading.rotation.beta),
            gyro_y: round_fixed(reading.rotation.gamma),
            gyro_z: round_fixed(reading.rotation.alpha),
            timestamp_ms,
        }
    }
}

/// Round to [`SAMPLE_PRECISION_DIGITS`] fractional digits; absent values are zero
pub fn round_fixed(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => {
            let scale = 10f64.powi(SAMPLE_PRECISION_DIGITS);
            (v * scale).round() / scale
        }
        _ => 0.0,
    }
}

/// A pointer position in capture-surface coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Width and height of the capture surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub width: f64,
    pub height: f64,
}

impl Surface {
    /// Clamp a point into the surface bounds
    pub fn clamp(&self, point: Point) -> Point {
        Point {
            x: point.x.clamp(0.0, self.width.max(0.0)),
            y: point.y.clamp(0.0, self.height.max(0.0)),
        }
    }
}

/// One gesture stroke point as sent to the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrokePoint {
    /// Horizontal position in whole surface pixels
    pub x: i64,
    /// Vertical position in whole surface pixels
    pub y: i64,
    /// Milliseconds since the stroke began
    pub t: i64,
}

/// Messages sent to the remote collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Motion samples for one completed attempt
    ImuLog {
        subject: String,
        stage: String,
        data: Vec<Sample>,
    },
    /// Raw stroke of one accepted gesture attempt
    GestureStroke {
        subject: String,
        stage: String,
        data: Vec<StrokePoint>,
    },
}

impl OutboundMessage {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::ImuLog { .. } => "imu_log",
            OutboundMessage::GestureStroke { .. } => "gesture_stroke",
        }
    }

    /// Attempt label the message belongs to
    pub fn stage(&self) -> &str {
        match self {
            OutboundMessage::ImuLog { stage, .. } => stage,
            OutboundMessage::GestureStroke { stage, .. } => stage,
        }
    }
}
