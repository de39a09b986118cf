//! Error types for Synheart Capture

use thiserror::Error;

use crate::channel::DeliveryError;
use crate::types::Stage;

/// Errors that can occur while driving a capture session
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid subject id: {0}")]
    InvalidSubject(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Input for {expected:?} stage received during {actual:?} stage")]
    StageMismatch { expected: Stage, actual: Stage },

    #[error("Session is complete; no further attempts are accepted")]
    SessionComplete,

    #[error("Attempt recorder was flushed before it was started")]
    RecorderIdle,

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}
