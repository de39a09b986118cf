//! Synheart Capture - On-device capture core for behavioral biometric sessions
//!
//! Capture walks a subject through a fixed sequence of input tasks (numeric code
//! entry, a swipe pattern over a 3×3 grid, a free-form gesture), samples device
//! motion during every attempt and streams labeled batches to a remote collector:
//! motion sampler → attempt recorder → stage machine → delivery channel.
//!
//! ## Modules
//!
//! - **Session**: single-threaded event loop that owns every component
//! - **Stage Machine**: pure transitions over the session state
//! - **Grid / Gesture**: pointer input classification and stroke capture
//! - **Recorder / Channel**: per-attempt sample batches and ordered delivery

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod gesture;
pub mod grid;
pub mod motion;
pub mod recorder;
pub mod session;
pub mod stage;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use channel::{
    Delivery, DeliveryChannel, DeliveryError, OutboxTransport, Transport, WriterTransport,
};
pub use config::CaptureConfig;
pub use error::CaptureError;
pub use events::{CaptureEvent, Notification};
pub use session::{CaptureSession, SessionSnapshot};
pub use stage::{SessionState, StageMachine};
pub use types::{OutboundMessage, Sample, Stage, StageLabel};

/// Library version
pub const CAPTURE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-capture";
