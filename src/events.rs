//! Session events and notifications
//!
//! Hosts drive a [`CaptureSession`](crate::session::CaptureSession) with
//! [`CaptureEvent`] values and receive [`Notification`] values back. Both are
//! JSON-tagged so they can cross the FFI boundary and be scripted for replay.

use serde::{Deserialize, Serialize};

use crate::channel::Delivery;
use crate::types::{Acceleration, Point, RotationRate, Stage};

/// Something that happened on the host side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// The subject typed their identifier
    SubjectEntered { subject: String },
    /// The platform answered the motion-sensor access request
    PermissionResolved { granted: bool },
    /// The subject pressed start on the welcome screen
    Start,
    /// Raw device motion event
    Motion {
        #[serde(default)]
        rotation: Option<RotationRate>,
        #[serde(default)]
        acceleration: Option<Acceleration>,
    },
    /// Sampling timer fired
    Tick { at_ms: i64 },
    /// One keypad press during code entry
    Digit { digit: char },
    /// The capture surface was laid out or resized
    SurfaceResized { width: f64, height: f64 },
    PointerDown { x: f64, y: f64, at_ms: i64 },
    PointerMove { x: f64, y: f64, at_ms: i64 },
    PointerUp,
    /// Discard the gesture drawn so far
    ClearGesture,
    /// Submit the gesture drawn so far
    SaveGesture,
    /// The collector connection became ready
    ChannelOpened,
    /// The collector connection went away
    ChannelClosed,
}

impl CaptureEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            CaptureEvent::SubjectEntered { .. } => "subject_entered",
            CaptureEvent::PermissionResolved { .. } => "permission_resolved",
            CaptureEvent::Start => "start",
            CaptureEvent::Motion { .. } => "motion",
            CaptureEvent::Tick { .. } => "tick",
            CaptureEvent::Digit { .. } => "digit",
            CaptureEvent::SurfaceResized { .. } => "surface_resized",
            CaptureEvent::PointerDown { .. } => "pointer_down",
            CaptureEvent::PointerMove { .. } => "pointer_move",
            CaptureEvent::PointerUp => "pointer_up",
            CaptureEvent::ClearGesture => "clear_gesture",
            CaptureEvent::SaveGesture => "save_gesture",
            CaptureEvent::ChannelOpened => "channel_opened",
            CaptureEvent::ChannelClosed => "channel_closed",
        }
    }

    /// Pointer position carried by pointer-down/move events
    pub fn point(&self) -> Option<Point> {
        match self {
            CaptureEvent::PointerDown { x, y, .. } | CaptureEvent::PointerMove { x, y, .. } => {
                Some(Point::new(*x, *y))
            }
            _ => None,
        }
    }
}

/// One-way signal to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A new stage began at its first attempt
    StageEntered {
        stage: Stage,
        attempt: u32,
        required: u32,
    },
    /// The next attempt of the current stage began
    AttemptAdvanced {
        stage: Stage,
        attempt: u32,
        required: u32,
    },
    /// Digits entered so far for the current code attempt
    CodeEntry { digits: String },
    CodeRejected { stage: String, entered: String },
    /// Grid path traced so far
    PatternProgress { path: Vec<u8> },
    PatternRejected { stage: String, path: Vec<u8> },
    /// Save pressed before enough of a gesture was drawn
    GestureRejected {
        stage: String,
        points: usize,
        required: usize,
    },
    GestureSaved { stage: String, points: usize },
    /// An attempt batch left the recorder
    AttemptCaptured {
        stage: String,
        samples: usize,
        delivery: Delivery,
    },
    DeliveryFailed { stage: String, reason: String },
    SensorUnavailable { reason: String },
    ChannelOpened { flushed: usize },
    ChannelClosed { pending: usize },
    /// Every stage is done
    Completed,
}

impl Notification {
    /// Wire name of the notification
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::StageEntered { .. } => "stage_entered",
            Notification::AttemptAdvanced { .. } => "attempt_advanced",
            Notification::CodeEntry { .. } => "code_entry",
            Notification::CodeRejected { .. } => "code_rejected",
            Notification::PatternProgress { .. } => "pattern_progress",
            Notification::PatternRejected { .. } => "pattern_rejected",
            Notification::GestureRejected { .. } => "gesture_rejected",
            Notification::GestureSaved { .. } => "gesture_saved",
            Notification::AttemptCaptured { .. } => "attempt_captured",
            Notification::DeliveryFailed { .. } => "delivery_failed",
            Notification::SensorUnavailable { .. } => "sensor_unavailable",
            Notification::ChannelOpened { .. } => "channel_opened",
            Notification::ChannelClosed { .. } => "channel_closed",
            Notification::Completed => "completed",
        }
    }
}
