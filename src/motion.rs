//! Motion sampler
//!
//! Holds the most recent rotation-rate and acceleration readings delivered by the
//! platform's motion listener. The listener is installed at most once per
//! session; readings that arrive while it is detached, or after the subject
//! denied sensor access, are dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Acceleration, MotionReading, RotationRate};

/// Outcome of the platform's sensor access request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorPermission {
    /// No answer yet; platforms without a permission prompt stay here
    #[default]
    Unknown,
    Granted,
    Denied,
}

type SampleObserver = Box<dyn FnMut(&MotionReading)>;

/// Latest-value holder for device motion readings
#[derive(Default)]
pub struct MotionSampler {
    rotation: Option<RotationRate>,
    acceleration: Option<Acceleration>,
    subscribed: bool,
    installs: u32,
    permission: SensorPermission,
    observers: Vec<SampleObserver>,
}

impl MotionSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer called with the latest reading pair after every
    /// accepted motion event
    pub fn on_sample(&mut self, observer: impl FnMut(&MotionReading) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Install the platform listener. Returns `true` only the first time.
    pub fn subscribe(&mut self) -> bool {
        if self.installs > 0 {
            return false;
        }
        self.subscribed = true;
        self.installs += 1;
        debug!("motion listener installed");
        true
    }

    /// Detach the platform listener and forget the last readings
    pub fn unsubscribe(&mut self) {
        if self.subscribed {
            info!("motion listener removed");
        }
        self.subscribed = false;
        self.rotation = None;
        self.acceleration = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// How many times the platform listener has been installed
    pub fn install_count(&self) -> u32 {
        self.installs
    }

    /// Record the answer to the sensor access request
    pub fn permission_resolved(&mut self, granted: bool) {
        self.permission = if granted {
            SensorPermission::Granted
        } else {
            warn!("motion sensor access denied; continuing without motion data");
            self.rotation = None;
            self.acceleration = None;
            SensorPermission::Denied
        };
    }

    pub fn permission(&self) -> SensorPermission {
        self.permission
    }

    /// Accept a motion event from the platform.
    ///
    /// Each event replaces both readings, so a reading type missing from the
    /// event clears the previous value. Returns `false` when the event was
    /// dropped.
    pub fn handle_motion(
        &mut self,
        rotation: Option<RotationRate>,
        acceleration: Option<Acceleration>,
    ) -> bool {
        if !self.subscribed || self.permission == SensorPermission::Denied {
            return false;
        }

        self.rotation = rotation;
        self.acceleration = acceleration;

        if let Some(reading) = self.latest() {
            for observer in self.observers.iter_mut() {
                observer(&reading);
            }
        }
        true
    }

    /// The latest reading pair, or `None` until both readings have arrived
    pub fn latest(&self) -> Option<MotionReading> {
        match (self.rotation, self.acceleration) {
            (Some(rotation), Some(acceleration)) => Some(MotionReading {
                rotation,
                acceleration,
            }),
            _ => None,
        }
    }
}
