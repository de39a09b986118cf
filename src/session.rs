//! Capture session
//!
//! The single-threaded actor that owns every capture component. Hosts feed it
//! [`CaptureEvent`]s one at a time; it routes pointer input to the grid
//! classifier or stroke recorder, runs protocol inputs through the
//! [`StageMachine`], carries out the resulting effects and returns the
//! notifications the presentation layer should show.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{DeliveryChannel, DeliveryError, Transport};
use crate::config::{CaptureConfig, PatternStageConfig};
use crate::error::CaptureError;
use crate::events::{CaptureEvent, Notification};
use crate::gesture::StrokeRecorder;
use crate::grid::{GridClassifier, GridGeometry};
use crate::motion::{MotionSampler, SensorPermission};
use crate::recorder::AttemptRecorder;
use crate::stage::{AttemptCounters, Effect, SessionState, StageInput, StageMachine};
use crate::types::{OutboundMessage, Point, Stage, StageLabel, Surface};

/// Point-in-time view of a session for hosts and summaries
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub stage: Stage,
    /// Label of the open attempt
    pub label: Option<String>,
    pub attempts: AttemptCounters,
    pub code_digits: String,
    pub pattern_path: Vec<u8>,
    pub stroke_points: usize,
    pub recording: bool,
    pub buffered_samples: usize,
    pub sensor_permission: SensorPermission,
    pub motion_subscribed: bool,
    pub channel_open: bool,
    pub pending_messages: usize,
    pub sent_messages: u64,
    pub delivery_faults: u64,
}

/// Event-driven capture session over a delivery transport
pub struct CaptureSession<T: Transport> {
    id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    pattern_config: PatternStageConfig,
    machine: StageMachine,
    state: SessionState,
    sampler: MotionSampler,
    recorder: AttemptRecorder,
    classifier: GridClassifier,
    stroke: StrokeRecorder,
    channel: DeliveryChannel<T>,
}

impl<T: Transport> CaptureSession<T> {
    /// Validate `config` and build a session in the `User` stage
    pub fn new(config: CaptureConfig, transport: T) -> Result<Self, CaptureError> {
        config.validate()?;

        let id = Uuid::new_v4();
        info!(session_id = %id, "capture session created");

        Ok(Self {
            id,
            started_at: Utc::now(),
            completed_at: None,
            machine: StageMachine::new(&config),
            state: SessionState::default(),
            sampler: MotionSampler::new(),
            recorder: AttemptRecorder::new(config.sampling.rate_hz),
            classifier: GridClassifier::new(),
            stroke: StrokeRecorder::new(),
            channel: DeliveryChannel::with_capacity(transport, config.delivery.queue_capacity),
            pattern_config: config.pattern,
        })
    }

    /// Handle one event, logging and swallowing events that do not apply
    pub fn handle(&mut self, event: CaptureEvent) -> Vec<Notification> {
        let name = event.name();
        match self.try_handle(event) {
            Ok(notifications) => notifications,
            Err(e @ (CaptureError::StageMismatch { .. } | CaptureError::SessionComplete)) => {
                debug!(event = name, error = %e, "event ignored");
                Vec::new()
            }
            Err(e) => {
                warn!(event = name, error = %e, "event rejected");
                Vec::new()
            }
        }
    }

    /// Handle one event, surfacing input that the current stage rejects
    pub fn try_handle(&mut self, event: CaptureEvent) -> Result<Vec<Notification>, CaptureError> {
        let mut out = Vec::new();

        match event {
            CaptureEvent::SubjectEntered { subject } => {
                self.apply(StageInput::SubjectEntered(subject), &mut out)?;
                if let Some(subject) = &self.state.subject {
                    self.recorder.set_subject(subject.as_str());
                    info!(session_id = %self.id, subject = %subject, "subject set");
                }
            }
            CaptureEvent::PermissionResolved { granted } => {
                self.sampler.permission_resolved(granted);
                if !granted {
                    out.push(Notification::SensorUnavailable {
                        reason: "motion sensor access denied".to_string(),
                    });
                }
            }
            CaptureEvent::Start => self.apply(StageInput::Start, &mut out)?,
            CaptureEvent::Motion {
                rotation,
                acceleration,
            } => {
                self.sampler.handle_motion(rotation, acceleration);
            }
            CaptureEvent::Tick { at_ms } => {
                self.recorder.tick(at_ms, &self.sampler);
            }
            CaptureEvent::Digit { digit } => self.apply(StageInput::Digit(digit), &mut out)?,
            CaptureEvent::SurfaceResized { width, height } => {
                let surface = Surface { width, height };
                let geometry = GridGeometry::new(surface, &self.pattern_config)?;
                debug!(width, height, hit_radius = geometry.hit_radius(), "surface resized");
                self.classifier.set_geometry(geometry);
                self.stroke.set_surface(surface);
            }
            CaptureEvent::PointerDown { x, y, at_ms } => {
                self.pointer_down(Point::new(x, y), at_ms, &mut out)
            }
            CaptureEvent::PointerMove { x, y, at_ms } => {
                self.pointer_move(Point::new(x, y), at_ms, &mut out)
            }
            CaptureEvent::PointerUp => self.pointer_up(&mut out)?,
            CaptureEvent::ClearGesture => {
                if self.state.stage == Stage::Gesture {
                    self.stroke.clear();
                }
            }
            CaptureEvent::SaveGesture => {
                if self.state.stage == Stage::Gesture && self.stroke.is_drawing() {
                    return Err(CaptureError::InvalidInput(
                        "gesture cannot be saved while the stroke is being drawn".to_string(),
                    ));
                }
                let points = self.stroke.len();
                self.apply(StageInput::GestureSave { points }, &mut out)?;
            }
            CaptureEvent::ChannelOpened => {
                let report = self.channel.on_opened();
                out.push(Notification::ChannelOpened {
                    flushed: report.delivered,
                });
                out.extend(report.faults.iter().map(delivery_failed));
            }
            CaptureEvent::ChannelClosed => {
                let pending = self.channel.pending_len();
                info!(pending, "delivery channel closed");
                out.push(Notification::ChannelClosed { pending });
            }
        }

        Ok(out)
    }

    fn pointer_down(&mut self, point: Point, at_ms: i64, out: &mut Vec<Notification>) {
        match self.state.stage {
            Stage::Pattern => {
                let path = self.classifier.pointer_down(point);
                out.push(Notification::PatternProgress {
                    path: path.as_slice().to_vec(),
                });
            }
            Stage::Gesture => self.stroke.pointer_down(point, at_ms),
            _ => {}
        }
    }

    fn pointer_move(&mut self, point: Point, at_ms: i64, out: &mut Vec<Notification>) {
        match self.state.stage {
            Stage::Pattern => {
                if self.classifier.pointer_move(point) {
                    out.push(Notification::PatternProgress {
                        path: self.classifier.path().as_slice().to_vec(),
                    });
                }
            }
            Stage::Gesture => {
                self.stroke.pointer_move(point, at_ms);
            }
            _ => {}
        }
    }

    fn pointer_up(&mut self, out: &mut Vec<Notification>) -> Result<(), CaptureError> {
        match self.state.stage {
            Stage::Pattern => {
                if let Some(path) = self.classifier.pointer_up() {
                    self.apply(StageInput::PatternCompleted(path.into()), out)?;
                }
            }
            Stage::Gesture => self.stroke.pointer_up(),
            _ => {}
        }
        Ok(())
    }

    fn apply(
        &mut self,
        input: StageInput,
        out: &mut Vec<Notification>,
    ) -> Result<(), CaptureError> {
        let transition = self.machine.apply(&self.state, input)?;
        self.state = transition.state;
        for effect in transition.effects {
            self.execute(effect, out);
        }
        Ok(())
    }

    fn execute(&mut self, effect: Effect, out: &mut Vec<Notification>) {
        match effect {
            Effect::StartRecorder(label) => self.recorder.start(label, &mut self.sampler),
            Effect::FlushRecorder(label) => {
                let flushed = self.recorder.flush(&mut self.channel);
                self.report_drain_faults(out);
                match flushed {
                    Ok(report) => out.push(Notification::AttemptCaptured {
                        stage: report.label.to_string(),
                        samples: report.samples,
                        delivery: report.delivery,
                    }),
                    Err(CaptureError::Delivery(e)) => out.push(delivery_failed(&e)),
                    Err(e) => warn!(stage = %label, error = %e, "attempt batch not flushed"),
                }
            }
            Effect::SendStroke(label) => self.send_stroke(label, out),
            Effect::ResetPattern => self.classifier.reset(),
            Effect::ResetStroke => self.stroke.clear(),
            Effect::StopMotion => {
                self.recorder.clear();
                self.sampler.unsubscribe();
                self.completed_at = Some(Utc::now());
                info!(
                    session_id = %self.id,
                    sent = self.channel.sent_count(),
                    faults = self.channel.fault_count(),
                    pending = self.channel.pending_len(),
                    "capture session complete"
                );
            }
            Effect::Notify(notification) => out.push(notification),
        }
    }

    fn send_stroke(&mut self, label: StageLabel, out: &mut Vec<Notification>) {
        let message = OutboundMessage::GestureStroke {
            subject: self.state.subject.clone().unwrap_or_default(),
            stage: label.to_string(),
            data: self.stroke.stroke(),
        };
        let sent = self.channel.send(&message);
        self.report_drain_faults(out);
        if let Err(e) = sent {
            out.push(delivery_failed(&e));
        }
    }

    /// Queued messages that failed while a later send drained the queue
    fn report_drain_faults(&mut self, out: &mut Vec<Notification>) {
        out.extend(self.channel.take_drain_faults().iter().map(delivery_failed));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.stage == Stage::Done
    }

    /// Interval at which the host should deliver `tick` events
    pub fn tick_interval(&self) -> std::time::Duration {
        self.recorder.tick_interval()
    }

    pub fn sampler(&self) -> &MotionSampler {
        &self.sampler
    }

    /// Register a callback for every accepted motion reading
    pub fn sampler_mut(&mut self) -> &mut MotionSampler {
        &mut self.sampler
    }

    pub fn channel(&self) -> &DeliveryChannel<T> {
        &self.channel
    }

    /// Access to the transport, e.g. to mark it open before `ChannelOpened`
    pub fn channel_mut(&mut self) -> &mut DeliveryChannel<T> {
        &mut self.channel
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            subject: self.state.subject.clone(),
            stage: self.state.stage,
            label: self.state.current_label().map(|l| l.to_string()),
            attempts: self.state.attempts,
            code_digits: self.state.code_buffer.clone(),
            pattern_path: self.classifier.path().as_slice().to_vec(),
            stroke_points: self.stroke.len(),
            recording: self.recorder.is_active(),
            buffered_samples: self.recorder.samples().len(),
            sensor_permission: self.sampler.permission(),
            motion_subscribed: self.sampler.is_subscribed(),
            channel_open: self.channel.is_open(),
            pending_messages: self.channel.pending_len(),
            sent_messages: self.channel.sent_count(),
            delivery_faults: self.channel.fault_count(),
        }
    }
}

fn delivery_failed(error: &DeliveryError) -> Notification {
    Notification::DeliveryFailed {
        stage: error.stage().to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Delivery, OutboxTransport, TransportError};
    use crate::types::{Acceleration, RotationRate};
    use pretty_assertions::assert_eq;

    const SIDE: f64 = 300.0;

    fn session() -> CaptureSession<OutboxTransport> {
        CaptureSession::new(CaptureConfig::default(), OutboxTransport::open()).unwrap()
    }

    fn started<T: Transport>(s: &mut CaptureSession<T>) {
        s.handle(CaptureEvent::SubjectEntered {
            subject: "s01".to_string(),
        });
        s.handle(CaptureEvent::PermissionResolved { granted: true });
        s.handle(CaptureEvent::SurfaceResized {
            width: SIDE,
            height: SIDE,
        });
        s.handle(CaptureEvent::Start);
        s.handle(CaptureEvent::Motion {
            rotation: Some(RotationRate {
                alpha: Some(1.0),
                beta: Some(2.0),
                gamma: Some(3.0),
            }),
            acceleration: Some(Acceleration {
                x: Some(0.0),
                y: Some(9.8),
                z: Some(0.0),
            }),
        });
    }

    fn ticks<T: Transport>(s: &mut CaptureSession<T>, from_ms: i64, count: i64) {
        for i in 0..count {
            s.handle(CaptureEvent::Tick {
                at_ms: from_ms + i * 17,
            });
        }
    }

    fn code<T: Transport>(s: &mut CaptureSession<T>, digits: &str) -> Vec<Notification> {
        digits
            .chars()
            .flat_map(|digit| s.handle(CaptureEvent::Digit { digit }))
            .collect()
    }

    fn cell_center(cell: u8) -> (f64, f64) {
        let i = (cell - 1) as f64;
        let step = SIDE / 3.0;
        ((i % 3.0) * step + step / 2.0, (i / 3.0).floor() * step + step / 2.0)
    }

    fn swipe<T: Transport>(s: &mut CaptureSession<T>, cells: &[u8]) -> Vec<Notification> {
        let mut out = Vec::new();
        let (x, y) = cell_center(cells[0]);
        out.extend(s.handle(CaptureEvent::PointerDown { x, y, at_ms: 0 }));
        for &cell in &cells[1..] {
            let (x, y) = cell_center(cell);
            out.extend(s.handle(CaptureEvent::PointerMove { x, y, at_ms: 0 }));
        }
        out.extend(s.handle(CaptureEvent::PointerUp));
        out
    }

    fn draw<T: Transport>(s: &mut CaptureSession<T>, points: usize) {
        s.handle(CaptureEvent::PointerDown {
            x: 10.0,
            y: 10.0,
            at_ms: 1_000,
        });
        for i in 1..points {
            s.handle(CaptureEvent::PointerMove {
                x: 10.0 + i as f64 * 3.0,
                y: 10.0 + i as f64,
                at_ms: 1_000 + i as i64 * 16,
            });
        }
        s.handle(CaptureEvent::PointerUp);
    }

    fn sent(s: &mut CaptureSession<OutboxTransport>) -> Vec<serde_json::Value> {
        s.channel_mut()
            .transport_mut()
            .drain()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    /// Rejects the transmissions whose zero-based index is listed in `fail_at`
    struct FailingTransport {
        open: bool,
        fail_at: Vec<usize>,
        attempts: usize,
        delivered: Vec<String>,
    }

    impl FailingTransport {
        fn rejecting_all() -> Self {
            Self {
                open: true,
                fail_at: (0..64).collect(),
                attempts: 0,
                delivered: Vec::new(),
            }
        }
    }

    impl Transport for FailingTransport {
        fn is_open(&self) -> bool {
            self.open
        }

        fn transmit(&mut self, payload: &str) -> Result<(), TransportError> {
            let index = self.attempts;
            self.attempts += 1;
            if self.fail_at.contains(&index) {
                return Err(TransportError::Rejected("collector unavailable".to_string()));
            }
            self.delivered.push(payload.to_string());
            Ok(())
        }
    }

    fn failures(notes: &[Notification]) -> Vec<String> {
        notes
            .iter()
            .filter_map(|n| match n {
                Notification::DeliveryFailed { stage, .. } => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    fn to_gesture<T: Transport>(s: &mut CaptureSession<T>) {
        started(s);
        code(s, "13791379");
        for _ in 0..3 {
            swipe(s, &[1, 2, 3, 5, 7, 8, 9]);
        }
        assert_eq!(s.stage(), Stage::Gesture);
    }

    #[test]
    fn test_start_requires_subject() {
        let mut s = session();
        assert!(matches!(
            s.try_handle(CaptureEvent::Start),
            Err(CaptureError::InvalidSubject(_))
        ));
        assert!(matches!(
            s.try_handle(CaptureEvent::SubjectEntered {
                subject: "  ".to_string()
            }),
            Err(CaptureError::InvalidSubject(_))
        ));
        assert_eq!(s.stage(), Stage::User);
    }

    #[test]
    fn test_correct_code_flushes_one_tagged_batch() {
        let mut s = session();
        started(&mut s);
        ticks(&mut s, 1_000, 5);

        let notes = code(&mut s, "1379");
        assert!(notes.contains(&Notification::AttemptCaptured {
            stage: "CODE1".to_string(),
            samples: 5,
            delivery: Delivery::Sent,
        }));
        assert_eq!(s.state().attempts.code, 2);

        let messages = sent(&mut s);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "imu_log");
        assert_eq!(messages[0]["subject"], "s01");
        assert_eq!(messages[0]["stage"], "CODE1");
        assert_eq!(messages[0]["data"][0]["uid"], "s01");
        assert_eq!(messages[0]["data"][0]["gyroZ"], 1.0);
    }

    #[test]
    fn test_wrong_code_discards_abandoned_samples() {
        let mut s = session();
        started(&mut s);
        ticks(&mut s, 1_000, 5);

        let notes = code(&mut s, "0000");
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::CodeRejected { .. })));
        assert!(sent(&mut s).is_empty());
        assert_eq!(s.snapshot().buffered_samples, 0);
        assert_eq!(s.state().attempts.code, 1);

        ticks(&mut s, 5_000, 2);
        code(&mut s, "1379");
        let messages = sent(&mut s);
        assert_eq!(messages[0]["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_code_completion_enters_pattern_with_fresh_batch() {
        let mut s = session();
        started(&mut s);
        code(&mut s, "1379");
        ticks(&mut s, 2_000, 3);
        let notes = code(&mut s, "1379");

        assert!(notes.contains(&Notification::StageEntered {
            stage: Stage::Pattern,
            attempt: 1,
            required: 3,
        }));
        let snapshot = s.snapshot();
        assert_eq!(snapshot.stage, Stage::Pattern);
        assert_eq!(snapshot.label.as_deref(), Some("PAT1"));
        assert!(snapshot.pattern_path.is_empty());
        assert!(snapshot.recording);
        assert_eq!(snapshot.buffered_samples, 0);
    }

    #[test]
    fn test_pattern_stage() {
        let mut s = session();
        started(&mut s);
        code(&mut s, "13791379");
        sent(&mut s);

        let notes = swipe(&mut s, &[9, 8, 7, 5, 3, 2, 1]);
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::PatternRejected { .. })));
        assert_eq!(s.state().attempts.pattern, 1);

        let notes = swipe(&mut s, &[1, 3, 7, 9]);
        assert!(notes.contains(&Notification::PatternProgress {
            path: vec![1, 2, 3],
        }));
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::AttemptCaptured { stage, .. } if stage == "PAT1")));
        assert_eq!(s.state().attempts.pattern, 2);
        assert!(s.snapshot().pattern_path.is_empty());
    }

    #[test]
    fn test_gesture_emits_stroke_then_batch() {
        let mut s = session();
        started(&mut s);
        code(&mut s, "13791379");
        for _ in 0..3 {
            swipe(&mut s, &[1, 2, 3, 5, 7, 8, 9]);
        }
        assert_eq!(s.stage(), Stage::Gesture);
        sent(&mut s);

        draw(&mut s, 3);
        let notes = s.handle(CaptureEvent::SaveGesture);
        assert!(matches!(
            notes.as_slice(),
            [Notification::GestureRejected { points: 3, .. }]
        ));
        assert!(sent(&mut s).is_empty());

        draw(&mut s, 8);
        s.handle(CaptureEvent::SaveGesture);
        let messages = sent(&mut s);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "gesture_stroke");
        assert_eq!(messages[0]["stage"], "GES1");
        assert_eq!(messages[0]["data"].as_array().unwrap().len(), 8);
        assert_eq!(messages[0]["data"][0]["t"], 0);
        assert_eq!(messages[1]["type"], "imu_log");
        assert_eq!(messages[1]["stage"], "GES1");
        assert_eq!(s.snapshot().stroke_points, 0);
    }

    #[test]
    fn test_full_session_completes_and_unsubscribes() {
        let mut s = session();
        started(&mut s);
        code(&mut s, "13791379");
        for _ in 0..3 {
            swipe(&mut s, &[1, 2, 3, 5, 7, 8, 9]);
        }
        let mut last = Vec::new();
        for _ in 0..3 {
            draw(&mut s, 6);
            last = s.handle(CaptureEvent::SaveGesture);
        }

        assert_eq!(last.last(), Some(&Notification::Completed));
        assert!(s.is_complete());
        assert!(!s.sampler().is_subscribed());
        assert_eq!(s.sampler().install_count(), 1);

        let stages: Vec<String> = sent(&mut s)
            .iter()
            .filter(|m| m["type"] == "imu_log")
            .map(|m| m["stage"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            stages,
            vec!["CODE1", "CODE2", "PAT1", "PAT2", "PAT3", "GES1", "GES2", "GES3"]
        );

        assert!(matches!(
            s.try_handle(CaptureEvent::Digit { digit: '1' }),
            Err(CaptureError::SessionComplete)
        ));
        assert!(s.snapshot().completed_at.is_some());
    }

    #[test]
    fn test_closed_channel_flushes_on_open() {
        let mut s =
            CaptureSession::new(CaptureConfig::default(), OutboxTransport::closed()).unwrap();
        started(&mut s);
        let notes = code(&mut s, "13791379");
        assert!(notes.iter().any(|n| matches!(
            n,
            Notification::AttemptCaptured {
                delivery: Delivery::Queued { .. },
                ..
            }
        )));
        assert_eq!(s.snapshot().pending_messages, 2);

        s.channel_mut().transport_mut().set_open(true);
        let notes = s.handle(CaptureEvent::ChannelOpened);
        assert_eq!(notes, vec![Notification::ChannelOpened { flushed: 2 }]);

        let stages: Vec<String> = sent(&mut s)
            .iter()
            .map(|m| m["stage"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(stages, vec!["CODE1", "CODE2"]);
    }

    #[test]
    fn test_permission_denied_keeps_task_flow() {
        let mut s = session();
        s.handle(CaptureEvent::SubjectEntered {
            subject: "s01".to_string(),
        });
        let notes = s.handle(CaptureEvent::PermissionResolved { granted: false });
        assert!(matches!(
            notes.as_slice(),
            [Notification::SensorUnavailable { .. }]
        ));
        s.handle(CaptureEvent::Start);
        s.handle(CaptureEvent::Motion {
            rotation: Some(RotationRate::default()),
            acceleration: Some(Acceleration::default()),
        });
        ticks(&mut s, 0, 5);
        code(&mut s, "1379");

        let messages = sent(&mut s);
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["data"].as_array().unwrap().is_empty());
        assert_eq!(s.state().attempts.code, 2);
    }

    #[test]
    fn test_out_of_stage_input_is_ignored() {
        let mut s = session();
        started(&mut s);
        assert!(s.handle(CaptureEvent::SaveGesture).is_empty());
        assert!(swipe(&mut s, &[1, 2, 3]).is_empty());
        assert_eq!(s.stage(), Stage::Code);
    }

    #[test]
    fn test_failed_batch_is_reported_and_attempt_advances() {
        let mut s = CaptureSession::new(CaptureConfig::default(), FailingTransport::rejecting_all())
            .unwrap();
        started(&mut s);
        ticks(&mut s, 1_000, 3);

        let notes = code(&mut s, "1379");
        assert_eq!(failures(&notes), vec!["CODE1"]);
        assert!(!notes
            .iter()
            .any(|n| matches!(n, Notification::AttemptCaptured { .. })));
        assert_eq!(s.state().attempts.code, 2);
        assert_eq!(s.snapshot().delivery_faults, 1);
        assert_eq!(s.snapshot().pending_messages, 0);
    }

    #[test]
    fn test_failed_stroke_and_batch_are_both_reported() {
        let mut s = CaptureSession::new(CaptureConfig::default(), FailingTransport::rejecting_all())
            .unwrap();
        to_gesture(&mut s);

        draw(&mut s, 6);
        let notes = s.handle(CaptureEvent::SaveGesture);
        assert_eq!(failures(&notes), vec!["GES1", "GES1"]);
        let reasons: Vec<&str> = notes
            .iter()
            .filter_map(|n| match n {
                Notification::DeliveryFailed { reason, .. } => Some(reason.as_str()),
                _ => None,
            })
            .collect();
        assert!(reasons[0].contains("gesture_stroke"));
        assert!(reasons[1].contains("imu_log"));
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::GestureSaved { points: 6, .. })));
        assert_eq!(s.state().attempts.gesture, 2);
        assert!(s.channel().transport().delivered.is_empty());
    }

    #[test]
    fn test_full_queue_reports_dropped_batch() {
        let mut config = CaptureConfig::default();
        config.delivery.queue_capacity = 1;
        let mut s = CaptureSession::new(config, OutboxTransport::closed()).unwrap();
        started(&mut s);

        let notes = code(&mut s, "1379");
        assert!(failures(&notes).is_empty());
        let notes = code(&mut s, "1379");
        assert_eq!(failures(&notes), vec!["CODE2"]);
        assert!(notes.iter().any(|n| matches!(
            n,
            Notification::DeliveryFailed { reason, .. } if reason.contains("queue is full")
        )));
        assert_eq!(s.snapshot().pending_messages, 1);

        s.channel_mut().transport_mut().set_open(true);
        s.handle(CaptureEvent::ChannelOpened);
        let stages: Vec<String> = sent(&mut s)
            .iter()
            .map(|m| m["stage"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(stages, vec!["CODE1"]);
    }

    #[test]
    fn test_queued_batch_failing_ahead_of_next_send_is_reported() {
        let transport = FailingTransport {
            open: false,
            fail_at: vec![0],
            attempts: 0,
            delivered: Vec::new(),
        };
        let mut s = CaptureSession::new(CaptureConfig::default(), transport).unwrap();
        started(&mut s);
        code(&mut s, "1379");
        assert_eq!(s.snapshot().pending_messages, 1);

        // Connection comes back without a channel_opened event
        s.channel_mut().transport_mut().open = true;
        ticks(&mut s, 2_000, 2);
        let notes = code(&mut s, "1379");

        assert_eq!(failures(&notes), vec!["CODE1"]);
        assert!(notes.contains(&Notification::AttemptCaptured {
            stage: "CODE2".to_string(),
            samples: 2,
            delivery: Delivery::Sent,
        }));
        assert_eq!(s.snapshot().pending_messages, 0);
        assert_eq!(s.snapshot().delivery_faults, 1);
        assert_eq!(s.channel().transport().delivered.len(), 1);
    }

    #[test]
    fn test_clear_then_save_rejects_empty_gesture() {
        let mut s = session();
        to_gesture(&mut s);
        sent(&mut s);

        draw(&mut s, 8);
        s.handle(CaptureEvent::ClearGesture);
        let notes = s.handle(CaptureEvent::SaveGesture);
        assert!(matches!(
            notes.as_slice(),
            [Notification::GestureRejected { points: 0, .. }]
        ));
        assert!(sent(&mut s).is_empty());
        assert_eq!(s.state().attempts.gesture, 1);
    }

    #[test]
    fn test_save_while_drawing_is_refused() {
        let mut s = session();
        to_gesture(&mut s);
        sent(&mut s);

        s.handle(CaptureEvent::PointerDown {
            x: 10.0,
            y: 10.0,
            at_ms: 0,
        });
        for i in 1..8 {
            s.handle(CaptureEvent::PointerMove {
                x: 10.0 + i as f64 * 4.0,
                y: 10.0,
                at_ms: i * 16,
            });
        }
        assert!(matches!(
            s.try_handle(CaptureEvent::SaveGesture),
            Err(CaptureError::InvalidInput(_))
        ));
        assert!(sent(&mut s).is_empty());
        assert_eq!(s.snapshot().stroke_points, 8);

        s.handle(CaptureEvent::PointerUp);
        let notes = s.handle(CaptureEvent::SaveGesture);
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::GestureSaved { points: 8, .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = CaptureConfig::default();
        config.code.expected = String::new();
        assert!(CaptureSession::new(config, OutboxTransport::open()).is_err());
    }
}
