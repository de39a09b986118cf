//! Stage state machine
//!
//! Pure transition logic for the capture protocol. A [`StageMachine`] takes the
//! current [`SessionState`] and one [`StageInput`] and returns the next state
//! together with the [`Effect`]s the session must carry out (starting and
//! flushing the recorder, sending strokes, resetting input surfaces, emitting
//! notifications). Nothing here touches a sensor, a buffer or a connection.
//!
//! The stages run in a fixed line: `User -> Code -> Pattern -> Gesture -> Done`.
//! Each attempt stage repeats until its configured number of successes; every
//! success flushes the attempt batch under the label that was active.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::events::Notification;
use crate::types::{Stage, StageLabel};

/// Attempt number for each stage; starts at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounters {
    pub code: u32,
    pub pattern: u32,
    pub gesture: u32,
}

impl Default for AttemptCounters {
    fn default() -> Self {
        Self {
            code: 1,
            pattern: 1,
            gesture: 1,
        }
    }
}

impl AttemptCounters {
    pub fn get(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::Code => Some(self.code),
            Stage::Pattern => Some(self.pattern),
            Stage::Gesture => Some(self.gesture),
            Stage::User | Stage::Done => None,
        }
    }

    fn slot(&mut self, stage: Stage) -> Option<&mut u32> {
        match stage {
            Stage::Code => Some(&mut self.code),
            Stage::Pattern => Some(&mut self.pattern),
            Stage::Gesture => Some(&mut self.gesture),
            Stage::User | Stage::Done => None,
        }
    }
}

/// Everything the protocol remembers between inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub subject: Option<String>,
    pub stage: Stage,
    pub attempts: AttemptCounters,
    /// Digits entered for the open code attempt
    pub code_buffer: String,
}

impl SessionState {
    /// Label of the open attempt, if the current stage takes attempts
    pub fn current_label(&self) -> Option<StageLabel> {
        self.attempts
            .get(self.stage)
            .map(|attempt| StageLabel::new(self.stage, attempt))
    }
}

/// Inputs the protocol reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// Raw subject identifier as typed
    SubjectEntered(String),
    Start,
    Digit(char),
    /// Finalized grid path from a pointer-up
    PatternCompleted(Vec<u8>),
    /// Save pressed with a stroke of this many points
    GestureSave { points: usize },
}

impl StageInput {
    /// The stage in which this input is meaningful
    pub fn stage(&self) -> Stage {
        match self {
            StageInput::SubjectEntered(_) | StageInput::Start => Stage::User,
            StageInput::Digit(_) => Stage::Code,
            StageInput::PatternCompleted(_) => Stage::Pattern,
            StageInput::GestureSave { .. } => Stage::Gesture,
        }
    }
}

/// Side effects requested by a transition, executed in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a fresh attempt batch under this label
    StartRecorder(StageLabel),
    /// Close the open batch and hand it to the channel
    FlushRecorder(StageLabel),
    /// Send the current gesture stroke under this label
    SendStroke(StageLabel),
    ResetPattern,
    ResetStroke,
    /// Detach the motion listener for good
    StopMotion,
    Notify(Notification),
}

/// Result of applying one input
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn new(state: SessionState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn notify(&mut self, notification: Notification) {
        self.effects.push(Effect::Notify(notification));
    }
}

/// Transition rules for one session configuration
#[derive(Debug, Clone)]
pub struct StageMachine {
    code: String,
    pattern: Vec<u8>,
    code_repetitions: u32,
    pattern_repetitions: u32,
    gesture_repetitions: u32,
    gesture_min_points: usize,
}

impl StageMachine {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            code: config.code.expected.clone(),
            pattern: config.pattern.expected.clone(),
            code_repetitions: config.code.repetitions,
            pattern_repetitions: config.pattern.repetitions,
            gesture_repetitions: config.gesture.repetitions,
            gesture_min_points: config.gesture.min_points,
        }
    }

    /// Number of successes a stage needs before the next stage begins
    pub fn required(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Code => self.code_repetitions,
            Stage::Pattern => self.pattern_repetitions,
            Stage::Gesture => self.gesture_repetitions,
            Stage::User | Stage::Done => 0,
        }
    }

    /// Apply one input to `state`
    pub fn apply(
        &self,
        state: &SessionState,
        input: StageInput,
    ) -> Result<Transition, CaptureError> {
        if state.stage == Stage::Done {
            return Err(CaptureError::SessionComplete);
        }
        if input.stage() != state.stage {
            return Err(CaptureError::StageMismatch {
                expected: input.stage(),
                actual: state.stage,
            });
        }

        match input {
            StageInput::SubjectEntered(raw) => self.enter_subject(state, &raw),
            StageInput::Start => self.start(state),
            StageInput::Digit(digit) => self.digit(state, digit),
            StageInput::PatternCompleted(path) => self.pattern(state, path),
            StageInput::GestureSave { points } => self.save_gesture(state, points),
        }
    }

    fn enter_subject(&self, state: &SessionState, raw: &str) -> Result<Transition, CaptureError> {
        let subject = raw.trim();
        if subject.is_empty() {
            return Err(CaptureError::InvalidSubject(
                "subject id must not be empty".to_string(),
            ));
        }
        let mut next = state.clone();
        next.subject = Some(subject.to_string());
        Ok(Transition::new(next))
    }

    fn start(&self, state: &SessionState) -> Result<Transition, CaptureError> {
        if state.subject.is_none() {
            return Err(CaptureError::InvalidSubject(
                "subject id has not been entered".to_string(),
            ));
        }
        let mut t = Transition::new(state.clone());
        self.enter_stage(&mut t, Stage::Code);
        Ok(t)
    }

    fn digit(&self, state: &SessionState, digit: char) -> Result<Transition, CaptureError> {
        if !digit.is_ascii_digit() {
            return Err(CaptureError::InvalidInput(format!(
                "expected a digit, got {digit:?}"
            )));
        }

        let mut t = Transition::new(state.clone());
        t.state.code_buffer.push(digit);
        t.notify(Notification::CodeEntry {
            digits: t.state.code_buffer.clone(),
        });

        if t.state.code_buffer.len() < self.code.len() {
            return Ok(t);
        }

        let entered = std::mem::take(&mut t.state.code_buffer);
        if entered == self.code {
            self.succeed(&mut t);
        } else if let Some(label) = t.state.current_label() {
            // The failed entry's samples belong to no attempt
            t.push(Effect::StartRecorder(label));
            t.notify(Notification::CodeRejected {
                stage: label.to_string(),
                entered,
            });
        }
        Ok(t)
    }

    fn pattern(&self, state: &SessionState, path: Vec<u8>) -> Result<Transition, CaptureError> {
        let mut t = Transition::new(state.clone());
        if path == self.pattern {
            t.push(Effect::ResetPattern);
            self.succeed(&mut t);
        } else if let Some(label) = t.state.current_label() {
            t.notify(Notification::PatternRejected {
                stage: label.to_string(),
                path,
            });
        }
        Ok(t)
    }

    fn save_gesture(
        &self,
        state: &SessionState,
        points: usize,
    ) -> Result<Transition, CaptureError> {
        let mut t = Transition::new(state.clone());
        let Some(label) = t.state.current_label() else {
            return Ok(t);
        };

        if points < self.gesture_min_points {
            t.notify(Notification::GestureRejected {
                stage: label.to_string(),
                points,
                required: self.gesture_min_points,
            });
            return Ok(t);
        }

        t.push(Effect::SendStroke(label));
        t.push(Effect::ResetStroke);
        t.notify(Notification::GestureSaved {
            stage: label.to_string(),
            points,
        });
        self.succeed(&mut t);
        Ok(t)
    }

    /// Flush the open attempt, then advance the counter or the stage
    fn succeed(&self, t: &mut Transition) {
        let stage = t.state.stage;
        let Some(label) = t.state.current_label() else {
            return;
        };
        t.push(Effect::FlushRecorder(label));

        let required = self.required(stage);
        let Some(slot) = t.state.attempts.slot(stage) else {
            return;
        };
        *slot += 1;
        let attempt = *slot;

        if attempt > required {
            self.enter_stage(t, stage.next());
            return;
        }

        t.push(Effect::StartRecorder(StageLabel::new(stage, attempt)));
        t.notify(Notification::AttemptAdvanced {
            stage,
            attempt,
            required,
        });
    }

    fn enter_stage(&self, t: &mut Transition, stage: Stage) {
        t.state.stage = stage;
        t.state.code_buffer.clear();

        if stage == Stage::Done {
            info!("all stages complete");
            t.push(Effect::StopMotion);
            t.notify(Notification::Completed);
            return;
        }

        if let Some(slot) = t.state.attempts.slot(stage) {
            *slot = 1;
        }
        match stage {
            Stage::Pattern => t.push(Effect::ResetPattern),
            Stage::Gesture => t.push(Effect::ResetStroke),
            _ => {}
        }

        let required = self.required(stage);
        info!(?stage, required, "entering stage");
        t.push(Effect::StartRecorder(StageLabel::new(stage, 1)));
        t.notify(Notification::StageEntered {
            stage,
            attempt: 1,
            required,
        });
    }
}
