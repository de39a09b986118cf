//! Attempt recorder
//!
//! Samples the motion sampler at a fixed cadence while an attempt is open and
//! hands the collected batch to the delivery channel when the attempt succeeds.
//!
//! Ticks come from the host's timer and are only advisory: a tick that arrives
//! before the next sample is due is skipped, so bursts never push the long-run
//! rate above the configured one. A tick stamped earlier than the last recorded
//! sample is skipped too, so timestamps never decrease within a batch.

use std::time::Duration;
use tracing::{debug, trace};

use crate::channel::{Delivery, DeliveryChannel, Transport};
use crate::config::DEFAULT_SAMPLE_RATE_HZ;
use crate::error::CaptureError;
use crate::motion::MotionSampler;
use crate::types::{OutboundMessage, Sample, StageLabel};

/// Host timers report whole milliseconds, so a tick up to this early still counts
const TICK_TOLERANCE_MS: f64 = 1.0;

/// Summary of one flushed attempt batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub label: StageLabel,
    pub samples: usize,
    pub delivery: Delivery,
}

/// Per-attempt motion sample buffer
#[derive(Debug)]
pub struct AttemptRecorder {
    subject: String,
    label: Option<StageLabel>,
    active: bool,
    samples: Vec<Sample>,
    interval_ms: f64,
    next_due_ms: Option<f64>,
    last_recorded_ms: Option<i64>,
}

impl Default for AttemptRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE_HZ)
    }
}

impl AttemptRecorder {
    /// Create a recorder sampling at `rate_hz`
    pub fn new(rate_hz: f64) -> Self {
        Self {
            subject: String::new(),
            label: None,
            active: false,
            samples: Vec::new(),
            interval_ms: 1000.0 / rate_hz,
            next_due_ms: None,
            last_recorded_ms: None,
        }
    }

    /// Set the subject identifier stamped on every sample
    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = subject.into();
    }

    /// Interval at which the host should deliver ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_ms / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Open a new attempt batch, discarding anything not yet flushed
    pub fn start(&mut self, label: StageLabel, sampler: &mut MotionSampler) {
        self.clear();
        sampler.subscribe();
        self.label = Some(label);
        self.active = true;
        debug!(stage = %label, "recording attempt");
    }

    /// Stop sampling and drop the buffered samples without sending them
    pub fn clear(&mut self) {
        if !self.samples.is_empty() {
            debug!(
                stage = ?self.label.map(|l| l.to_string()),
                discarded = self.samples.len(),
                "discarding unflushed samples"
            );
        }
        self.samples.clear();
        self.active = false;
        self.next_due_ms = None;
        self.last_recorded_ms = None;
    }

    /// Handle a timer tick. Returns `true` when a sample was recorded.
    pub fn tick(&mut self, at_ms: i64, sampler: &MotionSampler) -> bool {
        if !self.active {
            return false;
        }
        let Some(label) = self.label else {
            return false;
        };

        if self.last_recorded_ms.is_some_and(|last| at_ms < last) {
            trace!(at_ms, "tick behind last recorded sample; skipped");
            return false;
        }

        let now = at_ms as f64;
        if let Some(due) = self.next_due_ms {
            if now + TICK_TOLERANCE_MS < due {
                return false;
            }
            // After a long stall, resume the cadence from now instead of catching up
            self.next_due_ms = Some(if now - due > self.interval_ms {
                now + self.interval_ms
            } else {
                due + self.interval_ms
            });
        } else {
            self.next_due_ms = Some(now + self.interval_ms);
        }

        let Some(reading) = sampler.latest() else {
            trace!("no motion data yet; tick skipped");
            return false;
        };

        self.samples.push(Sample::from_reading(
            &self.subject,
            &label.to_string(),
            &reading,
            at_ms,
        ));
        self.last_recorded_ms = Some(at_ms);
        true
    }

    /// Close the current attempt and hand its batch to the channel.
    ///
    /// The buffer is cleared even when delivery fails.
    pub fn flush<T: Transport>(
        &mut self,
        channel: &mut DeliveryChannel<T>,
    ) -> Result<FlushReport, CaptureError> {
        let label = self.label.ok_or(CaptureError::RecorderIdle)?;

        self.active = false;
        self.next_due_ms = None;
        self.last_recorded_ms = None;
        let data = std::mem::take(&mut self.samples);
        let samples = data.len();

        let message = OutboundMessage::ImuLog {
            subject: self.subject.clone(),
            stage: label.to_string(),
            data,
        };
        let delivery = channel.send(&message)?;

        debug!(stage = %label, samples, "attempt batch flushed");
        Ok(FlushReport {
            label,
            samples,
            delivery,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Label of the open (or most recently flushed) attempt
    pub fn label(&self) -> Option<StageLabel> {
        self.label
    }

    /// Samples buffered for the open attempt
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutboxTransport;
    use crate::types::{Acceleration, RotationRate, Stage};

    fn live_sampler() -> MotionSampler {
        let mut sampler = MotionSampler::new();
        sampler.subscribe();
        sampler.handle_motion(
            Some(RotationRate {
                alpha: Some(0.5),
                beta: Some(1.5),
                gamma: Some(2.5),
            }),
            Some(Acceleration {
                x: Some(0.1),
                y: Some(9.8),
                z: Some(0.2),
            }),
        );
        sampler
    }

    fn recorder() -> AttemptRecorder {
        let mut recorder = AttemptRecorder::default();
        recorder.set_subject("s01");
        recorder
    }

    fn sent_batches(channel: &DeliveryChannel<OutboxTransport>) -> Vec<serde_json::Value> {
        channel
            .transport()
            .messages()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    #[test]
    fn test_tick_records_tagged_sample() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);

        assert!(recorder.tick(1_000, &sampler));
        let sample = &recorder.samples()[0];
        assert_eq!(sample.subject_id, "s01");
        assert_eq!(sample.stage_label, "CODE1");
        assert_eq!(sample.acc_y, 9.8);
        assert_eq!(sample.gyro_x, 1.5);
        assert_eq!(sample.timestamp_ms, 1_000);
    }

    #[test]
    fn test_tick_without_motion_data_is_noop() {
        let mut sampler = MotionSampler::new();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);

        for i in 0..10 {
            assert!(!recorder.tick(i * 17, &sampler));
        }
        assert!(recorder.samples().is_empty());
    }

    #[test]
    fn test_tick_while_inactive_is_noop() {
        let sampler = live_sampler();
        let mut recorder = recorder();
        assert!(!recorder.tick(0, &sampler));
    }

    #[test]
    fn test_start_subscribes_once() {
        let mut sampler = MotionSampler::new();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);
        recorder.start(StageLabel::new(Stage::Code, 2), &mut sampler);
        recorder.start(StageLabel::new(Stage::Pattern, 1), &mut sampler);
        assert_eq!(sampler.install_count(), 1);
    }

    #[test]
    fn test_restart_discards_unflushed_samples() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        let mut channel = DeliveryChannel::new(OutboxTransport::open());

        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);
        recorder.tick(0, &sampler);
        recorder.tick(17, &sampler);
        recorder.tick(34, &sampler);

        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);
        recorder.tick(1_000, &sampler);

        let report = recorder.flush(&mut channel).unwrap();
        assert_eq!(report.samples, 1);

        let batches = sent_batches(&channel);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0]["data"][0]["timestamp"], 1_000);
    }

    #[test]
    fn test_flush_sends_imu_log_and_clears() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        let mut channel = DeliveryChannel::new(OutboxTransport::open());

        recorder.start(StageLabel::new(Stage::Pattern, 7), &mut sampler);
        recorder.tick(0, &sampler);
        recorder.tick(17, &sampler);

        let report = recorder.flush(&mut channel).unwrap();
        assert_eq!(report.label.to_string(), "PAT7");
        assert_eq!(report.delivery, Delivery::Sent);
        assert!(!recorder.is_active());
        assert!(recorder.samples().is_empty());

        // Sampling stopped with the flush
        assert!(!recorder.tick(34, &sampler));

        let batches = sent_batches(&channel);
        assert_eq!(batches[0]["type"], "imu_log");
        assert_eq!(batches[0]["subject"], "s01");
        assert_eq!(batches[0]["stage"], "PAT7");
        assert_eq!(batches[0]["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_flush_before_start_is_an_error() {
        let mut recorder = recorder();
        let mut channel = DeliveryChannel::new(OutboxTransport::open());
        assert!(matches!(
            recorder.flush(&mut channel),
            Err(CaptureError::RecorderIdle)
        ));
    }

    #[test]
    fn test_cadence_never_exceeds_rate_under_bursts() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Gesture, 1), &mut sampler);

        // One tick per millisecond for a full second
        let recorded = (0..1_000).filter(|ms| recorder.tick(*ms, &sampler)).count();
        assert!(recorded <= 62, "recorded {recorded} samples in one second");
        assert!(recorded >= 58, "recorded {recorded} samples in one second");
    }

    #[test]
    fn test_cadence_accepts_whole_millisecond_host_ticks() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Gesture, 1), &mut sampler);

        // A 60 Hz timer rounded to whole milliseconds
        let recorded = (0..60)
            .map(|i| (i as f64 * 1000.0 / 60.0).round() as i64)
            .filter(|ms| recorder.tick(*ms, &sampler))
            .count();
        assert_eq!(recorded, 60);
    }

    #[test]
    fn test_timestamps_never_decrease_within_batch() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);

        recorder.tick(1_000, &sampler);
        recorder.tick(1_020, &sampler);
        // Host clock stepped backwards
        recorder.tick(900, &sampler);
        recorder.tick(1_100, &sampler);

        let stamps: Vec<i64> = recorder.samples().iter().map(|s| s.timestamp_ms).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");
    }

    #[test]
    fn test_early_tick_after_late_tick_is_not_recorded() {
        let mut sampler = live_sampler();
        let mut recorder = recorder();
        recorder.start(StageLabel::new(Stage::Code, 1), &mut sampler);

        for ms in [0, 16, 50, 49] {
            recorder.tick(ms, &sampler);
        }

        let stamps: Vec<i64> = recorder.samples().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![0, 16, 50]);
    }

    #[test]
    fn test_tick_interval_for_extreme_rates() {
        assert_eq!(AttemptRecorder::new(1e-300).tick_interval(), Duration::MAX);
        assert!(AttemptRecorder::new(1e9).tick_interval() < Duration::from_millis(1));
    }

    #[test]
    fn test_tick_interval() {
        let recorder = AttemptRecorder::new(60.0);
        let interval = recorder.tick_interval();
        assert!(interval > Duration::from_millis(16) && interval < Duration::from_millis(17));
    }
}
