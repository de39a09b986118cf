//! Delivery channel
//!
//! Wraps the persistent connection to the collector. Messages are transmitted
//! immediately while the connection is open; otherwise they wait in a bounded
//! queue that is drained, in submission order, the first time the connection
//! reports open again.
//!
//! A message that fails mid-transmission is reported to the caller and is not
//! queued again. Queued messages that fail while `send` drains them ahead of a
//! new message are held until the caller collects them with
//! [`DeliveryChannel::take_drain_faults`].

use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_QUEUE_CAPACITY;
use crate::types::OutboundMessage;

/// The physical connection underneath a [`DeliveryChannel`]
pub trait Transport {
    /// Whether the connection is ready to transmit
    fn is_open(&self) -> bool;

    /// Transmit one serialized message
    fn transmit(&mut self, payload: &str) -> Result<(), TransportError>;
}

/// Errors raised by a transport while transmitting
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transmission rejected: {0}")]
    Rejected(String),
}

/// Delivery faults surfaced to the caller of `send`
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode {kind} message for {stage}: {source}")]
    Encode {
        kind: &'static str,
        stage: String,
        source: serde_json::Error,
    },

    #[error("transmission of {kind} message for {stage} failed: {source}")]
    Transport {
        kind: &'static str,
        stage: String,
        source: TransportError,
    },

    #[error("outbound queue is full ({capacity} messages); dropped {kind} message for {stage}")]
    QueueFull {
        kind: &'static str,
        stage: String,
        capacity: usize,
    },
}

impl DeliveryError {
    /// Attempt label of the message that was not delivered
    pub fn stage(&self) -> &str {
        match self {
            DeliveryError::Encode { stage, .. }
            | DeliveryError::Transport { stage, .. }
            | DeliveryError::QueueFull { stage, .. } => stage,
        }
    }
}

/// What happened to a message handed to [`DeliveryChannel::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    /// Transmitted on the open connection
    Sent,
    /// Held until the connection opens
    Queued { pending: usize },
}

/// Result of draining the queue after the connection opened
#[derive(Debug, Default)]
pub struct OpenReport {
    /// Queued messages transmitted
    pub delivered: usize,
    /// Queued messages that failed and were dropped
    pub faults: Vec<DeliveryError>,
    /// Messages still queued because the connection closed again mid-drain
    pub remaining: usize,
}

#[derive(Debug)]
struct PendingMessage {
    kind: &'static str,
    stage: String,
    payload: String,
}

/// Ordered, at-most-once-after-open message delivery over a [`Transport`]
#[derive(Debug)]
pub struct DeliveryChannel<T: Transport> {
    transport: T,
    pending: VecDeque<PendingMessage>,
    capacity: usize,
    sent: u64,
    faults: u64,
    drain_faults: Vec<DeliveryError>,
}

impl<T: Transport> DeliveryChannel<T> {
    /// Create a channel with the default queue capacity
    pub fn new(transport: T) -> Self {
        Self::with_capacity(transport, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a channel holding at most `capacity` messages while closed
    pub fn with_capacity(transport: T, capacity: usize) -> Self {
        Self {
            transport,
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            sent: 0,
            faults: 0,
            drain_faults: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Serialize and deliver a message, or queue it until the channel opens
    pub fn send(&mut self, message: &OutboundMessage) -> Result<Delivery, DeliveryError> {
        let kind = message.kind();
        let stage = message.stage().to_string();
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(source) => {
                self.faults += 1;
                return Err(DeliveryError::Encode {
                    kind,
                    stage,
                    source,
                });
            }
        };

        // Anything still queued must leave before this message does
        if self.transport.is_open() && !self.pending.is_empty() {
            let report = self.drain_pending();
            self.drain_faults.extend(report.faults);
        }

        if self.transport.is_open() {
            self.transmit(PendingMessage {
                kind,
                stage,
                payload,
            })?;
            return Ok(Delivery::Sent);
        }

        if self.pending.len() >= self.capacity {
            self.faults += 1;
            warn!(kind, stage = %stage, capacity = self.capacity, "outbound queue full");
            return Err(DeliveryError::QueueFull {
                kind,
                stage,
                capacity: self.capacity,
            });
        }

        debug!(
            kind,
            stage = %stage,
            pending = self.pending.len() + 1,
            "channel closed; message queued"
        );
        self.pending.push_back(PendingMessage {
            kind,
            stage,
            payload,
        });
        Ok(Delivery::Queued {
            pending: self.pending.len(),
        })
    }

    /// Drain the queue after the connection reported open
    pub fn on_opened(&mut self) -> OpenReport {
        if !self.transport.is_open() {
            debug!(pending = self.pending.len(), "open notification while transport is closed");
            return OpenReport {
                remaining: self.pending.len(),
                ..OpenReport::default()
            };
        }

        let report = self.drain_pending();
        info!(
            delivered = report.delivered,
            faults = report.faults.len(),
            remaining = report.remaining,
            "delivery channel opened"
        );
        report
    }

    /// Take the queued messages that failed while `send` drained them
    pub fn take_drain_faults(&mut self) -> Vec<DeliveryError> {
        std::mem::take(&mut self.drain_faults)
    }

    /// Number of messages waiting for the channel to open
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of messages transmitted so far
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    /// Number of messages that were not delivered
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn drain_pending(&mut self) -> OpenReport {
        let mut report = OpenReport::default();

        while self.transport.is_open() {
            let Some(message) = self.pending.pop_front() else {
                break;
            };
            match self.transmit(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => report.faults.push(e),
            }
        }

        report.remaining = self.pending.len();
        report
    }

    fn transmit(&mut self, message: PendingMessage) -> Result<(), DeliveryError> {
        match self.transport.transmit(&message.payload) {
            Ok(()) => {
                self.sent += 1;
                Ok(())
            }
            Err(source) => {
                self.faults += 1;
                warn!(
                    kind = message.kind,
                    stage = %message.stage,
                    error = %source,
                    "transmission failed"
                );
                Err(DeliveryError::Transport {
                    kind: message.kind,
                    stage: message.stage,
                    source,
                })
            }
        }
    }
}

// ============================================================================
// Transports
// ============================================================================

/// In-memory transport whose transmitted messages are drained by the host
#[derive(Debug, Default)]
pub struct OutboxTransport {
    open: bool,
    sent: Vec<String>,
}

impl OutboxTransport {
    /// An outbox that is ready to transmit
    pub fn open() -> Self {
        Self {
            open: true,
            sent: Vec::new(),
        }
    }

    /// An outbox that queues until [`OutboxTransport::set_open`] is called
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    /// Messages transmitted and not yet drained
    pub fn messages(&self) -> &[String] {
        &self.sent
    }

    /// Take all transmitted messages
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for OutboxTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn transmit(&mut self, payload: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.sent.push(payload.to_string());
        Ok(())
    }
}

/// Newline-delimited JSON over any writer (files, stdout, TCP streams)
#[derive(Debug)]
pub struct WriterTransport<W: Write> {
    writer: W,
    open: bool,
}

impl<W: Write> WriterTransport<W> {
    /// A transport that is ready to transmit
    pub fn new(writer: W) -> Self {
        Self { writer, open: true }
    }

    /// A transport that starts closed
    pub fn offline(writer: W) -> Self {
        Self {
            writer,
            open: false,
        }
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Transport for WriterTransport<W> {
    fn is_open(&self) -> bool {
        self.open
    }

    fn transmit(&mut self, payload: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if let Err(e) = writeln!(self.writer, "{payload}").and_then(|_| self.writer.flush()) {
            // A broken writer will not recover on its own
            self.open = false;
            return Err(TransportError::Io(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn imu(stage: &str) -> OutboundMessage {
        OutboundMessage::ImuLog {
            subject: "s01".to_string(),
            stage: stage.to_string(),
            data: Vec::new(),
        }
    }

    fn stages(messages: &[String]) -> Vec<String> {
        messages
            .iter()
            .map(|m| {
                let v: serde_json::Value = serde_json::from_str(m).unwrap();
                v["stage"].as_str().unwrap().to_string()
            })
            .collect()
    }

    /// Fails every transmission after the first `ok` ones
    struct FlakyTransport {
        ok: usize,
        open: bool,
        sent: Vec<String>,
    }

    impl Transport for FlakyTransport {
        fn is_open(&self) -> bool {
            self.open
        }

        fn transmit(&mut self, payload: &str) -> Result<(), TransportError> {
            if self.sent.len() >= self.ok {
                return Err(TransportError::Rejected("socket reset".to_string()));
            }
            self.sent.push(payload.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_send_while_open_is_immediate() {
        let mut channel = DeliveryChannel::new(OutboxTransport::open());
        assert_eq!(channel.send(&imu("CODE1")).unwrap(), Delivery::Sent);
        assert_eq!(channel.send(&imu("CODE2")).unwrap(), Delivery::Sent);

        assert_eq!(stages(channel.transport().messages()), vec!["CODE1", "CODE2"]);
        assert_eq!(channel.sent_count(), 2);
    }

    #[test]
    fn test_queued_messages_flush_in_order_exactly_once() {
        let mut channel = DeliveryChannel::new(OutboxTransport::closed());
        for stage in ["CODE1", "CODE2", "PAT1"] {
            assert!(matches!(
                channel.send(&imu(stage)).unwrap(),
                Delivery::Queued { .. }
            ));
        }
        assert!(channel.transport().messages().is_empty());
        assert_eq!(channel.pending_len(), 3);

        channel.transport_mut().set_open(true);
        let report = channel.on_opened();
        assert_eq!(report.delivered, 3);
        assert!(report.faults.is_empty());

        // A second open notification must not resend anything
        let report = channel.on_opened();
        assert_eq!(report.delivered, 0);

        assert_eq!(
            stages(channel.transport().messages()),
            vec!["CODE1", "CODE2", "PAT1"]
        );
    }

    #[test]
    fn test_send_after_reopen_keeps_order_without_open_notification() {
        let mut channel = DeliveryChannel::new(OutboxTransport::closed());
        channel.send(&imu("CODE1")).unwrap();
        channel.transport_mut().set_open(true);

        channel.send(&imu("CODE2")).unwrap();
        assert_eq!(stages(channel.transport().messages()), vec!["CODE1", "CODE2"]);
        assert_eq!(channel.pending_len(), 0);
    }

    #[test]
    fn test_on_opened_while_closed_keeps_queue() {
        let mut channel = DeliveryChannel::new(OutboxTransport::closed());
        channel.send(&imu("CODE1")).unwrap();

        let report = channel.on_opened();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn test_queue_is_bounded() {
        let mut channel = DeliveryChannel::with_capacity(OutboxTransport::closed(), 2);
        channel.send(&imu("CODE1")).unwrap();
        channel.send(&imu("CODE2")).unwrap();

        let err = channel.send(&imu("PAT1")).unwrap_err();
        assert!(matches!(err, DeliveryError::QueueFull { capacity: 2, .. }));
        assert_eq!(err.stage(), "PAT1");
        assert_eq!(channel.pending_len(), 2);
        assert_eq!(channel.fault_count(), 1);
    }

    #[test]
    fn test_transmission_failure_is_reported_not_requeued() {
        let mut channel = DeliveryChannel::new(FlakyTransport {
            ok: 1,
            open: true,
            sent: Vec::new(),
        });
        assert!(channel.send(&imu("CODE1")).is_ok());

        let err = channel.send(&imu("CODE2")).unwrap_err();
        assert!(matches!(err, DeliveryError::Transport { .. }));
        assert_eq!(err.stage(), "CODE2");
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(channel.fault_count(), 1);
        assert_eq!(channel.transport().sent.len(), 1);
    }

    #[test]
    fn test_failed_drain_before_send_is_kept_for_caller() {
        let mut channel = DeliveryChannel::new(FlakyTransport {
            ok: 0,
            open: false,
            sent: Vec::new(),
        });
        channel.send(&imu("CODE1")).unwrap();
        assert!(channel.take_drain_faults().is_empty());

        // Reopened without an open notification; the queued CODE1 goes first
        channel.transport_mut().open = true;
        let err = channel.send(&imu("CODE2")).unwrap_err();
        assert_eq!(err.stage(), "CODE2");

        let faults = channel.take_drain_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].stage(), "CODE1");
        assert!(matches!(faults[0], DeliveryError::Transport { .. }));
        assert!(channel.take_drain_faults().is_empty());
        assert_eq!(channel.fault_count(), 2);
        assert_eq!(channel.pending_len(), 0);
    }

    #[test]
    fn test_writer_transport_writes_ndjson() {
        let mut channel = DeliveryChannel::new(WriterTransport::new(Vec::new()));
        channel.send(&imu("GES1")).unwrap();
        channel.send(&imu("GES2")).unwrap();

        let written = String::from_utf8(channel.transport().get_ref().clone()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"imu_log\""));
        assert!(lines[1].contains("\"stage\":\"GES2\""));
    }

    #[test]
    fn test_offline_writer_transport_queues() {
        let mut channel = DeliveryChannel::new(WriterTransport::offline(Vec::new()));
        channel.send(&imu("CODE1")).unwrap();
        assert!(channel.transport().get_ref().is_empty());

        channel.transport_mut().set_open(true);
        assert_eq!(channel.on_opened().delivered, 1);
        assert!(!channel.transport().get_ref().is_empty());
    }
}
