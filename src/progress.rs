//! Progress events emitted by the Process Executor as a plan runs
//! (§4.10), grounded on the same named-event-constructor style this
//! codebase uses elsewhere for structured execution traces.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

/// The kind of lifecycle transition a `ProgressEvent` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    PlanStarted,
    StepReady,
    StepStarted,
    StepProgress,
    StepCompleted,
    StepFailed,
    PlanCompleted,
    PlanFailed,
    PlanCancelled,
}

impl ProgressEventType {
    /// Whether this event type ends the stream — no event follows it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEventType::PlanCompleted | ProgressEventType::PlanFailed | ProgressEventType::PlanCancelled
        )
    }
}

/// One entry in a plan's execution trace. `sequence` is gap-free and
/// monotonically increasing within a single tree's stream (§4.10),
/// letting subscribers detect drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub sequence: u64,
    pub event_type: ProgressEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(sequence: u64, event_type: ProgressEventType, step_id: Option<String>, payload: Value) -> Self {
        Self {
            sequence,
            event_type,
            step_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

const DEFAULT_REPLAY_CAPACITY: usize = 256;
/// Per-subscriber channel depth. A subscriber slower than this blocks
/// `emit` — the producer applies back-pressure rather than dropping
/// events (§4.10).
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 32;

/// Monotonic sequence counter, a bounded replay buffer for subscribers
/// that join mid-plan, and the live fan-out to every subscriber's
/// channel. One instance is owned per process tree execution.
pub struct ProgressSink {
    next_sequence: AtomicU64,
    replay_buffer: Mutex<VecDeque<ProgressEvent>>,
    subscribers: Mutex<Vec<mpsc::Sender<ProgressEvent>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self {
            next_sequence: AtomicU64::new(0),
            replay_buffer: Mutex::new(VecDeque::with_capacity(DEFAULT_REPLAY_CAPACITY)),
            subscribers: Mutex::new(Vec::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    async fn emit(&self, event_type: ProgressEventType, step_id: Option<String>, payload: Value) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = ProgressEvent::new(sequence, event_type, step_id, payload);

        {
            let mut buffer = self.replay_buffer.lock().await;
            if buffer.len() == DEFAULT_REPLAY_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        // Awaits each subscriber's bounded channel in turn, so a slow
        // subscriber stalls subsequent emits rather than losing events.
        let mut subscribers = self.subscribers.lock().await;
        let mut still_open = Vec::with_capacity(subscribers.len());
        for sender in subscribers.drain(..) {
            if sender.send(event.clone()).await.is_ok() {
                still_open.push(sender);
            }
        }
        *subscribers = still_open;

        if event_type.is_terminal() {
            self.closed.store(true, Ordering::SeqCst);
            subscribers.clear();
        }
    }

    pub async fn plan_started(&self) {
        self.emit(ProgressEventType::PlanStarted, None, Value::Null).await;
    }

    pub async fn step_ready(&self, step_id: impl Into<String>) {
        self.emit(ProgressEventType::StepReady, Some(step_id.into()), Value::Null).await;
    }

    pub async fn step_started(&self, step_id: impl Into<String>) {
        self.emit(ProgressEventType::StepStarted, Some(step_id.into()), Value::Null).await;
    }

    pub async fn step_progress(&self, step_id: impl Into<String>, payload: Value) {
        self.emit(ProgressEventType::StepProgress, Some(step_id.into()), payload).await;
    }

    pub async fn step_completed(&self, step_id: impl Into<String>, payload: Value) {
        self.emit(ProgressEventType::StepCompleted, Some(step_id.into()), payload).await;
    }

    pub async fn step_failed(&self, step_id: impl Into<String>, reason: impl Into<String>) {
        self.emit(ProgressEventType::StepFailed, Some(step_id.into()), Value::String(reason.into()))
            .await;
    }

    pub async fn plan_completed(&self, payload: Value) {
        self.emit(ProgressEventType::PlanCompleted, None, payload).await;
    }

    pub async fn plan_failed(&self, reason: impl Into<String>) {
        self.emit(ProgressEventType::PlanFailed, None, Value::String(reason.into())).await;
    }

    pub async fn plan_cancelled(&self) {
        self.emit(ProgressEventType::PlanCancelled, None, Value::Null).await;
    }

    /// A new subscriber receives the replay buffer first, then live
    /// events, so a late joiner doesn't miss the plan's early history.
    pub async fn subscribe(self: &Arc<Self>) -> ProgressStream {
        let replayed: Vec<ProgressEvent> = self.replay_buffer.lock().await.iter().cloned().collect();
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        if !self.closed.load(Ordering::SeqCst) {
            self.subscribers.lock().await.push(sender);
        }
        ProgressStream {
            replayed: replayed.into(),
            receiver,
        }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's view of a plan's event stream: first the replayed
/// backlog, then live events as they're emitted.
pub struct ProgressStream {
    replayed: VecDeque<ProgressEvent>,
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Returns `None` once the sink has emitted its terminal event and
    /// all buffered events have been drained.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.replayed.pop_front() {
            return Some(event);
        }
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_are_gap_free_and_monotonic() {
        let sink = ProgressSink::new();
        sink.plan_started().await;
        sink.step_ready("s1").await;
        sink.step_started("s1").await;
        let buffer = sink.replay_buffer.lock().await;
        let sequences: Vec<u64> = buffer.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn subscriber_receives_replayed_then_live_events() {
        let sink = Arc::new(ProgressSink::new());
        sink.plan_started().await;
        let mut stream = sink.subscribe().await;
        sink.step_ready("s1").await;

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::PlanStarted);
        let second = stream.next().await.unwrap();
        assert_eq!(second.event_type, ProgressEventType::StepReady);
    }

    #[tokio::test]
    async fn stream_closes_after_terminal_event() {
        let sink = Arc::new(ProgressSink::new());
        let mut stream = sink.subscribe().await;
        sink.plan_started().await;
        sink.plan_completed(Value::Null).await;

        assert_eq!(stream.next().await.unwrap().event_type, ProgressEventType::PlanStarted);
        assert_eq!(stream.next().await.unwrap().event_type, ProgressEventType::PlanCompleted);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn replay_buffer_caps_at_capacity() {
        let sink = ProgressSink::new();
        for i in 0..(DEFAULT_REPLAY_CAPACITY + 10) {
            sink.step_progress(format!("s{i}"), Value::Null).await;
        }
        let buffer = sink.replay_buffer.lock().await;
        assert_eq!(buffer.len(), DEFAULT_REPLAY_CAPACITY);
    }
}
