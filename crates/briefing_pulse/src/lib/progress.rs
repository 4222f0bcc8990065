//! One-way progress reporting for a pipeline run.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

/// Numbered steps of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Collect = 1,
    PersistItems = 2,
    Score = 3,
    Write = 4,
    CreateEpisode = 5,
    RenderPublish = 6,
    AttachItems = 7,
    Notify = 8,
}

impl PipelineStep {
    pub fn number(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub step: u8,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(step: PipelineStep, status: StepStatus, message: impl Into<String>) -> Self {
        ProgressEvent {
            step: step.number(),
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Receives progress events in execution order. Must not block or panic;
/// a sink that cannot deliver drops the event.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        // receiver gone
        let _ = self.send(event);
    }
}

impl ProgressSink for broadcast::Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        // no subscribers
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.report(ProgressEvent::new(
            PipelineStep::Collect,
            StepStatus::Running,
            "Collecting",
        ));
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent::new(PipelineStep::Score, StepStatus::Completed, "Scored")
            .with_detail(serde_json::json!({ "selected": 8 }));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], 3);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["detail"]["selected"], 8);
    }
}
