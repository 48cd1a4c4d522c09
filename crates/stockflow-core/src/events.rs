// Progress bus envelopes and the client-side activity log contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Which per-merchant topic an event is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Stage,
    Completion,
    Error,
}

impl EventKind {
    pub fn topic(&self, merchant_id: Uuid) -> String {
        let suffix = match self {
            EventKind::Progress => "progress",
            EventKind::Stage => "stage",
            EventKind::Completion => "completion",
            EventKind::Error => "error",
        };
        format!("{merchant_id}:{suffix}")
    }
}

/// Event envelope published on the progress bus
///
/// Fire-and-forget: nothing downstream of a publish failure may break the
/// operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub po_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub stage: String,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(event_type: impl Into<String>, stage: impl Into<String>, progress: u8) -> Self {
        Self {
            event_type: event_type.into(),
            po_id: None,
            workflow_id: None,
            stage: stage.into(),
            progress: progress.min(100),
            message: String::new(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_po(mut self, po_id: Uuid) -> Self {
        self.po_id = Some(po_id);
        self
    }
}

/// Severity a client assigns to an event; the bus itself carries none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

/// Classify severity from message keywords, mirroring what the UI does
pub fn classify_severity(message: &str) -> Severity {
    let lower = message.to_lowercase();
    if lower.contains("complete") || lower.contains("success") {
        Severity::Success
    } else if lower.contains("failed") || lower.contains("error") {
        Severity::Error
    } else if lower.contains("retry") || lower.contains("warn") {
        Severity::Warning
    } else {
        Severity::Info
    }
}

const ACTIVITY_LOG_CAP: usize = 100;

/// Bounded ring of the most recent events for one purchase order
///
/// This is the aggregation contract the UI consumes; kept here so the
/// ordering and cap are pinned by tests rather than by the front-end.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: VecDeque<(Severity, ProgressEvent)>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ProgressEvent) {
        let severity = classify_severity(&event.message);
        if self.entries.len() == ACTIVITY_LOG_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back((severity, event));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Severity, ProgressEvent)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_scoped_per_merchant() {
        let merchant = Uuid::now_v7();
        assert_eq!(
            EventKind::Completion.topic(merchant),
            format!("{merchant}:completion")
        );
    }

    #[test]
    fn severity_keywords() {
        assert_eq!(classify_severity("Stage completed"), Severity::Success);
        assert_eq!(classify_severity("sync SUCCESS"), Severity::Success);
        assert_eq!(classify_severity("extraction failed"), Severity::Error);
        assert_eq!(classify_severity("retrying in 5s"), Severity::Warning);
        assert_eq!(classify_severity("parsing document"), Severity::Info);
    }

    #[test]
    fn activity_log_keeps_last_hundred() {
        let mut log = ActivityLog::new();
        for i in 0..150 {
            log.push(ProgressEvent::new("progress", "ai_parsing", 5).with_message(format!("event {i}")));
        }
        assert_eq!(log.len(), 100);
        let first = log.iter().next().unwrap();
        assert_eq!(first.1.message, "event 50");
    }

    #[test]
    fn envelope_serializes_with_type_field() {
        let event = ProgressEvent::new("stage_completed", "database_save", 20)
            .with_message("saved 3 line items");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stage_completed");
        assert!(value.get("po_id").is_none());
    }
}
