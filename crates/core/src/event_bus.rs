//! Campaign lifecycle event bus.
//!
//! The progress tracker accepts an `Arc<dyn EventSink>` and emits one event per
//! state transition. Downstream collaborators (webhooks, list membership, log
//! viewers) subscribe by providing their own sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignEventKind {
    Submitted,
    Sending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub event_id: Uuid,
    pub campaign_id: Uuid,
    pub kind: CampaignEventKind,
    pub total_recipients: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub timestamp: DateTime<Utc>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: CampaignEvent);
}

/// No-op sink for tests and deployments without subscribers.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: CampaignEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<CampaignEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CampaignEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<CampaignEventKind> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .map(|e| e.kind)
            .collect()
    }

    pub fn count_kind(&self, kind: CampaignEventKind) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: CampaignEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Writes every lifecycle event to the structured log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CampaignEvent) {
        tracing::info!(
            campaign_id = %event.campaign_id,
            kind = ?event.kind,
            total = event.total_recipients,
            sent = event.sent_count,
            failed = event.failed_count,
            "Campaign event"
        );
    }
}

pub fn make_event(
    kind: CampaignEventKind,
    campaign_id: Uuid,
    total_recipients: u64,
    sent_count: u64,
    failed_count: u64,
) -> CampaignEvent {
    CampaignEvent {
        event_id: Uuid::new_v4(),
        campaign_id,
        kind,
        total_recipients,
        sent_count,
        failed_count,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
