//! Campaign progress tracking.
//!
//! Each campaign's counters, progress and status live behind one mutex so a
//! snapshot never observes a half-applied outcome. Status only moves forward
//! (`pending -> sending -> completed | failed | cancelled`) and a terminal
//! campaign ignores further updates.

use broadcast_core::config::PollingConfig;
use broadcast_core::event_bus::{make_event, noop_sink, CampaignEventKind, EventSink};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Sending,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn event_kind(self) -> CampaignEventKind {
        match self {
            Self::Pending => CampaignEventKind::Submitted,
            Self::Sending => CampaignEventKind::Sending,
            Self::Completed => CampaignEventKind::Completed,
            Self::Failed => CampaignEventKind::Failed,
            Self::Cancelled => CampaignEventKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Sent,
    Failed,
}

/// Final result for one recipient, all split messages included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecipientOutcome {
    pub address: String,
    pub status: RecipientStatus,
    pub messages_sent: u32,
    pub attempts: u32,
    pub error_code: Option<String>,
    pub error: Option<String>,
}

impl RecipientOutcome {
    pub fn sent(address: impl Into<String>, messages_sent: u32, attempts: u32) -> Self {
        Self {
            address: address.into(),
            status: RecipientStatus::Sent,
            messages_sent,
            attempts,
            error_code: None,
            error: None,
        }
    }

    pub fn failed(
        address: impl Into<String>,
        messages_sent: u32,
        attempts: u32,
        error_code: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            status: RecipientStatus::Failed,
            messages_sent,
            attempts,
            error_code,
            error: Some(error.into()),
        }
    }
}

/// Read-only view of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignSnapshot {
    pub campaign_id: Uuid,
    pub sender: String,
    pub status: CampaignStatus,
    /// 0-100
    pub progress: u8,
    pub total_recipients: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    /// Elapsed since creation; frozen once terminal.
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

struct CampaignState {
    sender: String,
    status: CampaignStatus,
    progress: u8,
    total: u64,
    sent: u64,
    failed: u64,
    created_at: DateTime<Utc>,
    started: Instant,
    finished_at: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    error: Option<String>,
    outcomes: Vec<RecipientOutcome>,
}

impl CampaignState {
    fn snapshot(&self, id: Uuid) -> CampaignSnapshot {
        let duration = self.duration.unwrap_or_else(|| self.started.elapsed());
        CampaignSnapshot {
            campaign_id: id,
            sender: self.sender.clone(),
            status: self.status,
            progress: self.progress,
            total_recipients: self.total,
            sent_count: self.sent,
            failed_count: self.failed,
            duration_ms: duration.as_millis() as u64,
            created_at: self.created_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }

    fn finish(&mut self, status: CampaignStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.duration = Some(self.started.elapsed());
    }
}

struct CampaignEntry {
    state: Mutex<CampaignState>,
    cancel_requested: AtomicBool,
}

pub struct DeliveryProgressTracker {
    campaigns: DashMap<Uuid, Arc<CampaignEntry>>,
    events: Arc<dyn EventSink>,
}

impl Default for DeliveryProgressTracker {
    fn default() -> Self {
        Self::new(noop_sink())
    }
}

impl DeliveryProgressTracker {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            campaigns: DashMap::new(),
            events,
        }
    }

    /// Register a new campaign in `pending`.
    pub fn create(&self, total_recipients: usize, sender: &str) -> Uuid {
        let id = Uuid::new_v4();
        let state = CampaignState {
            sender: sender.to_string(),
            status: CampaignStatus::Pending,
            progress: 0,
            total: total_recipients as u64,
            sent: 0,
            failed: 0,
            created_at: Utc::now(),
            started: Instant::now(),
            finished_at: None,
            duration: None,
            error: None,
            outcomes: Vec::with_capacity(total_recipients),
        };
        self.campaigns.insert(
            id,
            Arc::new(CampaignEntry {
                state: Mutex::new(state),
                cancel_requested: AtomicBool::new(false),
            }),
        );
        info!(campaign_id = %id, total_recipients, "Campaign created");
        self.emit(id, CampaignEventKind::Submitted, total_recipients as u64, 0, 0);
        id
    }

    /// `pending -> sending`. Returns false if the campaign is missing or
    /// already past pending.
    pub fn mark_sending(&self, id: Uuid) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let (total, sent, failed) = {
            let mut state = entry.state.lock();
            if state.status != CampaignStatus::Pending {
                return false;
            }
            state.status = CampaignStatus::Sending;
            (state.total, state.sent, state.failed)
        };
        debug!(campaign_id = %id, "Campaign sending");
        self.emit(id, CampaignEventKind::Sending, total, sent, failed);
        true
    }

    /// Count one recipient's final outcome. Completes the campaign when every
    /// recipient is accounted for. Ignored once the campaign is terminal.
    pub fn record_outcome(&self, id: Uuid, outcome: RecipientOutcome) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let terminal = {
            let mut state = entry.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            match outcome.status {
                RecipientStatus::Sent => state.sent += 1,
                RecipientStatus::Failed => state.failed += 1,
            }
            state.outcomes.push(outcome);

            let done = state.sent + state.failed;
            let progress = if state.total == 0 {
                100
            } else {
                ((done as f64 * 100.0) / state.total as f64).round().min(100.0) as u8
            };
            state.progress = state.progress.max(progress);

            if done >= state.total {
                let status = if state.failed == state.total {
                    CampaignStatus::Failed
                } else {
                    CampaignStatus::Completed
                };
                state.progress = 100;
                state.finish(status);
                Some((status, state.total, state.sent, state.failed))
            } else {
                None
            }
        };

        if let Some((status, total, sent, failed)) = terminal {
            info!(campaign_id = %id, status = ?status, sent, failed, "Campaign finished");
            self.emit(id, status.event_kind(), total, sent, failed);
        }
        true
    }

    /// The provider refused the whole batch; nothing was sent.
    pub fn mark_rejected(&self, id: Uuid, error: impl Into<String>) -> bool {
        let error = error.into();
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let total = {
            let mut state = entry.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.error = Some(error.clone());
            state.finish(CampaignStatus::Failed);
            state.total
        };
        info!(campaign_id = %id, error = %error, "Campaign rejected by provider");
        self.emit(id, CampaignEventKind::Failed, total, 0, 0);
        true
    }

    /// Ask the dispatcher to stop releasing recipients. Returns false for
    /// unknown or already terminal campaigns.
    pub fn request_cancel(&self, id: Uuid) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        if entry.state.lock().status.is_terminal() {
            return false;
        }
        entry.cancel_requested.store(true, Ordering::SeqCst);
        info!(campaign_id = %id, "Campaign cancellation requested");
        true
    }

    pub fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.entry(id)
            .map(|e| e.cancel_requested.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Close a cancelled campaign after in-flight sends drained.
    pub fn finish_cancelled(&self, id: Uuid) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let counts = {
            let mut state = entry.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.finish(CampaignStatus::Cancelled);
            (state.total, state.sent, state.failed)
        };
        info!(campaign_id = %id, sent = counts.1, failed = counts.2, "Campaign cancelled");
        self.emit(id, CampaignEventKind::Cancelled, counts.0, counts.1, counts.2);
        true
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<CampaignSnapshot> {
        self.entry(id).map(|e| e.state.lock().snapshot(id))
    }

    pub fn recipients(&self, id: Uuid) -> Option<Vec<RecipientOutcome>> {
        self.entry(id).map(|e| e.state.lock().outcomes.clone())
    }

    pub fn list_campaigns(&self) -> Vec<CampaignSnapshot> {
        let mut all: Vec<CampaignSnapshot> = self
            .campaigns
            .iter()
            .map(|e| e.value().state.lock().snapshot(*e.key()))
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    fn entry(&self, id: Uuid) -> Option<Arc<CampaignEntry>> {
        self.campaigns.get(&id).map(|e| e.value().clone())
    }

    fn emit(&self, id: Uuid, kind: CampaignEventKind, total: u64, sent: u64, failed: u64) {
        self.events.emit(make_event(kind, id, total, sent, failed));
    }
}

// ─── Client polling ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Terminal(CampaignSnapshot),
    /// Ceiling reached first; the campaign keeps running server-side.
    TimedOut(Option<CampaignSnapshot>),
}

/// Fixed-interval status poller with an overall ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ProgressPoller {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for ProgressPoller {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

impl ProgressPoller {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            ceiling: Duration::from_secs(config.ceiling_secs),
        }
    }

    pub async fn poll<F, Fut>(&self, mut fetch: F) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<CampaignSnapshot>>,
    {
        let deadline = Instant::now() + self.ceiling;
        let mut last = None;
        loop {
            if let Some(snapshot) = fetch().await {
                if snapshot.status.is_terminal() {
                    return PollOutcome::Terminal(snapshot);
                }
                last = Some(snapshot);
            }
            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::TimedOut(last);
            }
            tokio::time::sleep_until((now + self.interval).min(deadline)).await;
        }
    }

    pub async fn watch(&self, tracker: &DeliveryProgressTracker, id: Uuid) -> PollOutcome {
        self.poll(|| std::future::ready(tracker.get_campaign(id))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcast_core::event_bus::capture_sink;

    fn tracker() -> (DeliveryProgressTracker, Arc<broadcast_core::event_bus::CaptureSink>) {
        let sink = capture_sink();
        (DeliveryProgressTracker::new(sink.clone()), sink)
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let (tracker, sink) = tracker();
        let id = tracker.create(3, "ACME");
        let snap = tracker.get_campaign(id).unwrap();
        assert_eq!(snap.status, CampaignStatus::Pending);
        assert_eq!(snap.progress, 0);

        assert!(tracker.mark_sending(id));
        assert!(!tracker.mark_sending(id));

        tracker.record_outcome(id, RecipientOutcome::sent("+1", 1, 1));
        assert_eq!(tracker.get_campaign(id).unwrap().progress, 33);
        tracker.record_outcome(id, RecipientOutcome::failed("+2", 0, 1, None, "invalid"));
        assert_eq!(tracker.get_campaign(id).unwrap().progress, 67);
        tracker.record_outcome(id, RecipientOutcome::sent("+3", 1, 2));

        let snap = tracker.get_campaign(id).unwrap();
        assert_eq!(snap.status, CampaignStatus::Completed);
        assert_eq!((snap.sent_count, snap.failed_count, snap.progress), (2, 1, 100));
        assert!(snap.finished_at.is_some());
        assert_eq!(tracker.recipients(id).unwrap().len(), 3);
        assert_eq!(
            sink.kinds(),
            vec![
                CampaignEventKind::Submitted,
                CampaignEventKind::Sending,
                CampaignEventKind::Completed
            ]
        );
    }

    #[test]
    fn test_all_failed_is_failed() {
        let (tracker, sink) = tracker();
        let id = tracker.create(2, "ACME");
        tracker.mark_sending(id);
        tracker.record_outcome(id, RecipientOutcome::failed("+1", 0, 3, None, "timeout"));
        tracker.record_outcome(id, RecipientOutcome::failed("+2", 0, 3, None, "timeout"));
        assert_eq!(tracker.get_campaign(id).unwrap().status, CampaignStatus::Failed);
        assert_eq!(sink.count_kind(CampaignEventKind::Failed), 1);
    }

    #[test]
    fn test_terminal_freezes_counters() {
        let (tracker, _) = tracker();
        let id = tracker.create(1, "ACME");
        tracker.record_outcome(id, RecipientOutcome::sent("+1", 1, 1));
        let before = tracker.get_campaign(id).unwrap();
        assert!(!tracker.record_outcome(id, RecipientOutcome::failed("+2", 0, 1, None, "late")));
        assert!(!tracker.mark_rejected(id, "late"));
        assert!(!tracker.finish_cancelled(id));
        let after = tracker.get_campaign(id).unwrap();
        assert_eq!(after.status, CampaignStatus::Completed);
        assert_eq!(after.failed_count, before.failed_count);
        assert_eq!(after.duration_ms, before.duration_ms);
    }

    #[test]
    fn test_rejection_records_error() {
        let (tracker, _) = tracker();
        let id = tracker.create(10, "ACME");
        assert!(tracker.mark_rejected(id, "suspended sender"));
        let snap = tracker.get_campaign(id).unwrap();
        assert_eq!(snap.status, CampaignStatus::Failed);
        assert_eq!((snap.sent_count, snap.failed_count), (0, 0));
        assert_eq!(snap.error.as_deref(), Some("suspended sender"));
    }

    #[test]
    fn test_cancel_flag() {
        let (tracker, sink) = tracker();
        let id = tracker.create(5, "ACME");
        assert!(!tracker.is_cancel_requested(id));
        assert!(tracker.request_cancel(id));
        assert!(tracker.is_cancel_requested(id));
        assert!(tracker.finish_cancelled(id));
        assert!(!tracker.request_cancel(id));
        assert_eq!(tracker.get_campaign(id).unwrap().status, CampaignStatus::Cancelled);
        assert_eq!(sink.count_kind(CampaignEventKind::Cancelled), 1);
        assert!(!tracker.request_cancel(Uuid::new_v4()));
    }

    #[test]
    fn test_progress_never_decreases() {
        let (tracker, _) = tracker();
        let id = tracker.create(7, "ACME");
        let mut last = 0;
        for i in 0..7 {
            tracker.record_outcome(id, RecipientOutcome::sent(format!("+{i}"), 1, 1));
            let p = tracker.get_campaign(id).unwrap().progress;
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outcomes_give_consistent_snapshots() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 250;
        let total = WRITERS * PER_WRITER;

        let tracker = Arc::new(DeliveryProgressTracker::default());
        let id = tracker.create(total, "ACME");
        tracker.mark_sending(id);

        let reader = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut last_progress = 0u8;
                let mut observed = 0usize;
                loop {
                    let snap = tracker.get_campaign(id).unwrap();
                    let done = snap.sent_count + snap.failed_count;
                    let expected = ((done as f64 * 100.0) / snap.total_recipients as f64).round() as u8;
                    assert_eq!(snap.progress, expected, "torn snapshot: {snap:?}");
                    assert!(snap.progress >= last_progress, "progress went backwards");
                    last_progress = snap.progress;
                    observed += 1;
                    if snap.status.is_terminal() {
                        return (snap, observed);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    for i in 0..PER_WRITER {
                        let address = format!("+1555{w:02}{i:04}");
                        let outcome = if i % 10 == 0 {
                            RecipientOutcome::failed(address, 0, 1, None, "invalid")
                        } else {
                            RecipientOutcome::sent(address, 1, 1)
                        };
                        assert!(tracker.record_outcome(id, outcome));
                        if i % 16 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let (last, observed) = reader.await.unwrap();
        assert!(observed >= 1);
        assert_eq!(last.status, CampaignStatus::Completed);
        assert_eq!(last.sent_count + last.failed_count, total as u64);
        assert_eq!(last.failed_count, (WRITERS * PER_WRITER / 10) as u64);
        assert_eq!(last.progress, 100);
        assert_eq!(tracker.recipients(id).unwrap().len(), total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_frozen_at_terminal() {
        let (tracker, _) = tracker();
        let id = tracker.create(1, "ACME");
        tokio::time::sleep(Duration::from_secs(3)).await;
        tracker.record_outcome(id, RecipientOutcome::sent("+1", 1, 1));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.get_campaign(id).unwrap().duration_ms, 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_stops_at_terminal() {
        let tracker = Arc::new(DeliveryProgressTracker::default());
        let id = tracker.create(1, "ACME");
        {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                tracker.record_outcome(id, RecipientOutcome::sent("+1", 1, 1));
            });
        }
        let started = Instant::now();
        let outcome = ProgressPoller::default().watch(&tracker, id).await;
        assert!(matches!(outcome, PollOutcome::Terminal(ref s) if s.status == CampaignStatus::Completed));
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ceiling() {
        let tracker = DeliveryProgressTracker::default();
        let id = tracker.create(1, "ACME");
        let started = Instant::now();
        let outcome = ProgressPoller::default().watch(&tracker, id).await;
        match outcome {
            PollOutcome::TimedOut(Some(snap)) => assert_eq!(snap.status, CampaignStatus::Pending),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(300));
    }
}
