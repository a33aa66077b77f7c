//! Broadcast dispatcher.
//!
//! `submit` validates synchronously, creates the campaign and returns; the
//! send loop runs on a spawned task. Recipients are released in throttle
//! batches and every provider call takes a permit from one shared semaphore,
//! so the provider never sees more than `worker_pool_size` calls in flight.

use broadcast_core::config::{AppConfig, DispatchConfig, TrackingConfig};
use broadcast_core::BroadcastResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::progress::{CampaignStatus, DeliveryProgressTracker, RecipientOutcome};
use crate::provider::{DeliveryProvider, DeliveryStatus, ProviderError, SendReceipt};
use crate::request::{BroadcastRequest, ThrottleSpec, ValidatedBroadcast};
use crate::retry::RetryPolicy;
use crate::sms::SmsGateway;
use crate::tracking::{LinkShortener, TrackedLink};

/// Returned as soon as the campaign exists; delivery continues in the background.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitReceipt {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub total_recipients: usize,
    /// SMS segments of the primary message after link rewriting.
    pub segments_per_message: u32,
    pub tracked_links: Vec<TrackedLink>,
}

/// Upper bound for any computed send deadline.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug)]
struct OutboundMessage {
    body: String,
    delay: Duration,
    wait_for_delivery: bool,
}

#[derive(Debug)]
struct CampaignPlan {
    sender: String,
    recipients: Vec<String>,
    messages: Vec<OutboundMessage>,
    throttle: Option<ThrottleSpec>,
    scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct BroadcastDispatcher {
    provider: Arc<dyn DeliveryProvider>,
    tracker: Arc<DeliveryProgressTracker>,
    shortener: Arc<LinkShortener>,
    retry: RetryPolicy,
    pool: Arc<Semaphore>,
    confirmation_timeout: Duration,
}

impl BroadcastDispatcher {
    pub fn new(
        provider: Arc<dyn DeliveryProvider>,
        tracker: Arc<DeliveryProgressTracker>,
        config: &AppConfig,
    ) -> Self {
        Self::from_parts(provider, tracker, &config.dispatch, &config.tracking)
    }

    pub fn from_parts(
        provider: Arc<dyn DeliveryProvider>,
        tracker: Arc<DeliveryProgressTracker>,
        dispatch: &DispatchConfig,
        tracking: &TrackingConfig,
    ) -> Self {
        info!(
            provider = provider.name(),
            worker_pool_size = dispatch.worker_pool_size,
            max_attempts = dispatch.max_attempts,
            "Broadcast dispatcher initialized"
        );
        Self {
            provider,
            tracker,
            shortener: Arc::new(LinkShortener::new(tracking.domain.clone(), tracking.code_length)),
            retry: RetryPolicy::from_config(dispatch),
            pool: Arc::new(Semaphore::new(dispatch.worker_pool_size.max(1))),
            confirmation_timeout: Duration::from_millis(dispatch.confirmation_timeout_ms),
        }
    }

    /// Swap the link shortener, e.g. for one backed by a persistent code store.
    pub fn with_shortener(mut self, shortener: LinkShortener) -> Self {
        self.shortener = Arc::new(shortener);
        self
    }

    pub fn tracker(&self) -> &Arc<DeliveryProgressTracker> {
        &self.tracker
    }

    /// Validate, create the campaign and start delivery. Must be called from
    /// within a tokio runtime. No campaign exists if validation fails.
    pub fn submit(&self, request: BroadcastRequest) -> BroadcastResult<SubmitReceipt> {
        let validated = request.validate().inspect_err(|e| {
            metrics::counter!("dispatch.rejected_requests").increment(1);
            debug!(error = %e, "Broadcast request rejected");
        })?;

        let (plan, tracked_links) = self.plan(validated);
        let segments_per_message = plan
            .messages
            .first()
            .map(|m| SmsGateway::calculate_segments(&m.body))
            .unwrap_or(1);
        let total_recipients = plan.recipients.len();
        let campaign_id = self.tracker.create(total_recipients, &plan.sender);

        info!(
            campaign_id = %campaign_id,
            total_recipients,
            messages_per_recipient = plan.messages.len(),
            tracked_links = tracked_links.len(),
            throttled = plan.throttle.is_some(),
            "Broadcast submitted"
        );

        let this = self.clone();
        tokio::spawn(async move { this.run_campaign(campaign_id, plan).await });

        Ok(SubmitReceipt {
            campaign_id,
            status: CampaignStatus::Pending,
            total_recipients,
            segments_per_message,
            tracked_links,
        })
    }

    /// Request cancellation; recipients not yet released are skipped.
    pub fn cancel(&self, campaign_id: Uuid) -> bool {
        self.tracker.request_cancel(campaign_id)
    }

    fn plan(&self, request: ValidatedBroadcast) -> (CampaignPlan, Vec<TrackedLink>) {
        let mut links = Vec::new();
        let mut rewrite = |text: String| {
            if request.track_links {
                self.shortener.rewrite(&text, &mut links)
            } else {
                text
            }
        };

        let mut messages = Vec::with_capacity(1 + request.split_messages.len());
        messages.push(OutboundMessage {
            body: rewrite(request.message),
            delay: Duration::ZERO,
            wait_for_delivery: false,
        });
        for split in request.split_messages {
            messages.push(OutboundMessage {
                body: rewrite(split.content),
                delay: Duration::from_secs(split.delay_seconds),
                wait_for_delivery: split.wait_for_delivery,
            });
        }

        let plan = CampaignPlan {
            sender: request.sender,
            recipients: request.recipients,
            messages,
            throttle: request.throttle,
            scheduled_at: request.scheduled_at,
        };
        (plan, links)
    }

    async fn run_campaign(self, campaign_id: Uuid, plan: CampaignPlan) {
        if let Some(at) = plan.scheduled_at {
            if let Ok(wait) = (at - Utc::now()).to_std() {
                info!(campaign_id = %campaign_id, scheduled_at = %at, "Campaign scheduled, waiting");
                sleep(wait).await;
            }
        }

        if self.tracker.is_cancel_requested(campaign_id) {
            self.tracker.finish_cancelled(campaign_id);
            return;
        }

        if let Err(err) = self
            .provider
            .begin_batch(&plan.sender, plan.recipients.len())
            .await
        {
            warn!(campaign_id = %campaign_id, error = %err, "Provider rejected campaign submission");
            metrics::counter!("dispatch.campaigns_rejected").increment(1);
            self.tracker.mark_rejected(campaign_id, err.to_string());
            return;
        }
        self.tracker.mark_sending(campaign_id);

        let plan = Arc::new(plan);
        let batches = partition(&plan.recipients, plan.throttle);
        let interval = plan
            .throttle
            .map(|t| Duration::from_secs(t.interval_seconds))
            .unwrap_or(Duration::ZERO);
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                sleep_until(batch_release_at(started, interval, index)).await;
            }
            if self.tracker.is_cancel_requested(campaign_id) {
                cancelled = true;
                break;
            }
            debug!(campaign_id = %campaign_id, batch = index, size = batch.len(), "Releasing batch");
            for address in batch {
                let this = self.clone();
                let plan = plan.clone();
                let address = address.clone();
                tasks.spawn(async move {
                    let mut guard = OutcomeGuard::new(this.tracker.clone(), campaign_id, address);
                    let outcome = this.deliver_to(&guard.address, &mut guard.tally, &plan).await;
                    guard.record(outcome);
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                // The task's guard has already recorded the failure.
                error!(campaign_id = %campaign_id, error = %err, "Recipient task aborted");
            }
        }

        if cancelled {
            self.tracker.finish_cancelled(campaign_id);
        }
        if let Some(snapshot) = self.tracker.get_campaign(campaign_id) {
            metrics::histogram!("dispatch.campaign_duration_ms").record(snapshot.duration_ms as f64);
        }
    }

    /// Send every message of the plan to one address, honoring split gating.
    async fn deliver_to(
        &self,
        address: &str,
        tally: &mut Tally,
        plan: &CampaignPlan,
    ) -> RecipientOutcome {
        let mut previous: Option<(SendReceipt, Instant)> = None;

        for (index, message) in plan.messages.iter().enumerate() {
            if let Some((receipt, accepted_at)) = previous.take() {
                if message.wait_for_delivery {
                    if let Err((code, reason)) = self.await_confirmation(&receipt).await {
                        metrics::counter!("dispatch.recipient_failures").increment(1);
                        debug!(to = %address, split = index, reason = %reason, "Split suppressed");
                        return RecipientOutcome::failed(
                            address,
                            tally.sent,
                            tally.attempts,
                            code,
                            reason,
                        );
                    }
                }
                sleep_until(deadline(accepted_at, message.delay)).await;
            }

            match self.send_with_retry(address, &message.body, &plan.sender).await {
                Ok((receipt, tries)) => {
                    tally.attempts += tries;
                    tally.sent += 1;
                    previous = Some((receipt, Instant::now()));
                }
                Err((err, tries)) => {
                    tally.attempts += tries;
                    metrics::counter!("dispatch.recipient_failures").increment(1);
                    debug!(to = %address, attempts = tally.attempts, error = %err, "Recipient failed");
                    return RecipientOutcome::failed(
                        address,
                        tally.sent,
                        tally.attempts,
                        err.code().map(str::to_string),
                        err.to_string(),
                    );
                }
            }
        }

        RecipientOutcome::sent(address, tally.sent, tally.attempts)
    }

    async fn await_confirmation(&self, receipt: &SendReceipt) -> Result<(), (Option<String>, String)> {
        match timeout(self.confirmation_timeout, self.provider.wait_for_delivery(receipt)).await {
            Ok(Ok(DeliveryStatus::Delivered)) => Ok(()),
            Ok(Ok(DeliveryStatus::Failed { error_code })) => Err((
                error_code,
                format!("message {} was not delivered", receipt.provider_message_id),
            )),
            Ok(Err(err)) => Err((err.code().map(str::to_string), err.to_string())),
            Err(_) => Err((None, "delivery confirmation timed out".to_string())),
        }
    }

    /// Retries transient failures and timeouts with backoff. Returns the
    /// number of attempts made alongside the result.
    async fn send_with_retry(
        &self,
        to: &str,
        body: &str,
        sender: &str,
    ) -> Result<(SendReceipt, u32), (ProviderError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let _permit = self.pool.acquire().await.map_err(|_| {
                    (ProviderError::transient("pool_closed", "worker pool closed"), attempt)
                })?;
                timeout(self.retry.attempt_timeout, self.provider.send(to, body, sender)).await
            };

            let err = match result {
                Ok(Ok(receipt)) => {
                    metrics::counter!("dispatch.messages_sent").increment(1);
                    return Ok((receipt, attempt));
                }
                Ok(Err(ProviderError::Rejected(reason))) => {
                    ProviderError::permanent("rejected", reason)
                }
                Ok(Err(err)) => err,
                Err(_) => ProviderError::transient(
                    "timeout",
                    format!("no response within {}ms", self.retry.attempt_timeout.as_millis()),
                ),
            };

            if !err.is_retryable() || !self.retry.has_attempts_left(attempt) {
                return Err((err, attempt));
            }

            let backoff = self.retry.backoff_for_attempt(attempt - 1);
            metrics::counter!("dispatch.retries").increment(1);
            debug!(to = %to, attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "Retrying send");
            sleep(backoff).await;
        }
    }
}

/// Messages accepted and provider calls made for one recipient so far.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    sent: u32,
    attempts: u32,
}

/// Records exactly one outcome per recipient. If the delivery future panics
/// or is dropped first, the recipient is recorded as failed with what was
/// sent up to that point.
struct OutcomeGuard {
    tracker: Arc<DeliveryProgressTracker>,
    campaign_id: Uuid,
    address: String,
    tally: Tally,
    recorded: bool,
}

impl OutcomeGuard {
    fn new(tracker: Arc<DeliveryProgressTracker>, campaign_id: Uuid, address: String) -> Self {
        Self {
            tracker,
            campaign_id,
            address,
            tally: Tally::default(),
            recorded: false,
        }
    }

    fn record(mut self, outcome: RecipientOutcome) {
        self.recorded = true;
        self.tracker.record_outcome(self.campaign_id, outcome);
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        metrics::counter!("dispatch.recipient_failures").increment(1);
        self.tracker.record_outcome(
            self.campaign_id,
            RecipientOutcome::failed(
                self.address.clone(),
                self.tally.sent,
                self.tally.attempts,
                None,
                "recipient task aborted",
            ),
        );
    }
}

/// `base + offset`, clamped instead of overflowing.
fn deadline(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset.min(FAR_FUTURE))
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// Release instant of throttle batch `index`.
fn batch_release_at(started: Instant, interval: Duration, index: usize) -> Instant {
    let offset = u32::try_from(index)
        .ok()
        .and_then(|i| interval.checked_mul(i))
        .unwrap_or(FAR_FUTURE);
    deadline(started, offset)
}

/// Split recipients into at most `batches` chunks of near-equal size.
fn partition(recipients: &[String], throttle: Option<ThrottleSpec>) -> Vec<&[String]> {
    match throttle {
        Some(spec) if spec.batches > 1 && !recipients.is_empty() => {
            let size = recipients.len().div_ceil(spec.batches as usize);
            recipients.chunks(size).collect()
        }
        _ => vec![recipients],
    }
}
