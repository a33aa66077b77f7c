//! In-memory SMS gateway: a self-contained [`DeliveryProvider`] with message
//! store, status callbacks, and segment calculation. Used when no external
//! provider is wired in, and by tests that need realistic callbacks.

use async_trait::async_trait;
use broadcast_core::{BroadcastError, BroadcastResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::watch;
use uuid::Uuid;

use crate::provider::{DeliveryProvider, DeliveryStatus, ProviderError, SendReceipt};

/// Error code reported for malformed destination numbers.
pub const INVALID_NUMBER_CODE: &str = "21211";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Credential presented on batch submission; empty means unauthenticated.
    pub api_key: String,
    /// Mark messages delivered as soon as they are accepted.
    pub auto_deliver: bool,
    /// Messages kept for lookups; the oldest are evicted past this.
    pub max_messages: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: "local".to_string(),
            auto_deliver: true,
            max_messages: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Undelivered,
}

impl SmsStatus {
    fn is_final(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Undelivered)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "undelivered" => Some(Self::Undelivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: Uuid,
    pub to: String,
    pub from: String,
    pub body: String,
    pub status: SmsStatus,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub segments: u32,
    pub error_code: Option<String>,
}

pub struct SmsGateway {
    config: GatewayConfig,
    messages: DashMap<Uuid, SmsMessage>,
    /// provider_id -> message id, for callback lookups.
    provider_index: DashMap<String, Uuid>,
    /// provider_id -> status channel, only while the status is not final.
    status_watch: DashMap<String, watch::Sender<SmsStatus>>,
    /// Message ids oldest first, for eviction.
    order: Mutex<VecDeque<Uuid>>,
}

impl SmsGateway {
    pub fn new(config: GatewayConfig) -> Self {
        tracing::info!(auto_deliver = config.auto_deliver, "SMS gateway initialized");
        Self {
            config,
            messages: DashMap::new(),
            provider_index: DashMap::new(),
            status_watch: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    pub fn get_message(&self, id: Uuid) -> Option<SmsMessage> {
        self.messages.get(&id).map(|m| m.clone())
    }

    pub fn find_by_provider_id(&self, provider_id: &str) -> Option<SmsMessage> {
        let id = *self.provider_index.get(provider_id)?.value();
        self.get_message(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Apply a provider status callback and wake delivery waiters. Once the
    /// status is final the message's watch channel is released.
    pub fn handle_status_callback(
        &self,
        provider_id: &str,
        status: &str,
        error_code: Option<&str>,
    ) -> BroadcastResult<SmsStatus> {
        let new_status = SmsStatus::parse(status).ok_or_else(|| {
            tracing::warn!(status = %status, "Unknown SMS status in callback");
            BroadcastError::validation(format!("unknown SMS status '{status}'"))
        })?;

        let message_id = self
            .provider_index
            .get(provider_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| {
                tracing::warn!(provider_id = %provider_id, "Status callback for unknown provider_id");
                BroadcastError::MessageNotFound(provider_id.to_string())
            })?;

        match self.messages.get_mut(&message_id) {
            Some(mut msg) => {
                msg.status = new_status.clone();
                msg.updated_at = Utc::now();
                msg.error_code = error_code.map(str::to_string);
            }
            None => return Err(BroadcastError::MessageNotFound(provider_id.to_string())),
        }

        if new_status.is_final() {
            // Receivers still see the final value after the sender is gone.
            if let Some((_, tx)) = self.status_watch.remove(provider_id) {
                tx.send_replace(new_status.clone());
            }
        } else if let Some(tx) = self.status_watch.get(provider_id) {
            tx.send_replace(new_status.clone());
        }

        tracing::debug!(provider_id = %provider_id, status = %status, "SMS status callback processed");
        metrics::counter!("sms.status_callbacks", "status" => status.to_string()).increment(1);
        Ok(new_status)
    }

    fn store(&self, msg: SmsMessage) {
        let id = msg.id;
        let provider_id = msg.provider_id.clone();
        if !msg.status.is_final() {
            let (tx, _rx) = watch::channel(msg.status.clone());
            self.status_watch.insert(provider_id.clone(), tx);
        }
        self.messages.insert(id, msg);
        self.provider_index.insert(provider_id, id);

        let evicted: Vec<Uuid> = {
            let mut order = self.order.lock();
            order.push_back(id);
            let excess = order.len().saturating_sub(self.config.max_messages.max(1));
            order.drain(..excess).collect()
        };
        for old in evicted {
            if let Some((_, msg)) = self.messages.remove(&old) {
                self.provider_index.remove(&msg.provider_id);
                self.status_watch.remove(&msg.provider_id);
            }
        }
    }

    /// Number of SMS segments for a body.
    /// GSM 7-bit: 160 chars single, 153 per part. UCS-2: 70 single, 67 per part.
    pub fn calculate_segments(body: &str) -> u32 {
        if body.is_empty() {
            return 1;
        }

        let is_gsm = body.chars().all(is_gsm_7bit);
        let char_count = body.chars().count() as u32;

        if is_gsm {
            if char_count <= 160 {
                1
            } else {
                char_count.div_ceil(153)
            }
        } else if char_count <= 70 {
            1
        } else {
            char_count.div_ceil(67)
        }
    }

    pub fn list_messages(&self, limit: usize) -> Vec<SmsMessage> {
        let mut messages: Vec<SmsMessage> = self
            .messages
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        messages
    }
}

#[async_trait]
impl DeliveryProvider for SmsGateway {
    fn name(&self) -> &str {
        "sms-gateway"
    }

    async fn begin_batch(&self, sender_id: &str, recipients: usize) -> Result<(), ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::Rejected("missing gateway credentials".into()));
        }
        tracing::debug!(sender = %sender_id, recipients, "SMS batch opened");
        Ok(())
    }

    async fn send(&self, to: &str, body: &str, sender_id: &str) -> Result<SendReceipt, ProviderError> {
        if !is_valid_number(to) {
            return Err(ProviderError::permanent(
                INVALID_NUMBER_CODE,
                format!("invalid 'To' phone number: {to}"),
            ));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let provider_id = format!("SM{}", Uuid::new_v4().simple());
        let status = if self.config.auto_deliver {
            SmsStatus::Delivered
        } else {
            SmsStatus::Queued
        };

        let msg = SmsMessage {
            id,
            to: to.to_string(),
            from: sender_id.to_string(),
            body: body.to_string(),
            status,
            provider_id: provider_id.clone(),
            created_at: now,
            updated_at: now,
            segments: Self::calculate_segments(body),
            error_code: None,
        };

        tracing::debug!(id = %id, to = %to, provider_id = %provider_id, segments = msg.segments, "SMS message accepted");
        metrics::counter!("sms.messages_sent").increment(1);

        self.store(msg);

        Ok(SendReceipt {
            provider_message_id: provider_id,
            to: to.to_string(),
            accepted_at: now,
        })
    }

    async fn wait_for_delivery(&self, receipt: &SendReceipt) -> Result<DeliveryStatus, ProviderError> {
        let provider_id = &receipt.provider_message_id;
        let pending = self.status_watch.get(provider_id).map(|tx| tx.subscribe());

        let status = match pending {
            Some(mut rx) => rx
                .wait_for(SmsStatus::is_final)
                .await
                .map(|s| s.clone())
                .map_err(|_| ProviderError::transient("watch_closed", "status channel closed"))?,
            // No channel: either already final or no longer stored.
            None => self
                .find_by_provider_id(provider_id)
                .map(|m| m.status)
                .filter(SmsStatus::is_final)
                .ok_or_else(|| ProviderError::permanent("unknown_message", provider_id.clone()))?,
        };

        Ok(match status {
            SmsStatus::Delivered => DeliveryStatus::Delivered,
            _ => DeliveryStatus::Failed {
                error_code: self.find_by_provider_id(provider_id).and_then(|m| m.error_code),
            },
        })
    }
}

/// E.164-ish: optional leading `+`, then 7 to 15 digits.
fn is_valid_number(to: &str) -> bool {
    let digits = to.strip_prefix('+').unwrap_or(to);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Check whether a character is in the GSM 7-bit default alphabet.
fn is_gsm_7bit(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '0'..='9'
        | ' ' | '!' | '"' | '#' | '$' | '%' | '&' | '\'' | '(' | ')'
        | '*' | '+' | ',' | '-' | '.' | '/' | ':' | ';' | '<' | '='
        | '>' | '?' | '@' | '_' | '\n' | '\r'
        | '\u{00A3}' | '\u{00A5}' | '\u{00E8}' | '\u{00E9}' | '\u{00F9}' | '\u{00EC}'
        | '\u{00F2}' | '\u{00C7}' | '\u{00D8}' | '\u{00F8}' | '\u{00C5}' | '\u{00E5}'
        | '\u{0394}' | '\u{03A6}' | '\u{0393}' | '\u{039B}' | '\u{03A9}' | '\u{03A0}'
        | '\u{03A8}' | '\u{03A3}' | '\u{0398}' | '\u{039E}' | '\u{00C6}' | '\u{00E6}'
        | '\u{00DF}' | '\u{00C9}' | '\u{00A4}' | '\u{00A1}' | '\u{00BF}' | '\u{00C4}'
        | '\u{00D6}' | '\u{00D1}' | '\u{00DC}' | '\u{00A7}' | '\u{00E4}' | '\u{00F6}'
        | '\u{00F1}' | '\u{00FC}' | '\u{00E0}'
        // Extension table, still GSM
        | '{' | '}' | '[' | ']' | '~' | '\\' | '^' | '|' | '\u{20AC}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_gateway() -> SmsGateway {
        SmsGateway::new(GatewayConfig {
            api_key: "test".into(),
            auto_deliver: false,
            ..GatewayConfig::default()
        })
    }

    #[tokio::test]
    async fn test_send_and_lookup() {
        let gateway = SmsGateway::new(GatewayConfig::default());
        let receipt = gateway.send("+15559876543", "Hello, World!", "ACME").await.unwrap();
        let msg = gateway.find_by_provider_id(&receipt.provider_message_id).unwrap();
        assert_eq!(msg.to, "+15559876543");
        assert_eq!(msg.from, "ACME");
        assert_eq!(msg.status, SmsStatus::Delivered);
        assert_eq!(msg.segments, 1);
        assert_eq!(gateway.list_messages(10).len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_number_is_permanent() {
        let gateway = manual_gateway();
        let err = gateway.send("not-a-number", "hi", "ACME").await.unwrap_err();
        assert_eq!(err.code(), Some(INVALID_NUMBER_CODE));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_begin_batch_requires_credentials() {
        let gateway = SmsGateway::new(GatewayConfig {
            api_key: " ".into(),
            ..GatewayConfig::default()
        });
        assert!(matches!(
            gateway.begin_batch("ACME", 10).await,
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_delivery_resolves_on_callback() {
        let gateway = std::sync::Arc::new(manual_gateway());
        let receipt = gateway.send("+15551112222", "Ping", "ACME").await.unwrap();

        let waiter = {
            let gateway = gateway.clone();
            let receipt = receipt.clone();
            tokio::spawn(async move { gateway.wait_for_delivery(&receipt).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(
            gateway.handle_status_callback(&receipt.provider_message_id, "sent", None).unwrap(),
            SmsStatus::Sent
        );
        assert_eq!(gateway.status_watch.len(), 1);
        gateway
            .handle_status_callback(&receipt.provider_message_id, "delivered", None)
            .unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), DeliveryStatus::Delivered);
        assert!(gateway.status_watch.is_empty());

        // Late waiters resolve from the stored status.
        assert_eq!(
            gateway.wait_for_delivery(&receipt).await.unwrap(),
            DeliveryStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_wait_for_delivery_reports_failure_code() {
        let gateway = manual_gateway();
        let receipt = gateway.send("+15551112222", "Ping", "ACME").await.unwrap();
        gateway
            .handle_status_callback(&receipt.provider_message_id, "undelivered", Some("30006"))
            .unwrap();
        assert_eq!(
            gateway.wait_for_delivery(&receipt).await.unwrap(),
            DeliveryStatus::Failed {
                error_code: Some("30006".into())
            }
        );
    }

    #[tokio::test]
    async fn test_callback_errors() {
        let gateway = manual_gateway();
        assert!(matches!(
            gateway.handle_status_callback("SM_nonexistent", "delivered", None),
            Err(BroadcastError::MessageNotFound(_))
        ));

        let receipt = gateway.send("+15551112222", "Ping", "ACME").await.unwrap();
        assert!(matches!(
            gateway.handle_status_callback(&receipt.provider_message_id, "bounced", None),
            Err(BroadcastError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_delivered_messages_hold_no_watch() {
        let gateway = SmsGateway::new(GatewayConfig::default());
        let receipt = gateway.send("+15551112222", "Ping", "ACME").await.unwrap();
        assert!(gateway.status_watch.is_empty());
        assert_eq!(
            gateway.wait_for_delivery(&receipt).await.unwrap(),
            DeliveryStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_message_store_evicts_oldest() {
        let gateway = SmsGateway::new(GatewayConfig {
            auto_deliver: false,
            max_messages: 3,
            ..GatewayConfig::default()
        });
        let mut receipts = Vec::new();
        for i in 0..5 {
            let to = format!("+1555111000{i}");
            receipts.push(gateway.send(&to, "Ping", "ACME").await.unwrap());
        }

        assert_eq!(gateway.len(), 3);
        assert_eq!(gateway.provider_index.len(), 3);
        assert_eq!(gateway.status_watch.len(), 3);
        assert!(gateway.find_by_provider_id(&receipts[0].provider_message_id).is_none());
        assert!(gateway.find_by_provider_id(&receipts[4].provider_message_id).is_some());
        assert!(gateway.wait_for_delivery(&receipts[1]).await.is_err());
    }

    #[test]
    fn test_calculate_segments() {
        assert_eq!(SmsGateway::calculate_segments(""), 1);
        assert_eq!(SmsGateway::calculate_segments(&"A".repeat(160)), 1);
        assert_eq!(SmsGateway::calculate_segments(&"A".repeat(161)), 2);
        assert_eq!(SmsGateway::calculate_segments(&"B".repeat(306)), 2);
        assert_eq!(SmsGateway::calculate_segments(&"C".repeat(307)), 3);
        assert_eq!(SmsGateway::calculate_segments(&"\u{1F600}".repeat(10)), 1);
        let unicode_71 = format!("{}\u{1F600}", "A".repeat(70));
        assert_eq!(SmsGateway::calculate_segments(&unicode_71), 2);
    }
}
