//! Broadcast send requests and their synchronous validation.

use broadcast_core::{BroadcastError, BroadcastResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

/// Longest accepted gap before a split message.
pub const MAX_SPLIT_DELAY_SECS: u64 = 7 * 24 * 60 * 60;
/// Longest accepted gap between throttle batches.
pub const MAX_THROTTLE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// A follow-up message sent to the same recipient after the one before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SplitMessage {
    pub content: String,
    #[serde(default)]
    pub delay_seconds: u64,
    #[serde(default)]
    pub wait_for_delivery: bool,
}

/// Release recipients in `batches` chunks, one chunk per `interval_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ThrottleSpec {
    pub batches: u32,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub recipients: Vec<String>,
    pub message: String,
    pub sender: String,
    #[serde(default)]
    pub track_links: bool,
    #[serde(default)]
    pub split_messages: Vec<SplitMessage>,
    #[serde(default)]
    pub throttle: Option<ThrottleSpec>,
    /// Hold the campaign in `pending` until this instant.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A request that passed validation, with recipients normalized and deduplicated.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBroadcast {
    pub recipients: Vec<String>,
    pub message: String,
    pub sender: String,
    pub track_links: bool,
    pub split_messages: Vec<SplitMessage>,
    pub throttle: Option<ThrottleSpec>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl BroadcastRequest {
    pub fn new(recipients: Vec<String>, message: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            recipients,
            message: message.into(),
            sender: sender.into(),
            ..Self::default()
        }
    }

    pub fn validate(self) -> BroadcastResult<ValidatedBroadcast> {
        if self.message.trim().is_empty() {
            return Err(BroadcastError::validation("message must not be empty"));
        }
        if self.sender.trim().is_empty() {
            return Err(BroadcastError::validation("sender must not be empty"));
        }
        if let Some(index) = self
            .split_messages
            .iter()
            .position(|s| s.content.trim().is_empty())
        {
            return Err(BroadcastError::validation(format!(
                "split message {} must not be empty",
                index + 1
            )));
        }
        if let Some(index) = self
            .split_messages
            .iter()
            .position(|s| s.delay_seconds > MAX_SPLIT_DELAY_SECS)
        {
            return Err(BroadcastError::validation(format!(
                "split message {} delay_seconds must be at most {MAX_SPLIT_DELAY_SECS}",
                index + 1
            )));
        }
        if let Some(throttle) = self.throttle {
            if throttle.batches == 0 {
                return Err(BroadcastError::validation("throttle.batches must be at least 1"));
            }
            if throttle.interval_seconds > MAX_THROTTLE_INTERVAL_SECS {
                return Err(BroadcastError::validation(format!(
                    "throttle.interval_seconds must be at most {MAX_THROTTLE_INTERVAL_SECS}"
                )));
            }
        }

        let recipients = dedupe_recipients(&self.recipients);
        if recipients.is_empty() {
            return Err(BroadcastError::validation("at least one recipient is required"));
        }

        Ok(ValidatedBroadcast {
            recipients,
            message: self.message,
            sender: self.sender.trim().to_string(),
            track_links: self.track_links,
            split_messages: self.split_messages,
            throttle: self.throttle,
            scheduled_at: self.scheduled_at,
        })
    }
}

/// Strip whitespace and common phone separators.
pub fn normalize_address(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect()
}

/// Normalized, non-empty, first occurrence wins.
pub fn dedupe_recipients(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|r| normalize_address(r))
        .filter(|r| !r.is_empty())
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(recipients: &[&str]) -> BroadcastRequest {
        BroadcastRequest::new(
            recipients.iter().map(|s| s.to_string()).collect(),
            "Hello",
            "ACME",
        )
    }

    #[test]
    fn test_recipients_normalized_and_deduplicated() {
        let validated = request(&["+1 (555) 000-1111", "+15550001111", " ", "+15550002222"])
            .validate()
            .unwrap();
        assert_eq!(validated.recipients, vec!["+15550001111", "+15550002222"]);
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert!(matches!(request(&[]).validate(), Err(BroadcastError::Validation(_))));
        assert!(matches!(request(&["  "]).validate(), Err(BroadcastError::Validation(_))));

        let mut r = request(&["+15550001111"]);
        r.message = "   ".into();
        assert!(matches!(r.validate(), Err(BroadcastError::Validation(_))));

        let mut r = request(&["+15550001111"]);
        r.sender = String::new();
        assert!(matches!(r.validate(), Err(BroadcastError::Validation(_))));

        let mut r = request(&["+15550001111"]);
        r.split_messages.push(SplitMessage {
            content: "".into(),
            delay_seconds: 5,
            wait_for_delivery: false,
        });
        let err = r.validate().unwrap_err();
        assert!(err.to_string().contains("split message 1"));

        let mut r = request(&["+15550001111"]);
        r.throttle = Some(ThrottleSpec {
            batches: 0,
            interval_seconds: 60,
        });
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_delays() {
        let mut r = request(&["+15550001111"]);
        r.split_messages.push(SplitMessage {
            content: "Part 2".into(),
            delay_seconds: u64::MAX,
            wait_for_delivery: false,
        });
        let err = r.validate().unwrap_err();
        assert!(matches!(err, BroadcastError::Validation(_)));
        assert!(err.to_string().contains("delay_seconds"));

        let mut r = request(&["+15550001111"]);
        r.throttle = Some(ThrottleSpec {
            batches: 2,
            interval_seconds: u64::MAX,
        });
        let err = r.validate().unwrap_err();
        assert!(err.to_string().contains("interval_seconds"));

        let mut r = request(&["+15550001111"]);
        r.split_messages.push(SplitMessage {
            content: "Part 2".into(),
            delay_seconds: MAX_SPLIT_DELAY_SECS,
            wait_for_delivery: false,
        });
        r.throttle = Some(ThrottleSpec {
            batches: 2,
            interval_seconds: MAX_THROTTLE_INTERVAL_SECS,
        });
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_deserialize_minimal_request() {
        let r: BroadcastRequest = serde_json::from_str(
            r#"{"recipients": ["+15550001111"], "message": "Hi", "sender": "ACME"}"#,
        )
        .unwrap();
        assert!(!r.track_links);
        assert!(r.split_messages.is_empty());
        assert!(r.throttle.is_none());
    }
}
