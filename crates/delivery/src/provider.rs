//! Delivery provider interface. The real SMS network integration lives
//! outside this workspace; the dispatcher only sees this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider failure classes. Only `Transient` is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeouts, 5xx and throttling responses.
    #[error("transient provider failure ({code}): {message}")]
    Transient { code: String, message: String },

    /// Invalid or unreachable address, content refused.
    #[error("permanent provider failure ({code}): {message}")]
    Permanent { code: String, message: String },

    /// The provider refused the whole batch (bad credentials, suspended sender).
    #[error("provider rejected submission: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => Some(code),
            Self::Rejected(_) => None,
        }
    }
}

/// Provider acknowledgement that a message was accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub to: String,
    pub accepted_at: DateTime<Utc>,
}

/// Final handset delivery state reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed { error_code: Option<String> },
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per campaign before any message is sent. A `Rejected`
    /// error here fails the whole campaign with nothing sent.
    async fn begin_batch(&self, _sender_id: &str, _recipients: usize) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn send(&self, to: &str, body: &str, sender_id: &str) -> Result<SendReceipt, ProviderError>;

    /// Resolves once the provider confirms the handset outcome of `receipt`.
    async fn wait_for_delivery(&self, receipt: &SendReceipt) -> Result<DeliveryStatus, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::transient("503", "unavailable").is_retryable());
        assert!(!ProviderError::permanent("21211", "invalid number").is_retryable());
        assert!(!ProviderError::Rejected("bad credentials".into()).is_retryable());
        assert_eq!(ProviderError::permanent("21211", "x").code(), Some("21211"));
        assert_eq!(ProviderError::Rejected("x".into()).code(), None);
    }
}
