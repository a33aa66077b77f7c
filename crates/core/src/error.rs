use thiserror::Error;
use uuid::Uuid;

pub type BroadcastResult<T> = Result<T, BroadcastError>;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Segment not found: {0}")]
    SegmentNotFound(Uuid),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Campaign submission rejected: {0}")]
    Submission(String),

    #[error("Profile store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BroadcastError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
