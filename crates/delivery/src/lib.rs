//! Broadcast delivery: request validation, link tracking, the throttled
//! dispatcher and per-campaign progress tracking.

pub mod dispatcher;
pub mod progress;
pub mod provider;
pub mod request;
pub mod retry;
pub mod sms;
pub mod tracking;

pub use dispatcher::{BroadcastDispatcher, SubmitReceipt};
pub use progress::{
    CampaignSnapshot, CampaignStatus, DeliveryProgressTracker, PollOutcome, ProgressPoller,
    RecipientOutcome, RecipientStatus,
};
pub use provider::{DeliveryProvider, DeliveryStatus, ProviderError, SendReceipt};
pub use request::{BroadcastRequest, SplitMessage, ThrottleSpec};
pub use retry::RetryPolicy;
pub use sms::{GatewayConfig, SmsGateway, SmsStatus};
pub use tracking::{LinkShortener, ShortCodeGenerator, TrackedLink};
