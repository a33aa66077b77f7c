//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Broadcast Express API",
        version = "0.1.0",
        description = "Audience segmentation and throttled SMS broadcast delivery.\n\nResolve segments into deduplicated audiences, submit campaigns, and poll delivery progress.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Campaigns", description = "Broadcast submission, progress and cancellation"),
        (name = "Audiences", description = "Saved segments, previews and audience sizing"),
        (name = "Callbacks", description = "Delivery reports from the SMS provider"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Campaigns
        crate::rest::create_campaign,
        crate::rest::list_campaigns,
        crate::rest::get_campaign,
        crate::rest::campaign_recipients,
        crate::rest::cancel_campaign,
        // Audiences
        crate::rest::count_audience,
        crate::rest::create_segment,
        crate::rest::list_segments,
        crate::rest::preview_segment,
        // Callbacks
        crate::rest::sms_status_callback,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        // Delivery types
        broadcast_delivery::BroadcastRequest,
        broadcast_delivery::SplitMessage,
        broadcast_delivery::ThrottleSpec,
        broadcast_delivery::SubmitReceipt,
        broadcast_delivery::TrackedLink,
        broadcast_delivery::CampaignSnapshot,
        broadcast_delivery::CampaignStatus,
        broadcast_delivery::RecipientOutcome,
        broadcast_delivery::RecipientStatus,
        // REST bodies
        crate::rest::CreateCampaignRequest,
        crate::rest::CancelResponse,
        crate::rest::AudienceCountRequest,
        crate::rest::AudienceCountResponse,
        crate::rest::SegmentPreviewRequest,
        crate::rest::SegmentPreviewResponse,
        crate::rest::CreateSegmentRequest,
        crate::rest::SegmentSummary,
        crate::rest::SmsStatusCallback,
        crate::rest::SmsStatusResponse,
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
