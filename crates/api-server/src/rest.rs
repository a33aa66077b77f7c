//! REST API handlers for campaigns, audiences and operational endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use broadcast_core::{BroadcastError, BroadcastResult, Profile};
use broadcast_delivery::{
    BroadcastDispatcher, BroadcastRequest, CampaignSnapshot, CampaignStatus,
    DeliveryProgressTracker, RecipientOutcome, SmsGateway, SubmitReceipt,
};
use broadcast_segmentation::{
    load_all, Audience, AudienceAggregator, FilterCriteria, ProfileStore, Segment,
    SegmentResolver, SegmentStore,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Largest preview sample returned by `/v1/segments/preview`.
const MAX_PREVIEW_SAMPLE: usize = 100;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: BroadcastDispatcher,
    pub tracker: Arc<DeliveryProgressTracker>,
    pub profiles: Arc<dyn ProfileStore>,
    pub segments: Arc<dyn SegmentStore>,
    /// Present when delivery runs on the built-in gateway.
    pub sms_gateway: Option<Arc<SmsGateway>>,
    pub page_size: usize,
    pub node_id: String,
    pub start_time: Instant,
}

/// Maps domain errors onto HTTP responses.
pub struct ApiError(BroadcastError);

impl From<BroadcastError> for ApiError {
    fn from(err: BroadcastError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self.0 {
            BroadcastError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            BroadcastError::CampaignNotFound(_) => (StatusCode::NOT_FOUND, "campaign_not_found"),
            BroadcastError::SegmentNotFound(_) => (StatusCode::NOT_FOUND, "segment_not_found"),
            BroadcastError::MessageNotFound(_) => (StatusCode::NOT_FOUND, "message_not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
            "Internal processing error".to_string()
        } else {
            if status == StatusCode::BAD_REQUEST {
                metrics::counter!("api.validation_errors").increment(1);
            }
            warn!(error = %self.0, "Request rejected");
            self.0.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Request / response bodies ──────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    #[serde(flatten)]
    pub broadcast: BroadcastRequest,
    /// Segments whose reachable profiles are added to `recipients`.
    #[serde(default)]
    pub segment_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AudienceCountRequest {
    pub segment_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AudienceCountResponse {
    pub count: usize,
    pub addresses: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SegmentPreviewRequest {
    /// Grouped `{"groups": [...]}` or a legacy flat condition list.
    #[schema(value_type = Object)]
    pub criteria: FilterCriteria,
    #[serde(default)]
    pub sample_size: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SegmentPreviewResponse {
    pub matched: usize,
    pub sample: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSegmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Grouped `{"groups": [...]}` or a legacy flat condition list.
    #[schema(value_type = Object)]
    pub criteria: FilterCriteria,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SegmentSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub groups: usize,
    pub conditions: usize,
    pub estimated_size: Option<u64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Segment> for SegmentSummary {
    fn from(segment: &Segment) -> Self {
        Self {
            id: segment.id,
            name: segment.name.clone(),
            description: segment.description.clone(),
            groups: segment.criteria.groups.len(),
            conditions: segment.criteria.conditions().count(),
            estimated_size: segment.estimated_size,
            tags: segment.tags.clone(),
            created_at: segment.created_at,
        }
    }
}

/// Delivery report pushed by the SMS provider.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SmsStatusCallback {
    pub provider_message_id: String,
    /// `queued`, `sent`, `delivered`, `failed` or `undelivered`.
    pub status: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SmsStatusResponse {
    pub provider_message_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub campaign_id: Uuid,
    /// False when the campaign had already finished.
    pub cancel_requested: bool,
    pub status: CampaignStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

// ─── Campaigns ──────────────────────────────────────────────────────────

/// POST /v1/campaigns: Submit a broadcast.
#[utoipa::path(
    post,
    path = "/v1/campaigns",
    tag = "Campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 202, description = "Campaign accepted", body = SubmitReceipt),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
    )
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> ApiResult<(StatusCode, Json<SubmitReceipt>)> {
    let CreateCampaignRequest {
        mut broadcast,
        segment_ids,
    } = request;

    if !segment_ids.is_empty() {
        let audience = resolve_audience(&state, &segment_ids).await?;
        info!(
            segments = segment_ids.len(),
            reachable = audience.count(),
            "Segment audience added to campaign"
        );
        broadcast.recipients.extend(audience.addresses());
    }

    let receipt = state.dispatcher.submit(broadcast)?;
    metrics::counter!("api.campaigns_submitted").increment(1);
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// GET /v1/campaigns: All campaigns, newest first.
#[utoipa::path(
    get,
    path = "/v1/campaigns",
    tag = "Campaigns",
    responses((status = 200, description = "Campaign snapshots", body = Vec<CampaignSnapshot>))
)]
pub async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<CampaignSnapshot>> {
    Json(state.tracker.list_campaigns())
}

/// GET /v1/campaigns/:id: Progress snapshot.
#[utoipa::path(
    get,
    path = "/v1/campaigns/{id}",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign snapshot", body = CampaignSnapshot),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
    )
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CampaignSnapshot>> {
    state
        .tracker
        .get_campaign(id)
        .map(Json)
        .ok_or_else(|| BroadcastError::CampaignNotFound(id).into())
}

/// GET /v1/campaigns/:id/recipients: Per-recipient outcomes so far.
#[utoipa::path(
    get,
    path = "/v1/campaigns/{id}/recipients",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Recipient outcomes", body = Vec<RecipientOutcome>),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
    )
)]
pub async fn campaign_recipients(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<RecipientOutcome>>> {
    state
        .tracker
        .recipients(id)
        .map(Json)
        .ok_or_else(|| BroadcastError::CampaignNotFound(id).into())
}

/// POST /v1/campaigns/:id/cancel: Stop releasing further batches.
#[utoipa::path(
    post,
    path = "/v1/campaigns/{id}/cancel",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 202, description = "Cancellation state", body = CancelResponse),
        (status = 404, description = "Unknown campaign", body = ErrorResponse),
    )
)]
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let cancel_requested = state.dispatcher.cancel(id);
    let snapshot = state
        .tracker
        .get_campaign(id)
        .ok_or(BroadcastError::CampaignNotFound(id))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            campaign_id: id,
            cancel_requested,
            status: snapshot.status,
        }),
    ))
}

// ─── Audiences & segments ───────────────────────────────────────────────

/// POST /v1/audiences/count: Reachable profiles across segments, deduplicated.
#[utoipa::path(
    post,
    path = "/v1/audiences/count",
    tag = "Audiences",
    request_body = AudienceCountRequest,
    responses(
        (status = 200, description = "Audience size", body = AudienceCountResponse),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
    )
)]
pub async fn count_audience(
    State(state): State<AppState>,
    Json(request): Json<AudienceCountRequest>,
) -> ApiResult<Json<AudienceCountResponse>> {
    let audience = resolve_audience(&state, &request.segment_ids).await?;
    Ok(Json(AudienceCountResponse {
        count: audience.count(),
        addresses: audience.addresses().len(),
    }))
}

/// POST /v1/segments/preview: Evaluate criteria without saving a segment.
#[utoipa::path(
    post,
    path = "/v1/segments/preview",
    tag = "Audiences",
    request_body = SegmentPreviewRequest,
    responses((status = 200, description = "Matching profiles", body = SegmentPreviewResponse))
)]
pub async fn preview_segment(
    State(state): State<AppState>,
    Json(request): Json<SegmentPreviewRequest>,
) -> ApiResult<Json<SegmentPreviewResponse>> {
    let matched = SegmentResolver::resolve_from_store(
        state.profiles.as_ref(),
        &request.criteria,
        state.page_size,
    )
    .await?;
    let sample = matched
        .iter()
        .take(request.sample_size.min(MAX_PREVIEW_SAMPLE))
        .map(|p| p.id)
        .collect();
    Ok(Json(SegmentPreviewResponse {
        matched: matched.len(),
        sample,
    }))
}

/// POST /v1/segments: Save a segment for later audience queries.
#[utoipa::path(
    post,
    path = "/v1/segments",
    tag = "Audiences",
    request_body = CreateSegmentRequest,
    responses(
        (status = 201, description = "Segment saved", body = SegmentSummary),
        (status = 400, description = "Invalid segment", body = ErrorResponse),
    )
)]
pub async fn create_segment(
    State(state): State<AppState>,
    Json(request): Json<CreateSegmentRequest>,
) -> ApiResult<(StatusCode, Json<SegmentSummary>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(BroadcastError::validation("segment name must not be empty").into());
    }

    let mut segment = Segment::new(name, request.criteria);
    segment.description = request.description;
    segment.tags = request.tags;
    let summary = SegmentSummary::from(&segment);
    state.segments.upsert(segment).await?;

    info!(segment_id = %summary.id, name = %summary.name, "Segment saved");
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /v1/segments: Saved segments, oldest first.
#[utoipa::path(
    get,
    path = "/v1/segments",
    tag = "Audiences",
    responses((status = 200, description = "Saved segments", body = Vec<SegmentSummary>))
)]
pub async fn list_segments(State(state): State<AppState>) -> ApiResult<Json<Vec<SegmentSummary>>> {
    let segments = state.segments.list().await?;
    Ok(Json(segments.iter().map(SegmentSummary::from).collect()))
}

async fn resolve_audience(state: &AppState, segment_ids: &[Uuid]) -> BroadcastResult<Audience> {
    let mut segments = Vec::with_capacity(segment_ids.len());
    for id in segment_ids {
        let segment = state
            .segments
            .get(*id)
            .await?
            .ok_or(BroadcastError::SegmentNotFound(*id))?;
        segments.push(segment);
    }
    let profiles: Vec<Profile> = load_all(state.profiles.as_ref(), false, state.page_size).await?;
    Ok(AudienceAggregator::count_reachable(&profiles, &segments, segment_ids))
}

// ─── Provider callbacks ─────────────────────────────────────────────────

/// POST /v1/sms/status: Delivery report from the SMS provider.
#[utoipa::path(
    post,
    path = "/v1/sms/status",
    tag = "Callbacks",
    request_body = SmsStatusCallback,
    responses(
        (status = 200, description = "Status applied", body = SmsStatusResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 404, description = "Unknown message or no gateway", body = ErrorResponse),
    )
)]
pub async fn sms_status_callback(
    State(state): State<AppState>,
    Json(callback): Json<SmsStatusCallback>,
) -> ApiResult<Json<SmsStatusResponse>> {
    let gateway = state
        .sms_gateway
        .as_ref()
        .ok_or_else(|| BroadcastError::MessageNotFound(callback.provider_message_id.clone()))?;
    gateway.handle_status_callback(
        &callback.provider_message_id,
        &callback.status,
        callback.error_code.as_deref(),
    )?;
    Ok(Json(SmsStatusResponse {
        provider_message_id: callback.provider_message_id,
        status: callback.status,
    }))
}

// ─── Operations ─────────────────────────────────────────────────────────

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses((status = 200, description = "Ready to accept traffic"))
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
