//! API server: HTTP routes plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use axum::routing::{get, post};
use axum::Router;
use broadcast_core::config::AppConfig;
use broadcast_delivery::{BroadcastDispatcher, DeliveryProgressTracker, SmsGateway};
use broadcast_segmentation::{ProfileStore, SegmentStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Build the full HTTP router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Campaigns
        .route(
            "/v1/campaigns",
            post(rest::create_campaign).get(rest::list_campaigns),
        )
        .route("/v1/campaigns/:id", get(rest::get_campaign))
        .route("/v1/campaigns/:id/recipients", get(rest::campaign_recipients))
        .route("/v1/campaigns/:id/cancel", post(rest::cancel_campaign))
        // Audiences
        .route("/v1/audiences/count", post(rest::count_audience))
        .route(
            "/v1/segments",
            post(rest::create_segment).get(rest::list_segments),
        )
        .route("/v1/segments/preview", post(rest::preview_segment))
        // Provider callbacks
        .route("/v1/sms/status", post(rest::sms_status_callback))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        dispatcher: BroadcastDispatcher,
        profiles: Arc<dyn ProfileStore>,
        segments: Arc<dyn SegmentStore>,
    ) -> Self {
        let state = AppState {
            tracker: dispatcher.tracker().clone(),
            dispatcher,
            profiles,
            segments,
            sms_gateway: None,
            page_size: config.segmentation.page_size,
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// Accept status callbacks for messages sent through `gateway`.
    pub fn with_sms_gateway(mut self, gateway: Arc<SmsGateway>) -> Self {
        self.state.sms_gateway = Some(gateway);
        self
    }

    pub fn tracker(&self) -> &Arc<DeliveryProgressTracker> {
        &self.state.tracker
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use broadcast_core::Profile;
    use broadcast_delivery::{DeliveryProvider, DeliveryStatus, GatewayConfig};
    use broadcast_segmentation::{InMemoryProfileStore, InMemorySegmentStore, SegmentBuilder};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Fixture {
        app: Router,
        gateway: Arc<SmsGateway>,
        vip_segment: Uuid,
        active_segment: Uuid,
    }

    async fn fixture() -> Fixture {
        let config = AppConfig::default();
        let gateway = Arc::new(SmsGateway::new(GatewayConfig {
            auto_deliver: false,
            ..GatewayConfig::default()
        }));
        let dispatcher = BroadcastDispatcher::new(
            gateway.clone(),
            Arc::new(DeliveryProgressTracker::default()),
            &config,
        );

        let profiles = InMemoryProfileStore::with_profiles(vec![
            Profile::new()
                .with_mobile("+15550000001")
                .with_field("vip", json!(true)),
            Profile::new()
                .with_mobile("+15550000002")
                .with_field("vip", json!(false)),
            Profile::new()
                .with_mobile("+15550000003")
                .with_field("vip", json!(true))
                .with_status("deleted"),
            Profile::new().with_field("vip", json!(true)),
        ]);

        let segments = InMemorySegmentStore::new();
        let vip = SegmentBuilder::new("VIP").equals("custom_fields.vip", "yes").build();
        let active = SegmentBuilder::new("Active").equals("status", "active").build();
        let (vip_segment, active_segment) = (vip.id, active.id);
        segments.upsert(vip).await.unwrap();
        segments.upsert(active).await.unwrap();

        let server = ApiServer::new(config, dispatcher, Arc::new(profiles), Arc::new(segments))
            .with_sms_gateway(gateway.clone());
        Fixture {
            app: router(server.state.clone()),
            gateway,
            vip_segment,
            active_segment,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_submit_and_fetch_campaign() {
        let f = fixture().await;
        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/campaigns",
            Some(json!({
                "recipients": ["+1 555 000 1000", "+15550001000", "+15550001001"],
                "message": "Flash sale today",
                "sender": "ACME"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["total_recipients"], 2);
        assert_eq!(body["status"], "pending");

        let id = body["campaign_id"].as_str().unwrap().to_string();
        let (status, snapshot) = send(&f.app, "GET", &format!("/v1/campaigns/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["total_recipients"], 2);

        let (status, _) = send(&f.app, "GET", &format!("/v1/campaigns/{id}/recipients"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, list) = send(&f.app, "GET", "/v1/campaigns", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_with_segments_adds_reachable_recipients() {
        let f = fixture().await;
        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/campaigns",
            Some(json!({
                "message": "VIP preview",
                "sender": "ACME",
                "segment_ids": [f.vip_segment]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["total_recipients"], 1);
    }

    #[tokio::test]
    async fn test_validation_error_is_400() {
        let f = fixture().await;
        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/campaigns",
            Some(json!({"recipients": [], "message": "Hi", "sender": "ACME"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");

        let (_, list) = send(&f.app, "GET", "/v1/campaigns", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_campaign_and_segment_are_404() {
        let f = fixture().await;
        let missing = Uuid::new_v4();
        let (status, body) = send(&f.app, "GET", &format!("/v1/campaigns/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "campaign_not_found");

        let (status, _) = send(&f.app, "POST", &format!("/v1/campaigns/{missing}/cancel"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/audiences/count",
            Some(json!({"segment_ids": [missing]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "segment_not_found");
    }

    #[tokio::test]
    async fn test_audience_count_deduplicates_across_segments() {
        let f = fixture().await;
        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/audiences/count",
            Some(json!({"segment_ids": [f.vip_segment, f.active_segment]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        // Two reachable active profiles; the VIP one is in both segments.
        assert_eq!(body["count"], 2);
        assert_eq!(body["addresses"], 2);
    }

    #[tokio::test]
    async fn test_segment_preview_accepts_both_shapes() {
        let f = fixture().await;
        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/segments/preview",
            Some(json!({
                "criteria": {"groups": [{"conditions": [
                    {"field": "custom_fields.vip", "operator": "equals", "value": "true"}
                ]}]},
                "sample_size": 10
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matched"], 2);
        assert_eq!(body["sample"].as_array().unwrap().len(), 2);

        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/segments/preview",
            Some(json!({
                "criteria": [{"field": "status", "operator": "is", "value": "deleted"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matched"], 1);
        assert!(body["sample"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saved_segment_drives_audience_count() {
        let f = fixture().await;
        let (status, saved) = send(
            &f.app,
            "POST",
            "/v1/segments",
            Some(json!({
                "name": "Non-VIP",
                "criteria": [{"field": "custom_fields.vip", "operator": "equals", "value": "no"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(saved["conditions"], 1);

        let (status, list) = send(&f.app, "GET", "/v1/segments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 3);

        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/audiences/count",
            Some(json!({"segment_ids": [saved["id"]]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/segments",
            Some(json!({"name": " ", "criteria": {"groups": []}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn test_sms_status_callback_updates_gateway() {
        let f = fixture().await;
        let receipt = f.gateway.send("+15550009999", "Ping", "ACME").await.unwrap();

        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/sms/status",
            Some(json!({
                "provider_message_id": receipt.provider_message_id,
                "status": "undelivered",
                "error_code": "30006"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "undelivered");
        assert_eq!(
            f.gateway.wait_for_delivery(&receipt).await.unwrap(),
            DeliveryStatus::Failed {
                error_code: Some("30006".into())
            }
        );

        let (status, body) = send(
            &f.app,
            "POST",
            "/v1/sms/status",
            Some(json!({"provider_message_id": "SMmissing", "status": "delivered"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "message_not_found");

        let (status, _) = send(
            &f.app,
            "POST",
            "/v1/sms/status",
            Some(json!({"provider_message_id": receipt.provider_message_id, "status": "bounced"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_finished_campaign() {
        let f = fixture().await;
        let (_, body) = send(
            &f.app,
            "POST",
            "/v1/campaigns",
            Some(json!({"recipients": ["+15550001000"], "message": "Hi", "sender": "ACME"})),
        )
        .await;
        let id = body["campaign_id"].as_str().unwrap().to_string();

        let (status, body) = send(&f.app, "POST", &format!("/v1/campaigns/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["campaign_id"], id.as_str());
    }

    #[tokio::test]
    async fn test_operational_endpoints() {
        let f = fixture().await;
        let (status, body) = send(&f.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(send(&f.app, "GET", "/ready", None).await.0, StatusCode::OK);
        assert_eq!(send(&f.app, "GET", "/live", None).await.0, StatusCode::OK);
        assert_eq!(
            send(&f.app, "GET", "/api-docs/openapi.json", None).await.0,
            StatusCode::OK
        );
    }
}
