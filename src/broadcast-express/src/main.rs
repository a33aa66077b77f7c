//! Broadcast Express: audience segmentation and throttled SMS broadcasts.
//!
//! Main entry point that wires the stores, provider and dispatcher together
//! and starts the HTTP API.

use anyhow::Context;
use broadcast_api::ApiServer;
use broadcast_core::config::AppConfig;
use broadcast_core::event_bus::TracingSink;
use broadcast_core::Profile;
use broadcast_delivery::{BroadcastDispatcher, DeliveryProgressTracker, GatewayConfig, SmsGateway};
use broadcast_segmentation::{InMemoryProfileStore, InMemorySegmentStore, Segment};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "broadcast-express")]
#[command(about = "Audience segmentation and throttled SMS broadcast delivery")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "BROADCAST_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "BROADCAST_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Provider worker pool size (overrides config)
    #[arg(long, env = "BROADCAST_EXPRESS__DISPATCH__WORKER_POOL_SIZE")]
    worker_pool_size: Option<usize>,

    /// JSON array of profiles to seed the in-memory profile store with
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// JSON array of segments to seed the in-memory segment store with
    #[arg(long)]
    segments: Option<PathBuf>,

    /// SMS gateway credential
    #[arg(long, env = "BROADCAST_EXPRESS_GATEWAY_API_KEY", default_value = "local")]
    gateway_api_key: String,

    /// Hold messages as queued until POST /v1/sms/status reports them
    #[arg(long, default_value_t = false)]
    manual_delivery: bool,
}

fn load_seed<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broadcast_express=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Broadcast Express starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(size) = cli.worker_pool_size {
        config.dispatch.worker_pool_size = size;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        worker_pool_size = config.dispatch.worker_pool_size,
        max_attempts = config.dispatch.max_attempts,
        "Configuration loaded"
    );

    // Profile and segment stores
    let profiles = match &cli.profiles {
        Some(path) => {
            let seeded: Vec<Profile> = load_seed(path)?;
            info!(count = seeded.len(), "Profile store seeded");
            InMemoryProfileStore::with_profiles(seeded)
        }
        None => InMemoryProfileStore::new(),
    };
    let segments = match &cli.segments {
        Some(path) => {
            let seeded: Vec<Segment> = load_seed(path)?;
            info!(count = seeded.len(), "Segment store seeded");
            InMemorySegmentStore::with_segments(seeded)
        }
        None => InMemorySegmentStore::new(),
    };

    // Delivery
    let gateway = Arc::new(SmsGateway::new(GatewayConfig {
        api_key: cli.gateway_api_key,
        auto_deliver: !cli.manual_delivery,
        ..GatewayConfig::default()
    }));
    let tracker = Arc::new(DeliveryProgressTracker::new(Arc::new(TracingSink)));
    let dispatcher = BroadcastDispatcher::new(gateway.clone(), tracker, &config);

    let api_server = ApiServer::new(
        config.clone(),
        dispatcher,
        Arc::new(profiles),
        Arc::new(segments),
    )
    .with_sms_gateway(gateway);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Broadcast Express is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
