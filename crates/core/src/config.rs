use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `BROADCAST_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Worker pool and retry settings for the broadcast send loop.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on in-flight provider calls; sized to the provider's rate limit.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Total attempts per message, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// How long a split message waits for delivery confirmation of its predecessor.
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tracking_domain")]
    pub domain: String,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_ceiling_secs")]
    pub ceiling_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_worker_pool_size() -> usize {
    16
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_attempt_timeout_ms() -> u64 {
    10_000
}
fn default_confirmation_timeout_ms() -> u64 {
    120_000
}
fn default_tracking_domain() -> String {
    "trk.example.com".to_string()
}
fn default_code_length() -> usize {
    6
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_poll_ceiling_secs() -> u64 {
    300
}
fn default_page_size() -> usize {
    1_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            domain: default_tracking_domain(),
            code_length: default_code_length(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            ceiling_secs: default_poll_ceiling_secs(),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            dispatch: DispatchConfig::default(),
            tracking: TrackingConfig::default(),
            polling: PollingConfig::default(),
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("BROADCAST_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> crate::BroadcastResult<()> {
        if self.dispatch.worker_pool_size == 0 {
            return Err(crate::BroadcastError::Config(
                "dispatch.worker_pool_size must be at least 1".into(),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(crate::BroadcastError::Config(
                "dispatch.max_attempts must be at least 1".into(),
            ));
        }
        if self.tracking.code_length == 0 {
            return Err(crate::BroadcastError::Config(
                "tracking.code_length must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.worker_pool_size, 16);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.polling.ceiling_secs, 300);
        assert_eq!(config.tracking.code_length, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"dispatch": {"worker_pool_size": 4}}"#).unwrap();
        assert_eq!(config.dispatch.worker_pool_size, 4);
        assert_eq!(config.dispatch.attempt_timeout_ms, 10_000);
        assert_eq!(config.api.http_port, 8080);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut config = AppConfig::default();
        config.dispatch.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }
}
