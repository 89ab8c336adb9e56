//! Service configuration
//!
//! Defaults, overridden by an optional `squadron.toml` next to the binary,
//! overridden in turn by `SQUADRON_*` environment variables
//! (`SQUADRON_API_PORT=8080`, `SQUADRON_CHANNEL_URL=ws://...`).

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use squadron_ingest::SchedulerConfig;
use squadron_tracker::StoreConfig;
use std::time::Duration;

const CONFIG_FILE: &str = "squadron";
const ENV_PREFIX: &str = "SQUADRON";

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST + WebSocket port
    pub api_port: u16,
    /// Base URL of the telemetry backend's REST endpoints
    pub backend_url: String,
    /// Backend push channel; no push source when unset
    pub channel_url: Option<String>,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub signal_capacity: usize,
    pub path_capacity: usize,
    pub intel_capacity: usize,
    pub max_weapons: u32,
    /// Poll a simulated squadron instead of the backend endpoints
    pub simulation_mode: bool,
    pub simulation_seed: Option<u64>,
    /// Allow any origin (development)
    pub cors_permissive: bool,
    /// Origin allowed when not permissive
    pub cors_origin: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            api_port: 3000,
            backend_url: "http://localhost:5000".into(),
            channel_url: None,
            poll_interval_ms: 1000,
            request_timeout_ms: 5000,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30_000,
            signal_capacity: store.signal_capacity,
            path_capacity: store.path_capacity,
            intel_capacity: store.intel_capacity,
            max_weapons: store.max_weapons,
            simulation_mode: true,
            simulation_seed: None,
            cors_permissive: true,
            cors_origin: "http://localhost:8080".into(),
        }
    }
}

impl ApiConfig {
    /// Load from `squadron.toml` (optional) and `SQUADRON_*` variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Message("poll_interval_ms must be positive".into()));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::Message(
                "backoff_max_ms must not be below backoff_initial_ms".into(),
            ));
        }
        if !self.simulation_mode && self.backend_url.trim().is_empty() {
            return Err(ConfigError::Message("backend_url is required outside simulation mode".into()));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            signal_capacity: self.signal_capacity,
            path_capacity: self.path_capacity,
            intel_capacity: self.intel_capacity,
            max_weapons: self.max_weapons,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.backend_url, "http://localhost:5000");
        assert_eq!(config.store_config(), StoreConfig::default());
        assert_eq!(config.scheduler_config(), SchedulerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let toml = r#"
            api_port = 8081
            channel_url = "ws://backend:5000/ws"
            simulation_mode = false
            signal_capacity = 20
        "#;
        let config = ApiConfig::from_builder(
            Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
        .unwrap();

        assert_eq!(config.api_port, 8081);
        assert_eq!(config.channel_url.as_deref(), Some("ws://backend:5000/ws"));
        assert!(!config.simulation_mode);
        assert_eq!(config.store_config().signal_capacity, 20);
        // untouched keys keep their defaults
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let toml = "backoff_initial_ms = 5000\nbackoff_max_ms = 1000";
        let result = ApiConfig::from_builder(
            Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        );
        assert!(result.is_err());
    }
}
