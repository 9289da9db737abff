/// Client configuration.
///
/// Loaded from a TOML file when one exists, otherwise every section
/// falls back to its defaults — the subsystem is expected to work with
/// zero configuration on a typical venue network.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    /// Port the backend listens on.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Pin the scanned /24 prefix (e.g. "192.168.4") instead of detecting it.
    #[serde(default)]
    pub subnet_override: Option<String>,
    /// Subnet used when detection finds nothing.
    #[serde(default = "default_fallback_subnet")]
    pub fallback_subnet: String,
    /// Best-effort gateway probe timeout.
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
    /// Per-address discovery probe timeout.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Cached-URL revalidation timeout.
    #[serde(default = "default_quick_check_timeout_ms")]
    pub quick_check_timeout_ms: u64,
    /// Manual "test connection" timeout.
    #[serde(default = "default_test_timeout_ms")]
    pub test_timeout_ms: u64,
    /// Addresses probed per wave.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Minimum interval between forced scans while a known URL exists.
    #[serde(default = "default_min_rescan_secs")]
    pub min_rescan_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    /// Periodic health probe interval.
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failures required to flip unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Per-probe timeout.
    #[serde(default = "default_health_timeout_ms")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    /// Delay before restarting the health monitor after a reconnect.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Debounce between a health-driven disconnect and the reconnect it
    /// triggers, so it cannot race the link watcher.
    #[serde(default = "default_health_debounce_ms")]
    pub health_debounce_ms: u64,
    /// Backoff between automatic reconnect cycles: initial delay,
    /// multiplied per failed attempt, capped at max.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_api_port() -> u16 { cloudbite_protocol::DEFAULT_API_PORT }
fn default_fallback_subnet() -> String { "192.168.1".to_string() }
fn default_gateway_timeout_ms() -> u64 { 500 }
fn default_probe_timeout_ms() -> u64 { 1000 }
fn default_quick_check_timeout_ms() -> u64 { 2000 }
fn default_test_timeout_ms() -> u64 { 5000 }
fn default_chunk_size() -> usize { 30 }
fn default_min_rescan_secs() -> u64 { 30 }
fn default_health_interval_secs() -> u64 { 20 }
fn default_failure_threshold() -> u32 { 2 }
fn default_health_timeout_ms() -> u64 { 2000 }
fn default_settle_delay_ms() -> u64 { 1500 }
fn default_health_debounce_ms() -> u64 { 1000 }
fn default_backoff_initial_ms() -> u64 { 2000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_backoff_max_ms() -> u64 { 30_000 }

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            subnet_override: None,
            fallback_subnet: default_fallback_subnet(),
            gateway_timeout_ms: default_gateway_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            quick_check_timeout_ms: default_quick_check_timeout_ms(),
            test_timeout_ms: default_test_timeout_ms(),
            chunk_size: default_chunk_size(),
            min_rescan_interval_secs: default_min_rescan_secs(),
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_ms: default_health_timeout_ms(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            health_debounce_ms: default_health_debounce_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl ClientConfig {
    /// Load from `path` if it exists, defaults otherwise.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let raw = tokio::fs::read_to_string(path).await?;
            Ok(toml::from_str(&raw)?)
        } else {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            Ok(Self::default())
        }
    }
}
