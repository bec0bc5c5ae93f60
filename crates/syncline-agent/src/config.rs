//! Agent configuration.
//!
//! Configuration can be loaded from:
//! - An explicit `--config <path>` argument
//! - The first existing file of the default search paths
//! - Environment variables (SYNCLINE_*) for fields the file leaves out

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use syncline_core::{HealthConfig, SessionContext};
use syncline_protocol::MessageType;
use syncline_transport::{ClientIdentity, PipelineConfig, RetryPolicy};

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server URL.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Realtime channel URL; the realtime loop is disabled when unset.
    #[serde(default = "default_realtime_url")]
    pub realtime_url: Option<String>,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Signed-in session.
    #[serde(default)]
    pub session: SessionConfig,

    /// Client identity headers.
    #[serde(default)]
    pub client: ClientConfig,

    /// Retry policy for API calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Connection health timings.
    #[serde(default)]
    pub health: HealthSettings,

    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Directory for request dumps.
    #[serde(default)]
    pub record_requests_dir: Option<String>,

    /// Realtime types to deliver; all types when unset.
    #[serde(default)]
    pub subscribe: Option<Vec<MessageType>>,
}

/// Session credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Access token.
    #[serde(default = "default_token")]
    pub token: Option<String>,

    /// Signed-in user's id.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Selected team.
    #[serde(default)]
    pub team_id: Option<String>,

    /// Signed-in user's email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_ide_name")]
    pub ide_name: String,

    #[serde(default)]
    pub ide_version: String,

    #[serde(default)]
    pub ide_detail: String,

    #[serde(default = "default_plugin_version")]
    pub plugin_version: String,

    #[serde(default)]
    pub plugin_build: String,
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff unit in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

/// Connection health timings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_echo_timeout")]
    pub echo_timeout_ms: u64,

    #[serde(default = "default_broadcaster_recovery")]
    pub broadcaster_recovery_ms: u64,

    #[serde(default = "default_maintenance_debounce")]
    pub maintenance_debounce_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_server_url() -> String {
    std::env::var("SYNCLINE_SERVER_URL").unwrap_or_else(|_| "http://localhost:12079".to_string())
}

fn default_realtime_url() -> Option<String> {
    std::env::var("SYNCLINE_REALTIME_URL").ok()
}

fn default_token() -> Option<String> {
    std::env::var("SYNCLINE_TOKEN").ok()
}

fn default_log_level() -> String {
    "syncline=info".to_string()
}

fn default_ide_name() -> String {
    "syncline".to_string()
}

fn default_plugin_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    250
}

fn default_echo_timeout() -> u64 {
    10_000
}

fn default_broadcaster_recovery() -> u64 {
    30_000
}

fn default_maintenance_debounce() -> u64 {
    2_000
}

fn default_probe_timeout() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            realtime_url: default_realtime_url(),
            log_level: default_log_level(),
            session: SessionConfig::default(),
            client: ClientConfig::default(),
            retry: RetryConfig::default(),
            health: HealthSettings::default(),
            metrics: MetricsConfig::default(),
            record_requests_dir: None,
            subscribe: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            user_id: None,
            team_id: None,
            email: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ide_name: default_ide_name(),
            ide_version: String::new(),
            ide_detail: String::new(),
            plugin_version: default_plugin_version(),
            plugin_build: String::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            echo_timeout_ms: default_echo_timeout(),
            broadcaster_recovery_ms: default_broadcaster_recovery(),
            maintenance_debounce_ms: default_maintenance_debounce(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, the default search paths, or
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read or parsed, or if an
    /// explicit path does not exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = [
            "syncline.toml",
            "/etc/syncline/syncline.toml",
            "~/.config/syncline/syncline.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Request pipeline settings.
    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            base_url: self.server_url.clone(),
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
            },
            identity: ClientIdentity {
                ide_name: self.client.ide_name.clone(),
                ide_detail: self.client.ide_detail.clone(),
                ide_version: self.client.ide_version.clone(),
                plugin_version: self.client.plugin_version.clone(),
                plugin_build: self.client.plugin_build.clone(),
            },
            probe_timeout: Duration::from_millis(self.health.probe_timeout_ms),
            record_dir: self
                .record_requests_dir
                .as_deref()
                .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref())),
        }
    }

    /// Health monitor timings.
    #[must_use]
    pub fn health(&self) -> HealthConfig {
        HealthConfig {
            echo_timeout: Duration::from_millis(self.health.echo_timeout_ms),
            broadcaster_recovery: Duration::from_millis(self.health.broadcaster_recovery_ms),
            maintenance_debounce: Duration::from_millis(self.health.maintenance_debounce_ms),
        }
    }

    /// Session facts for the health monitor.
    #[must_use]
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            server_url: self.server_url.clone(),
            has_credentials: self.session.token.is_some(),
            user_id: self.session.user_id.clone(),
            email: self.session.email.clone(),
            team_id: self.session.team_id.clone(),
        }
    }

    /// Subscription filter, with unrecognised type names left out.
    #[must_use]
    pub fn subscription(&self) -> Option<HashSet<MessageType>> {
        self.subscribe.as_ref().map(|types| {
            types
                .iter()
                .copied()
                .filter(|t| *t != MessageType::Unknown)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.health.echo_timeout_ms, 10_000);
        assert_eq!(config.metrics.port, 9090);
        assert!(config.subscription().is_none());
        assert_eq!(config.health(), HealthConfig::default());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            server_url = "https://api.example.com"
            realtime_url = "wss://broadcast.example.com/realtime"
            subscribe = ["posts", "users", "bogus"]

            [session]
            token = "abc"
            user_id = "u1"

            [retry]
            max_retries = 1
            base_delay_ms = 100

            [health]
            echo_timeout_ms = 5000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        let pipeline = config.pipeline();
        assert_eq!(pipeline.base_url, "https://api.example.com");
        assert_eq!(pipeline.retry.max_retries, 1);
        assert_eq!(pipeline.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.health().echo_timeout, Duration::from_secs(5));
        assert_eq!(
            config.health().broadcaster_recovery,
            Duration::from_secs(30)
        );

        let session = config.session_context();
        assert!(session.has_credentials);
        assert_eq!(session.user_id.as_deref(), Some("u1"));

        let subscription = config.subscription().unwrap();
        assert_eq!(subscription.len(), 2);
        assert!(subscription.contains(&MessageType::Posts));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/syncline.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
