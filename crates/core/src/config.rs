use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:18789/extension".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_delay_secs")]
    pub delay_secs: u64,
    /// Double the delay after each consecutive failed attempt.
    /// Off by default: the extension has always retried on a fixed delay.
    #[serde(default)]
    pub backoff: bool,
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_reconnect_max_delay_secs() -> u64 {
    60
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_reconnect_delay_secs(),
            backoff: false,
            max_delay_secs: default_reconnect_max_delay_secs(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the next attempt, given how many attempts in a row have failed.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let base = self.delay_secs.max(1);
        if !self.backoff {
            return Duration::from_secs(base);
        }
        let factor = 1u64.checked_shl(consecutive_failures.min(16)).unwrap_or(u64::MAX);
        let secs = base.saturating_mul(factor).min(self.max_delay_secs.max(base));
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// 0 disables the per-handler timeout.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

fn default_handler_timeout_secs() -> u64 {
    60
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl RouterConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        if self.handler_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.handler_timeout_secs))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Upper bound on each session's action log. 0 keeps everything.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

fn default_max_log_entries() -> usize {
    1000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_log_entries: default_max_log_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfig {
    #[serde(default = "default_extension_version")]
    pub version: String,
}

fn default_extension_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            version: default_extension_version(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatesConfig {
    /// Endpoint returning the latest release as GitHub's releases API does.
    /// Empty disables update checks.
    #[serde(default)]
    pub release_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub extension: ExtensionConfig,
    #[serde(default)]
    pub updates: UpdatesConfig,
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect: ReconnectConfig::default(),
            router: RouterConfig::default(),
            sessions: SessionsConfig::default(),
            extension: ExtensionConfig::default(),
            updates: UpdatesConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.gateway.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "gateway.url must be a ws:// or wss:// URL, got '{}'",
                self.gateway.url
            )));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Config(
                "heartbeatIntervalSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
