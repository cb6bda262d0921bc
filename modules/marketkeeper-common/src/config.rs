use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::error::{MarketKeeperError, Result};

const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

/// Application configuration loaded from environment variables.
///
/// Secrets always come from the environment. Tuning values can additionally be
/// overridden by a TOML file named in `MARKETKEEPER_CONFIG`.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub web_host: String,
    pub web_port: u16,
    pub cron_secret: Option<String>,

    // Authoritative store gateway
    pub store_gateway_url: String,
    pub store_gateway_token: Option<String>,

    // Blob store
    pub blob_aggregator_url: String,

    // Classifier
    pub anthropic_api_keys: Vec<String>,
    pub classifier_model: String,

    // Event stream
    pub event_stream_url: Option<String>,
    pub event_stream_token: Option<String>,

    pub windows: WindowConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    /// Secondary guard TTL for market creation.
    pub creation: Duration,
    /// Primary guard TTL for market resolution.
    pub resolution: Duration,
    /// Sweep drops entries older than this, whatever TTL they were checked with.
    pub retention: Duration,
    pub sweep_every: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            creation: Duration::from_secs(600),
            resolution: Duration::from_secs(1800),
            retention: Duration::from_secs(3600),
            sweep_every: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// TOML overlay. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOverlay {
    #[serde(default)]
    windows: WindowOverlay,
    #[serde(default)]
    publisher: PublisherOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WindowOverlay {
    creation_secs: Option<u64>,
    resolution_secs: Option<u64>,
    retention_secs: Option<u64>,
    sweep_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PublisherOverlay {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment, then apply the
    /// `MARKETKEEPER_CONFIG` overlay if one is named.
    pub fn from_env() -> Result<Self> {
        let vars = collect_vars(env::vars_os());
        let mut config = Self::from_vars(&vars)?;
        if let Some(path) = non_empty(&vars, "MARKETKEEPER_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        Ok(config)
    }

    /// Build from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let defaults_w = WindowConfig::default();
        let defaults_p = PublisherConfig::default();

        Ok(Self {
            web_host: non_empty(vars, "WEB_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            web_port: parse_or(vars, "WEB_PORT", 3000)?,
            cron_secret: non_empty(vars, "CRON_SECRET"),
            store_gateway_url: required(vars, "STORE_GATEWAY_URL")?,
            store_gateway_token: non_empty(vars, "STORE_GATEWAY_TOKEN"),
            blob_aggregator_url: required(vars, "BLOB_AGGREGATOR_URL")?,
            anthropic_api_keys: required(vars, "ANTHROPIC_API_KEYS")?
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
            classifier_model: non_empty(vars, "CLASSIFIER_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            event_stream_url: non_empty(vars, "EVENT_STREAM_URL"),
            event_stream_token: non_empty(vars, "EVENT_STREAM_TOKEN"),
            windows: WindowConfig {
                creation: secs_or(vars, "CREATION_WINDOW_SECS", defaults_w.creation)?,
                resolution: secs_or(vars, "RESOLUTION_WINDOW_SECS", defaults_w.resolution)?,
                retention: secs_or(vars, "DEDUP_RETENTION_SECS", defaults_w.retention)?,
                sweep_every: secs_or(vars, "DEDUP_SWEEP_SECS", defaults_w.sweep_every)?,
            },
            publisher: PublisherConfig {
                max_attempts: parse_or(vars, "PUBLISH_MAX_ATTEMPTS", defaults_p.max_attempts)?,
                base_delay: Duration::from_millis(parse_or(
                    vars,
                    "PUBLISH_BASE_DELAY_MS",
                    defaults_p.base_delay.as_millis() as u64,
                )?),
            },
        })
    }

    /// Override tuning values from a TOML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let overlay: FileOverlay = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let w = overlay.windows;
        if let Some(s) = w.creation_secs {
            self.windows.creation = Duration::from_secs(s);
        }
        if let Some(s) = w.resolution_secs {
            self.windows.resolution = Duration::from_secs(s);
        }
        if let Some(s) = w.retention_secs {
            self.windows.retention = Duration::from_secs(s);
        }
        if let Some(s) = w.sweep_secs {
            self.windows.sweep_every = Duration::from_secs(s);
        }
        if let Some(n) = overlay.publisher.max_attempts {
            self.publisher.max_attempts = n;
        }
        if let Some(ms) = overlay.publisher.base_delay_ms {
            self.publisher.base_delay = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Every configuration problem, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.anthropic_api_keys.is_empty() {
            errors.push("ANTHROPIC_API_KEYS must contain at least one key".to_string());
        }
        if self.windows.creation.is_zero() {
            errors.push("creation window must be positive".to_string());
        }
        if self.windows.resolution.is_zero() {
            errors.push("resolution window must be positive".to_string());
        }
        if self.windows.sweep_every.is_zero() {
            errors.push("sweep period must be positive".to_string());
        }
        if self.windows.retention < self.windows.resolution
            || self.windows.retention < self.windows.creation
        {
            errors.push(
                "dedup retention must be at least as long as the creation and resolution windows"
                    .to_string(),
            );
        }
        if self.publisher.max_attempts == 0 {
            errors.push("PUBLISH_MAX_ATTEMPTS must be positive".to_string());
        }
        for (name, url) in [
            ("STORE_GATEWAY_URL", Some(&self.store_gateway_url)),
            ("BLOB_AGGREGATOR_URL", Some(&self.blob_aggregator_url)),
            ("EVENT_STREAM_URL", self.event_stream_url.as_ref()),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    errors.push(format!("{name} must be an http(s) URL"));
                }
            }
        }

        errors
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            web = %format!("{}:{}", self.web_host, self.web_port),
            store_gateway = %self.store_gateway_url,
            store_token = redact(self.store_gateway_token.is_some()),
            blob_aggregator = %self.blob_aggregator_url,
            api_keys = self.anthropic_api_keys.len(),
            model = %self.classifier_model,
            event_stream = self.event_stream_url.as_deref().unwrap_or("<unset>"),
            event_token = redact(self.event_stream_token.is_some()),
            cron_secret = redact(self.cron_secret.is_some()),
            creation_window_secs = self.windows.creation.as_secs(),
            resolution_window_secs = self.windows.resolution.as_secs(),
            retention_secs = self.windows.retention.as_secs(),
            sweep_secs = self.windows.sweep_every.as_secs(),
            publish_attempts = self.publisher.max_attempts,
            publish_base_delay_ms = self.publisher.base_delay.as_millis() as u64,
            "Configuration loaded"
        );
    }
}

fn redact(set: bool) -> &'static str {
    if set {
        "<set>"
    } else {
        "<unset>"
    }
}

/// Keep only variables whose name and value are valid Unicode.
fn collect_vars(vars: impl Iterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    non_empty(vars, key)
        .ok_or_else(|| MarketKeeperError::Config(format!("{key} environment variable is required")))
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T> {
    match non_empty(vars, key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| MarketKeeperError::Config(format!("{key} must be a number, got '{raw}'"))),
        None => Ok(default),
    }
}

fn secs_or(vars: &HashMap<String, String>, key: &str, default: Duration) -> Result<Duration> {
    parse_or(vars, key, default.as_secs()).map(Duration::from_secs)
}
