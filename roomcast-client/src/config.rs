//! Session configuration

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::capture::CaptureConstraints;

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub signaling: SignalingConfig,
    pub publish: PublishConfig,
    pub subscription: SubscriptionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Upper bound for every signaling round-trip
    pub request_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// What to do when one local track fails to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Fail the whole publish step on the first failed track
    #[default]
    Abort,
    /// Skip failed tracks; fail only if nothing was published
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub audio: bool,
    pub video: bool,
    pub policy: PublishPolicy,
    /// When false, a publish failure leaves the session running receive-only
    pub required: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            policy: PublishPolicy::Abort,
            required: true,
        }
    }
}

impl PublishConfig {
    #[must_use]
    pub const fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            audio: self.audio,
            video: self.video,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Subscriptions in flight during the initial enumeration (1 = sequential)
    pub enumeration_concurrency: usize,
    /// Upper bound for the engine-side consume call
    pub consume_timeout_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enumeration_concurrency: 1,
            consume_timeout_ms: 10_000,
        }
    }
}

impl SubscriptionConfig {
    #[must_use]
    pub const fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_timeout_ms)
    }
}

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, for log shipping
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Append to this file instead of writing to stdout
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

impl LoggingConfig {
    /// Default verbosity, or `None` if `level` is not a level name
    #[must_use]
    pub fn level_filter(&self) -> Option<LevelFilter> {
        match self.level.to_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "trace" => Some(LevelFilter::TRACE),
            "debug" => Some(LevelFilter::DEBUG),
            "info" => Some(LevelFilter::INFO),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "error" => Some(LevelFilter::ERROR),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    ///
    /// Nested keys use a double underscore:
    /// `ROOMCAST_SIGNALING__REQUEST_TIMEOUT_MS=5000`.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Parse an in-memory TOML document on top of the defaults
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Check for values that would make the session unusable
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.signaling.request_timeout_ms == 0 {
            errors.push("signaling.request_timeout_ms must be greater than 0".to_string());
        }
        if self.subscription.consume_timeout_ms == 0 {
            errors.push("subscription.consume_timeout_ms must be greater than 0".to_string());
        }
        if self.subscription.enumeration_concurrency == 0 {
            errors.push("subscription.enumeration_concurrency must be at least 1".to_string());
        }
        if !self.publish.audio && !self.publish.video {
            errors.push("publish must enable at least one of audio or video".to_string());
        }
        if self.logging.level_filter().is_none() {
            errors.push(format!("logging.level '{}' is not a log level", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
