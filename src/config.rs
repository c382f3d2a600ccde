//! Configuration for the relay.
//!
//! Loaded once at startup from a TOML file with `${VAR}` environment variable
//! substitution. Anything missing or malformed is a startup failure; the
//! relay never runs on partial configuration.
//!
//! # Example
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "pretty"
//!
//! [relay]
//! mode = "trigger"            # or "republish"
//! dead_letter_topic = "dlq"
//!
//! [source]
//! kind = "redis"              # or "http"
//! channels = ["github"]
//!
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [trigger]
//! username = "ci"
//! api_token = "${JENKINS_API_TOKEN}"
//! url_template = "http://jenkins:8080/job/%s/build"
//!
//! [filter]
//! branch = "master"
//! branch_match = "contains"   # or "exact"
//! pull_request_action = "opened"
//!
//! [routes]
//! "github" = "events.github"
//! ```

use crate::filter::{BranchMatch, FilterPolicy, DEFAULT_BRANCH, DEFAULT_PULL_REQUEST_ACTION};
use crate::routes::{RouteTable, DEAD_LETTER_TOPIC};
use crate::trigger::TriggerConfig;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "WEBHOOK_BRIDGE_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/webhook-bridge.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid substitution pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub trigger: TriggerSection,

    #[serde(default)]
    pub filter: FilterSection,

    /// Inbound channel -> outbound topic, used by the republish relay
    #[serde(default)]
    pub routes: HashMap<String, String>,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Which downstream action the relay runs
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Call the build server for qualifying push events
    #[default]
    Trigger,

    /// Forward every message to the bus topic routed from its channel
    Republish,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default)]
    pub mode: RelayMode,

    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,

    /// Seconds to wait for in-flight dispatches on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::default(),
            dead_letter_topic: default_dead_letter_topic(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_dead_letter_topic() -> String {
    DEAD_LETTER_TOPIC.to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Inbound transport
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Consume Redis streams, one per channel
    #[default]
    Redis,

    /// Accept `POST /hooks/{channel}` over HTTP
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Channels (stream names) to subscribe to
    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Consumer name within the group (default: derived from the hostname)
    #[serde(default)]
    pub consumer_name: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            channels: Vec::new(),
            consumer_group: default_consumer_group(),
            consumer_name: None,
        }
    }
}

fn default_consumer_group() -> String {
    "webhook_bridge".to_string()
}

/// HTTP ingress configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on `POST /hooks/{channel}` when set
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Build server credentials, validated into a [`TriggerConfig`]
#[derive(Deserialize, Clone, Default)]
pub struct TriggerSection {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub api_token: String,

    /// Job URL with one `%s` for the job name
    #[serde(default)]
    pub url_template: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl std::fmt::Debug for TriggerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerSection")
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .field("url_template", &self.url_template)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

fn default_timeout_ms() -> u64 {
    10000
}

/// Push and pull-request filter tokens
#[derive(Debug, Deserialize, Clone)]
pub struct FilterSection {
    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub branch_match: BranchMatch,

    #[serde(default = "default_pull_request_action")]
    pub pull_request_action: String,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            branch_match: BranchMatch::default(),
            pull_request_action: default_pull_request_action(),
        }
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_pull_request_action() -> String {
    DEFAULT_PULL_REQUEST_ACTION.to_string()
}

impl BridgeConfig {
    /// Load configuration from [`CONFIG_PATH_ENV`] or the default path.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    ///
    /// A missing file yields the defaults, which still have to pass
    /// validation (trigger mode needs credentials, so it won't).
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let config = if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            let content = fs::read_to_string(path)?;
            Self::parse(&content)?
        } else {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            Self::default()
        };

        config.validate()?;

        info!(
            mode = ?config.relay.mode,
            source = ?config.source.kind,
            channels = config.source.channels.len(),
            routes = config.routes.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse TOML content after environment substitution, without validating.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        debug!("Parsing TOML configuration");
        Ok(toml::from_str(&content)?)
    }

    /// Check everything the selected mode and source need.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.relay.mode {
            RelayMode::Trigger => {
                self.trigger_config()?;
                if self.filter.branch.is_empty() {
                    return Err(ConfigError::MissingField("filter.branch".into()));
                }
                if self.filter.pull_request_action.is_empty() {
                    return Err(ConfigError::MissingField(
                        "filter.pull_request_action".into(),
                    ));
                }
            }
            RelayMode::Republish => {
                if self.routes.is_empty() {
                    return Err(ConfigError::MissingField("routes".into()));
                }
                if let Some((channel, _)) = self.routes.iter().find(|(_, topic)| topic.is_empty())
                {
                    return Err(ConfigError::ValidationError(format!(
                        "route for channel '{}' has an empty topic",
                        channel
                    )));
                }
                if self.relay.dead_letter_topic.is_empty() {
                    return Err(ConfigError::MissingField("relay.dead_letter_topic".into()));
                }
            }
        }

        if self.source.kind == SourceKind::Redis {
            if self.source.channels.is_empty() {
                return Err(ConfigError::MissingField("source.channels".into()));
            }
            if self.source.consumer_group.is_empty() {
                return Err(ConfigError::MissingField("source.consumer_group".into()));
            }
        }

        let needs_redis =
            self.source.kind == SourceKind::Redis || self.relay.mode == RelayMode::Republish;
        if needs_redis && !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://")
        {
            return Err(ConfigError::ValidationError(
                "redis.url must start with redis:// or rediss://".into(),
            ));
        }

        Ok(())
    }

    /// Validated build server configuration
    pub fn trigger_config(&self) -> Result<TriggerConfig, ConfigError> {
        let section = &self.trigger;
        for (field, value) in [
            ("trigger.username", &section.username),
            ("trigger.api_token", &section.api_token),
            ("trigger.url_template", &section.url_template),
        ] {
            if value.contains("${") {
                return Err(ConfigError::ValidationError(format!(
                    "{} contains an unsubstituted environment variable",
                    field
                )));
            }
        }

        TriggerConfig::new(
            section.username.clone(),
            section.api_token.clone(),
            section.url_template.clone(),
        )
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger.timeout_ms)
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy::new(
            self.filter.branch.clone(),
            self.filter.branch_match,
            self.filter.pull_request_action.clone(),
        )
    }

    pub fn route_table(&self) -> RouteTable {
        RouteTable::new(self.routes.clone()).with_dead_letter_topic(&self.relay.dead_letter_topic)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.shutdown_timeout_secs)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;

    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string())
}
