//! Bot configuration from `newsrelay.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`,
//! which is enough to run once a token is supplied through `DISCORD_TOKEN`.
//! Unknown keys are accepted but logged as warnings, since they are usually
//! typos.
use crate::commands::Module;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the bot token. Wins over the config file.
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Unknown module '{0}' in config (expected news, timeline or embeds)")]
    UnknownModule(String),

    #[error("'{0}' is required to start module '{1}'")]
    Missing(&'static str, Module),

    #[error("'{0}' has an invalid value: {1}")]
    Invalid(&'static str, String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level bot configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The `Debug` impl masks `token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot token. `DISCORD_TOKEN` takes precedence.
    pub token: Option<String>,

    /// Chat REST API root.
    pub api_base_url: String,

    /// JSON document holding feed categories and watermarks.
    pub feeds_file: PathBuf,

    pub poll_interval_minutes: u64,

    /// User allowed to manage modules in every guild.
    pub owner_id: Option<u64>,

    /// Channels read for `]` commands. Empty disables chat commands.
    pub command_channel_ids: Vec<u64>,

    /// Seconds between reads of the command channels.
    pub command_poll_secs: u64,

    /// Modules enabled at startup.
    pub modules: Vec<String>,

    pub news_channel_id: Option<u64>,
    pub announcement_channel_id: Option<u64>,

    /// Category keys of the feeds document posted to the news channel.
    pub news_categories: Vec<String>,

    /// Category keys posted to the announcement channel.
    pub announcement_categories: Vec<String>,

    pub timeline: Option<TimelineConfig>,
}

/// Social media account reposted into a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Defaults to the announcement channel.
    pub channel_id: Option<u64>,
    pub account_id: String,
    /// Base URL of the timeline JSON endpoint.
    pub endpoint: String,
    /// Posts requested per poll.
    pub count: usize,
    /// Longer videos are not reposted.
    pub max_video_secs: f64,
}

impl TimelineConfig {
    /// Rejects blank account ids and endpoints that are not absolute
    /// http(s) URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account_id.trim().is_empty() {
            return Err(ConfigError::Missing("timeline.account_id", Module::Timeline));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("timeline.endpoint", Module::Timeline));
        }
        match url::Url::parse(self.endpoint.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ConfigError::Invalid(
                "timeline.endpoint",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => Err(ConfigError::Invalid("timeline.endpoint", e.to_string())),
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            channel_id: None,
            account_id: String::new(),
            endpoint: String::new(),
            count: 11,
            max_video_secs: 120.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: crate::chat::DEFAULT_API_BASE_URL.to_string(),
            feeds_file: PathBuf::from("config/newsfeeds.json"),
            poll_interval_minutes: 10,
            owner_id: None,
            command_channel_ids: Vec::new(),
            command_poll_secs: 5,
            modules: vec!["news".to_string(), "embeds".to_string()],
            news_channel_id: None,
            announcement_channel_id: None,
            news_categories: vec!["sme".to_string(), "smj".to_string(), "sma".to_string()],
            announcement_categories: vec!["nob".to_string()],
            timeline: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("api_base_url", &self.api_base_url)
            .field("feeds_file", &self.feeds_file)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("owner_id", &self.owner_id)
            .field("command_channel_ids", &self.command_channel_ids)
            .field("command_poll_secs", &self.command_poll_secs)
            .field("modules", &self.modules)
            .field("news_channel_id", &self.news_channel_id)
            .field("announcement_channel_id", &self.announcement_channel_id)
            .field("news_categories", &self.news_categories)
            .field("announcement_categories", &self.announcement_categories)
            .field("timeline", &self.timeline)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 13] = [
        "token",
        "api_base_url",
        "feeds_file",
        "poll_interval_minutes",
        "owner_id",
        "command_channel_ids",
        "command_poll_secs",
        "modules",
        "news_channel_id",
        "announcement_channel_id",
        "news_categories",
        "announcement_categories",
        "timeline",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds_file = %config.feeds_file.display(),
            modules = ?config.modules,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Picks the token from `env_value` (normally `DISCORD_TOKEN`) or the
    /// config file, ignoring blank values.
    pub fn token(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.token.clone().filter(|t| !t.trim().is_empty()))
            .map(SecretString::from)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.max(1) * 60)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_secs(self.command_poll_secs.max(1))
    }

    /// Parses the `modules` list.
    pub fn enabled_modules(&self) -> Result<Vec<Module>, ConfigError> {
        self.modules
            .iter()
            .map(|name| {
                name.parse()
                    .map_err(|_| ConfigError::UnknownModule(name.clone()))
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
