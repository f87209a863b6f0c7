use crate::feed::FilterRule;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Failures reading or writing the feeds document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{0}' must contain a JSON object at the top level")]
    NotAnObject(PathBuf),

    #[error("Category '{key}' is malformed: {source}")]
    InvalidCategory {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Category '{0}' is not defined in the feeds file")]
    MissingCategory(String),

    #[error("Watermark '{0}' is not an integer")]
    InvalidWatermark(String),
}

// ============================================================================
// Feed Categories
// ============================================================================

/// A configured feed source plus its display metadata and filtering rule.
///
/// Field names on disk follow the historical feeds file layout:
/// `{ "name", "rss", "color", "url", "icon_url" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCategory {
    /// Display name, also used as the author name of rendered messages.
    pub name: String,
    #[serde(rename = "rss")]
    pub source_url: String,
    pub color: u32,
    #[serde(rename = "url")]
    pub author_url: String,
    #[serde(rename = "icon_url")]
    pub author_icon_url: String,
    /// `None` means every entry of the feed belongs to this category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<FilterRule>,
}

// ============================================================================
// Watermarks
// ============================================================================

/// Timestamp of the most recently dispatched entry of a feed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkState {
    /// Unix seconds, or [`WatermarkState::NEVER`].
    pub last_seen: i64,
}

impl WatermarkState {
    /// Sentinel stored before the first successful dispatch.
    pub const NEVER: i64 = -1;

    pub fn new(last_seen: i64) -> Self {
        Self { last_seen }
    }

    pub fn never() -> Self {
        Self::new(Self::NEVER)
    }

    pub fn is_set(&self) -> bool {
        self.last_seen != Self::NEVER
    }

    /// Replaces the "never set" sentinel with `now`, so the first run does not
    /// flood the channel with the feed's backlog.
    pub fn resolve(self, now: i64) -> Self {
        if self.is_set() {
            self
        } else {
            Self::new(now)
        }
    }

    /// Moves the watermark forward to `ts`. Never moves it backwards.
    pub fn advance(self, ts: i64) -> Self {
        Self::new(self.last_seen.max(ts))
    }
}
