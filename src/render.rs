//! Message rendering: turns normalized entries into chat embeds.
//!
//! [`RenderedMessage`] mirrors the platform's embed object. Every known field
//! is typed; unknown fields are kept in `extra` so user-supplied templates
//! reach the platform unchanged.

use crate::feed::{FeedEntry, ImageKind, MediaItem};
use crate::storage::FeedCategory;
use crate::util::{strip_control_chars, truncate_chars};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Platform limit for embed titles, in characters.
pub const MAX_TITLE_LENGTH: usize = 256;
/// Platform limit for embed descriptions, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

/// Thumbnail path segment some sources put in front of a downscaled image.
/// Dropping it yields the original resolution.
const LOW_RES_FRAGMENT: &str = "//w_205,h_115,q_70";

/// Colours used for timeline posts.
const TIMELINE_PALETTE: [u32; 7] = [
    8373350, 16569858, 15677476, 16359196, 16233938, 10207719, 14005905,
];

const TIMELINE_ICON_URL: &str = "https://cdn.sanity.io/images/g3qdmru2/production/016074ca8a2fbcdeed29522b3b236c37f056cffa-2400x2400.jpg?w=256&h=256";

// ============================================================================
// Embed Types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A formatted message ready for the chat platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    /// Fields this crate does not model (fields, thumbnail, provider, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RenderedMessage {
    pub fn set_footer(&mut self, text: impl Into<String>) {
        self.footer = Some(EmbedFooter {
            text: text.into(),
            ..Default::default()
        });
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// An entry that cannot be rendered. Aborts the whole cycle it occurs in.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Entry has no title")]
    MissingTitle,
    #[error("Entry '{0}' has no link")]
    MissingLink(String),
    #[error("Entry '{0}' has no publication date")]
    MissingTimestamp(String),
    #[error("Entry '{title}' has an out-of-range timestamp {ts}")]
    InvalidTimestamp { title: String, ts: i64 },
}

/// Renders one feed entry with its category's colour and author block.
///
/// Fails fast on entries missing a title, link, or date rather than sending a
/// partial message.
pub fn format_entry(entry: &FeedEntry, category: &FeedCategory) -> Result<RenderedMessage, FormatError> {
    let title = entry
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(FormatError::MissingTitle)?;
    let link = entry
        .link
        .clone()
        .ok_or_else(|| FormatError::MissingLink(title.to_string()))?;
    let ts = entry
        .published_at
        .ok_or_else(|| FormatError::MissingTimestamp(title.to_string()))?;
    let timestamp = to_datetime(ts).ok_or_else(|| FormatError::InvalidTimestamp {
        title: title.to_string(),
        ts,
    })?;

    let description = entry
        .summary
        .as_deref()
        .map(|s| truncate_chars(&strip_control_chars(s), MAX_DESCRIPTION_LENGTH).into_owned());

    Ok(RenderedMessage {
        title: Some(clean_title(title)),
        description,
        url: Some(link),
        color: Some(category.color),
        timestamp: Some(timestamp),
        author: Some(EmbedAuthor {
            name: category.name.clone(),
            url: Some(category.author_url.clone()),
            icon_url: Some(category.author_icon_url.clone()),
            ..Default::default()
        }),
        image: pick_image(entry).map(|url| EmbedImage {
            url,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Renders one timeline post.
pub fn format_media(item: &MediaItem) -> Result<RenderedMessage, FormatError> {
    let title = format!("@{} på instagram", item.username);
    if item.code.trim().is_empty() {
        return Err(FormatError::MissingLink(title));
    }

    let author_name = if item.full_name.is_empty() {
        item.username.clone()
    } else {
        item.full_name.clone()
    };

    Ok(RenderedMessage {
        title: Some(clean_title(&title)),
        description: Some(
            truncate_chars(&strip_control_chars(&item.caption), MAX_DESCRIPTION_LENGTH).into_owned(),
        )
        .filter(|d| !d.is_empty()),
        url: Some(format!("https://www.instagram.com/p/{}", item.code)),
        color: Some(palette_color(&item.code)),
        timestamp: Some(item.taken_at),
        author: Some(EmbedAuthor {
            name: author_name,
            url: Some(format!("https://www.instagram.com/{}/", item.username)),
            icon_url: Some(TIMELINE_ICON_URL.to_string()),
            ..Default::default()
        }),
        image: item.thumbnail_url.clone().map(|url| EmbedImage {
            url,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Chooses the embed image: the first media attachment, else the first
/// JPEG link. The low-resolution fragment is removed either way.
pub fn pick_image(entry: &FeedEntry) -> Option<String> {
    let media = entry.images.iter().find(|i| i.kind == ImageKind::Media);
    let jpeg = || {
        entry.images.iter().find(|i| {
            matches!(&i.kind, ImageKind::Link { media_type: Some(t) } if t == "image/jpeg")
        })
    };

    media
        .or_else(jpeg)
        .map(|i| i.url.replace(LOW_RES_FRAGMENT, ""))
}

fn clean_title(title: &str) -> String {
    truncate_chars(&strip_control_chars(title), MAX_TITLE_LENGTH).into_owned()
}

fn to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

fn palette_color(code: &str) -> u32 {
    let digest = Sha256::digest(code.as_bytes());
    TIMELINE_PALETTE[digest[0] as usize % TIMELINE_PALETTE.len()]
}
