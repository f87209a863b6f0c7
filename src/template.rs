//! Messages built from user-supplied JSON templates.
//!
//! A template is an embed object exactly as the chat platform accepts it. It
//! is parsed only far enough to know it is a JSON object; everything else is
//! left for the platform to accept or reject.

use crate::chat::{ChannelId, ChatClient, ChatError, MessageHandle};
use crate::feed::{get_limited, FetchError};
use crate::render::RenderedMessage;
use crate::util::{validate_url, UrlValidationError};
use serde_json::Value;
use thiserror::Error;

/// Largest template the bot will download.
pub const MAX_TEMPLATE_SIZE: usize = 1024 * 1024; // 1MB

/// Failures reported back to whoever asked for the template.
///
/// `Display` is the reply text.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("The file was not a valid json file.")]
    Invalid { reason: String },
    #[error("You need to attach a valid json file.")]
    MissingAttachment,
    #[error("Could not download the file: {0}")]
    Download(#[from] FetchError),
    #[error("That file location is not allowed: {0}")]
    RejectedUrl(#[from] UrlValidationError),
    #[error("'{0}' is not a message link.")]
    InvalidLink(String),
    #[error("The chat platform refused the message: {0}")]
    Send(#[from] ChatError),
}

/// Parses a template. Any JSON object is accepted.
pub fn parse_template(bytes: &[u8]) -> Result<RenderedMessage, TemplateError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| TemplateError::Invalid {
        reason: e.to_string(),
    })?;
    if !value.is_object() {
        return Err(TemplateError::Invalid {
            reason: "top-level value is not an object".to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| TemplateError::Invalid {
        reason: e.to_string(),
    })
}

/// Sends the template to `channel`.
pub async fn create_from_template(
    client: &dyn ChatClient,
    bytes: &[u8],
    channel: ChannelId,
) -> Result<MessageHandle, TemplateError> {
    let message = parse_template(bytes)?;
    let handle = client.send_message(channel, &message).await?;
    tracing::info!(channel, message_id = handle.message_id, "Created message from template");
    Ok(handle)
}

/// Replaces the content of an existing message with the template.
pub async fn edit_from_template(
    client: &dyn ChatClient,
    bytes: &[u8],
    link: &MessageLink,
) -> Result<MessageHandle, TemplateError> {
    let message = parse_template(bytes)?;
    let handle = link.handle();
    client.edit_message(handle, &message).await?;
    tracing::info!(
        channel = handle.channel_id,
        message_id = handle.message_id,
        "Edited message from template"
    );
    Ok(handle)
}

/// A link to a message, as copied from the chat client:
/// `https://discord.com/channels/<guild>/<channel>/<message>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLink {
    pub channel_id: ChannelId,
    pub message_id: u64,
}

impl MessageLink {
    /// Reads the channel and message ids from the last two path segments.
    pub fn parse(link: &str) -> Result<Self, TemplateError> {
        let invalid = || TemplateError::InvalidLink(link.to_string());
        let mut segments = link.trim().trim_end_matches('/').rsplit('/');
        let message_id = segments
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;
        let channel_id = segments
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;
        Ok(Self {
            channel_id,
            message_id,
        })
    }

    pub fn handle(&self) -> MessageHandle {
        MessageHandle {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

/// Downloads template attachments.
#[derive(Clone)]
pub struct AttachmentFetcher {
    client: reqwest::Client,
    allow_private: bool,
}

impl AttachmentFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            allow_private: false,
        }
    }

    /// Skips the private address check. Only for local testing.
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, TemplateError> {
        if !self.allow_private {
            validate_url(url)?;
        }
        Ok(get_limited(&self.client, url, MAX_TEMPLATE_SIZE).await?)
    }
}
