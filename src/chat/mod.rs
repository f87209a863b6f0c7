//! The chat platform as seen by the bot.
//!
//! Everything that talks to the platform goes through [`ChatClient`], and
//! every user interaction a session waits for arrives through an
//! [`InputSource`]. Both are traits so pagination, scheduling and template
//! handling can be driven by in-memory fakes in tests.

mod discord;
mod hub;
#[cfg(test)]
pub(crate) mod fake;

pub use discord::{DiscordClient, DEFAULT_API_BASE_URL};
pub use hub::{ChannelInputSource, InteractionHub, Registration, SessionError};

use crate::render::RenderedMessage;
use async_trait::async_trait;
use thiserror::Error;

pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// Identifies a message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The platform answered with a non-2xx status
    #[error("Chat API error: status {status}: {body}")]
    Api { status: u16, body: String },
    /// The platform answered with something we could not read
    #[error("Unexpected chat API response: {0}")]
    Decode(String),
}

/// Outbound operations on the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Resolves once the platform connection is usable, returning the bot's
    /// own user id.
    async fn wait_until_ready(&self) -> Result<UserId, ChatError>;

    async fn send_message(
        &self,
        channel: ChannelId,
        message: &RenderedMessage,
    ) -> Result<MessageHandle, ChatError>;

    /// Sends a plain text message (command replies, error reports).
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageHandle, ChatError>;

    async fn edit_message(
        &self,
        handle: MessageHandle,
        message: &RenderedMessage,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), ChatError>;

    /// Adds an interaction marker (a reaction) as the bot.
    async fn add_marker(&self, handle: MessageHandle, marker: &str) -> Result<(), ChatError>;

    /// Removes one marker. `user == None` removes the bot's own marker.
    async fn remove_marker(
        &self,
        handle: MessageHandle,
        marker: &str,
        user: Option<UserId>,
    ) -> Result<(), ChatError>;

    /// Removes every marker from the message.
    async fn clear_markers(&self, handle: MessageHandle) -> Result<(), ChatError>;
}

/// A message posted by someone in a channel the bot reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author: UserId,
    /// Posted by a bot account, the bot itself included.
    pub author_is_bot: bool,
    pub content: String,
    /// URL of the first attached file.
    pub attachment_url: Option<String>,
}

/// Inbound reads from the chat platform.
#[async_trait]
pub trait ChatInbox: Send + Sync {
    /// Returns up to `limit` messages posted after `after`, in any order.
    /// With `after == None` the most recent messages are returned.
    async fn messages_after(
        &self,
        channel: ChannelId,
        after: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<IncomingMessage>, ChatError>;

    /// Owner of the guild `channel` belongs to; `None` for direct messages.
    async fn guild_owner(&self, channel: ChannelId) -> Result<Option<UserId>, ChatError>;
}

/// A user interaction relevant to a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A user placed a marker on a message.
    Reaction {
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },
    /// The message was deleted by someone other than the session.
    MessageDeleted { message_id: MessageId },
}

impl InputEvent {
    pub fn message_id(&self) -> MessageId {
        match self {
            InputEvent::Reaction { message_id, .. } => *message_id,
            InputEvent::MessageDeleted { message_id } => *message_id,
        }
    }
}

/// Stream of input events for one session. `None` means the source closed
/// and no further input will arrive.
#[async_trait]
pub trait InputSource: Send {
    async fn next_event(&mut self) -> Option<InputEvent>;
}
