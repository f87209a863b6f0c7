//! Reaction-driven message sessions.
//!
//! A session is a small state machine: it is opened by sending (or marking) a
//! message, then waits on an [`InputSource`] until the owner deletes it, the
//! message disappears, or the idle deadline passes.
//!
//! ```text
//! OPEN -> awaiting input -> { PAGED -> awaiting input, DELETED, EXPIRED, GONE }
//! ```
//!
//! Deciding what an input means ([`PageSession::apply`],
//! [`ConfirmSession::apply`]) performs no I/O, so the ownership and boundary
//! rules are testable without a chat client. The `run` drivers carry the
//! decision out against a [`ChatClient`].

use crate::chat::{
    ChannelId, ChatClient, ChatError, InputEvent, InputSource, InteractionHub, MessageHandle,
    SessionError, UserId,
};
use crate::render::RenderedMessage;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

pub const PREV: &str = "◀️";
pub const NEXT: &str = "▶️";
pub const DELETE: &str = "🗑️";
pub const ACKNOWLEDGE: &str = "✅";

/// Default idle window for paged messages.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(900);
/// Default idle window for delete confirmations.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PaginateError {
    #[error("Nothing to show")]
    NoPages,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// What a session should do in response to one input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Show page `i` (zero-based).
    Turn(usize),
    /// Clear the markers but keep listening.
    Acknowledge,
    /// Remove a marker that was not honored.
    Revert { user: UserId, marker: String },
    /// Delete the message(s) and end the session.
    Delete,
    /// The message was deleted elsewhere; end without touching it.
    Gone,
    /// Not for this session, or the bot's own marker.
    Ignore,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Deleted,
    Expired,
    Gone,
    /// The input source closed before anything else happened.
    Closed,
}

// ============================================================================
// Paged message
// ============================================================================

/// A list of messages shown one at a time in a single chat message.
#[derive(Debug)]
pub struct PageSession {
    handle: MessageHandle,
    owner: UserId,
    bot: UserId,
    pages: Vec<RenderedMessage>,
    current: usize,
    idle: Duration,
}

impl PageSession {
    /// Stamps "Page i of N" footers, sends the first page and adds the
    /// navigation markers.
    pub async fn open(
        client: &dyn ChatClient,
        channel: ChannelId,
        owner: UserId,
        bot: UserId,
        mut pages: Vec<RenderedMessage>,
        idle: Duration,
    ) -> Result<Self, PaginateError> {
        if pages.is_empty() {
            return Err(PaginateError::NoPages);
        }
        let total = pages.len();
        for (i, page) in pages.iter_mut().enumerate() {
            page.set_footer(format!("Page {} of {}", i + 1, total));
        }

        let handle = client.send_message(channel, &pages[0]).await?;
        client.add_marker(handle, PREV).await?;
        client.add_marker(handle, NEXT).await?;

        Ok(Self {
            handle,
            owner,
            bot,
            pages,
            current: 0,
            idle,
        })
    }

    pub fn handle(&self) -> MessageHandle {
        self.handle
    }

    pub fn current_page(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Decides what `event` means and moves the page cursor. No I/O.
    pub fn apply(&mut self, event: &InputEvent) -> Step {
        if event.message_id() != self.handle.message_id {
            return Step::Ignore;
        }
        let (user_id, emoji) = match event {
            InputEvent::MessageDeleted { .. } => return Step::Gone,
            InputEvent::Reaction { user_id, emoji, .. } => (*user_id, emoji.as_str()),
        };
        if user_id == self.bot {
            return Step::Ignore;
        }
        let revert = Step::Revert {
            user: user_id,
            marker: emoji.to_string(),
        };
        if user_id != self.owner {
            return revert;
        }

        match emoji {
            NEXT if self.current + 1 < self.pages.len() => {
                self.current += 1;
                Step::Turn(self.current)
            }
            PREV if self.current > 0 => {
                self.current -= 1;
                Step::Turn(self.current)
            }
            DELETE => Step::Delete,
            _ => revert,
        }
    }

    /// Drives the session until it ends.
    ///
    /// The idle deadline restarts only when the owner turns a page. On expiry
    /// the markers are cleared and the message stays.
    pub async fn run<I>(mut self, client: &dyn ChatClient, input: &mut I) -> Result<SessionEnd, ChatError>
    where
        I: InputSource + ?Sized,
    {
        let mut deadline = Instant::now() + self.idle;
        loop {
            let event = match timeout_at(deadline, input.next_event()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(SessionEnd::Closed),
                Err(_) => {
                    clear_session_markers(client, self.handle, &[PREV, NEXT, DELETE]).await;
                    tracing::debug!(message_id = self.handle.message_id, "Paged message expired");
                    return Ok(SessionEnd::Expired);
                }
            };

            match self.apply(&event) {
                Step::Turn(page) => {
                    client.edit_message(self.handle, &self.pages[page]).await?;
                    if let InputEvent::Reaction { user_id, emoji, .. } = &event {
                        client.remove_marker(self.handle, emoji, Some(*user_id)).await?;
                    }
                    deadline = Instant::now() + self.idle;
                }
                Step::Revert { user, marker } => {
                    client.remove_marker(self.handle, &marker, Some(user)).await?;
                }
                Step::Delete => {
                    client.delete_message(self.handle).await?;
                    return Ok(SessionEnd::Deleted);
                }
                Step::Gone => return Ok(SessionEnd::Gone),
                Step::Acknowledge | Step::Ignore => {}
            }
        }
    }
}

// ============================================================================
// Delete confirmation
// ============================================================================

/// Lets the owner dismiss the markers on, or delete, a batch of messages.
#[derive(Debug)]
pub struct ConfirmSession {
    messages: Vec<MessageHandle>,
    owner: UserId,
    bot: UserId,
    idle: Duration,
}

impl ConfirmSession {
    /// Puts the acknowledge and delete markers on the last message of the batch.
    pub async fn open(
        client: &dyn ChatClient,
        messages: Vec<MessageHandle>,
        owner: UserId,
        bot: UserId,
        idle: Duration,
    ) -> Result<Self, PaginateError> {
        let Some(&last) = messages.last() else {
            return Err(PaginateError::NoPages);
        };
        client.add_marker(last, ACKNOWLEDGE).await?;
        client.add_marker(last, DELETE).await?;
        Ok(Self {
            messages,
            owner,
            bot,
            idle,
        })
    }

    fn last(&self) -> MessageHandle {
        // open() refuses an empty batch
        self.messages[self.messages.len() - 1]
    }

    pub fn apply(&self, event: &InputEvent) -> Step {
        if event.message_id() != self.last().message_id {
            return Step::Ignore;
        }
        let (user_id, emoji) = match event {
            InputEvent::MessageDeleted { .. } => return Step::Gone,
            InputEvent::Reaction { user_id, emoji, .. } => (*user_id, emoji.as_str()),
        };
        if user_id == self.bot {
            return Step::Ignore;
        }
        match emoji {
            ACKNOWLEDGE if user_id == self.owner => Step::Acknowledge,
            DELETE if user_id == self.owner => Step::Delete,
            _ => Step::Revert {
                user: user_id,
                marker: emoji.to_string(),
            },
        }
    }

    pub async fn run<I>(self, client: &dyn ChatClient, input: &mut I) -> Result<SessionEnd, ChatError>
    where
        I: InputSource + ?Sized,
    {
        let last = self.last();
        let mut deadline = Instant::now() + self.idle;
        loop {
            let event = match timeout_at(deadline, input.next_event()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(SessionEnd::Closed),
                Err(_) => {
                    clear_session_markers(client, last, &[ACKNOWLEDGE, DELETE]).await;
                    return Ok(SessionEnd::Expired);
                }
            };

            match self.apply(&event) {
                Step::Acknowledge => {
                    client.clear_markers(last).await?;
                    deadline = Instant::now() + self.idle;
                }
                Step::Delete => {
                    for handle in &self.messages {
                        client.delete_message(*handle).await?;
                    }
                    return Ok(SessionEnd::Deleted);
                }
                Step::Revert { user, marker } => {
                    client.remove_marker(last, &marker, Some(user)).await?;
                }
                Step::Gone => return Ok(SessionEnd::Gone),
                Step::Turn(_) | Step::Ignore => {}
            }
        }
    }
}

/// Best-effort teardown: the bot's own markers, then everyone's.
async fn clear_session_markers(client: &dyn ChatClient, handle: MessageHandle, markers: &[&str]) {
    for marker in markers {
        if let Err(e) = client.remove_marker(handle, marker, None).await {
            tracing::debug!(error = %e, marker, "Could not remove own marker");
        }
    }
    if let Err(e) = client.clear_markers(handle).await {
        tracing::warn!(error = %e, message_id = handle.message_id, "Failed to clear markers");
    }
}

/// Opens a paged message and runs it to completion, taking its input from
/// `hub`.
pub async fn show_pages(
    client: &dyn ChatClient,
    hub: &InteractionHub,
    channel: ChannelId,
    owner: UserId,
    bot: UserId,
    pages: Vec<RenderedMessage>,
    idle: Duration,
) -> Result<SessionEnd, PaginateError> {
    let session = PageSession::open(client, channel, owner, bot, pages, idle).await?;
    let mut input = hub.register(session.handle().message_id)?;
    Ok(session.run(client, &mut input).await?)
}
