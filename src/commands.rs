//! Text commands and the module registry.
//!
//! Commands start with `]`:
//!
//! | Command | Who | Effect |
//! |---------|-----|--------|
//! | `]add_cog <module>` | host or guild owner | enable a module |
//! | `]remove_cog <module>` | host or guild owner | disable a module |
//! | `]create_embed [channel_id]` | anyone | send the attached template |
//! | `]edit_embed <message_link>` | anyone | replace a message with the attached template |
//! | `]insta_post <post_link> [channel_id]` | anyone | repost one timeline post |
//!
//! The embed commands only answer while the `embeds` module is enabled, and
//! `insta_post` only while `timeline` is enabled and a timeline endpoint is
//! configured.
//!
//! [`CommandInbox`] feeds the router by polling the configured command
//! channels.

use crate::chat::{ChannelId, ChatClient, ChatError, ChatInbox, IncomingMessage, MessageId, UserId};
use crate::config::Config;
use crate::feed::{post_code, FetchError, TimelineFetcher};
use crate::render::{format_media, FormatError};
use crate::template::{
    create_from_template, edit_from_template, AttachmentFetcher, MessageLink, TemplateError,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const PREFIX: char = ']';

/// Messages read per channel and poll.
const INBOX_BATCH: u8 = 50;

// ============================================================================
// Modules
// ============================================================================

/// A feature that can be switched on and off at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Module {
    /// RSS news and announcement groups.
    News,
    /// Social media reposts.
    Timeline,
    /// Template embed commands.
    Embeds,
}

impl Module {
    pub const ALL: [Module; 3] = [Module::News, Module::Timeline, Module::Embeds];

    pub fn name(self) -> &'static str {
        match self {
            Module::News => "news",
            Module::Timeline => "timeline",
            Module::Embeds => "embeds",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Module {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CommandError::UnknownModule(s.to_string()))
    }
}

/// The set of enabled modules, shared between the command router and the
/// periodic tasks that consult it before each tick.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    enabled: Arc<Mutex<BTreeSet<Module>>>,
}

impl ModuleRegistry {
    pub fn new(initial: impl IntoIterator<Item = Module>) -> Self {
        Self {
            enabled: Arc::new(Mutex::new(initial.into_iter().collect())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<Module>> {
        self.enabled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `false` when the module was already enabled.
    pub fn enable(&self, module: Module) -> bool {
        self.lock().insert(module)
    }

    /// Returns `false` when the module was not enabled.
    pub fn disable(&self, module: Module) -> bool {
        self.lock().remove(&module)
    }

    pub fn is_enabled(&self, module: Module) -> bool {
        self.lock().contains(&module)
    }

    pub fn enabled(&self) -> Vec<Module> {
        self.lock().iter().copied().collect()
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Command failures. `Display` is the reply sent to the user.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("You are not allowed to manage modules.")]
    NotAllowed,
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Unknown module '{0}'. Available modules: news, timeline, embeds.")]
    UnknownModule(String),
    #[error("'{0}' is not a channel id.")]
    InvalidChannel(String),
    #[error("'{0}' is not a post link.")]
    InvalidPostLink(String),
    #[error("Could not fetch the post: {0}")]
    Fetch(#[from] FetchError),
    #[error("Could not build the post message: {0}")]
    Format(#[from] FormatError),
    #[error("Could not send the post: {0}")]
    Send(#[source] ChatError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Where a command came from.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub channel: ChannelId,
    pub author: UserId,
    /// Owner of the guild the command was sent in; `None` in direct messages.
    pub guild_owner: Option<UserId>,
    /// URL of the first file attached to the command message.
    pub attachment_url: Option<String>,
}

pub struct CommandRouter {
    client: Arc<dyn ChatClient>,
    attachments: AttachmentFetcher,
    modules: ModuleRegistry,
    owner_id: Option<UserId>,
    timeline: Option<Arc<dyn TimelineFetcher>>,
}

impl CommandRouter {
    pub fn new(
        client: Arc<dyn ChatClient>,
        attachments: AttachmentFetcher,
        modules: ModuleRegistry,
        owner_id: Option<UserId>,
    ) -> Self {
        Self {
            client,
            attachments,
            modules,
            owner_id,
            timeline: None,
        }
    }

    /// Router with the host owner taken from `config`.
    pub fn from_config(
        config: &Config,
        client: Arc<dyn ChatClient>,
        http: reqwest::Client,
        modules: ModuleRegistry,
    ) -> Self {
        Self::new(client, AttachmentFetcher::new(http), modules, config.owner_id)
    }

    /// Enables `insta_post`, fetching posts through `fetcher`.
    pub fn with_timeline(mut self, fetcher: Arc<dyn TimelineFetcher>) -> Self {
        self.timeline = Some(fetcher);
        self
    }

    /// Runs `text` if it is a known command, replying in the command's
    /// channel when there is something to say.
    ///
    /// Returns `Ok(false)` for anything that is not a command this router
    /// answers. User mistakes are replied to, not returned; only a failure to
    /// deliver the reply is an error.
    pub async fn handle(&self, ctx: &CommandContext, text: &str) -> Result<bool, ChatError> {
        let Some(rest) = text.trim_start().strip_prefix(PREFIX) else {
            return Ok(false);
        };
        let mut words = rest.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(false);
        };
        let args: Vec<&str> = words.collect();

        let result = match name {
            "add_cog" => self.manage_module(ctx, &args, true),
            "remove_cog" => self.manage_module(ctx, &args, false),
            "create_embed" if self.modules.is_enabled(Module::Embeds) => {
                self.create_embed(ctx, &args).await
            }
            "edit_embed" if self.modules.is_enabled(Module::Embeds) => {
                self.edit_embed(ctx, &args).await
            }
            "insta_post" if self.modules.is_enabled(Module::Timeline) => {
                match &self.timeline {
                    Some(fetcher) => self.insta_post(ctx, &args, fetcher.as_ref()).await,
                    None => return Ok(false),
                }
            }
            _ => return Ok(false),
        };

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => return Ok(true),
            Err(e) => {
                tracing::info!(command = name, user = ctx.author, error = ?e, "Command failed");
                e.to_string()
            }
        };
        self.client.send_text(ctx.channel, &reply).await?;
        Ok(true)
    }

    fn is_manager(&self, ctx: &CommandContext) -> bool {
        Some(ctx.author) == self.owner_id || Some(ctx.author) == ctx.guild_owner
    }

    fn manage_module(
        &self,
        ctx: &CommandContext,
        args: &[&str],
        enable: bool,
    ) -> Result<Option<String>, CommandError> {
        if !self.is_manager(ctx) {
            return Err(CommandError::NotAllowed);
        }
        let usage = if enable {
            "]add_cog <module>"
        } else {
            "]remove_cog <module>"
        };
        let module: Module = args.first().ok_or(CommandError::Usage(usage))?.parse()?;

        let reply = if enable {
            self.modules.enable(module);
            tracing::info!(%module, user = ctx.author, "Module enabled");
            format!("Added cog {module}.")
        } else {
            self.modules.disable(module);
            tracing::info!(%module, user = ctx.author, "Module disabled");
            format!("Removed cog {module}.")
        };
        Ok(Some(reply))
    }

    async fn download_attachment(&self, ctx: &CommandContext) -> Result<Vec<u8>, CommandError> {
        let url = ctx
            .attachment_url
            .as_deref()
            .ok_or(TemplateError::MissingAttachment)?;
        Ok(self.attachments.fetch(url).await?)
    }

    async fn create_embed(
        &self,
        ctx: &CommandContext,
        args: &[&str],
    ) -> Result<Option<String>, CommandError> {
        let channel = target_channel(ctx, args.first())?;
        let bytes = self.download_attachment(ctx).await?;
        create_from_template(self.client.as_ref(), &bytes, channel).await?;
        Ok(None)
    }

    async fn edit_embed(
        &self,
        ctx: &CommandContext,
        args: &[&str],
    ) -> Result<Option<String>, CommandError> {
        let link = args
            .first()
            .ok_or(CommandError::Usage("]edit_embed <message_link>"))?;
        let link = MessageLink::parse(link)?;
        let bytes = self.download_attachment(ctx).await?;
        edit_from_template(self.client.as_ref(), &bytes, &link).await?;
        Ok(None)
    }

    async fn insta_post(
        &self,
        ctx: &CommandContext,
        args: &[&str],
        fetcher: &dyn TimelineFetcher,
    ) -> Result<Option<String>, CommandError> {
        let link = args
            .first()
            .ok_or(CommandError::Usage("]insta_post <post_link> [channel_id]"))?;
        let code = post_code(link).ok_or_else(|| CommandError::InvalidPostLink(link.to_string()))?;
        let channel = target_channel(ctx, args.get(1))?;

        let item = fetcher.fetch_post(&code).await?;
        let message = format_media(&item)?;
        self.client
            .send_message(channel, &message)
            .await
            .map_err(CommandError::Send)?;
        tracing::info!(code = %code, channel, user = ctx.author, "Reposted timeline post");
        Ok(None)
    }
}

/// The channel named by `arg`, or the one the command came from.
fn target_channel(ctx: &CommandContext, arg: Option<&&str>) -> Result<ChannelId, CommandError> {
    match arg {
        Some(arg) => arg
            .parse()
            .map_err(|_| CommandError::InvalidChannel(arg.to_string())),
        None => Ok(ctx.channel),
    }
}

// ============================================================================
// Inbox
// ============================================================================

/// Polls command channels and hands new commands to a [`CommandRouter`].
///
/// Messages already in a channel when polling starts are never run. Messages
/// from bot accounts are skipped.
pub struct CommandInbox {
    inbox: Arc<dyn ChatInbox>,
    router: CommandRouter,
    channels: Vec<ChannelId>,
    period: Duration,
}

/// Read position of one channel.
#[derive(Debug, Default)]
struct ChannelCursor {
    /// Newest message seen; `None` until the backlog has been skipped.
    last_seen: Option<MessageId>,
    /// `None` in direct messages. Looked up once.
    guild_owner: Option<Option<UserId>>,
}

impl CommandInbox {
    pub fn new(
        inbox: Arc<dyn ChatInbox>,
        router: CommandRouter,
        channels: Vec<ChannelId>,
        period: Duration,
    ) -> Self {
        Self {
            inbox,
            router,
            channels,
            period,
        }
    }

    /// Polls every `period` until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ChatError> {
        let mut cursors: HashMap<ChannelId, ChannelCursor> = self
            .channels
            .iter()
            .map(|&c| (c, ChannelCursor::default()))
            .collect();
        tracing::info!(channels = ?self.channels, period_secs = self.period.as_secs(), "Command inbox started");

        let mut timer = interval_at(Instant::now(), self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            for &channel in &self.channels {
                let cursor = cursors.entry(channel).or_default();
                if let Err(e) = self.poll_channel(channel, cursor).await {
                    tracing::warn!(channel, error = %e, "Failed to read command channel");
                }
            }
        }

        tracing::info!("Command inbox stopped");
        Ok(())
    }

    async fn poll_channel(&self, channel: ChannelId, cursor: &mut ChannelCursor) -> Result<(), ChatError> {
        let Some(last_seen) = cursor.last_seen else {
            let newest = self.inbox.messages_after(channel, None, 1).await?;
            cursor.last_seen = Some(newest.iter().map(|m| m.id).max().unwrap_or(0));
            return Ok(());
        };

        let mut messages = self
            .inbox
            .messages_after(channel, Some(last_seen), INBOX_BATCH)
            .await?;
        messages.retain(|m| m.id > last_seen);
        messages.sort_by_key(|m| m.id);

        for message in messages {
            let is_command =
                !message.author_is_bot && message.content.trim_start().starts_with(PREFIX);
            if !is_command {
                cursor.last_seen = Some(message.id);
                continue;
            }
            // A failed lookup leaves the command unread for the next poll
            let guild_owner = match cursor.guild_owner {
                Some(owner) => owner,
                None => {
                    let owner = self.inbox.guild_owner(channel).await?;
                    cursor.guild_owner = Some(owner);
                    owner
                }
            };
            cursor.last_seen = Some(message.id);
            self.dispatch(message, guild_owner).await;
        }
        Ok(())
    }

    async fn dispatch(&self, message: IncomingMessage, guild_owner: Option<UserId>) {
        let ctx = CommandContext {
            channel: message.channel_id,
            author: message.author,
            guild_owner,
            attachment_url: message.attachment_url,
        };
        match self.router.handle(&ctx, &message.content).await {
            Ok(true) => tracing::debug!(message_id = message.id, "Command handled"),
            Ok(false) => {}
            Err(e) => tracing::warn!(message_id = message.id, error = %e, "Failed to reply to command"),
        }
    }
}
