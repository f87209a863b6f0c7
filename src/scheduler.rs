//! Periodic feed polling.
//!
//! A [`FeedGroup`] is a set of sources posting into one channel under one
//! watermark. A tick of a group is:
//!
//! ```text
//! load watermark -> collect from every source -> sort oldest first
//!     -> send in order -> advance and commit watermark
//! ```
//!
//! Any fetch or format failure aborts the group's tick before anything is
//! sent, leaving the watermark where it was so the same entries are retried
//! next time. Groups are independent: one group failing does not stop the
//! others.
//!
//! [`PeriodicTask`] runs ticks on a timer. A tick is awaited inline, so two
//! ticks of the same task never overlap.

use crate::chat::{ChannelId, ChatClient, ChatError};
use crate::commands::{Module, ModuleRegistry};
use crate::feed::{
    detect_new, filter_entries, filter_new_media, out_of_order_after_cutoff, FeedFetcher,
    FetchError, TimelineFetcher,
};
use crate::render::{format_entry, format_media, FormatError, RenderedMessage};
use crate::storage::{FeedCategory, PersistenceError, StateStore, WatermarkState};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Default polling period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Fetching '{source_name}' failed: {error}")]
    Fetch {
        source_name: String,
        #[source]
        error: FetchError,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Sending stopped after {sent} message(s): {error}")]
    Send {
        sent: usize,
        #[source]
        error: ChatError,
    },
}

/// One formatted message with the timestamp that orders it.
pub type Dispatch = (RenderedMessage, i64);

/// Something that yields messages newer than a watermark.
#[async_trait]
pub trait EntrySource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns the new messages, newest first.
    async fn collect(&self, watermark: i64) -> Result<Vec<Dispatch>, CycleError>;
}

// ============================================================================
// Sources
// ============================================================================

/// An RSS/Atom feed narrowed down to one category.
pub struct RssSource {
    category: FeedCategory,
    fetcher: Arc<dyn FeedFetcher>,
}

impl RssSource {
    pub fn new(category: FeedCategory, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self { category, fetcher }
    }
}

#[async_trait]
impl EntrySource for RssSource {
    fn name(&self) -> &str {
        &self.category.name
    }

    async fn collect(&self, watermark: i64) -> Result<Vec<Dispatch>, CycleError> {
        let entries = self
            .fetcher
            .fetch(&self.category.source_url)
            .await
            .map_err(|error| CycleError::Fetch {
                source_name: self.category.name.clone(),
                error,
            })?;

        let entries = filter_entries(entries, &self.category);

        let late = out_of_order_after_cutoff(&entries, watermark);
        if late > 0 {
            tracing::warn!(
                source = %self.category.name,
                skipped = late,
                watermark,
                "Feed is not sorted newest first; entries after the cutoff are skipped"
            );
        }

        detect_new(entries, watermark)
            .iter()
            .map(|entry| -> Result<Dispatch, CycleError> {
                let message = format_entry(entry, &self.category)?;
                // format_entry refuses entries without a date
                let ts = message.timestamp.map_or(watermark, |t| t.timestamp());
                Ok((message, ts))
            })
            .collect()
    }
}

/// A social media account's posts.
pub struct TimelineSource {
    fetcher: Arc<dyn TimelineFetcher>,
    account_id: String,
    count: usize,
    max_video_secs: f64,
    name: String,
}

impl TimelineSource {
    pub fn new(
        fetcher: Arc<dyn TimelineFetcher>,
        account_id: impl Into<String>,
        count: usize,
        max_video_secs: f64,
    ) -> Self {
        let account_id = account_id.into();
        Self {
            fetcher,
            name: format!("timeline:{account_id}"),
            account_id,
            count,
            max_video_secs,
        }
    }
}

#[async_trait]
impl EntrySource for TimelineSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, watermark: i64) -> Result<Vec<Dispatch>, CycleError> {
        let items = self
            .fetcher
            .fetch_timeline(&self.account_id, self.count)
            .await
            .map_err(|error| CycleError::Fetch {
                source_name: self.name.clone(),
                error,
            })?;

        filter_new_media(items, watermark, self.max_video_secs)
            .iter()
            .map(|item| -> Result<Dispatch, CycleError> {
                Ok((format_media(item)?, item.taken_at.timestamp()))
            })
            .collect()
    }
}

// ============================================================================
// Feed Groups
// ============================================================================

/// Sources sharing one target channel and one watermark.
pub struct FeedGroup {
    name: String,
    channel: ChannelId,
    store: Box<dyn StateStore>,
    sources: Vec<Box<dyn EntrySource>>,
}

impl FeedGroup {
    pub fn new(name: impl Into<String>, channel: ChannelId, store: Box<dyn StateStore>) -> Self {
        Self {
            name: name.into(),
            channel,
            store,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl EntrySource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loads the watermark, committing `now` first if it was never set.
    pub fn prime(&self, now: i64) -> Result<WatermarkState, PersistenceError> {
        let state = self.store.load()?;
        if state.is_set() {
            return Ok(state);
        }
        let resolved = state.resolve(now);
        self.store.commit(resolved)?;
        tracing::info!(group = %self.name, watermark = resolved.last_seen, "Initialized watermark");
        Ok(resolved)
    }

    /// Runs one tick and returns how many messages were sent.
    ///
    /// On a send failure the watermark still advances past what was
    /// delivered. On a commit failure the stored watermark keeps its previous
    /// value, so the delivered messages will be sent again.
    pub async fn tick(&self, client: &dyn ChatClient, now: i64) -> Result<usize, CycleError> {
        let before = self.prime(now)?;

        let mut batch = Vec::new();
        for source in &self.sources {
            let found = source.collect(before.last_seen).await?;
            tracing::debug!(group = %self.name, source = source.name(), new = found.len(), "Collected");
            // Sources list newest first; reversed so ties go out oldest first
            batch.extend(found.into_iter().rev());
        }
        // Stable: equal timestamps keep the order built above
        batch.sort_by_key(|(_, ts)| *ts);

        let mut after = before;
        let mut sent = 0;
        let mut failure = None;
        for (message, ts) in &batch {
            match client.send_message(self.channel, message).await {
                Ok(_) => {
                    after = after.advance(*ts);
                    sent += 1;
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if after != before {
            self.store.commit(after)?;
        }
        if let Some(error) = failure {
            return Err(CycleError::Send { sent, error });
        }
        Ok(sent)
    }
}

/// Ticks every group concurrently on the current task and logs the outcome.
/// Returns the total number of messages sent.
pub async fn tick_groups(groups: &[FeedGroup], client: &dyn ChatClient, now: i64) -> usize {
    let results = join_all(groups.iter().map(|g| g.tick(client, now))).await;
    let mut total = 0;
    for (group, result) in groups.iter().zip(results) {
        match result {
            Ok(sent) => {
                total += sent;
                if sent > 0 {
                    tracing::info!(group = %group.name, sent, "Posted new entries");
                }
            }
            Err(CycleError::Send { sent, error }) => {
                total += sent;
                tracing::warn!(group = %group.name, sent, error = %error, "Posting interrupted");
            }
            Err(CycleError::Persistence(error)) => {
                tracing::error!(group = %group.name, error = %error, "Failed to save watermark; tick rolled back");
            }
            Err(error) => {
                tracing::warn!(group = %group.name, error = %error, "Tick aborted");
            }
        }
    }
    total
}

// ============================================================================
// Periodic Task
// ============================================================================

/// Sends a shutdown request to every task holding a receiver.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Runs feed groups on a fixed interval.
pub struct PeriodicTask {
    name: String,
    groups: Vec<FeedGroup>,
    interval: Duration,
    gate: Option<(ModuleRegistry, Module)>,
}

impl PeriodicTask {
    pub fn new(name: impl Into<String>, groups: Vec<FeedGroup>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            groups,
            interval,
            gate: None,
        }
    }

    /// Skips ticks while `module` is disabled in `registry`.
    pub fn gated_by(mut self, registry: ModuleRegistry, module: Module) -> Self {
        self.gate = Some((registry, module));
        self
    }

    fn enabled(&self) -> bool {
        self.gate
            .as_ref()
            .map_or(true, |(registry, module)| registry.is_enabled(*module))
    }

    /// Waits for the chat connection, then one full interval, then ticks
    /// until `shutdown` fires.
    pub async fn run(
        self,
        client: Arc<dyn ChatClient>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ChatError> {
        tokio::select! {
            ready = client.wait_until_ready() => { ready?; }
            _ = shutdown.changed() => return Ok(()),
        }

        let now = Utc::now().timestamp();
        for group in &self.groups {
            if let Err(e) = group.prime(now) {
                tracing::warn!(group = %group.name, error = %e, "Could not initialize watermark");
            }
        }

        tracing::info!(
            task = %self.name,
            groups = self.groups.len(),
            interval_secs = self.interval.as_secs(),
            "Feed task started"
        );

        let mut timer = interval_at(Instant::now() + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if !self.enabled() {
                tracing::debug!(task = %self.name, "Module disabled, skipping tick");
                continue;
            }
            tick_groups(&self.groups, client.as_ref(), Utc::now().timestamp()).await;
        }

        tracing::info!(task = %self.name, "Feed task stopped");
        Ok(())
    }
}
