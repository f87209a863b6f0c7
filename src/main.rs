use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use newsrelay::chat::{ChatClient, ChatInbox, DiscordClient};
use newsrelay::commands::{CommandInbox, CommandRouter, Module, ModuleRegistry};
use newsrelay::config::{Config, ConfigError, TOKEN_ENV};
use newsrelay::feed::{FeedFetcher, HttpFeedFetcher, HttpTimelineFetcher, TimelineFetcher};
use newsrelay::scheduler::{shutdown_channel, FeedGroup, PeriodicTask, RssSource, TimelineSource};
use newsrelay::storage::{FeedsDocument, JsonStateStore, MemoryStateStore};
use newsrelay::template::{
    create_from_template, edit_from_template, AttachmentFetcher, MessageLink, MAX_TEMPLATE_SIZE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Watermark key of the news group in the feeds document.
const NEWS_WATERMARK_KEY: &str = "last_time";
/// Watermark key of the announcement group.
const ANNOUNCEMENT_WATERMARK_KEY: &str = "anno_last_time";

#[derive(Parser, Debug)]
#[command(
    name = "newsrelay",
    about = "Relays news feeds and social media posts into chat channels"
)]
struct Args {
    /// Bot configuration file
    #[arg(long, value_name = "FILE", default_value = "newsrelay.toml")]
    config: PathBuf,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the enabled feed modules and run until interrupted
    Run,
    /// Send or edit a message from a JSON template
    #[command(subcommand)]
    Embed(EmbedCommand),
}

#[derive(Subcommand, Debug)]
enum EmbedCommand {
    /// Send a new message
    Create {
        /// Target channel id
        #[arg(long)]
        channel: u64,
        #[command(flatten)]
        source: TemplateSource,
    },
    /// Replace an existing message
    Edit {
        /// Message link copied from the chat client
        #[arg(long)]
        link: String,
        #[command(flatten)]
        source: TemplateSource,
    },
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
struct TemplateSource {
    /// Read the template from a local file
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Download the template
    #[arg(long, value_name = "URL")]
    url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    tracing::debug!(?config, "Configuration");

    let http = build_http_client()?;
    let token = config
        .token(std::env::var(TOKEN_ENV).ok())
        .with_context(|| format!("No bot token: set {TOKEN_ENV} or `token` in the config file"))?;
    let discord = Arc::new(DiscordClient::new(http.clone(), token, config.api_base_url.clone()));
    let client: Arc<dyn ChatClient> = discord.clone();

    match args.command {
        Command::Run => run(&config, http, client, discord).await,
        Command::Embed(EmbedCommand::Create { channel, source }) => {
            let bytes = read_template(&source, &http).await?;
            let handle = create_from_template(client.as_ref(), &bytes, channel).await?;
            println!("Sent message {} in channel {}", handle.message_id, handle.channel_id);
            Ok(())
        }
        Command::Embed(EmbedCommand::Edit { link, source }) => {
            let link = MessageLink::parse(&link)?;
            let bytes = read_template(&source, &http).await?;
            edit_from_template(client.as_ref(), &bytes, &link).await?;
            println!("Edited message {} in channel {}", link.message_id, link.channel_id);
            Ok(())
        }
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

async fn read_template(source: &TemplateSource, http: &reqwest::Client) -> Result<Vec<u8>> {
    if let Some(path) = &source.file {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to read template '{}'", path.display()))?;
        if meta.len() > MAX_TEMPLATE_SIZE as u64 {
            anyhow::bail!("Template '{}' is larger than 1 MB", path.display());
        }
        return std::fs::read(path)
            .with_context(|| format!("Failed to read template '{}'", path.display()));
    }
    let url = source
        .url
        .as_deref()
        .context("Either --file or --url is required")?;
    Ok(AttachmentFetcher::new(http.clone()).fetch(url).await?)
}

/// Starts one task per configured feed module, plus the command inbox, and
/// waits for a shutdown signal.
async fn run(
    config: &Config,
    http: reqwest::Client,
    client: Arc<dyn ChatClient>,
    inbox: Arc<dyn ChatInbox>,
) -> Result<()> {
    let modules = ModuleRegistry::new(config.enabled_modules()?);
    let interval = config.poll_interval();

    let timeline_fetcher: Option<Arc<dyn TimelineFetcher>> = match &config.timeline {
        Some(timeline) => {
            timeline.validate()?;
            Some(Arc::new(HttpTimelineFetcher::new(
                http.clone(),
                timeline.endpoint.trim(),
            )))
        }
        None => None,
    };

    let mut tasks = Vec::new();
    if let Some(task) = news_task(config, &http, interval, &modules)? {
        tasks.push(task);
    }
    if let Some(task) = timeline_task(config, timeline_fetcher.clone(), interval, &modules)? {
        tasks.push(task);
    }

    let command_inbox = if config.command_channel_ids.is_empty() {
        tracing::info!("No command channels configured, chat commands disabled");
        None
    } else {
        let mut router =
            CommandRouter::from_config(config, client.clone(), http.clone(), modules.clone());
        if let Some(fetcher) = &timeline_fetcher {
            router = router.with_timeline(fetcher.clone());
        }
        Some(CommandInbox::new(
            inbox,
            router,
            config.command_channel_ids.clone(),
            config.command_poll_interval(),
        ))
    };

    if tasks.is_empty() && command_inbox.is_none() {
        anyhow::bail!(
            "Nothing to run: configure a news channel, a [timeline] table or command channels"
        );
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut running = JoinSet::new();
    for task in tasks {
        running.spawn(task.run(client.clone(), shutdown_rx.clone()));
    }
    if let Some(command_inbox) = command_inbox {
        running.spawn(command_inbox.run(shutdown_rx.clone()));
    }
    tracing::info!(modules = ?modules.enabled(), tasks = running.len(), "Bot running");

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_fut = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_fut = std::future::pending::<Option<()>>();

    tokio::select! {
        biased;

        _ = sigterm_fut => {
            tracing::info!("Received SIGTERM, shutting down gracefully");
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down gracefully");
        }

        Some(finished) = running.join_next() => {
            // A task only returns early when the chat connection is unusable
            match finished {
                Ok(Ok(())) => tracing::warn!("Bot task exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "Bot task failed"),
                Err(e) => tracing::error!(error = %e, "Bot task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(finished) = running.join_next().await {
        if let Ok(Err(e)) = finished {
            tracing::warn!(error = %e, "Bot task ended with error");
        }
    }
    Ok(())
}

/// Builds the news task: a news group and, when configured, an
/// announcement group, each with its own watermark key.
fn news_task(
    config: &Config,
    http: &reqwest::Client,
    interval: Duration,
    modules: &ModuleRegistry,
) -> Result<Option<PeriodicTask>> {
    let Some(news_channel) = config.news_channel_id else {
        if modules.is_enabled(Module::News) {
            return Err(ConfigError::Missing("news_channel_id", Module::News).into());
        }
        return Ok(None);
    };

    let path = &config.feeds_file;
    let doc = FeedsDocument::load(path)
        .with_context(|| format!("Failed to load feeds file '{}'", path.display()))?;
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFeedFetcher::new(http.clone()));

    let mut groups = vec![feed_group(
        "news",
        news_channel,
        path,
        NEWS_WATERMARK_KEY,
        &config.news_categories,
        &doc,
        &fetcher,
    )?];

    if let Some(channel) = config.announcement_channel_id {
        let present: Vec<String> = config
            .announcement_categories
            .iter()
            .filter(|key| doc.category(key).is_ok())
            .cloned()
            .collect();
        if present.is_empty() {
            tracing::info!("No announcement categories in feeds file, announcements disabled");
        } else {
            groups.push(feed_group(
                "announcements",
                channel,
                path,
                ANNOUNCEMENT_WATERMARK_KEY,
                &present,
                &doc,
                &fetcher,
            )?);
        }
    }

    Ok(Some(
        PeriodicTask::new("news", groups, interval).gated_by(modules.clone(), Module::News),
    ))
}

fn feed_group(
    name: &str,
    channel: u64,
    path: &Path,
    watermark_key: &str,
    categories: &[String],
    doc: &FeedsDocument,
    fetcher: &Arc<dyn FeedFetcher>,
) -> Result<FeedGroup> {
    let mut group = FeedGroup::new(
        name,
        channel,
        Box::new(JsonStateStore::new(path, watermark_key)),
    );
    for key in categories {
        let category = doc.category(key)?;
        tracing::debug!(group = name, category = %category.name, url = %category.source_url, "Added feed");
        group = group.with_source(RssSource::new(category, fetcher.clone()));
    }
    Ok(group)
}

fn timeline_task(
    config: &Config,
    fetcher: Option<Arc<dyn TimelineFetcher>>,
    interval: Duration,
    modules: &ModuleRegistry,
) -> Result<Option<PeriodicTask>> {
    let (Some(timeline), Some(fetcher)) = (&config.timeline, fetcher) else {
        if modules.is_enabled(Module::Timeline) {
            return Err(ConfigError::Missing("[timeline]", Module::Timeline).into());
        }
        return Ok(None);
    };
    let channel = timeline
        .channel_id
        .or(config.announcement_channel_id)
        .ok_or(ConfigError::Missing("timeline.channel_id", Module::Timeline))?;

    // Not persisted: restarts begin from the current time
    let group = FeedGroup::new("timeline", channel, Box::new(MemoryStateStore::default()))
        .with_source(TimelineSource::new(
            fetcher,
            timeline.account_id.clone(),
            timeline.count,
            timeline.max_video_secs,
        ));

    Ok(Some(
        PeriodicTask::new("timeline", vec![group], interval)
            .gated_by(modules.clone(), Module::Timeline),
    ))
}
