//! Chat bot that relays news feeds and social media posts into channels.
//!
//! - [`feed`] - fetching, filtering and new entry detection
//! - [`render`] - entries to chat embeds
//! - [`scheduler`] - periodic polling of feed groups
//! - [`storage`] - feeds document and watermarks
//! - [`chat`] - the chat platform client and input routing
//! - [`paginate`] - reaction-driven paged messages
//! - [`template`] - messages from user-supplied JSON
//! - [`commands`] - text commands and module switches
//! - [`config`] - `newsrelay.toml`

pub mod chat;
pub mod commands;
pub mod config;
pub mod feed;
pub mod paginate;
pub mod render;
pub mod scheduler;
pub mod storage;
pub mod template;
pub mod util;
