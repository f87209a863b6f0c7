//! Feed retrieval and the pure steps of a polling cycle.
//!
//! - [`parser`] - RSS/Atom bytes to [`FeedEntry`] using the `feed-rs` crate
//! - [`fetcher`] - HTTP retrieval behind the [`FeedFetcher`] trait
//! - [`filter`] - per-category tag rules
//! - [`detect`] - watermark-based new entry detection
//! - [`timeline`] - social media timelines, treated as one more feed kind
//!
//! A cycle chains them as fetch, filter, detect; formatting lives in
//! [`crate::render`].

mod detect;
mod fetcher;
mod filter;
mod parser;
mod timeline;

pub use detect::{detect_new, out_of_order_after_cutoff};
pub use fetcher::{FeedFetcher, FetchError, HttpFeedFetcher};
pub(crate) use fetcher::get_limited;
pub use filter::{filter_entries, FilterRule};
pub use parser::{parse_feed, EntryImage, FeedEntry, ImageKind};
pub use timeline::{
    filter_new_media, post_code, HttpTimelineFetcher, MediaItem, MediaKind, TimelineFetcher,
};
