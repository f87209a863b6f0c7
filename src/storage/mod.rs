//! Flat-file persistence: the feeds document and per-group watermarks.

mod document;
mod state;
mod types;

pub use document::FeedsDocument;
pub use state::{JsonStateStore, MemoryStateStore, StateStore};
pub use types::{FeedCategory, PersistenceError, WatermarkState};
