use super::document::FeedsDocument;
use super::types::{PersistenceError, WatermarkState};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Narrow persistence interface for one feed group's watermark.
///
/// The scheduler is the only writer. Implementations must make `commit`
/// all-or-nothing: after an error the previously committed value is still the
/// one `load` returns.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<WatermarkState, PersistenceError>;
    fn commit(&self, state: WatermarkState) -> Result<(), PersistenceError>;
}

/// Stores a watermark as one integer key of the feeds document.
pub struct JsonStateStore {
    path: PathBuf,
    key: String,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<WatermarkState, PersistenceError> {
        let doc = FeedsDocument::load(&self.path)?;
        Ok(doc
            .watermark(&self.key)?
            .map(WatermarkState::new)
            .unwrap_or_else(WatermarkState::never))
    }

    fn commit(&self, state: WatermarkState) -> Result<(), PersistenceError> {
        // Re-read so edits made to categories while the bot runs are kept
        let mut doc = FeedsDocument::load(&self.path)?;
        doc.set_watermark(&self.key, state.last_seen);
        doc.save(&self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            key = %self.key,
            last_seen = state.last_seen,
            "Committed watermark"
        );
        Ok(())
    }
}

/// Process-local watermark, lost on restart.
pub struct MemoryStateStore {
    state: Mutex<WatermarkState>,
}

impl MemoryStateStore {
    pub fn new(initial: WatermarkState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(WatermarkState::never())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<WatermarkState, PersistenceError> {
        Ok(*self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn commit(&self, state: WatermarkState) -> Result<(), PersistenceError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        Ok(())
    }
}
