use super::types::{FeedCategory, PersistenceError};
use crate::util::atomic_write;
use serde_json::{Map, Value};
use std::path::Path;

/// The feeds file: categories keyed by a short id plus integer watermarks.
///
/// ```json
/// {
///     "last_time": 1700000000,
///     "sme": { "name": "...", "rss": "...", "color": 1, "url": "...", "icon_url": "..." }
/// }
/// ```
///
/// Object values are categories, integer values are watermarks. Anything
/// else is carried through untouched so hand-edited keys survive rewrites.
#[derive(Debug, Clone, Default)]
pub struct FeedsDocument {
    fields: Map<String, Value>,
}

impl FeedsDocument {
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let content = std::fs::read(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PersistenceError> {
        Self::parse(bytes, Path::new("<memory>"))
    }

    fn parse(bytes: &[u8], path: &Path) -> Result<Self, PersistenceError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|source| PersistenceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(PersistenceError::NotAnObject(path.to_path_buf())),
        }
    }

    /// Looks up one category by its key (e.g. `"sme"`).
    pub fn category(&self, key: &str) -> Result<FeedCategory, PersistenceError> {
        let value = self
            .fields
            .get(key)
            .filter(|v| v.is_object())
            .ok_or_else(|| PersistenceError::MissingCategory(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|source| PersistenceError::InvalidCategory {
            key: key.to_string(),
            source,
        })
    }

    /// Every category in file order.
    pub fn categories(&self) -> Result<Vec<(String, FeedCategory)>, PersistenceError> {
        self.fields
            .iter()
            .filter(|(_, v)| v.is_object())
            .map(|(k, _)| self.category(k).map(|c| (k.clone(), c)))
            .collect()
    }

    /// Reads an integer watermark. A missing key reads as `None`.
    pub fn watermark(&self, key: &str) -> Result<Option<i64>, PersistenceError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| PersistenceError::InvalidWatermark(key.to_string())),
        }
    }

    pub fn set_watermark(&mut self, key: &str, value: i64) {
        self.fields.insert(key.to_string(), Value::from(value));
    }

    /// Tab-indented JSON with non-ASCII text kept as is.
    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        serde::Serialize::serialize(&self.fields, &mut ser)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Atomically replaces the file at `path` with this document.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let bytes = self.to_pretty_bytes().map_err(|source| PersistenceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write(path, &bytes).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
