//! History sources for a room's feed.
//!
//! A [`HistoryProvider`] fetches the raw records of a room's earlier
//! messages. The channel manager normalizes them and replaces the feed
//! (see [`ChannelManager::load_history`](crate::channel::ChannelManager::load_history)).

use std::future::Future;
use std::path::{Path, PathBuf};

use serde_json::Value;

use livechat_proto::room::{AuthToken, RoomId};

/// Errors from fetching history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Reading the source failed.
    #[error("failed to read history from {path}: {source}")]
    Io {
        /// Source path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The source is not valid JSON.
    #[error("history in {path} is not valid JSON: {source}")]
    Parse {
        /// Source path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The JSON does not hold a list of records.
    #[error("history in {path} is not a list of messages")]
    Shape {
        /// Source path.
        path: PathBuf,
    },
}

/// Fetches the raw history records of a room.
pub trait HistoryProvider: Send + Sync {
    /// Fetch the records for `room`, oldest first.
    fn fetch(
        &self,
        room: &RoomId,
        token: &AuthToken,
    ) -> impl Future<Output = Result<Vec<Value>, HistoryError>> + Send;
}

/// A fixed batch of records, the same for every room.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory {
    records: Vec<Value>,
}

impl StaticHistory {
    /// Serve `records` for every fetch.
    #[must_use]
    pub const fn new(records: Vec<Value>) -> Self {
        Self { records }
    }
}

impl HistoryProvider for StaticHistory {
    async fn fetch(&self, _room: &RoomId, _token: &AuthToken) -> Result<Vec<Value>, HistoryError> {
        Ok(self.records.clone())
    }
}

/// History read from a JSON file.
///
/// The file holds either an array of records or an object with the array
/// under `messages` or `data`, the shapes chat backends usually answer
/// with. A `{room}` placeholder in the path is replaced by the room id.
#[derive(Debug, Clone)]
pub struct JsonFileHistory {
    path: PathBuf,
}

impl JsonFileHistory {
    /// Read history from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The configured path, placeholder included.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_for(&self, room: &RoomId) -> PathBuf {
        let raw = self.path.to_string_lossy();
        if raw.contains("{room}") {
            PathBuf::from(raw.replace("{room}", room.as_str()))
        } else {
            self.path.clone()
        }
    }
}

impl HistoryProvider for JsonFileHistory {
    async fn fetch(&self, room: &RoomId, _token: &AuthToken) -> Result<Vec<Value>, HistoryError> {
        let path = self.path_for(room);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| HistoryError::Io {
                path: path.clone(),
                source,
            })?;
        let doc: Value = serde_json::from_str(&text).map_err(|source| HistoryError::Parse {
            path: path.clone(),
            source,
        })?;
        let records =
            extract_records(doc).ok_or_else(|| HistoryError::Shape { path: path.clone() })?;
        tracing::debug!(path = %path.display(), count = records.len(), "history loaded");
        Ok(records)
    }
}

/// Pull the record list out of a history document.
fn extract_records(doc: Value) -> Option<Vec<Value>> {
    match doc {
        Value::Array(records) => Some(records),
        Value::Object(mut obj) => ["messages", "data"]
            .into_iter()
            .find_map(|key| match obj.remove(key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            }),
        _ => None,
    }
}
