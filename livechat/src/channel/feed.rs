//! The ordered message feed of one room session.
//!
//! [`Feed`] is plain data: the manager applies decoded frames to it under
//! its lock and publishes [`Feed::snapshot`] after every change. Snapshots
//! are shared `Arc`s and mutation is copy-on-write, so a snapshot already
//! handed to the UI never changes underneath it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use livechat_proto::envelope::InboundFrame;
use livechat_proto::message::{ChatMessage, Origin};

/// An immutable view of the feed.
pub type Snapshot = Arc<Vec<ChatMessage>>;

/// What applying a frame did to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedUpdate {
    /// One message was appended.
    Appended,
    /// The feed was replaced by a batch of `len` messages.
    Replaced {
        /// Messages kept from the batch.
        len: usize,
    },
    /// The record had no usable content and was dropped.
    Dropped,
}

impl FeedUpdate {
    /// Whether the feed changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Ordered messages for one room, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    messages: Snapshot,
}

impl Feed {
    /// An empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.messages)
    }

    /// Number of messages in the feed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the feed is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove every message.
    pub fn clear(&mut self) {
        self.messages = Snapshot::default();
    }

    /// Apply one decoded inbound frame.
    pub fn apply(&mut self, frame: InboundFrame, received_at: DateTime<Utc>) -> FeedUpdate {
        match frame {
            InboundFrame::ChatMessage(raw) | InboundFrame::Nested(raw) | InboundFrame::Raw(raw) => {
                self.push(raw, Origin::Live, received_at)
            }
            InboundFrame::History(batch) => {
                self.replace_history(batch, Origin::History, received_at)
            }
        }
    }

    /// Normalize `raw` and append it.
    pub fn push(&mut self, raw: Value, origin: Origin, received_at: DateTime<Utc>) -> FeedUpdate {
        match ChatMessage::normalize(raw, origin, received_at) {
            Some(message) => {
                Arc::make_mut(&mut self.messages).push(message);
                FeedUpdate::Appended
            }
            None => {
                tracing::debug!("dropping record without usable content");
                FeedUpdate::Dropped
            }
        }
    }

    /// Replace the whole feed with a normalized batch, keeping batch order.
    ///
    /// Whatever the feed held before is discarded, including live messages
    /// that arrived earlier.
    pub fn replace_history(
        &mut self,
        records: Vec<Value>,
        origin: Origin,
        received_at: DateTime<Utc>,
    ) -> FeedUpdate {
        let total = records.len();
        let batch: Vec<ChatMessage> = records
            .into_iter()
            .filter_map(|raw| ChatMessage::normalize(raw, origin, received_at))
            .collect();
        if batch.len() < total {
            tracing::debug!(
                dropped = total - batch.len(),
                "dropping batch records without usable content"
            );
        }
        let len = batch.len();
        self.messages = Arc::new(batch);
        FeedUpdate::Replaced { len }
    }
}
