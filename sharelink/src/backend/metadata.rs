//! Metadata store port: file rows, queries, and the insert subscription.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::errors::{BackendError, Result};
use crate::types::{FileId, UserId, abbrev_uuid};

/// Buffered insert events per store before slow subscribers start lagging
pub const INSERT_FEED_CAPACITY: usize = 256;

/// A file row as persisted by the metadata store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRow {
    pub id: FileId,
    pub owner_id: UserId,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_key: String,
    pub public_url: String,
    pub created_at: DateTime<Utc>,
    pub download_count: i64,
}

/// Everything the uploader knows before the store assigns id and timestamp
#[derive(Debug, Clone)]
pub struct NewFileRow {
    pub owner_id: UserId,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_key: String,
    pub public_url: String,
}

/// Query filter. Results are always ordered by `created_at` descending.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub owner_id: Option<UserId>,
    pub limit: Option<i64>,
}

impl FileFilter {
    pub fn owned_by(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            limit: None,
        }
    }
}

/// Partial update. Only the download counter is mutable.
#[derive(Debug, Clone, Default)]
pub struct FileRowUpdate {
    pub download_count: Option<i64>,
}

/// Reject updates that would move the download counter backwards
pub fn check_update(current: &FileRow, update: &FileRowUpdate) -> Result<()> {
    if let Some(count) = update.download_count
        && count < current.download_count
    {
        return Err(BackendError::InvalidUpdate {
            message: format!("download_count cannot decrease ({} -> {})", current.download_count, count),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum FeedMessage {
    Inserted(FileRow),
    Resync,
}

/// Fan-out of inserted rows to live subscribers.
#[derive(Debug, Clone)]
pub struct InsertFeed {
    sender: broadcast::Sender<FeedMessage>,
}

impl InsertFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(INSERT_FEED_CAPACITY);
        Self { sender }
    }

    /// Deliver a freshly inserted row to every subscriber
    pub fn publish(&self, row: FileRow) {
        // No receivers is the normal idle state
        let _ = self.sender.send(FeedMessage::Inserted(row));
    }

    /// Tell every subscriber that inserts may have been missed and their view must be reloaded
    pub fn resync(&self) {
        let _ = self.sender.send(FeedMessage::Resync);
    }

    pub fn subscribe(&self, owner: UserId) -> Subscription {
        Subscription {
            owner,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InsertFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A row for the subscribed owner was inserted
    Inserted(FileRow),
    /// The subscriber fell behind and `skipped` events were dropped
    Lagged { skipped: u64 },
    /// The feed's source was interrupted, so any number of inserts may be missing
    Resync,
}

/// Live insert events for one owner.
///
/// Holding the value keeps the subscription open; dropping it (or calling [`Subscription::cancel`])
/// releases it.
#[derive(Debug)]
pub struct Subscription {
    owner: UserId,
    receiver: broadcast::Receiver<FeedMessage>,
}

impl Subscription {
    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Wait for the next event for this owner. Returns `None` once the store has shut down.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(FeedMessage::Inserted(row)) if row.owner_id == self.owner => return Some(SubscriptionEvent::Inserted(row)),
                Ok(FeedMessage::Inserted(_)) => continue,
                Ok(FeedMessage::Resync) => return Some(SubscriptionEvent::Resync),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(owner = %abbrev_uuid(&self.owner), skipped, "Insert subscription lagged");
                    return Some(SubscriptionEvent::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn cancel(self) {
        tracing::debug!(owner = %abbrev_uuid(&self.owner), "Insert subscription released");
    }
}

/// Trait for file metadata backends
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a row; the store assigns `id`, `created_at` and a zero download count
    async fn insert(&self, row: NewFileRow) -> Result<FileRow>;

    /// Rows matching the filter, newest first
    async fn query(&self, filter: &FileFilter) -> Result<Vec<FileRow>>;

    async fn get_by_id(&self, id: FileId) -> Result<Option<FileRow>>;

    /// Apply a partial update. Fails with `NotFound` for unknown ids and `InvalidUpdate` when the
    /// download counter would decrease.
    async fn update(&self, id: FileId, update: &FileRowUpdate) -> Result<FileRow>;

    /// Bump the download counter by one.
    ///
    /// The default is a read followed by a write, so concurrent calls can lose increments.
    /// Stores that can do it atomically override this.
    async fn increment_download_count(&self, id: FileId) -> Result<FileRow> {
        let current = self.get_by_id(id).await?.ok_or(BackendError::NotFound)?;
        self.update(
            id,
            &FileRowUpdate {
                download_count: Some(current.download_count + 1),
            },
        )
        .await
    }

    /// Subscribe to inserts for `owner`
    fn on_insert(&self, owner: UserId) -> Subscription;
}
