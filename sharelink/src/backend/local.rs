//! Local demo backend: a JSON key-value document standing in for a real database.
//!
//! State lives under two fixed keys ([`ACCOUNTS_KEY`] and [`FILES_KEY`]) in a single JSON
//! document. With a `state_path` the document is rewritten on every change (temp file + rename);
//! without one it only lives in memory. Nothing here is durable across machines.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::Mutex};
use uuid::Uuid;

use super::{
    errors::{BackendError, Result},
    identity::{Account, Identity, IdentityService},
    metadata::{FileFilter, FileRow, FileRowUpdate, InsertFeed, MetadataStore, NewFileRow, Subscription, check_update},
};
use crate::types::{FileId, UserId};

pub const ACCOUNTS_KEY: &str = "sharelink_accounts";
pub const FILES_KEY: &str = "sharelink_files";

/// JSON document store with whole-value reads and locked read-modify-write updates.
pub struct LocalKv {
    path: Option<PathBuf>,
    entries: Mutex<Map<String, Value>>,
}

impl LocalKv {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Map::new()),
        }
    }

    /// Open (or start) a document persisted at `path`
    pub async fn open(path: PathBuf) -> Result<Self> {
        let entries = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<Map<String, Value>>(&raw)
                .map_err(|e| BackendError::Other(anyhow::anyhow!("Corrupt state file {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), keys = entries.len(), "Opened local state");

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Read the value under `key`, or `T::default()` when unset
    pub async fn get<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        let entries = self.entries.lock().await;
        decode(key, entries.get(key))
    }

    /// Atomically read, modify and write back the value under `key`.
    ///
    /// The change is only kept if `apply` succeeds and the document could be persisted.
    pub async fn update<T, R, F>(&self, key: &str, apply: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default + Send,
        R: Send,
        F: FnOnce(&mut T) -> Result<R> + Send,
    {
        let mut entries = self.entries.lock().await;
        let mut value: T = decode(key, entries.get(key))?;
        let result = apply(&mut value)?;

        let encoded = serde_json::to_value(&value).map_err(|e| BackendError::Other(anyhow::anyhow!("Failed to encode {key}: {e}")))?;

        if let Some(path) = &self.path {
            let mut next = entries.clone();
            next.insert(key.to_string(), encoded.clone());
            persist(path, &next).await?;
        }

        entries.insert(key.to_string(), encoded);
        Ok(result)
    }
}

fn decode<T: DeserializeOwned + Default>(key: &str, value: Option<&Value>) -> Result<T> {
    match value {
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| BackendError::Other(anyhow::anyhow!("Failed to decode {key}: {e}")))
        }
        None => Ok(T::default()),
    }
}

async fn persist(path: &Path, entries: &Map<String, Value>) -> Result<()> {
    let raw = serde_json::to_vec_pretty(entries).map_err(|e| BackendError::Other(e.into()))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

// ============================================================================
// Metadata
// ============================================================================

pub struct LocalMetadataStore {
    kv: Arc<LocalKv>,
    feed: InsertFeed,
}

impl LocalMetadataStore {
    pub fn new(kv: Arc<LocalKv>) -> Self {
        Self {
            kv,
            feed: InsertFeed::new(),
        }
    }
}

#[async_trait]
impl MetadataStore for LocalMetadataStore {
    async fn insert(&self, row: NewFileRow) -> Result<FileRow> {
        let inserted = self
            .kv
            .update(FILES_KEY, move |files: &mut Vec<FileRow>| {
                if files.iter().any(|existing| existing.storage_key == row.storage_key) {
                    return Err(BackendError::UniqueViolation {
                        constraint: Some("files_storage_key_key".to_string()),
                        table: Some("files".to_string()),
                        message: format!("storage key {} is already recorded", row.storage_key),
                    });
                }

                let inserted = FileRow {
                    id: Uuid::new_v4(),
                    owner_id: row.owner_id,
                    name: row.name,
                    size_bytes: row.size_bytes,
                    mime_type: row.mime_type,
                    storage_key: row.storage_key,
                    public_url: row.public_url,
                    created_at: Utc::now(),
                    download_count: 0,
                };
                files.push(inserted.clone());
                Ok(inserted)
            })
            .await?;

        self.feed.publish(inserted.clone());
        Ok(inserted)
    }

    async fn query(&self, filter: &FileFilter) -> Result<Vec<FileRow>> {
        let files: Vec<FileRow> = self.kv.get(FILES_KEY).await?;

        // Reverse first so rows sharing a timestamp keep newest-inserted first after the stable sort
        let mut rows: Vec<FileRow> = files
            .into_iter()
            .rev()
            .filter(|row| filter.owner_id.is_none_or(|owner| row.owner_id == owner))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(0));
        }

        Ok(rows)
    }

    async fn get_by_id(&self, id: FileId) -> Result<Option<FileRow>> {
        let files: Vec<FileRow> = self.kv.get(FILES_KEY).await?;
        Ok(files.into_iter().find(|row| row.id == id))
    }

    async fn update(&self, id: FileId, update: &FileRowUpdate) -> Result<FileRow> {
        let update = update.clone();
        self.kv
            .update(FILES_KEY, move |files: &mut Vec<FileRow>| {
                let row = files.iter_mut().find(|row| row.id == id).ok_or(BackendError::NotFound)?;
                check_update(row, &update)?;
                if let Some(count) = update.download_count {
                    row.download_count = count;
                }
                Ok(row.clone())
            })
            .await
    }

    async fn increment_download_count(&self, id: FileId) -> Result<FileRow> {
        self.kv
            .update(FILES_KEY, move |files: &mut Vec<FileRow>| {
                let row = files.iter_mut().find(|row| row.id == id).ok_or(BackendError::NotFound)?;
                row.download_count += 1;
                Ok(row.clone())
            })
            .await
    }

    fn on_insert(&self, owner: UserId) -> Subscription {
        self.feed.subscribe(owner)
    }
}

// ============================================================================
// Identity
// ============================================================================

pub struct LocalIdentityService {
    kv: Arc<LocalKv>,
}

impl LocalIdentityService {
    pub fn new(kv: Arc<LocalKv>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl IdentityService for LocalIdentityService {
    async fn insert_account(&self, account: Account) -> Result<Account> {
        self.kv
            .update(ACCOUNTS_KEY, move |accounts: &mut Vec<Account>| {
                if accounts.iter().any(|existing| existing.email == account.email) {
                    return Err(BackendError::UniqueViolation {
                        constraint: Some("users_email_key".to_string()),
                        table: Some("users".to_string()),
                        message: "email already registered".to_string(),
                    });
                }
                accounts.push(account.clone());
                Ok(account)
            })
            .await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let accounts: Vec<Account> = self.kv.get(ACCOUNTS_KEY).await?;
        Ok(accounts.into_iter().find(|account| account.email == email))
    }

    async fn get_identity(&self, id: UserId) -> Result<Option<Identity>> {
        let accounts: Vec<Account> = self.kv.get(ACCOUNTS_KEY).await?;
        Ok(accounts.into_iter().find(|account| account.id == id).map(Identity::from))
    }
}
