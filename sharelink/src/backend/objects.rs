//! Object store port and its filesystem / in-memory implementations.
//!
//! Objects are addressed by a [`StorageKey`] of the form `{owner_id}/{uuid}.{ext}`. Keys are
//! validated on every operation, so a key taken from a request path can never escape the store.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use std::{fmt, path::PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use url::Url;
use uuid::Uuid;

use super::errors::{BackendError, Result};
use crate::types::UserId;

const DEFAULT_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 16;

/// Location of an object inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive a fresh, collision-resistant key for a file owned by `owner`.
    pub fn derive(owner: UserId, file_name: &str) -> Self {
        Self(format!("{}/{}.{}", owner, Uuid::new_v4(), file_extension(file_name)))
    }

    /// Parse an untrusted key, accepting only the exact shape produced by [`StorageKey::derive`].
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || BackendError::InvalidKey { key: raw.to_string() };

        let (owner, object) = raw.split_once('/').ok_or_else(invalid)?;
        let (object_id, extension) = object.rsplit_once('.').ok_or_else(invalid)?;

        if !is_canonical_uuid(owner) || !is_canonical_uuid(object_id) || !is_valid_extension(extension) {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The account namespace this key lives under
    pub fn owner(&self) -> Option<UserId> {
        self.0.split_once('/').and_then(|(owner, _)| Uuid::parse_str(owner).ok())
    }

    pub fn extension(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, ext)| ext).unwrap_or(DEFAULT_EXTENSION)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extension to store a file under: the original one lowercased, or `bin` when it is unusable.
pub fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| is_valid_extension(ext))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn is_valid_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

fn is_canonical_uuid(segment: &str) -> bool {
    Uuid::parse_str(segment).is_ok_and(|uuid| uuid.hyphenated().to_string() == segment)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Replace an existing object instead of failing with `AlreadyExists`
    pub allow_overwrite: bool,
}

/// Builds the unauthenticated URL objects are served from.
#[derive(Debug, Clone)]
pub struct ObjectUrls {
    base: Url,
}

impl ObjectUrls {
    pub fn new(public_base_url: &Url) -> Self {
        let mut base = public_base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    pub fn url_for(&self, key: &StorageKey) -> Result<Url> {
        self.base
            .join(&format!("objects/{}", key.as_str()))
            .map_err(|e| BackendError::Other(anyhow::anyhow!("Failed to build public URL for {key}: {e}")))
    }
}

/// Trait for object storage backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store object bytes under `key`
    async fn put(&self, key: &StorageKey, content: Bytes, options: PutOptions) -> Result<()>;

    /// Retrieve object bytes
    async fn get(&self, key: &StorageKey) -> Result<Bytes>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, key: &StorageKey) -> Result<()>;

    /// Stable public URL serving exactly the bytes stored under `key`
    fn public_url(&self, key: &StorageKey) -> Result<Url>;
}

// ============================================================================
// Local Filesystem Storage Implementation
// ============================================================================

/// Local filesystem object store - one file per object below `base_path`
pub struct LocalObjectStore {
    base_path: PathBuf,
    urls: ObjectUrls,
}

impl LocalObjectStore {
    pub fn new(base_path: PathBuf, urls: ObjectUrls) -> Self {
        Self { base_path, urls }
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.base_path.join(key.as_str())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &StorageKey, content: Bytes, options: PutOptions) -> Result<()> {
        let full_path = self.path_for(key);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut open_options = fs::OpenOptions::new();
        open_options.write(true);
        if options.allow_overwrite {
            open_options.create(true).truncate(true);
        } else {
            open_options.create_new(true);
        }

        let mut file = match open_options.open(&full_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BackendError::AlreadyExists { key: key.to_string() });
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&content).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            // Don't leave a truncated object behind
            let _ = fs::remove_file(&full_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn get(&self, key: &StorageKey) -> Result<Bytes> {
        let content = fs::read(self.path_for(key)).await?;
        Ok(Bytes::from(content))
    }

    async fn delete(&self, key: &StorageKey) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &StorageKey) -> Result<Url> {
        self.urls.url_for(key)
    }
}

// ============================================================================
// In-Memory Storage Implementation
// ============================================================================

/// Object store held entirely in memory. Used by the ephemeral demo backend and tests.
pub struct InMemoryObjectStore {
    objects: DashMap<String, Bytes>,
    urls: ObjectUrls,
}

impl InMemoryObjectStore {
    pub fn new(urls: ObjectUrls) -> Self {
        Self {
            objects: DashMap::new(),
            urls,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &StorageKey, content: Bytes, options: PutOptions) -> Result<()> {
        match self.objects.entry(key.to_string()) {
            Entry::Occupied(_) if !options.allow_overwrite => Err(BackendError::AlreadyExists { key: key.to_string() }),
            Entry::Occupied(mut entry) => {
                entry.insert(content);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(content);
                Ok(())
            }
        }
    }

    async fn get(&self, key: &StorageKey) -> Result<Bytes> {
        self.objects
            .get(key.as_str())
            .map(|content| content.value().clone())
            .ok_or(BackendError::NotFound)
    }

    async fn delete(&self, key: &StorageKey) -> Result<()> {
        self.objects.remove(key.as_str());
        Ok(())
    }

    fn public_url(&self, key: &StorageKey) -> Result<Url> {
        self.urls.url_for(key)
    }
}
