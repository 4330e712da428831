//! Uploading: storage key derivation, object transfer, public URL, metadata insert.
//!
//! The object is written first and the metadata row second. If anything after the transfer
//! fails, the object is deleted again (best effort), so a failed upload leaves no record behind.

use bytes::Bytes;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::{FileRecord, UploadError, progress::UploadProgress};
use crate::{
    backend::{
        Backend,
        identity::Identity,
        metadata::{MetadataStore, NewFileRow},
        objects::{ObjectStore, PutOptions, StorageKey},
    },
    config::{Config, UploadConfig},
    types::abbrev_uuid,
};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A file picked for upload but not yet sent.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    /// Client-reported type, if any
    pub mime_type: Option<String>,
    pub content: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            content: content.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// The reported type, or one guessed from the file name
    pub fn resolved_mime_type(&self) -> String {
        self.mime_type
            .as_deref()
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&self.name).first_raw().map(str::to_string))
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
    }
}

#[derive(Clone)]
pub struct Uploader {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    max_file_size: u64,
    progress: UploadConfig,
}

impl Uploader {
    pub fn new(backend: &Backend, config: &Config) -> Self {
        Self {
            objects: backend.objects.clone(),
            metadata: backend.metadata.clone(),
            max_file_size: config.limits.max_file_size,
            progress: config.uploads.clone(),
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Check the upload preconditions without touching the backend
    pub fn check(&self, identity: Option<&Identity>, file: Option<&SelectedFile>) -> Result<(), UploadError> {
        let file = file.ok_or(UploadError::NothingSelected)?;
        if identity.is_none() {
            return Err(UploadError::NotSignedIn);
        }
        if file.name.trim().is_empty() {
            return Err(UploadError::EmptyFileName);
        }
        if file.size() > self.max_file_size {
            return Err(UploadError::TooLarge {
                size: file.size(),
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Upload `file` for `identity`, driving `progress` while the backend calls run.
    #[instrument(skip_all, fields(owner = %abbrev_uuid(&identity.id), size_bytes = file.size()))]
    pub async fn upload(&self, identity: &Identity, file: SelectedFile, progress: &UploadProgress) -> Result<FileRecord, UploadError> {
        self.check(Some(identity), Some(&file))?;
        progress.reset();

        let mut ticker = tokio::time::interval(self.progress.progress_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        let transfer = self.transfer(identity, file);
        tokio::pin!(transfer);

        let result = loop {
            tokio::select! {
                result = &mut transfer => break result,
                _ = ticker.tick() => progress.advance(self.progress.progress_step, self.progress.progress_cap),
            }
        };

        match &result {
            Ok(_) => progress.complete(),
            Err(_) => progress.reset(),
        }
        result
    }

    async fn transfer(&self, identity: &Identity, file: SelectedFile) -> Result<FileRecord, UploadError> {
        let key = StorageKey::derive(identity.id, &file.name);
        let size_bytes = file.size();
        let mime_type = file.resolved_mime_type();
        let name = file.name.trim().to_string();

        self.objects
            .put(&key, file.content, PutOptions::default())
            .await
            .map_err(UploadError::Transfer)?;
        debug!(key = %key, "Stored object");

        let public_url = match self.objects.public_url(&key) {
            Ok(url) => url,
            Err(e) => {
                self.discard(&key).await;
                return Err(UploadError::PublicUrl(e));
            }
        };

        let row = NewFileRow {
            owner_id: identity.id,
            name,
            // Bounded by max_file_size
            size_bytes: i64::try_from(size_bytes).unwrap_or(i64::MAX),
            mime_type,
            storage_key: key.to_string(),
            public_url: public_url.to_string(),
        };

        let inserted = match self.metadata.insert(row).await {
            Ok(inserted) => inserted,
            Err(e) => {
                self.discard(&key).await;
                return Err(UploadError::Record(e));
            }
        };

        info!(file_id = %abbrev_uuid(&inserted.id), "File uploaded");
        Ok(inserted.into())
    }

    /// Roll back a stored object after a later step failed
    async fn discard(&self, key: &StorageKey) {
        if let Err(e) = self.objects.delete(key).await {
            warn!(key = %key, "Failed to remove object after failed upload: {}", e);
        }
    }
}

/// Local selection state in front of an [`Uploader`].
///
/// `cancel` only forgets the selection and resets progress. An upload already in flight keeps
/// running and still returns its record.
pub struct UploadSession {
    uploader: Uploader,
    selection: Mutex<Option<SelectedFile>>,
    generation: AtomicU64,
    progress: UploadProgress,
}

impl UploadSession {
    pub fn new(uploader: Uploader) -> Self {
        Self {
            uploader,
            selection: Mutex::new(None),
            generation: AtomicU64::new(0),
            progress: UploadProgress::new(),
        }
    }

    /// Replace the current selection
    pub fn select(&self, file: SelectedFile) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock_selection() = Some(file);
    }

    pub fn selected(&self) -> Option<SelectedFile> {
        self.lock_selection().clone()
    }

    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.lock_selection().take();
        self.progress.reset();
    }

    pub fn progress(&self) -> &UploadProgress {
        &self.progress
    }

    /// Whether the upload action should be enabled
    pub fn can_upload(&self, identity: Option<&Identity>) -> bool {
        self.uploader.check(identity, self.lock_selection().as_ref()).is_ok()
    }

    /// Upload the current selection. The selection is cleared on success and kept on failure,
    /// unless it was cancelled or replaced meanwhile.
    pub async fn upload(&self, identity: Option<&Identity>) -> Result<FileRecord, UploadError> {
        let file = {
            let selection = self.lock_selection();
            self.uploader.check(identity, selection.as_ref())?;
            selection.clone().ok_or(UploadError::NothingSelected)?
        };
        let identity = identity.ok_or(UploadError::NotSignedIn)?;
        let started = self.generation.load(Ordering::SeqCst);

        let result = self.uploader.upload(identity, file, &self.progress).await;

        if result.is_ok() && self.generation.load(Ordering::SeqCst) == started {
            self.lock_selection().take();
        }
        result
    }

    fn lock_selection(&self) -> std::sync::MutexGuard<'_, Option<SelectedFile>> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
