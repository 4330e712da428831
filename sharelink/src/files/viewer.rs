//! Public viewer: resolves a shared file from the identifier in its link, without authentication.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::FileRecord;
use crate::{
    backend::{errors::Result, metadata::MetadataStore},
    types::{abbrev_uuid, parse_file_id},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOutcome {
    Found(FileRecord),
    NotFound,
}

#[derive(Clone)]
pub struct PublicViewer {
    metadata: Arc<dyn MetadataStore>,
}

impl PublicViewer {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Resolve a file for display and count the view.
    ///
    /// Counting is best effort: if the increment fails the record is still returned, with the
    /// count it had before this view.
    #[instrument(skip(self))]
    pub async fn view(&self, raw_id: &str) -> Result<ViewOutcome> {
        let Some(id) = parse_file_id(raw_id) else {
            debug!("Not a file identifier");
            return Ok(ViewOutcome::NotFound);
        };

        let Some(row) = self.metadata.get_by_id(id).await? else {
            return Ok(ViewOutcome::NotFound);
        };

        match self.metadata.increment_download_count(id).await {
            Ok(updated) => Ok(ViewOutcome::Found(updated.into())),
            Err(e) => {
                warn!(file_id = %abbrev_uuid(&id), "Failed to increment download count: {}", e);
                Ok(ViewOutcome::Found(row.into()))
            }
        }
    }

    /// Where to send a download: the record's public URL. Does not count as a view.
    #[instrument(skip(self))]
    pub async fn download_target(&self, raw_id: &str) -> Result<Option<String>> {
        let Some(id) = parse_file_id(raw_id) else {
            return Ok(None);
        };

        Ok(self.metadata.get_by_id(id).await?.map(|row| row.public_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            errors::{BackendError, Result as BackendResult},
            local::{LocalKv, LocalMetadataStore},
            metadata::{FileFilter, FileRow, FileRowUpdate, NewFileRow, Subscription},
        },
        types::{FileId, UserId},
    };
    use async_trait::async_trait;
    use uuid::Uuid;

    fn store() -> Arc<LocalMetadataStore> {
        Arc::new(LocalMetadataStore::new(Arc::new(LocalKv::in_memory())))
    }

    async fn insert(store: &LocalMetadataStore) -> FileRow {
        let owner = Uuid::new_v4();
        store
            .insert(NewFileRow {
                owner_id: owner,
                name: "report.pdf".to_string(),
                size_bytes: 2_400_000,
                mime_type: "application/pdf".to_string(),
                storage_key: format!("{owner}/{}.pdf", Uuid::new_v4()),
                public_url: "http://localhost:3000/objects/report.pdf".to_string(),
            })
            .await
            .unwrap()
    }

    /// Store whose counter can never be bumped
    struct FrozenCounter(Arc<LocalMetadataStore>);

    #[async_trait]
    impl MetadataStore for FrozenCounter {
        async fn insert(&self, row: NewFileRow) -> BackendResult<FileRow> {
            self.0.insert(row).await
        }

        async fn query(&self, filter: &FileFilter) -> BackendResult<Vec<FileRow>> {
            self.0.query(filter).await
        }

        async fn get_by_id(&self, id: FileId) -> BackendResult<Option<FileRow>> {
            self.0.get_by_id(id).await
        }

        async fn update(&self, _id: FileId, _update: &FileRowUpdate) -> BackendResult<FileRow> {
            Err(BackendError::Other(anyhow::anyhow!("read-only replica")))
        }

        async fn increment_download_count(&self, _id: FileId) -> BackendResult<FileRow> {
            Err(BackendError::Other(anyhow::anyhow!("read-only replica")))
        }

        fn on_insert(&self, owner: UserId) -> Subscription {
            self.0.on_insert(owner)
        }
    }

    #[tokio::test]
    async fn test_each_view_counts_once() {
        let store = store();
        let row = insert(&store).await;
        let viewer = PublicViewer::new(store.clone());

        for expected in 1..=3 {
            match viewer.view(&row.id.to_string()).await.unwrap() {
                ViewOutcome::Found(record) => assert_eq!(record.download_count, expected),
                ViewOutcome::NotFound => panic!("file should resolve"),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_views_all_count() {
        let store = store();
        let row = insert(&store).await;
        let viewer = PublicViewer::new(store.clone());
        let id = row.id.to_string();

        let views = (0..20).map(|_| viewer.view(&id));
        for outcome in futures::future::join_all(views).await {
            assert!(matches!(outcome.unwrap(), ViewOutcome::Found(_)));
        }

        assert_eq!(store.get_by_id(row.id).await.unwrap().unwrap().download_count, 20);
    }

    #[tokio::test]
    async fn test_unknown_identifiers_are_not_found() {
        let viewer = PublicViewer::new(store());

        assert_eq!(viewer.view("does-not-exist").await.unwrap(), ViewOutcome::NotFound);
        assert_eq!(viewer.view(&Uuid::new_v4().to_string()).await.unwrap(), ViewOutcome::NotFound);
        assert_eq!(viewer.view("").await.unwrap(), ViewOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_failed_increment_still_shows_record() {
        let inner = store();
        let row = insert(&inner).await;
        let viewer = PublicViewer::new(Arc::new(FrozenCounter(inner)));

        match viewer.view(&row.id.to_string()).await.unwrap() {
            ViewOutcome::Found(record) => {
                assert_eq!(record.id, row.id);
                assert_eq!(record.download_count, 0);
            }
            ViewOutcome::NotFound => panic!("file should resolve"),
        }
    }

    #[tokio::test]
    async fn test_download_target_does_not_count() {
        let store = store();
        let row = insert(&store).await;
        let viewer = PublicViewer::new(store.clone());

        assert_eq!(
            viewer.download_target(&row.id.to_string()).await.unwrap(),
            Some(row.public_url.clone())
        );
        assert_eq!(viewer.download_target("does-not-exist").await.unwrap(), None);
        assert_eq!(store.get_by_id(row.id).await.unwrap().unwrap().download_count, 0);
    }
}
