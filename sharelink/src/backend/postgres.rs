//! PostgreSQL metadata and identity stores.
//!
//! Inserts into `files` fire a `pg_notify` trigger on [`FILE_INSERTED_CHANNEL`]. A single
//! [`InsertListener`] per process turns those notifications into rows on the store's
//! [`InsertFeed`], so subscribers see inserts made by any instance sharing the database.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, postgres::PgListener};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    errors::{BackendError, Result},
    identity::{Account, Identity, IdentityService},
    metadata::{FileFilter, FileRow, FileRowUpdate, InsertFeed, MetadataStore, NewFileRow, Subscription, check_update},
};
use crate::types::{FileId, UserId, abbrev_uuid};

/// NOTIFY channel written by the `files_notify_insert` trigger
pub const FILE_INSERTED_CHANNEL: &str = "file_inserted";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const FILE_COLUMNS: &str = "id, owner_id, name, size_bytes, mime_type, storage_key, public_url, created_at, download_count";

pub struct PostgresMetadataStore {
    pool: PgPool,
    feed: InsertFeed,
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            feed: InsertFeed::new(),
        }
    }

    /// Listener that feeds this store's subscribers. Run it with [`InsertListener::run`].
    pub fn listener(&self) -> InsertListener {
        InsertListener {
            pool: self.pool.clone(),
            feed: self.feed.clone(),
        }
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[tracing::instrument(skip_all, fields(owner = %abbrev_uuid(&row.owner_id)))]
    async fn insert(&self, row: NewFileRow) -> Result<FileRow> {
        let inserted = sqlx::query_as::<_, FileRow>(&format!(
            "INSERT INTO files (owner_id, name, size_bytes, mime_type, storage_key, public_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(row.owner_id)
        .bind(&row.name)
        .bind(row.size_bytes)
        .bind(&row.mime_type)
        .bind(&row.storage_key)
        .bind(&row.public_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn query(&self, filter: &FileFilter) -> Result<Vec<FileRow>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE ($1::uuid IS NULL OR owner_id = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        ))
        .bind(filter.owner_id)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn get_by_id(&self, id: FileId) -> Result<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn update(&self, id: FileId, update: &FileRowUpdate) -> Result<FileRow> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, FileRow>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(BackendError::NotFound)?;

        check_update(&current, update)?;

        let updated = sqlx::query_as::<_, FileRow>(&format!(
            "UPDATE files SET download_count = COALESCE($2, download_count)
             WHERE id = $1
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(id)
        .bind(update.download_count)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn increment_download_count(&self, id: FileId) -> Result<FileRow> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "UPDATE files SET download_count = download_count + 1
             WHERE id = $1
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BackendError::NotFound)?;

        Ok(row)
    }

    fn on_insert(&self, owner: UserId) -> Subscription {
        self.feed.subscribe(owner)
    }
}

#[derive(Debug, Deserialize)]
struct InsertNotification {
    id: FileId,
}

/// Bridges `LISTEN file_inserted` into an [`InsertFeed`].
pub struct InsertListener {
    pool: PgPool,
    feed: InsertFeed,
}

impl InsertListener {
    /// Listen until `shutdown` is cancelled, reconnecting whenever the connection drops.
    ///
    /// Notifications sent while disconnected are lost, so once a connection is re-established
    /// after any failure subscribers are asked to reload.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Starting file insert listener on channel {}", FILE_INSERTED_CHANNEL);
        let mut may_have_missed = false;

        loop {
            let mut listener = match PgListener::connect_with(&self.pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!("Failed to create LISTEN connection: {}", e);
                    may_have_missed = true;
                    if self.wait_before_retry(&shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            if let Err(e) = listener.listen(FILE_INSERTED_CHANNEL).await {
                tracing::error!("Failed to LISTEN on {}: {}", FILE_INSERTED_CHANNEL, e);
                may_have_missed = true;
                if self.wait_before_retry(&shutdown).await {
                    return;
                }
                continue;
            }

            tracing::info!("LISTEN connection established for file inserts");
            if may_have_missed {
                tracing::info!("Asking {} insert subscribers to resync", self.feed.subscriber_count());
                self.feed.resync();
                may_have_missed = false;
            }

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("File insert listener shutting down");
                        return;
                    }
                    notification = listener.recv() => {
                        match notification {
                            Ok(notification) => self.forward(notification.payload()).await,
                            Err(e) => {
                                tracing::error!("Error receiving notification: {}", e);
                                break;
                            }
                        }
                    }
                }
            }

            tracing::warn!("LISTEN connection lost, reconnecting in {}s...", RECONNECT_DELAY.as_secs());
            may_have_missed = true;
            if self.wait_before_retry(&shutdown).await {
                return;
            }
        }
    }

    /// Sleep before reconnecting. Returns true if shutdown was requested meanwhile.
    async fn wait_before_retry(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(RECONNECT_DELAY) => false,
        }
    }

    async fn forward(&self, payload: &str) {
        let notification = match serde_json::from_str::<InsertNotification>(payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!("Failed to parse insert notification payload: {}", e);
                return;
            }
        };

        let row = sqlx::query_as::<_, FileRow>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1"))
            .bind(notification.id)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(row)) => {
                tracing::debug!(file_id = %abbrev_uuid(&row.id), "Forwarding file insert");
                self.feed.publish(row);
            }
            Ok(None) => tracing::warn!(file_id = %abbrev_uuid(&notification.id), "Notified file no longer exists"),
            Err(e) => tracing::error!("Failed to load notified file {}: {}", notification.id, e),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: UserId,
    email: String,
    display_name: String,
    password_hash: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password_hash,
        }
    }
}

pub struct PostgresIdentityService {
    pool: PgPool,
}

impl PostgresIdentityService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityService for PostgresIdentityService {
    async fn insert_account(&self, account: Account) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            "INSERT INTO users (id, email, display_name, password_hash)
             VALUES ($1, $2, $3, $4)
             RETURNING id, email, display_name, password_hash",
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT id, email, display_name, password_hash FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Account::from))
    }

    async fn get_identity(&self, id: UserId) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT id, email, display_name, password_hash FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Account::from(row).into()))
    }
}
