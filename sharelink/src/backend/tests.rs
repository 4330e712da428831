//! Conformance suite shared by every metadata/identity backend.
//!
//! Each `check_*` function takes the store under test and exercises one behavior of the port.
//! The local backend runs them unconditionally; the postgres variants need a live database and
//! run with `--features postgres-tests`.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use super::{
    errors::{BackendError, Result},
    identity::{Account, IdentityService},
    local::{LocalIdentityService, LocalKv, LocalMetadataStore},
    metadata::{FileFilter, FileRow, FileRowUpdate, MetadataStore, NewFileRow, Subscription, SubscriptionEvent},
};
use crate::types::{FileId, UserId};

fn new_row(owner: UserId, name: &str) -> NewFileRow {
    NewFileRow {
        owner_id: owner,
        name: name.to_string(),
        size_bytes: 2_400_000,
        mime_type: "application/pdf".to_string(),
        storage_key: format!("{owner}/{}.pdf", Uuid::new_v4()),
        public_url: format!("http://localhost:3000/objects/{owner}/{}.pdf", Uuid::new_v4()),
    }
}

fn account(email: &str) -> Account {
    Account {
        id: Uuid::new_v4(),
        email: email.to_string(),
        display_name: email.split('@').next().unwrap_or(email).to_string(),
        password_hash: "not-a-real-hash".to_string(),
    }
}

async fn check_insert_assigns_identity(store: &dyn MetadataStore, owner: UserId) {
    let inserted = store.insert(new_row(owner, "report.pdf")).await.unwrap();

    assert_eq!(inserted.owner_id, owner);
    assert_eq!(inserted.name, "report.pdf");
    assert_eq!(inserted.size_bytes, 2_400_000);
    assert_eq!(inserted.download_count, 0);

    let found = store.get_by_id(inserted.id).await.unwrap();
    assert_eq!(found, Some(inserted));
}

async fn check_unknown_id_is_none(store: &dyn MetadataStore) {
    assert_eq!(store.get_by_id(Uuid::new_v4()).await.unwrap(), None);
}

async fn check_query_newest_first_and_scoped(store: &dyn MetadataStore, owner: UserId, other: UserId) {
    let first = store.insert(new_row(owner, "first.pdf")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.insert(new_row(other, "foreign.pdf")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = store.insert(new_row(owner, "second.pdf")).await.unwrap();

    let rows = store.query(&FileFilter::owned_by(owner)).await.unwrap();
    let ids: Vec<FileId> = rows.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert!(rows.iter().all(|row| row.owner_id == owner));

    let limited = store
        .query(&FileFilter {
            owner_id: Some(owner),
            limit: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, second.id);
}

async fn check_update_is_monotonic(store: &dyn MetadataStore, owner: UserId) {
    let row = store.insert(new_row(owner, "count.pdf")).await.unwrap();

    let raised = store.update(row.id, &FileRowUpdate { download_count: Some(5) }).await.unwrap();
    assert_eq!(raised.download_count, 5);

    let lowered = store.update(row.id, &FileRowUpdate { download_count: Some(4) }).await;
    assert!(matches!(lowered, Err(BackendError::InvalidUpdate { .. })));

    let missing = store.update(Uuid::new_v4(), &FileRowUpdate { download_count: Some(1) }).await;
    assert!(matches!(missing, Err(BackendError::NotFound)));

    assert_eq!(store.get_by_id(row.id).await.unwrap().map(|r| r.download_count), Some(5));
}

async fn check_concurrent_increments_all_land(store: Arc<dyn MetadataStore>, owner: UserId) {
    let row = store.insert(new_row(owner, "popular.pdf")).await.unwrap();

    let views = (0..10).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.increment_download_count(row.id).await })
    });
    for view in futures::future::join_all(views).await {
        view.unwrap().unwrap();
    }

    let after = store.get_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(after.download_count, 10);
}

async fn next_event(subscription: &mut Subscription) -> SubscriptionEvent {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("timed out waiting for insert event")
        .expect("subscription closed")
}

async fn check_subscription_sees_only_owner_inserts(store: &dyn MetadataStore, owner: UserId, other: UserId) {
    let mut subscription = store.on_insert(owner);

    store.insert(new_row(other, "foreign.pdf")).await.unwrap();
    let mine = store.insert(new_row(owner, "mine.pdf")).await.unwrap();

    assert_eq!(next_event(&mut subscription).await, SubscriptionEvent::Inserted(mine));
    subscription.cancel();
}

async fn check_duplicate_email_rejected(identities: &dyn IdentityService) {
    identities.insert_account(account("dup@example.com")).await.unwrap();
    let result = identities.insert_account(account("dup@example.com")).await;
    assert!(matches!(result, Err(BackendError::UniqueViolation { .. })));
}

async fn check_identity_lookup(identities: &dyn IdentityService) {
    let stored = identities.insert_account(account("found@example.com")).await.unwrap();

    let by_email = identities.find_account_by_email("found@example.com").await.unwrap().unwrap();
    assert_eq!(by_email.id, stored.id);

    let identity = identities.get_identity(stored.id).await.unwrap().unwrap();
    assert_eq!(identity.email, "found@example.com");
    assert_eq!(identity.display_name, "found");

    assert!(identities.get_identity(Uuid::new_v4()).await.unwrap().is_none());
}

// ============================================================================
// Local backend
// ============================================================================

fn local_stores() -> (Arc<LocalMetadataStore>, LocalIdentityService) {
    let kv = Arc::new(LocalKv::in_memory());
    (Arc::new(LocalMetadataStore::new(kv.clone())), LocalIdentityService::new(kv))
}

#[tokio::test]
async fn test_local_insert_assigns_identity() {
    let (store, _) = local_stores();
    check_insert_assigns_identity(store.as_ref(), Uuid::new_v4()).await;
    check_unknown_id_is_none(store.as_ref()).await;
}

#[tokio::test]
async fn test_local_query_newest_first_and_scoped() {
    let (store, _) = local_stores();
    check_query_newest_first_and_scoped(store.as_ref(), Uuid::new_v4(), Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_local_update_is_monotonic() {
    let (store, _) = local_stores();
    check_update_is_monotonic(store.as_ref(), Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_local_concurrent_increments() {
    let (store, _) = local_stores();
    check_concurrent_increments_all_land(store, Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_local_subscription() {
    let (store, _) = local_stores();
    check_subscription_sees_only_owner_inserts(store.as_ref(), Uuid::new_v4(), Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_local_identity() {
    let (_, identities) = local_stores();
    check_duplicate_email_rejected(&identities).await;
    check_identity_lookup(&identities).await;
}

/// Store that only implements the required methods, so the default
/// read-then-write `increment_download_count` is the one exercised.
struct ReadThenWrite(LocalMetadataStore);

#[async_trait]
impl MetadataStore for ReadThenWrite {
    async fn insert(&self, row: NewFileRow) -> Result<FileRow> {
        self.0.insert(row).await
    }

    async fn query(&self, filter: &FileFilter) -> Result<Vec<FileRow>> {
        self.0.query(filter).await
    }

    async fn get_by_id(&self, id: FileId) -> Result<Option<FileRow>> {
        self.0.get_by_id(id).await
    }

    async fn update(&self, id: FileId, update: &FileRowUpdate) -> Result<FileRow> {
        self.0.update(id, update).await
    }

    fn on_insert(&self, owner: UserId) -> Subscription {
        self.0.on_insert(owner)
    }
}

#[tokio::test]
async fn test_default_increment_reads_then_writes() {
    let store = ReadThenWrite(LocalMetadataStore::new(Arc::new(LocalKv::in_memory())));
    let row = store.insert(new_row(Uuid::new_v4(), "a.pdf")).await.unwrap();

    assert_eq!(store.increment_download_count(row.id).await.unwrap().download_count, 1);
    assert_eq!(store.increment_download_count(row.id).await.unwrap().download_count, 2);
    assert!(matches!(
        store.increment_download_count(Uuid::new_v4()).await,
        Err(BackendError::NotFound)
    ));
}

// ============================================================================
// Postgres backend
// ============================================================================

#[cfg(feature = "postgres-tests")]
mod postgres {
    use super::*;
    use crate::backend::postgres::{PostgresIdentityService, PostgresMetadataStore};
    use sqlx::PgPool;
    use tokio_util::sync::CancellationToken;

    async fn owners(pool: &PgPool) -> (UserId, UserId) {
        let identities = PostgresIdentityService::new(pool.clone());
        let owner = identities.insert_account(account("owner@example.com")).await.unwrap();
        let other = identities.insert_account(account("other@example.com")).await.unwrap();
        (owner.id, other.id)
    }

    #[sqlx::test]
    async fn test_postgres_insert_assigns_identity(pool: PgPool) {
        let (owner, _) = owners(&pool).await;
        let store = PostgresMetadataStore::new(pool);
        check_insert_assigns_identity(&store, owner).await;
        check_unknown_id_is_none(&store).await;
    }

    #[sqlx::test]
    async fn test_postgres_query_newest_first_and_scoped(pool: PgPool) {
        let (owner, other) = owners(&pool).await;
        let store = PostgresMetadataStore::new(pool);
        check_query_newest_first_and_scoped(&store, owner, other).await;
    }

    #[sqlx::test]
    async fn test_postgres_update_is_monotonic(pool: PgPool) {
        let (owner, _) = owners(&pool).await;
        let store = PostgresMetadataStore::new(pool);
        check_update_is_monotonic(&store, owner).await;
    }

    #[sqlx::test]
    async fn test_postgres_concurrent_increments(pool: PgPool) {
        let (owner, _) = owners(&pool).await;
        check_concurrent_increments_all_land(Arc::new(PostgresMetadataStore::new(pool)), owner).await;
    }

    #[sqlx::test]
    async fn test_postgres_subscription(pool: PgPool) {
        let (owner, other) = owners(&pool).await;
        let store = PostgresMetadataStore::new(pool);

        let shutdown = CancellationToken::new();
        let listener = tokio::spawn(store.listener().run(shutdown.clone()));
        // Give the listener time to issue LISTEN before inserting
        tokio::time::sleep(Duration::from_millis(200)).await;

        check_subscription_sees_only_owner_inserts(&store, owner, other).await;

        shutdown.cancel();
        listener.await.unwrap();
    }

    #[sqlx::test]
    async fn test_postgres_identity(pool: PgPool) {
        let identities = PostgresIdentityService::new(pool);
        check_duplicate_email_rejected(&identities).await;
        check_identity_lookup(&identities).await;
    }
}
