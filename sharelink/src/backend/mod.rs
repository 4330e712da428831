//! Backend ports and their implementations.
//!
//! The application talks to three collaborators through traits:
//!
//! - [`identity::IdentityService`]: accounts, sign-up and sign-in
//! - [`objects::ObjectStore`]: object bytes addressed by [`objects::StorageKey`]
//! - [`metadata::MetadataStore`]: file rows plus the live insert [`metadata::Subscription`]
//!
//! Two interchangeable bundles implement them, chosen once at composition time by
//! [`create_backend`] from `backend.type` in the configuration:
//!
//! - `local`: [`local::LocalKv`] JSON document plus a filesystem or in-memory object store (demo)
//! - `postgres`: [`postgres`] stores plus a filesystem object store
//!
//! Nothing outside this module knows which bundle is in use.

pub mod errors;
pub mod identity;
pub mod local;
pub mod metadata;
pub mod objects;
pub mod postgres;

#[cfg(test)]
mod tests;

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;
use url::Url;

use crate::config::{BackendConfig, Config, PoolSettings};
use identity::IdentityService;
use local::{LocalIdentityService, LocalKv, LocalMetadataStore};
use metadata::MetadataStore;
use objects::{InMemoryObjectStore, LocalObjectStore, ObjectStore, ObjectUrls};
use postgres::{PostgresIdentityService, PostgresMetadataStore};

/// The three ports the application is composed with.
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityService>,
    pub objects: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

impl Backend {
    /// Memory-only local backend. Used by tests and by `local` mode without paths.
    pub fn in_memory(public_base_url: &Url) -> Self {
        let kv = Arc::new(LocalKv::in_memory());
        Self {
            identity: Arc::new(LocalIdentityService::new(kv.clone())),
            objects: Arc::new(InMemoryObjectStore::new(ObjectUrls::new(public_base_url))),
            metadata: Arc::new(LocalMetadataStore::new(kv)),
        }
    }
}

/// Resources owned by the backend beyond the ports themselves.
///
/// Dropping the runtime cancels its background tasks via the drop guard;
/// [`BackendRuntime::shutdown`] also waits for them and closes the pool.
pub struct BackendRuntime {
    pool: Option<PgPool>,
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackendRuntime {
    fn new() -> Self {
        let shutdown_token = CancellationToken::new();
        Self {
            pool: None,
            background_tasks: Vec::new(),
            drop_guard: Some(shutdown_token.clone().drop_guard()),
            shutdown_token,
        }
    }

    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// Gracefully shutdown background tasks and close connections
    pub async fn shutdown(mut self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks.drain(..) {
            let _ = handle.await;
        }

        if let Some(pool) = self.pool.take() {
            info!("Closing database connections...");
            pool.close().await;
        }
    }
}

/// Build the backend selected by the configuration
pub async fn create_backend(config: &Config) -> anyhow::Result<(Backend, BackendRuntime)> {
    let urls = ObjectUrls::new(&config.public_base_url);
    let mut runtime = BackendRuntime::new();

    let backend = match &config.backend {
        BackendConfig::Local { state_path, objects_path } => {
            let kv = match state_path {
                Some(path) => Arc::new(LocalKv::open(path.clone()).await?),
                None => {
                    info!("backend.state_path unset: accounts and file metadata will be lost on shutdown");
                    Arc::new(LocalKv::in_memory())
                }
            };

            let objects: Arc<dyn ObjectStore> = match objects_path {
                Some(path) => Arc::new(LocalObjectStore::new(path.clone(), urls)),
                None => Arc::new(InMemoryObjectStore::new(urls)),
            };

            info!("Using local demo backend");
            Backend {
                identity: Arc::new(LocalIdentityService::new(kv.clone())),
                objects,
                metadata: Arc::new(LocalMetadataStore::new(kv)),
            }
        }
        BackendConfig::Postgres { url, objects_path, pool } => {
            let pool = create_pool(url, pool).await?;
            crate::migrator().run(&pool).await?;

            let metadata = PostgresMetadataStore::new(pool.clone());
            let listener = metadata.listener();
            let shutdown = runtime.shutdown_token.clone();
            runtime.background_tasks.push(tokio::spawn(async move {
                listener.run(shutdown).await;
            }));

            info!("Using postgres backend");
            runtime.pool = Some(pool.clone());
            Backend {
                identity: Arc::new(PostgresIdentityService::new(pool)),
                objects: Arc::new(LocalObjectStore::new(objects_path.clone(), urls)),
                metadata: Arc::new(metadata),
            }
        }
    };

    Ok((backend, runtime))
}

async fn create_pool(url: &str, settings: &PoolSettings) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        .connect(url)
        .await?;

    Ok(pool)
}
