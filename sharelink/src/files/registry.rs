//! File registry: one owner's records, newest first, kept current by the insert subscription.
//!
//! The registry subscribes before it runs the initial query and de-duplicates live events by id,
//! so an insert that lands between the two is neither lost nor listed twice. The subscription is
//! owned by the registry and released when the owner changes, on sign-out, on [`FileRegistry::close`]
//! or when the registry is dropped.

use std::{collections::HashSet, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, instrument};

use super::FileRecord;
use crate::{
    backend::{
        errors::Result,
        metadata::{FileFilter, MetadataStore, Subscription, SubscriptionEvent},
    },
    session::IdentityState,
    types::{FileId, UserId, abbrev_uuid},
};

/// What changed in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    /// Records were (re)loaded for a new owner
    Loaded { owner: UserId, count: usize },
    /// A new record was placed into the list
    Inserted(FileRecord),
    /// Signed out: the list is empty and the subscription released
    Cleared,
    /// The subscription fell behind and the list was reloaded
    Resynced { count: usize },
}

enum Wake {
    Identity(std::result::Result<(), watch::error::RecvError>),
    Event(Option<SubscriptionEvent>),
}

pub struct FileRegistry {
    metadata: Arc<dyn MetadataStore>,
    owner: Option<UserId>,
    records: Vec<FileRecord>,
    seen: HashSet<FileId>,
    subscription: Option<Subscription>,
    identity: Option<watch::Receiver<IdentityState>>,
}

impl FileRegistry {
    fn empty(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata,
            owner: None,
            records: Vec::new(),
            seen: HashSet::new(),
            subscription: None,
            identity: None,
        }
    }

    /// Registry for a fixed owner
    pub async fn open(metadata: Arc<dyn MetadataStore>, owner: UserId) -> Result<Self> {
        let mut registry = Self::empty(metadata);
        registry.load(owner).await?;
        Ok(registry)
    }

    /// Registry that follows a session's identity: loads for whoever is signed in and switches or
    /// clears as that changes. If the identity source goes away the current owner is kept.
    pub async fn bind(metadata: Arc<dyn MetadataStore>, mut identity: watch::Receiver<IdentityState>) -> Result<Self> {
        let mut registry = Self::empty(metadata);
        let current = identity.borrow_and_update().clone();
        registry.identity = Some(identity);

        if let IdentityState::SignedIn(signed_in) = current {
            registry.load(signed_in.id).await?;
        }
        Ok(registry)
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    /// Current records, newest first
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Wait for the next change.
    ///
    /// Returns `Ok(None)` once nothing can change any more: no identity to follow and no live
    /// subscription.
    pub async fn next_update(&mut self) -> Result<Option<RegistryUpdate>> {
        loop {
            let following = self.identity.is_some();
            let subscribed = self.subscription.is_some();

            let wake = tokio::select! {
                changed = identity_changed(self.identity.as_mut()), if following => Wake::Identity(changed),
                event = next_event(self.subscription.as_mut()), if subscribed => Wake::Event(event),
                else => return Ok(None),
            };

            match wake {
                Wake::Identity(Err(_)) => {
                    debug!("Identity source closed, keeping current owner");
                    self.identity = None;
                }
                Wake::Identity(Ok(())) => {
                    let state = match self.identity.as_mut() {
                        Some(identity) => identity.borrow_and_update().clone(),
                        None => continue,
                    };
                    if let Some(update) = self.follow(state).await? {
                        return Ok(Some(update));
                    }
                }
                Wake::Event(Some(SubscriptionEvent::Inserted(row))) => {
                    let record = FileRecord::from(row);
                    if self.accept(record.clone()) {
                        return Ok(Some(RegistryUpdate::Inserted(record)));
                    }
                }
                Wake::Event(Some(SubscriptionEvent::Lagged { .. } | SubscriptionEvent::Resync)) => {
                    if let Some(owner) = self.owner {
                        let count = self.load(owner).await?;
                        return Ok(Some(RegistryUpdate::Resynced { count }));
                    }
                }
                Wake::Event(None) => {
                    debug!("Insert feed closed");
                    self.subscription = None;
                }
            }
        }
    }

    /// Release the subscription and stop following identity changes
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    async fn follow(&mut self, state: IdentityState) -> Result<Option<RegistryUpdate>> {
        match state {
            IdentityState::SignedIn(identity) if self.owner != Some(identity.id) => {
                let count = self.load(identity.id).await?;
                Ok(Some(RegistryUpdate::Loaded { owner: identity.id, count }))
            }
            IdentityState::SignedOut if self.owner.is_some() => {
                self.clear();
                Ok(Some(RegistryUpdate::Cleared))
            }
            _ => Ok(None),
        }
    }

    /// Subscribe for `owner`, then fetch their records
    #[instrument(skip(self), fields(owner = %abbrev_uuid(&owner)))]
    async fn load(&mut self, owner: UserId) -> Result<usize> {
        self.clear();
        let subscription = self.metadata.on_insert(owner);

        let rows = self.metadata.query(&FileFilter::owned_by(owner)).await?;

        self.owner = Some(owner);
        self.subscription = Some(subscription);
        // Already newest first
        for row in rows {
            if self.seen.insert(row.id) {
                self.records.push(row.into());
            }
        }

        debug!(count = self.records.len(), "Registry loaded");
        Ok(self.records.len())
    }

    fn clear(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.owner = None;
        self.records.clear();
        self.seen.clear();
    }

    /// Place a record at its sorted position. Returns false for duplicates and foreign records.
    fn accept(&mut self, record: FileRecord) -> bool {
        if Some(record.owner_id) != self.owner || !self.seen.insert(record.id) {
            return false;
        }

        let position = self
            .records
            .iter()
            .position(|existing| existing.created_at <= record.created_at)
            .unwrap_or(self.records.len());
        self.records.insert(position, record);
        true
    }
}

async fn identity_changed(identity: Option<&mut watch::Receiver<IdentityState>>) -> std::result::Result<(), watch::error::RecvError> {
    match identity {
        Some(identity) => identity.changed().await,
        None => std::future::pending().await,
    }
}

async fn next_event(subscription: Option<&mut Subscription>) -> Option<SubscriptionEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
