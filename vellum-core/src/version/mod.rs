//! Diff-based document history.
//!
//! Every create or update of a versioned document appends a [`Version`]: the changes
//! from the previous state to the new one, plus the content hash of the new state.
//! Replaying a document's versions in sequence order from an empty document rebuilds
//! any past state; replaying all of them rebuilds the current one.
//!
//! A write whose hash equals the latest version's hash appends nothing. Restoring an
//! old version writes its state back and appends a new version on top, so history is
//! only ever added to.
//!
//! Appends for one document are serialized by an in-process lock held from reading
//! the latest version until the new one is stored. A document's lock is dropped from
//! the lock map as soon as no writer holds it. Writers in other processes are not
//! coordinated.

mod diff;
mod hash;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bson::Uuid;
use chrono::{DateTime, Utc};
use mea::mutex::Mutex;
use serde::{Deserialize, Serialize};

pub use self::{
    diff::{Change, ChangeKind, PathSegment, apply, diff},
    hash::{canonical_document, hash_document},
};
use crate::{
    backend::StoreBackend,
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Filter, Query, SortDirection},
    store::TypedCollection,
};

/// Default store collection of version records.
pub const VERSIONS_COLLECTION: &str = "versions";

/// One appended changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position in the document's history, starting at 1.
    pub sequence: i64,
    pub changes: Vec<Change>,
    /// Hash of the document state after applying `changes`.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Version {
    fn id(&self) -> &Uuid {
        &self.id
    }

    fn collection_name() -> &'static str {
        VERSIONS_COLLECTION
    }
}

/// A version with the document state it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionState {
    pub version: Version,
    pub state: bson::Document,
}

/// Where a restored state is written back.
#[async_trait]
pub trait DocumentHandle: Send + Sync {
    /// Replaces the stored body of `id` with `state`, returning the stored body.
    async fn restore_document(&self, id: Uuid, state: bson::Document) -> DocumentStoreResult<bson::Document>;
}

/// Version log of one store.
#[derive(Clone)]
pub struct VersionControl<B: StoreBackend> {
    collection: String,
    backend: B,
    locks: Arc<parking_lot::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl<B: StoreBackend> VersionControl<B> {
    /// Keeps versions in the default `versions` collection.
    pub fn new(backend: B) -> Self {
        Self::with_collection(VERSIONS_COLLECTION, backend)
    }

    pub fn with_collection(collection: impl Into<String>, backend: B) -> Self {
        Self {
            collection: collection.into(),
            backend,
            locks: Arc::default(),
        }
    }

    /// Store collection holding the version records.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn records(&self) -> TypedCollection<'_, B, Version> {
        TypedCollection::named(self.collection.as_str(), &self.backend)
    }

    /// Raw changesets of `document_id`, oldest first.
    pub async fn diffs(&self, document_id: Uuid) -> DocumentStoreResult<Vec<Version>> {
        self.records()
            .query(
                Query::builder()
                    .filter(Filter::eq("documentId", document_id))
                    .sort("sequence", SortDirection::Asc)
                    .build(),
            )
            .await
    }

    /// Every version of `document_id` with its reconstructed state, latest first.
    pub async fn versions(&self, document_id: Uuid) -> DocumentStoreResult<Vec<VersionState>> {
        let mut history = replay(self.diffs(document_id).await?);
        history.reverse();

        Ok(history)
    }

    /// The most recent version and state, if the document has any history.
    pub async fn latest(&self, document_id: Uuid) -> DocumentStoreResult<Option<VersionState>> {
        Ok(self.versions(document_id).await?.into_iter().next())
    }

    /// The document as of `version_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::VersionNotFound`] if `version_id` is not part of
    /// the document's history.
    pub async fn version(&self, document_id: Uuid, version_id: Uuid) -> DocumentStoreResult<VersionState> {
        let mut diffs = self.diffs(document_id).await?;
        let position = diffs
            .iter()
            .position(|version| version.id == version_id)
            .ok_or_else(|| DocumentStoreError::VersionNotFound(version_id.to_string(), document_id.to_string()))?;

        diffs.truncate(position + 1);

        replay(diffs)
            .pop()
            .ok_or_else(|| DocumentStoreError::VersionNotFound(version_id.to_string(), document_id.to_string()))
    }

    /// The most recent raw changeset.
    pub async fn latest_diff(&self, document_id: Uuid) -> DocumentStoreResult<Option<Version>> {
        Ok(self
            .records()
            .query(
                Query::builder()
                    .filter(Filter::eq("documentId", document_id))
                    .sort("sequence", SortDirection::Desc)
                    .limit(1)
                    .build(),
            )
            .await?
            .into_iter()
            .next())
    }

    /// A single raw changeset by its own id.
    pub async fn version_diff(&self, version_id: Uuid) -> DocumentStoreResult<Option<Version>> {
        Ok(self.records().get(vec![version_id]).await?.into_iter().next())
    }

    pub async fn count_versions(&self, document_id: Uuid) -> DocumentStoreResult<usize> {
        self.records()
            .count(Query::filtered(Filter::eq("documentId", document_id)))
            .await
    }

    /// Records `state` as the newest version of `document_id`.
    ///
    /// Returns the appended version, or the latest one unchanged when `state` hashes
    /// the same as it.
    pub async fn save_version(&self, document_id: Uuid, state: &bson::Document) -> DocumentStoreResult<Version> {
        let lock = self
            .locks
            .lock()
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let appended = {
            let _guard = lock.lock().await;
            self.append(document_id, state).await
        };

        self.release(document_id, lock);
        appended
    }

    /// Drops `lock` and forgets the document's entry once nothing else holds it.
    fn release(&self, document_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);

        if locks
            .get(&document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&document_id);
        }
    }

    async fn append(&self, document_id: Uuid, state: &bson::Document) -> DocumentStoreResult<Version> {
        let latest = self.latest(document_id).await?;
        let hash = hash_document(state);

        if let Some(latest) = latest.as_ref().filter(|latest| latest.version.hash == hash) {
            tracing::debug!(%document_id, sequence = latest.version.sequence, "document unchanged, version skipped");
            return Ok(latest.version.clone());
        }

        let (previous, sequence) = match latest {
            Some(VersionState { version, state: previous }) => (previous, version.sequence + 1),
            None => (bson::Document::new(), 1),
        };

        let version = Version {
            id: Uuid::new(),
            document_id,
            sequence,
            changes: diff(&previous, state),
            hash,
            created_at: Utc::now(),
        };

        self.records().insert(vec![version.clone()]).await?;

        tracing::debug!(
            %document_id,
            sequence,
            changes = version.changes.len(),
            "appended version"
        );

        Ok(version)
    }

    /// Writes the state of `version_id` back through `handle` and records the result as
    /// a new version.
    pub async fn restore_version<H>(
        &self,
        document_id: Uuid,
        version_id: Uuid,
        handle: &H,
    ) -> DocumentStoreResult<Version>
    where
        H: DocumentHandle + ?Sized,
    {
        let restored = self.version(document_id, version_id).await?;

        tracing::debug!(
            %document_id,
            %version_id,
            sequence = restored.version.sequence,
            "restoring version"
        );

        let stored = handle
            .restore_document(document_id, restored.state)
            .await?;

        self.save_version(document_id, &stored).await
    }
}

impl<B: StoreBackend> fmt::Debug for VersionControl<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionControl")
            .field("collection", &self.collection)
            .field("backend", &self.backend)
            .field("locked_documents", &self.locks.lock().len())
            .finish()
    }
}

/// Folds changesets, oldest first, into the state after each one.
fn replay(versions: Vec<Version>) -> Vec<VersionState> {
    let mut state = bson::Document::new();

    versions
        .into_iter()
        .map(|version| {
            apply(&mut state, &version.changes);
            VersionState {
                state: state.clone(),
                version,
            }
        })
        .collect()
}
