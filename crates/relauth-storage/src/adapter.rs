use std::sync::Arc;

use relauth_core::engine::{CheckError, TupleReader};
use relauth_core::tuple::{ContinuationToken, SnapshotToken, TupleFilter, TuplePage};

use crate::traits::RelationshipStore;

/// Serves engine reads from a [`RelationshipStore`].
pub struct StoreTupleReader<S: RelationshipStore> {
    store: Arc<S>,
}

impl<S: RelationshipStore> StoreTupleReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: RelationshipStore> TupleReader for StoreTupleReader<S> {
    async fn read_tuples(
        &self,
        filter: &TupleFilter,
        snapshot: SnapshotToken,
        continuation: Option<&ContinuationToken>,
    ) -> Result<TuplePage, CheckError> {
        self.store
            .read(filter, Some(snapshot), continuation, None)
            .await
            .map_err(CheckError::storage)
    }

    async fn snapshot(&self) -> Result<SnapshotToken, CheckError> {
        self.store.snapshot().await.map_err(CheckError::storage)
    }

    async fn list_object_ids(
        &self,
        object_type: &str,
        snapshot: SnapshotToken,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, CheckError> {
        self.store
            .list_object_ids(object_type, Some(snapshot), after, limit)
            .await
            .map_err(CheckError::storage)
    }

    async fn list_subject_ids(
        &self,
        subject_type: &str,
        snapshot: SnapshotToken,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, CheckError> {
        self.store
            .list_subject_ids(subject_type, Some(snapshot), after, limit)
            .await
            .map_err(CheckError::storage)
    }
}
