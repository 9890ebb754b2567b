use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use relauth_core::tuple::{
    ContinuationToken, SnapshotToken, Tuple, TupleFilter, TuplePage, TupleWrite,
};

use crate::traits::{RelationshipStore, StorageError};

const ACTIVE_TX_ID: u64 = u64::MAX;
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct StoredTuple {
    tuple: Tuple,
    created_tx_id: u64,
    deleted_tx_id: u64,
}

impl StoredTuple {
    fn is_active(&self) -> bool {
        self.deleted_tx_id == ACTIVE_TX_ID
    }

    fn visible_at(&self, snapshot: u64) -> bool {
        self.created_tx_id <= snapshot && self.deleted_tx_id > snapshot
    }
}

#[derive(Debug, Default)]
struct InnerState {
    current_tx: u64,
    tuples: Vec<StoredTuple>,
}

impl InnerState {
    fn resolve(&self, snapshot: Option<SnapshotToken>) -> Result<u64, StorageError> {
        match snapshot {
            Some(token) if token.value() > self.current_tx => Err(StorageError::SnapshotAhead {
                requested: token.value(),
                current: self.current_tx,
            }),
            Some(token) => Ok(token.value()),
            None => Ok(self.current_tx),
        }
    }

    fn visible(&self, snapshot: u64) -> impl Iterator<Item = &Tuple> {
        self.tuples
            .iter()
            .filter(move |t| t.visible_at(snapshot))
            .map(|t| &t.tuple)
    }

    /// Ids of `entity_type` in either tuple position, visible at `snapshot`.
    fn ids_after(
        &self,
        entity_type: &str,
        snapshot: u64,
        after: Option<&str>,
        limit: usize,
    ) -> Vec<String> {
        let ids: BTreeSet<&str> = self
            .visible(snapshot)
            .flat_map(|t| {
                let object =
                    (t.object.object_type == entity_type).then_some(t.object.object_id.as_str());
                let subject = (t.subject.subject_type == entity_type)
                    .then_some(t.subject.subject_id.as_str());
                object.into_iter().chain(subject)
            })
            .filter(|id| after.is_none_or(|a| *id > a))
            .collect();
        ids.into_iter().take(limit).map(str::to_string).collect()
    }
}

/// Position in a read: the snapshot it is pinned to and how many matching
/// tuples were already returned. Tuples are append-only, so an offset stays
/// valid for a fixed snapshot.
fn encode_continuation(snapshot: u64, offset: usize) -> ContinuationToken {
    ContinuationToken::new(format!("{snapshot}.{offset}"))
}

fn decode_continuation(token: &ContinuationToken) -> Result<(u64, usize), StorageError> {
    let invalid = || StorageError::InvalidContinuation(token.to_string());
    let (snapshot, offset) = token.as_str().split_once('.').ok_or_else(invalid)?;
    Ok((
        snapshot.parse().map_err(|_| invalid())?,
        offset.parse().map_err(|_| invalid())?,
    ))
}

/// MVCC store kept in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InnerState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Internal("store lock poisoned".to_string()))
    }
}

impl RelationshipStore for InMemoryStore {
    async fn write(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> Result<SnapshotToken, StorageError> {
        if deletes.iter().any(TupleFilter::is_empty) {
            return Err(StorageError::EmptyDeleteFilter);
        }
        let writes: Vec<Tuple> = writes.iter().cloned().map(Tuple::from).collect();
        for (i, write) in writes.iter().enumerate() {
            if writes[i + 1..].contains(write) {
                return Err(StorageError::DuplicateTuple(write.to_string()));
            }
        }

        let mut state = self.lock()?;
        // Rewriting an existing tuple is fine when this transaction deletes it.
        for write in &writes {
            let shadowed = deletes.iter().any(|filter| filter.matches(write));
            let exists = state
                .tuples
                .iter()
                .any(|t| t.is_active() && &t.tuple == write);
            if exists && !shadowed {
                return Err(StorageError::DuplicateTuple(write.to_string()));
            }
        }

        state.current_tx += 1;
        let tx_id = state.current_tx;

        let mut deleted = 0usize;
        for stored in &mut state.tuples {
            if stored.is_active() && deletes.iter().any(|f| f.matches(&stored.tuple)) {
                stored.deleted_tx_id = tx_id;
                deleted += 1;
            }
        }
        let written = writes.len();
        state
            .tuples
            .extend(writes.into_iter().map(|tuple| StoredTuple {
                tuple,
                created_tx_id: tx_id,
                deleted_tx_id: ACTIVE_TX_ID,
            }));

        tracing::debug!(tx_id, written, deleted, "write committed");
        Ok(SnapshotToken::new(tx_id))
    }

    async fn read(
        &self,
        filter: &TupleFilter,
        snapshot: Option<SnapshotToken>,
        continuation: Option<&ContinuationToken>,
        limit: Option<usize>,
    ) -> Result<TuplePage, StorageError> {
        let state = self.lock()?;
        let (snapshot, offset) = match continuation {
            Some(token) => {
                let (pinned, offset) = decode_continuation(token)?;
                if snapshot.is_some_and(|s| s.value() != pinned) {
                    return Err(StorageError::InvalidContinuation(token.to_string()));
                }
                (state.resolve(Some(SnapshotToken::new(pinned)))?, offset)
            }
            None => (state.resolve(snapshot)?, 0),
        };
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

        let mut matching = state.visible(snapshot).filter(|t| filter.matches(t)).skip(offset);
        let tuples: Vec<Tuple> = matching.by_ref().take(limit).cloned().collect();
        let next = matching
            .next()
            .is_some()
            .then(|| encode_continuation(snapshot, offset + tuples.len()));

        Ok(TuplePage { tuples, next })
    }

    async fn snapshot(&self) -> Result<SnapshotToken, StorageError> {
        let state = self.lock()?;
        Ok(SnapshotToken::new(state.current_tx))
    }

    async fn list_object_ids(
        &self,
        object_type: &str,
        snapshot: Option<SnapshotToken>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let state = self.lock()?;
        let snapshot = state.resolve(snapshot)?;
        Ok(state.ids_after(object_type, snapshot, after, limit))
    }

    async fn list_subject_ids(
        &self,
        subject_type: &str,
        snapshot: Option<SnapshotToken>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let state = self.lock()?;
        let snapshot = state.resolve(snapshot)?;
        Ok(state.ids_after(subject_type, snapshot, after, limit))
    }
}
