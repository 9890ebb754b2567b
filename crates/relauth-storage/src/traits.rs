use std::future::Future;

use relauth_core::tuple::{ContinuationToken, SnapshotToken, TupleFilter, TuplePage, TupleWrite};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("delete filter must have at least one field set")]
    EmptyDeleteFilter,
    #[error("duplicate tuple: {0}")]
    DuplicateTuple(String),
    #[error("snapshot {requested} is ahead of current {current}")]
    SnapshotAhead { requested: u64, current: u64 },
    #[error("invalid continuation token: {0}")]
    InvalidContinuation(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// A versioned relationship store. Every successful write produces a new
/// snapshot, and reads at an older snapshot never see later writes.
pub trait RelationshipStore: Send + Sync {
    /// Applies deletes then writes as one transaction.
    fn write(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;

    /// One page of tuples matching `filter`. Without a snapshot the read is
    /// served from the continuation's snapshot, else from the latest one.
    fn read(
        &self,
        filter: &TupleFilter,
        snapshot: Option<SnapshotToken>,
        continuation: Option<&ContinuationToken>,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<TuplePage, StorageError>> + Send;

    fn snapshot(&self) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;

    /// Sorted distinct ids of `object_type`, whether it occurs as an object
    /// or as a subject, strictly after `after`.
    fn list_object_ids(
        &self,
        object_type: &str,
        snapshot: Option<SnapshotToken>,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Sorted distinct ids of `subject_type`, whether it occurs as a subject
    /// or as an object.
    fn list_subject_ids(
        &self,
        subject_type: &str,
        snapshot: Option<SnapshotToken>,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;
}
