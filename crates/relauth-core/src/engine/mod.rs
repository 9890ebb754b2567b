mod check;
mod context;
mod expand;
mod lookup;
mod subject_set;

pub use check::{CheckEngine, CheckRequest, CheckResult, Decision};
pub use expand::{ExpandEngine, ExpandRequest, SubjectSetTree};
pub use lookup::{
    LookupCursor, LookupEngine, LookupPage, LookupResourcesRequest, LookupSubjectsRequest,
};
pub use subject_set::SubjectSet;

use std::future::Future;
use std::time::Duration;

use crate::tuple::{ContinuationToken, SnapshotToken, SubjectRef, TupleFilter, TuplePage};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("type not found: {0}")]
    TypeNotFound(String),

    #[error("permission '{permission}' not found on type '{type_name}'")]
    PermissionNotFound {
        type_name: String,
        permission: String,
    },

    #[error("max depth exceeded: {0}")]
    MaxDepthExceeded(usize),

    #[error("storage error: {0}")]
    Storage(#[source] BoxError),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("invalid lookup cursor: {0}")]
    InvalidCursor(String),
}

impl CheckError {
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_depth: usize,
    pub max_concurrent_branches: usize,
    pub max_concurrent_reads: usize,
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_concurrent_branches: 10,
            max_concurrent_reads: 32,
            timeout: None,
        }
    }
}

/// Read access to relation tuples at a fixed snapshot.
pub trait TupleReader: Send + Sync {
    /// One page of tuples matching `filter`. Pass the returned
    /// continuation back in to get the next page.
    fn read_tuples(
        &self,
        filter: &TupleFilter,
        snapshot: SnapshotToken,
        continuation: Option<&ContinuationToken>,
    ) -> impl Future<Output = Result<TuplePage, CheckError>> + Send;

    /// Reverse read: tuples whose subject is exactly `subject`, optionally
    /// restricted to one relation.
    fn read_tuples_by_subject(
        &self,
        subject: &SubjectRef,
        relation: Option<&str>,
        snapshot: SnapshotToken,
        continuation: Option<&ContinuationToken>,
    ) -> impl Future<Output = Result<TuplePage, CheckError>> + Send {
        let mut filter = TupleFilter::for_subject(subject);
        filter.relation = relation.map(str::to_string);
        async move { self.read_tuples(&filter, snapshot, continuation).await }
    }

    /// The newest snapshot available.
    fn snapshot(&self) -> impl Future<Output = Result<SnapshotToken, CheckError>> + Send;

    /// Sorted, distinct ids of `object_type` that appear in any tuple,
    /// as object or as subject, strictly after `after`.
    fn list_object_ids(
        &self,
        object_type: &str,
        snapshot: SnapshotToken,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, CheckError>> + Send;

    /// Sorted, distinct ids under which `subject_type` appears anywhere in
    /// the store, strictly after `after`.
    fn list_subject_ids(
        &self,
        subject_type: &str,
        snapshot: SnapshotToken,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, CheckError>> + Send;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::tuple::Tuple;

    /// Unversioned reader that pages through a fixed tuple list.
    pub(crate) struct TestStore {
        tuples: Vec<Tuple>,
        page_size: usize,
        pub(crate) reads: AtomicUsize,
        pub(crate) snapshots_seen: Mutex<BTreeSet<SnapshotToken>>,
    }

    impl TestStore {
        pub(crate) fn new(tuples: Vec<Tuple>) -> Self {
            Self::with_page_size(tuples, 2)
        }

        pub(crate) fn with_page_size(tuples: Vec<Tuple>, page_size: usize) -> Self {
            Self {
                tuples,
                page_size,
                reads: AtomicUsize::new(0),
                snapshots_seen: Mutex::new(BTreeSet::new()),
            }
        }

        pub(crate) fn from_text(tuples: &[&str]) -> Self {
            Self::new(tuples.iter().map(|t| t.parse().unwrap()).collect())
        }

        /// Ids of `entity_type` in either tuple position, in ascending order.
        fn ids(&self, entity_type: &str, after: Option<&str>, limit: usize) -> Vec<String> {
            let ids: BTreeSet<&str> = self
                .tuples
                .iter()
                .flat_map(|t| {
                    let object = (t.object.object_type == entity_type)
                        .then_some(t.object.object_id.as_str());
                    let subject = (t.subject.subject_type == entity_type)
                        .then_some(t.subject.subject_id.as_str());
                    object.into_iter().chain(subject)
                })
                .collect();
            ids.into_iter()
                .filter(|id| after.is_none_or(|a| *id > a))
                .take(limit)
                .map(str::to_string)
                .collect()
        }
    }

    impl TupleReader for TestStore {
        async fn read_tuples(
            &self,
            filter: &TupleFilter,
            snapshot: SnapshotToken,
            continuation: Option<&ContinuationToken>,
        ) -> Result<TuplePage, CheckError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.snapshots_seen.lock().unwrap().insert(snapshot);
            let offset: usize = continuation.map_or(0, |c| c.as_str().parse().unwrap());
            let matching: Vec<Tuple> = self
                .tuples
                .iter()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect();
            let end = (offset + self.page_size).min(matching.len());
            let next = (end < matching.len()).then(|| ContinuationToken::new(end.to_string()));
            Ok(TuplePage {
                tuples: matching[offset..end].to_vec(),
                next,
            })
        }

        async fn snapshot(&self) -> Result<SnapshotToken, CheckError> {
            Ok(SnapshotToken::new(1))
        }

        async fn list_object_ids(
            &self,
            object_type: &str,
            _snapshot: SnapshotToken,
            after: Option<&str>,
            limit: usize,
        ) -> Result<Vec<String>, CheckError> {
            Ok(self.ids(object_type, after, limit))
        }

        async fn list_subject_ids(
            &self,
            subject_type: &str,
            _snapshot: SnapshotToken,
            after: Option<&str>,
            limit: usize,
        ) -> Result<Vec<String>, CheckError> {
            Ok(self.ids(subject_type, after, limit))
        }
    }

    /// Which calls a [`StallingStore`] never answers.
    pub(crate) enum Stall {
        /// Every read and every id listing.
        Everything,
        /// Reads filtered to one relation.
        Relation(&'static str),
        /// Id listings only.
        Listings,
    }

    /// Wraps a `TestStore`, leaving the chosen calls pending forever.
    pub(crate) struct StallingStore {
        inner: TestStore,
        stall: Stall,
    }

    impl StallingStore {
        pub(crate) fn new(stall: Stall, tuples: &[&str]) -> Self {
            Self {
                inner: TestStore::from_text(tuples),
                stall,
            }
        }

        fn stalls_listings(&self) -> bool {
            matches!(self.stall, Stall::Everything | Stall::Listings)
        }
    }

    impl TupleReader for StallingStore {
        async fn read_tuples(
            &self,
            filter: &TupleFilter,
            snapshot: SnapshotToken,
            continuation: Option<&ContinuationToken>,
        ) -> Result<TuplePage, CheckError> {
            let stalled = match self.stall {
                Stall::Everything => true,
                Stall::Relation(relation) => filter.relation.as_deref() == Some(relation),
                Stall::Listings => false,
            };
            if stalled {
                return futures::future::pending().await;
            }
            self.inner.read_tuples(filter, snapshot, continuation).await
        }

        async fn snapshot(&self) -> Result<SnapshotToken, CheckError> {
            self.inner.snapshot().await
        }

        async fn list_object_ids(
            &self,
            object_type: &str,
            snapshot: SnapshotToken,
            after: Option<&str>,
            limit: usize,
        ) -> Result<Vec<String>, CheckError> {
            if self.stalls_listings() {
                return futures::future::pending().await;
            }
            self.inner
                .list_object_ids(object_type, snapshot, after, limit)
                .await
        }

        async fn list_subject_ids(
            &self,
            subject_type: &str,
            snapshot: SnapshotToken,
            after: Option<&str>,
            limit: usize,
        ) -> Result<Vec<String>, CheckError> {
            if self.stalls_listings() {
                return futures::future::pending().await;
            }
            self.inner
                .list_subject_ids(subject_type, snapshot, after, limit)
                .await
        }
    }

    pub(crate) const GITHUB: &str = r#"
        entity user {}

        entity team {
            relation member @user @team#member
        }

        entity organization {
            relation admin @user
            relation member @user @team#member

            action create_repository = admin or member
        }

        entity repository {
            relation parent @organization
            relation owner @user
            relation reader @user @team#member
            relation banned @user

            action push = owner
            action read = (push or reader or parent.member) and not banned
            action delete = not owner
            action admin = parent.admin
        }
    "#;
}
