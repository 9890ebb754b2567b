use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::tuple::{ContinuationToken, ObjectRef, SnapshotToken, SubjectRef, Tuple, TupleFilter};

use super::{CheckError, EngineConfig, TupleReader};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct MemoKey {
    object: ObjectRef,
    name: String,
    subject: Option<SubjectRef>,
}

impl MemoKey {
    pub(crate) fn check(object: &ObjectRef, name: &str, subject: &SubjectRef) -> Self {
        Self {
            object: object.clone(),
            name: name.to_string(),
            subject: Some(subject.clone()),
        }
    }

    pub(crate) fn expand(object: &ObjectRef, name: &str) -> Self {
        Self {
            object: object.clone(),
            name: name.to_string(),
            subject: None,
        }
    }
}

/// State owned by one top-level call: the snapshot every read uses, the
/// memo table, the read limiter and the cancellation signal.
pub(crate) struct RequestContext<V> {
    pub(crate) snapshot: SnapshotToken,
    memo: DashMap<MemoKey, V>,
    reads: Semaphore,
    cancel: CancellationToken,
}

impl<V: Clone> RequestContext<V> {
    pub(crate) fn new(
        snapshot: SnapshotToken,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            snapshot,
            memo: DashMap::new(),
            reads: Semaphore::new(config.max_concurrent_reads.max(1)),
            cancel,
        }
    }

    pub(crate) fn memoized(&self, key: &MemoKey) -> Option<V> {
        self.memo.get(key).map(|entry| entry.value().clone())
    }

    /// First writer wins; racing evaluations of one key produce the same
    /// value anyway.
    pub(crate) fn remember(&self, key: MemoKey, value: V) {
        self.memo.entry(key).or_insert(value);
    }

    pub(crate) fn ensure_active(&self) -> Result<(), CheckError> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs one storage call under the read limiter, abandoning it as soon
    /// as the request is cancelled.
    pub(crate) async fn read<F, R>(&self, read: F) -> Result<R, CheckError>
    where
        F: Future<Output = Result<R, CheckError>>,
    {
        self.ensure_active()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CheckError::Cancelled),
            result = async {
                let _permit = self.reads.acquire().await.map_err(|_| CheckError::Cancelled)?;
                read.await
            } => result,
        }
    }

    /// Every tuple matching `filter`, following continuation tokens.
    pub(crate) async fn read_all<T: TupleReader>(
        &self,
        reader: &T,
        filter: &TupleFilter,
    ) -> Result<Vec<Tuple>, CheckError> {
        let mut tuples = Vec::new();
        let mut continuation: Option<ContinuationToken> = None;
        loop {
            let page = self
                .read(reader.read_tuples(filter, self.snapshot, continuation.as_ref()))
                .await?;
            tuples.extend(page.tuples);
            match page.next {
                Some(next) => continuation = Some(next),
                None => return Ok(tuples),
            }
        }
    }

    /// Applies the configured deadline to a whole call. Expiry cancels
    /// everything still in flight.
    pub(crate) async fn with_deadline<F, R>(
        &self,
        timeout: Option<Duration>,
        call: F,
    ) -> Result<R, CheckError>
    where
        F: Future<Output = Result<R, CheckError>>,
    {
        let Some(timeout) = timeout else {
            return call.await;
        };
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel();
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "evaluation timed out");
                Err(CheckError::Cancelled)
            }
        }
    }
}
