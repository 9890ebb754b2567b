use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::{Stream, StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::schema::Schema;
use crate::tuple::{ObjectRef, SnapshotToken, SubjectRef};

use super::check::{CheckContext, Decision};
use super::expand::ExpandContext;
use super::subject_set::SubjectSet;
use super::{CheckEngine, CheckError, EngineConfig, ExpandEngine, TupleReader};

/// Resume point of a paginated lookup: the pinned snapshot and the last id
/// already returned. Rendered as `"<snapshot>:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupCursor {
    pub snapshot: SnapshotToken,
    pub after: String,
}

impl fmt::Display for LookupCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.snapshot, self.after)
    }
}

impl FromStr for LookupCursor {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CheckError::InvalidCursor(s.to_string());
        let (snapshot, after) = s.split_once(':').ok_or_else(invalid)?;
        let snapshot: u64 = snapshot.parse().map_err(|_| invalid())?;
        if after.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            snapshot: SnapshotToken::new(snapshot),
            after: after.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LookupResourcesRequest {
    pub resource_type: String,
    pub permission: String,
    pub subject: SubjectRef,
    pub snapshot: Option<SnapshotToken>,
    pub cursor: Option<LookupCursor>,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct LookupSubjectsRequest {
    pub object: ObjectRef,
    pub permission: String,
    pub subject_type: String,
    pub subject_relation: Option<String>,
    pub snapshot: Option<SnapshotToken>,
    pub cursor: Option<LookupCursor>,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPage {
    /// Sorted ids.
    pub ids: Vec<String>,
    pub snapshot: SnapshotToken,
    /// Present while more ids may follow.
    pub next_cursor: Option<LookupCursor>,
}

pub struct LookupEngine<T: TupleReader> {
    reader: Arc<T>,
    check: CheckEngine<T>,
    expand: ExpandEngine<T>,
}

impl<T: TupleReader> Clone for LookupEngine<T> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            check: self.check.clone(),
            expand: self.expand.clone(),
        }
    }
}

impl<T: TupleReader> LookupEngine<T> {
    pub fn new(reader: Arc<T>, schema: Arc<Schema>, config: EngineConfig) -> Self {
        Self {
            check: CheckEngine::new(Arc::clone(&reader), Arc::clone(&schema), config.clone()),
            expand: ExpandEngine::new(Arc::clone(&reader), schema, config),
            reader,
        }
    }

    /// One page of ids of `resource_type` on which the subject holds the
    /// permission.
    pub async fn lookup_resources(
        &self,
        request: &LookupResourcesRequest,
    ) -> Result<LookupPage, CheckError> {
        self.lookup_resources_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`lookup_resources`](Self::lookup_resources), abandoning work
    /// once `cancel` fires.
    pub async fn lookup_resources_with_cancellation(
        &self,
        request: &LookupResourcesRequest,
        cancel: CancellationToken,
    ) -> Result<LookupPage, CheckError> {
        self.check
            .ensure_defined(&request.resource_type, &request.permission)?;
        let (snapshot, after) = self
            .start(request.snapshot, request.cursor.as_ref())
            .await?;
        let page_size = request.page_size.max(1);
        let config = self.check.config();
        let ctx = CheckContext::new(
            request.subject.clone(),
            snapshot,
            config,
            cancel.child_token(),
        );

        let (ids, last) = ctx
            .request
            .with_deadline(
                config.timeout,
                self.collect_resources(&ctx, request, after, page_size),
            )
            .await?;

        tracing::debug!(
            resource_type = %request.resource_type,
            permission = %request.permission,
            subject = %request.subject,
            snapshot = %snapshot,
            found = ids.len(),
            "lookup resources resolved"
        );
        Ok(LookupPage {
            ids,
            snapshot,
            next_cursor: last.map(|after| LookupCursor { snapshot, after }),
        })
    }

    /// Every matching resource id, fetched one page at a time as the stream
    /// is polled.
    pub fn lookup_resources_stream(
        &self,
        request: LookupResourcesRequest,
    ) -> impl Stream<Item = Result<String, CheckError>> + Send + '_ {
        stream::try_unfold(Some(request), move |pending| async move {
            let Some(request) = pending else {
                return Ok(None);
            };
            let page = self.lookup_resources(&request).await?;
            let next = page.next_cursor.map(|cursor| LookupResourcesRequest {
                snapshot: Some(page.snapshot),
                cursor: Some(cursor),
                ..request
            });
            Ok(Some((stream::iter(page.ids.into_iter().map(Ok)), next)))
        })
        .try_flatten()
    }

    /// One page of subject ids of `subject_type` holding the permission on
    /// the object.
    pub async fn lookup_subjects(
        &self,
        request: &LookupSubjectsRequest,
    ) -> Result<LookupPage, CheckError> {
        self.lookup_subjects_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`lookup_subjects`](Self::lookup_subjects), abandoning work once
    /// `cancel` fires.
    pub async fn lookup_subjects_with_cancellation(
        &self,
        request: &LookupSubjectsRequest,
        cancel: CancellationToken,
    ) -> Result<LookupPage, CheckError> {
        let (snapshot, after) = self
            .start(request.snapshot, request.cursor.as_ref())
            .await?;
        let page_size = request.page_size.max(1);
        let config = self.check.config();
        let ctx = ExpandContext::new(snapshot, config, cancel.child_token());

        let mut ids = ctx
            .with_deadline(
                config.timeout,
                self.collect_subjects(&ctx, request, after, page_size),
            )
            .await?;

        let next_cursor = if ids.len() > page_size {
            ids.truncate(page_size);
            ids.last().map(|after| LookupCursor {
                snapshot,
                after: after.clone(),
            })
        } else {
            None
        };

        tracing::debug!(
            object = %request.object,
            permission = %request.permission,
            subject_type = %request.subject_type,
            snapshot = %snapshot,
            found = ids.len(),
            "lookup subjects resolved"
        );
        Ok(LookupPage {
            ids,
            snapshot,
            next_cursor,
        })
    }

    /// The snapshot to serve from and the id to resume after. A cursor pins
    /// its own snapshot and must agree with an explicit one.
    async fn start(
        &self,
        requested: Option<SnapshotToken>,
        cursor: Option<&LookupCursor>,
    ) -> Result<(SnapshotToken, Option<String>), CheckError> {
        match (requested, cursor) {
            (Some(snapshot), Some(cursor)) if snapshot != cursor.snapshot => {
                Err(CheckError::InvalidCursor(format!(
                    "{cursor} does not belong to snapshot {snapshot}"
                )))
            }
            (_, Some(cursor)) => Ok((cursor.snapshot, Some(cursor.after.clone()))),
            (requested, None) => Ok((self.check.resolve_snapshot(requested).await?, None)),
        }
    }

    /// Up to `page_size + 1` granted subject ids after `after`. A cofinite
    /// grant is enumerated from the ids the store knows for the type.
    async fn collect_subjects(
        &self,
        ctx: &ExpandContext,
        request: &LookupSubjectsRequest,
        after: Option<String>,
        page_size: usize,
    ) -> Result<Vec<String>, CheckError> {
        let tree = self
            .expand
            .expand_at(ctx, &request.object, &request.permission)
            .await?;
        let granted =
            tree.subjects_of_type(&request.subject_type, request.subject_relation.as_deref());

        match granted {
            SubjectSet::Only(ids) => Ok(ids
                .into_iter()
                .filter(|id| after.as_deref().is_none_or(|after| id.as_str() > after))
                .take(page_size + 1)
                .collect()),
            SubjectSet::AllExcept(excluded) => {
                let mut ids = Vec::new();
                let mut cursor = after;
                while ids.len() <= page_size {
                    let candidates = ctx
                        .read(self.reader.list_subject_ids(
                            &request.subject_type,
                            ctx.snapshot,
                            cursor.as_deref(),
                            page_size + 1,
                        ))
                        .await?;
                    let exhausted = candidates.len() <= page_size;
                    cursor = candidates.last().cloned();
                    ids.extend(candidates.into_iter().filter(|id| !excluded.contains(id)));
                    if exhausted {
                        break;
                    }
                }
                ids.truncate(page_size + 1);
                Ok(ids)
            }
        }
    }

    /// Checks candidates in id order until a page is full. Returns the page
    /// and, when it filled up, the id to resume after.
    async fn collect_resources(
        &self,
        ctx: &CheckContext,
        request: &LookupResourcesRequest,
        mut after: Option<String>,
        page_size: usize,
    ) -> Result<(Vec<String>, Option<String>), CheckError> {
        let width = self.check.config().max_concurrent_branches.max(1);
        let mut ids = Vec::with_capacity(page_size);

        loop {
            let candidates = ctx
                .request
                .read(self.reader.list_object_ids(
                    &request.resource_type,
                    ctx.request.snapshot,
                    after.as_deref(),
                    page_size,
                ))
                .await?;
            let exhausted = candidates.len() < page_size;

            let decisions: Vec<(String, Decision)> = stream::iter(candidates)
                .map(|id| async move {
                    let object = ObjectRef::new(request.resource_type.as_str(), id.as_str());
                    let decision = self
                        .check
                        .resolve(ctx, &object, &request.permission, 0)
                        .await?;
                    Ok::<_, CheckError>((id, decision))
                })
                .buffered(width)
                .try_collect()
                .await?;

            for (id, decision) in decisions {
                after = Some(id.clone());
                if decision.is_allowed() {
                    ids.push(id);
                    if ids.len() == page_size {
                        return Ok((ids, after));
                    }
                }
            }
            if exhausted {
                return Ok((ids, None));
            }
        }
    }
}
