use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::schema::{Leaf, OperatorTree, Schema};
use crate::tuple::{ContinuationToken, ObjectRef, SnapshotToken, SubjectRef, TupleFilter};

use super::context::{MemoKey, RequestContext};
use super::{CheckError, EngineConfig, TupleReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }

    fn negate(self) -> Self {
        match self {
            Self::Allowed => Self::Denied,
            Self::Denied => Self::Allowed,
        }
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allowed } else { Self::Denied }
    }
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub object: ObjectRef,
    pub permission: String,
    pub subject: SubjectRef,
    pub snapshot: Option<SnapshotToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub decision: Decision,
    /// The snapshot every read of the check was served from.
    pub snapshot: SnapshotToken,
}

impl CheckResult {
    pub fn allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

pub(crate) type Evaluation<'a> =
    Pin<Box<dyn Future<Output = Result<Decision, CheckError>> + Send + 'a>>;

pub(crate) struct CheckContext {
    pub(crate) subject: SubjectRef,
    pub(crate) request: RequestContext<Decision>,
}

impl CheckContext {
    pub(crate) fn new(
        subject: SubjectRef,
        snapshot: SnapshotToken,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subject,
            request: RequestContext::new(snapshot, config, cancel),
        }
    }
}

pub struct CheckEngine<T: TupleReader> {
    reader: Arc<T>,
    schema: Arc<Schema>,
    config: EngineConfig,
}

impl<T: TupleReader> Clone for CheckEngine<T> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            schema: Arc::clone(&self.schema),
            config: self.config.clone(),
        }
    }
}

impl<T: TupleReader> CheckEngine<T> {
    pub fn new(reader: Arc<T>, schema: Arc<Schema>, config: EngineConfig) -> Self {
        Self {
            reader,
            schema,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError> {
        self.check_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`check`](Self::check), abandoning work once `cancel` fires.
    pub async fn check_with_cancellation(
        &self,
        request: &CheckRequest,
        cancel: CancellationToken,
    ) -> Result<CheckResult, CheckError> {
        let snapshot = self.resolve_snapshot(request.snapshot).await?;
        let ctx = CheckContext::new(
            request.subject.clone(),
            snapshot,
            &self.config,
            cancel.child_token(),
        );

        let decision = ctx
            .request
            .with_deadline(
                self.config.timeout,
                self.resolve(&ctx, &request.object, &request.permission, 0),
            )
            .await?;

        tracing::debug!(
            object = %request.object,
            permission = %request.permission,
            subject = %request.subject,
            snapshot = %snapshot,
            ?decision,
            "check resolved"
        );
        Ok(CheckResult { decision, snapshot })
    }

    pub(crate) async fn resolve_snapshot(
        &self,
        requested: Option<SnapshotToken>,
    ) -> Result<SnapshotToken, CheckError> {
        match requested {
            Some(snapshot) => Ok(snapshot),
            None => self.reader.snapshot().await,
        }
    }

    /// Fails unless `name` is a permission or relation of `object_type`.
    pub(crate) fn ensure_defined(&self, object_type: &str, name: &str) -> Result<(), CheckError> {
        let entity = self
            .schema
            .entity(object_type)
            .ok_or_else(|| CheckError::TypeNotFound(object_type.to_string()))?;
        if !entity.defines(name) {
            return Err(CheckError::PermissionNotFound {
                type_name: object_type.to_string(),
                permission: name.to_string(),
            });
        }
        Ok(())
    }

    /// Decides whether the context's subject holds `name` on `object`.
    pub(crate) fn resolve<'a>(
        &'a self,
        ctx: &'a CheckContext,
        object: &'a ObjectRef,
        name: &'a str,
        depth: usize,
    ) -> Evaluation<'a> {
        Box::pin(async move {
            let key = MemoKey::check(object, name, &ctx.subject);
            if let Some(decision) = ctx.request.memoized(&key) {
                tracing::trace!(%object, name, ?decision, "memo hit");
                return Ok(decision);
            }
            if depth > self.config.max_depth {
                tracing::warn!(%object, name, depth, "max depth exceeded");
                return Err(CheckError::MaxDepthExceeded(depth));
            }
            ctx.request.ensure_active()?;

            let entity = self
                .schema
                .entity(&object.object_type)
                .ok_or_else(|| CheckError::TypeNotFound(object.object_type.clone()))?;

            let decision = if let Some(tree) = entity.operator(name) {
                self.evaluate(ctx, tree, object, depth).await?
            } else if entity.relation(name).is_some() {
                self.evaluate_direct(ctx, object, name, depth).await?
            } else {
                return Err(CheckError::PermissionNotFound {
                    type_name: object.object_type.clone(),
                    permission: name.to_string(),
                });
            };

            ctx.request.remember(key, decision);
            Ok(decision)
        })
    }

    fn evaluate<'a>(
        &'a self,
        ctx: &'a CheckContext,
        tree: &'a OperatorTree,
        object: &'a ObjectRef,
        depth: usize,
    ) -> Evaluation<'a> {
        Box::pin(async move {
            match tree {
                OperatorTree::Leaf(Leaf::Direct { relation }) => {
                    self.resolve(ctx, object, relation, depth).await
                }
                OperatorTree::Leaf(Leaf::ComputedUserset { relation }) => {
                    self.resolve(ctx, object, relation, depth + 1).await
                }
                OperatorTree::Leaf(Leaf::TupleToUserset { via, relation }) => {
                    self.evaluate_tuple_to_userset(ctx, object, via, relation, depth)
                        .await
                }
                OperatorTree::Universe { subject_types } => Ok(Decision::from(
                    subject_types
                        .as_ref()
                        .is_none_or(|types| types.contains(&ctx.subject.subject_type)),
                )),
                OperatorTree::Union(children) => {
                    self.short_circuit(
                        children
                            .iter()
                            .map(|child| self.evaluate(ctx, child, object, depth))
                            .collect(),
                        Decision::Allowed,
                    )
                    .await
                }
                OperatorTree::Intersection(children) => {
                    self.short_circuit(
                        children
                            .iter()
                            .map(|child| self.evaluate(ctx, child, object, depth))
                            .collect(),
                        Decision::Denied,
                    )
                    .await
                }
                OperatorTree::Exclusion { base, subtrahend } => {
                    if !self.evaluate(ctx, base, object, depth).await?.is_allowed() {
                        return Ok(Decision::Denied);
                    }
                    Ok(self
                        .evaluate(ctx, subtrahend, object, depth)
                        .await?
                        .negate())
                }
            }
        })
    }

    async fn evaluate_direct(
        &self,
        ctx: &CheckContext,
        object: &ObjectRef,
        relation: &str,
        depth: usize,
    ) -> Result<Decision, CheckError> {
        let filter = TupleFilter::for_object(object, relation);
        let mut usersets = Vec::new();
        let mut continuation: Option<ContinuationToken> = None;

        loop {
            let page = ctx
                .request
                .read(
                    self.reader
                        .read_tuples(&filter, ctx.request.snapshot, continuation.as_ref()),
                )
                .await?;
            for tuple in page.tuples {
                if tuple.subject == ctx.subject {
                    return Ok(Decision::Allowed);
                }
                if let Some(subject_relation) = tuple.subject.subject_relation {
                    usersets.push((
                        ObjectRef::new(tuple.subject.subject_type, tuple.subject.subject_id),
                        subject_relation,
                    ));
                }
            }
            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        self.short_circuit(
            usersets
                .iter()
                .map(|(target, rel)| self.resolve(ctx, target, rel, depth + 1))
                .collect(),
            Decision::Allowed,
        )
        .await
    }

    async fn evaluate_tuple_to_userset(
        &self,
        ctx: &CheckContext,
        object: &ObjectRef,
        via: &str,
        relation: &str,
        depth: usize,
    ) -> Result<Decision, CheckError> {
        let tuples = ctx
            .request
            .read_all(self.reader.as_ref(), &TupleFilter::for_object(object, via))
            .await?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for tuple in tuples {
            let target = tuple.subject.as_object();
            let entity = self
                .schema
                .entity(&target.object_type)
                .ok_or_else(|| CheckError::TypeNotFound(target.object_type.clone()))?;
            if !entity.defines(relation) {
                tracing::trace!(%target, relation, "traversal target lacks relation");
                continue;
            }
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }

        self.short_circuit(
            targets
                .iter()
                .map(|target| self.resolve(ctx, target, relation, depth + 1))
                .collect(),
            Decision::Allowed,
        )
        .await
    }

    /// Evaluates branches concurrently, up to the configured width. The
    /// first branch returning `dominant` or an error decides the node, and
    /// the branches still in flight are dropped.
    async fn short_circuit<'a>(
        &self,
        branches: Vec<Evaluation<'a>>,
        dominant: Decision,
    ) -> Result<Decision, CheckError> {
        let mut results = stream::iter(branches)
            .buffer_unordered(self.config.max_concurrent_branches.max(1));

        while let Some(result) = results.next().await {
            if result? == dominant {
                return Ok(dominant);
            }
        }
        Ok(dominant.negate())
    }
}
