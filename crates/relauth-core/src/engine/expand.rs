use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::schema::{Leaf, OperatorTree, Schema};
use crate::tuple::{ObjectRef, SnapshotToken, SubjectRef, TupleFilter};

use super::context::{MemoKey, RequestContext};
use super::subject_set::SubjectSet;
use super::{CheckError, EngineConfig, TupleReader};

#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub object: ObjectRef,
    pub permission: String,
    pub snapshot: Option<SnapshotToken>,
}

/// Every subject holding a permission, in the shape of the operator tree
/// that grants it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectSetTree {
    /// One stored subject, possibly a subject set such as `team:eng#member`.
    Leaf {
        subject: SubjectRef,
    },
    /// Tuples stored on a relation. Subject-set subjects appear both as a
    /// leaf and, after it, as their own expansion.
    Direct {
        object: ObjectRef,
        relation: String,
        children: Vec<SubjectSetTree>,
    },
    /// A permission, expanded through its operator tree.
    Computed {
        object: ObjectRef,
        permission: String,
        child: Box<SubjectSetTree>,
    },
    TupleToUserset {
        object: ObjectRef,
        via: String,
        relation: String,
        children: Vec<SubjectSetTree>,
    },
    Union {
        children: Vec<SubjectSetTree>,
    },
    Intersection {
        children: Vec<SubjectSetTree>,
    },
    Exclusion {
        base: Box<SubjectSetTree>,
        subtrahend: Box<SubjectSetTree>,
    },
    Universe {
        subject_types: Option<BTreeSet<String>>,
    },
}

impl SubjectSetTree {
    /// The ids of `subject_type` (with `subject_relation`, for subject sets)
    /// that this tree grants.
    pub fn subjects_of_type(
        &self,
        subject_type: &str,
        subject_relation: Option<&str>,
    ) -> SubjectSet {
        let of = |tree: &SubjectSetTree| tree.subjects_of_type(subject_type, subject_relation);
        match self {
            Self::Leaf { subject } => {
                if subject.subject_type == subject_type
                    && subject.subject_relation.as_deref() == subject_relation
                {
                    SubjectSet::from_iter([subject.subject_id.clone()])
                } else {
                    SubjectSet::empty()
                }
            }
            Self::Direct { children, .. }
            | Self::TupleToUserset { children, .. }
            | Self::Union { children } => children
                .iter()
                .map(of)
                .fold(SubjectSet::empty(), SubjectSet::union),
            Self::Computed { child, .. } => of(child),
            Self::Intersection { children } => children
                .iter()
                .map(of)
                .reduce(SubjectSet::intersection)
                .unwrap_or_else(SubjectSet::empty),
            Self::Exclusion { base, subtrahend } => of(base).difference(of(subtrahend)),
            Self::Universe { subject_types } => {
                if subject_types
                    .as_ref()
                    .is_none_or(|types| types.contains(subject_type))
                {
                    SubjectSet::everyone()
                } else {
                    SubjectSet::empty()
                }
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        let nested = |f: &mut fmt::Formatter<'_>, children: &[SubjectSetTree]| {
            children
                .iter()
                .try_for_each(|child| child.fmt_indented(f, indent + 1))
        };
        match self {
            Self::Leaf { subject } => writeln!(f, "{pad}{subject}"),
            Self::Direct {
                object,
                relation,
                children,
            } => {
                writeln!(f, "{pad}{object}#{relation}")?;
                nested(f, children)
            }
            Self::Computed {
                object,
                permission,
                child,
            } => {
                writeln!(f, "{pad}{object}#{permission}")?;
                child.fmt_indented(f, indent + 1)
            }
            Self::TupleToUserset {
                object,
                via,
                relation,
                children,
            } => {
                writeln!(f, "{pad}{object}#{via}->{relation}")?;
                nested(f, children)
            }
            Self::Union { children } => {
                writeln!(f, "{pad}or")?;
                nested(f, children)
            }
            Self::Intersection { children } => {
                writeln!(f, "{pad}and")?;
                nested(f, children)
            }
            Self::Exclusion { base, subtrahend } => {
                writeln!(f, "{pad}exclude")?;
                base.fmt_indented(f, indent + 1)?;
                subtrahend.fmt_indented(f, indent + 1)
            }
            Self::Universe {
                subject_types: Some(types),
            } => {
                let types: Vec<&str> = types.iter().map(String::as_str).collect();
                writeln!(f, "{pad}all of {}", types.join(", "))
            }
            Self::Universe {
                subject_types: None,
            } => writeln!(f, "{pad}all subjects"),
        }
    }
}

/// Indented outline, one node per line.
impl fmt::Display for SubjectSetTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

type Expansion<'a> =
    Pin<Box<dyn Future<Output = Result<SubjectSetTree, CheckError>> + Send + 'a>>;

pub(crate) type ExpandContext = RequestContext<SubjectSetTree>;

pub struct ExpandEngine<T: TupleReader> {
    reader: Arc<T>,
    schema: Arc<Schema>,
    config: EngineConfig,
}

impl<T: TupleReader> Clone for ExpandEngine<T> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            schema: Arc::clone(&self.schema),
            config: self.config.clone(),
        }
    }
}

impl<T: TupleReader> ExpandEngine<T> {
    pub fn new(reader: Arc<T>, schema: Arc<Schema>, config: EngineConfig) -> Self {
        Self {
            reader,
            schema,
            config,
        }
    }

    pub async fn expand(&self, request: &ExpandRequest) -> Result<SubjectSetTree, CheckError> {
        self.expand_with_cancellation(request, CancellationToken::new())
            .await
    }

    pub async fn expand_with_cancellation(
        &self,
        request: &ExpandRequest,
        cancel: CancellationToken,
    ) -> Result<SubjectSetTree, CheckError> {
        let snapshot = match request.snapshot {
            Some(snapshot) => snapshot,
            None => self.reader.snapshot().await?,
        };
        let ctx = ExpandContext::new(snapshot, &self.config, cancel.child_token());
        let tree = ctx
            .with_deadline(
                self.config.timeout,
                self.expand_at(&ctx, &request.object, &request.permission),
            )
            .await?;

        tracing::debug!(
            object = %request.object,
            permission = %request.permission,
            snapshot = %snapshot,
            "expand resolved"
        );
        Ok(tree)
    }

    /// Expands `name` on `object` inside a caller-owned context.
    pub(crate) async fn expand_at(
        &self,
        ctx: &ExpandContext,
        object: &ObjectRef,
        name: &str,
    ) -> Result<SubjectSetTree, CheckError> {
        self.expand_named(ctx, object, name, 0).await
    }

    fn expand_named<'a>(
        &'a self,
        ctx: &'a ExpandContext,
        object: &'a ObjectRef,
        name: &'a str,
        depth: usize,
    ) -> Expansion<'a> {
        Box::pin(async move {
            let key = MemoKey::expand(object, name);
            if let Some(tree) = ctx.memoized(&key) {
                return Ok(tree);
            }
            if depth > self.config.max_depth {
                tracing::warn!(%object, name, depth, "max depth exceeded during expand");
                return Err(CheckError::MaxDepthExceeded(depth));
            }
            ctx.ensure_active()?;

            let entity = self
                .schema
                .entity(&object.object_type)
                .ok_or_else(|| CheckError::TypeNotFound(object.object_type.clone()))?;

            let tree = if let Some(operator) = entity.operator(name) {
                SubjectSetTree::Computed {
                    object: object.clone(),
                    permission: name.to_string(),
                    child: Box::new(self.expand_tree(ctx, operator, object, depth).await?),
                }
            } else if entity.relation(name).is_some() {
                self.expand_direct(ctx, object, name, depth).await?
            } else {
                return Err(CheckError::PermissionNotFound {
                    type_name: object.object_type.clone(),
                    permission: name.to_string(),
                });
            };

            ctx.remember(key, tree.clone());
            Ok(tree)
        })
    }

    fn expand_tree<'a>(
        &'a self,
        ctx: &'a ExpandContext,
        tree: &'a OperatorTree,
        object: &'a ObjectRef,
        depth: usize,
    ) -> Expansion<'a> {
        Box::pin(async move {
            match tree {
                OperatorTree::Leaf(Leaf::Direct { relation }) => {
                    self.expand_named(ctx, object, relation, depth).await
                }
                OperatorTree::Leaf(Leaf::ComputedUserset { relation }) => {
                    self.expand_named(ctx, object, relation, depth + 1).await
                }
                OperatorTree::Leaf(Leaf::TupleToUserset { via, relation }) => {
                    self.expand_tuple_to_userset(ctx, object, via, relation, depth)
                        .await
                }
                OperatorTree::Universe { subject_types } => Ok(SubjectSetTree::Universe {
                    subject_types: subject_types.clone(),
                }),
                OperatorTree::Union(children) => Ok(SubjectSetTree::Union {
                    children: self
                        .expand_all(
                            children
                                .iter()
                                .map(|child| self.expand_tree(ctx, child, object, depth))
                                .collect(),
                        )
                        .await?,
                }),
                OperatorTree::Intersection(children) => Ok(SubjectSetTree::Intersection {
                    children: self
                        .expand_all(
                            children
                                .iter()
                                .map(|child| self.expand_tree(ctx, child, object, depth))
                                .collect(),
                        )
                        .await?,
                }),
                OperatorTree::Exclusion { base, subtrahend } => {
                    let (base, subtrahend) = futures::try_join!(
                        self.expand_tree(ctx, base, object, depth),
                        self.expand_tree(ctx, subtrahend, object, depth),
                    )?;
                    Ok(SubjectSetTree::Exclusion {
                        base: Box::new(base),
                        subtrahend: Box::new(subtrahend),
                    })
                }
            }
        })
    }

    async fn expand_direct(
        &self,
        ctx: &ExpandContext,
        object: &ObjectRef,
        relation: &str,
        depth: usize,
    ) -> Result<SubjectSetTree, CheckError> {
        let tuples = ctx
            .read_all(self.reader.as_ref(), &TupleFilter::for_object(object, relation))
            .await?;

        let mut children = Vec::with_capacity(tuples.len());
        let mut usersets = Vec::new();
        for tuple in tuples {
            if let Some(ref subject_relation) = tuple.subject.subject_relation {
                usersets.push((tuple.subject.as_object(), subject_relation.clone()));
            }
            children.push(SubjectSetTree::Leaf {
                subject: tuple.subject,
            });
        }

        let expanded = self
            .expand_all(
                usersets
                    .iter()
                    .map(|(target, rel)| self.expand_named(ctx, target, rel, depth + 1))
                    .collect(),
            )
            .await?;
        children.extend(expanded);

        Ok(SubjectSetTree::Direct {
            object: object.clone(),
            relation: relation.to_string(),
            children,
        })
    }

    async fn expand_tuple_to_userset(
        &self,
        ctx: &ExpandContext,
        object: &ObjectRef,
        via: &str,
        relation: &str,
        depth: usize,
    ) -> Result<SubjectSetTree, CheckError> {
        let tuples = ctx
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
            if entity.defines(relation) && seen.insert(target.clone()) {
                targets.push(target);
            }
        }

        let children = self
            .expand_all(
                targets
                    .iter()
                    .map(|target| self.expand_named(ctx, target, relation, depth + 1))
                    .collect(),
            )
            .await?;

        Ok(SubjectSetTree::TupleToUserset {
            object: object.clone(),
            via: via.to_string(),
            relation: relation.to_string(),
            children,
        })
    }

    /// Runs expansions concurrently, keeping their order.
    async fn expand_all<'a>(
        &self,
        branches: Vec<Expansion<'a>>,
    ) -> Result<Vec<SubjectSetTree>, CheckError> {
        stream::iter(branches)
            .buffered(self.config.max_concurrent_branches.max(1))
            .try_collect()
            .await
    }
}
