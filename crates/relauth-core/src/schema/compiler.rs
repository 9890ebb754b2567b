use std::collections::{BTreeSet, HashMap, HashSet};

use super::ast::{Expression, Identifier, InfixOperator, PrefixOperator};
use super::model::EntityDefinition;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("{line}:{column}:undefined relation or permission '{name}' in entity '{entity}'")]
    UndefinedReference {
        line: usize,
        column: usize,
        entity: String,
        name: String,
    },
    #[error("{line}:{column}:'{via}' is not a relation of entity '{entity}'")]
    InvalidTraversal {
        line: usize,
        column: usize,
        entity: String,
        via: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Leaf {
    /// Subjects stored on `relation` of the object itself.
    Direct { relation: String },
    /// Another permission of the same entity.
    ComputedUserset { relation: String },
    /// Follow the objects stored on `via`, then evaluate `relation` on each.
    TupleToUserset { via: String, relation: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperatorTree {
    Leaf(Leaf),
    /// Every subject whose type is listed, or every subject at all when
    /// `subject_types` is `None`.
    Universe {
        subject_types: Option<BTreeSet<String>>,
    },
    Union(Vec<OperatorTree>),
    Intersection(Vec<OperatorTree>),
    Exclusion {
        base: Box<OperatorTree>,
        subtrahend: Box<OperatorTree>,
    },
}

impl OperatorTree {
    pub fn direct(relation: impl Into<String>) -> Self {
        Self::Leaf(Leaf::Direct {
            relation: relation.into(),
        })
    }

    pub fn computed(relation: impl Into<String>) -> Self {
        Self::Leaf(Leaf::ComputedUserset {
            relation: relation.into(),
        })
    }

    pub fn tuple_to_userset(via: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::Leaf(Leaf::TupleToUserset {
            via: via.into(),
            relation: relation.into(),
        })
    }
}

/// Lowers every permission expression of `entity` into an operator tree.
pub fn compile(entity: &EntityDefinition) -> Result<HashMap<String, OperatorTree>, CompileError> {
    let compiler = Compiler { entity };
    entity
        .permissions
        .iter()
        .map(|p| Ok((p.name.clone(), compiler.lower(&p.expression)?)))
        .collect()
}

struct Compiler<'a> {
    entity: &'a EntityDefinition,
}

impl Compiler<'_> {
    fn lower(&self, expression: &Expression) -> Result<OperatorTree, CompileError> {
        match expression {
            Expression::Identifier(ident) => self.lower_reference(ident),
            Expression::Prefix {
                operator: PrefixOperator::Not,
                right,
            } => Ok(OperatorTree::Exclusion {
                base: Box::new(OperatorTree::Universe {
                    subject_types: self.scope(right),
                }),
                subtrahend: Box::new(self.lower(right)?),
            }),
            Expression::Infix {
                operator,
                left,
                right,
            } => {
                let mut children = Vec::new();
                for side in [left, right] {
                    match (operator, self.lower(side)?) {
                        (InfixOperator::And, OperatorTree::Intersection(nested))
                        | (InfixOperator::Or, OperatorTree::Union(nested)) => {
                            children.extend(nested)
                        }
                        (_, tree) => children.push(tree),
                    }
                }
                Ok(match operator {
                    InfixOperator::And => OperatorTree::Intersection(children),
                    InfixOperator::Or => OperatorTree::Union(children),
                })
            }
        }
    }

    fn lower_reference(&self, ident: &Identifier) -> Result<OperatorTree, CompileError> {
        match ident.segments.as_slice() {
            [name] if self.entity.relation(name).is_some() => Ok(OperatorTree::direct(name)),
            [name] if self.entity.permission(name).is_some() => Ok(OperatorTree::computed(name)),
            [via, relation] => {
                if self.entity.relation(via).is_none() {
                    return Err(CompileError::InvalidTraversal {
                        line: ident.position.line,
                        column: ident.position.column,
                        entity: self.entity.name.clone(),
                        via: via.clone(),
                    });
                }
                Ok(OperatorTree::tuple_to_userset(via, relation))
            }
            _ => Err(CompileError::UndefinedReference {
                line: ident.position.line,
                column: ident.position.column,
                entity: self.entity.name.clone(),
                name: ident.literal(),
            }),
        }
    }

    /// Subject types an expression can possibly grant, or `None` when the
    /// set is open (traversals and subject-set relations).
    fn scope(&self, expression: &Expression) -> Option<BTreeSet<String>> {
        let mut types = BTreeSet::new();
        let mut visited = HashSet::new();
        self.collect_scope(expression, &mut types, &mut visited)
            .then_some(types)
    }

    fn collect_scope<'e>(
        &'e self,
        expression: &'e Expression,
        types: &mut BTreeSet<String>,
        visited: &mut HashSet<&'e str>,
    ) -> bool {
        match expression {
            Expression::Prefix { right, .. } => self.collect_scope(right, types, visited),
            Expression::Infix { left, right, .. } => {
                self.collect_scope(left, types, visited)
                    && self.collect_scope(right, types, visited)
            }
            Expression::Identifier(ident) => {
                let Some(name) = ident.as_simple() else {
                    return false;
                };
                if let Some(relation) = self.entity.relation(name) {
                    for reference in &relation.relation_types {
                        if reference.relation.is_some() {
                            return false;
                        }
                        types.insert(reference.entity.clone());
                    }
                    return true;
                }
                match self.entity.permission(name) {
                    Some(permission) if visited.insert(permission.name.as_str()) => {
                        self.collect_scope(&permission.expression, types, visited)
                    }
                    _ => true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::parse;
    use crate::schema::validation::validate;

    fn compile_entity(
        source: &str,
        entity: &str,
    ) -> Result<HashMap<String, OperatorTree>, CompileError> {
        let schema = validate(&parse(source).unwrap()).unwrap();
        compile(schema.entity(entity).unwrap())
    }

    fn scope(types: &[&str]) -> Option<BTreeSet<String>> {
        Some(types.iter().map(|t| t.to_string()).collect())
    }

    const REPOSITORY: &str = r#"
        entity user {}
        entity team { relation member @user }
        entity organization {
            relation admin @user
            relation member @user
        }
        entity repository {
            relation parent @organization
            relation owner @user
            relation reader @user @team#member
            action push = owner
            action read = push or reader or parent.member
            action delete = not owner
            action guarded = owner and not parent.admin
            action skim = not reader
        }
    "#;

    #[test]
    fn relation_reference_compiles_to_direct_leaf() {
        let ops = compile_entity(REPOSITORY, "repository").unwrap();

        assert_eq!(ops["push"], OperatorTree::direct("owner"));
    }

    #[test]
    fn permission_reference_compiles_to_computed_userset() {
        let ops = compile_entity(REPOSITORY, "repository").unwrap();

        assert_eq!(
            ops["read"],
            OperatorTree::Union(vec![
                OperatorTree::computed("push"),
                OperatorTree::direct("reader"),
                OperatorTree::tuple_to_userset("parent", "member"),
            ])
        );
    }

    #[test]
    fn not_compiles_to_exclusion_from_scoped_universe() {
        let ops = compile_entity(REPOSITORY, "repository").unwrap();

        assert_eq!(
            ops["delete"],
            OperatorTree::Exclusion {
                base: Box::new(OperatorTree::Universe {
                    subject_types: scope(&["user"]),
                }),
                subtrahend: Box::new(OperatorTree::direct("owner")),
            }
        );
    }

    #[test]
    fn not_over_traversal_is_unrestricted() {
        let ops = compile_entity(REPOSITORY, "repository").unwrap();

        assert_eq!(
            ops["guarded"],
            OperatorTree::Intersection(vec![
                OperatorTree::direct("owner"),
                OperatorTree::Exclusion {
                    base: Box::new(OperatorTree::Universe {
                        subject_types: None
                    }),
                    subtrahend: Box::new(OperatorTree::tuple_to_userset("parent", "admin")),
                },
            ])
        );
    }

    #[test]
    fn not_over_subject_set_relation_is_unrestricted() {
        let ops = compile_entity(REPOSITORY, "repository").unwrap();

        assert!(matches!(
            &ops["skim"],
            OperatorTree::Exclusion { base, .. }
                if **base == OperatorTree::Universe { subject_types: None }
        ));
    }

    #[test]
    fn scope_follows_computed_permissions() {
        let source = r#"
            entity user {}
            entity bot {}
            entity doc {
                relation owner @user
                relation agent @bot
                action edit = owner or agent
                action view = not edit
            }
        "#;
        let ops = compile_entity(source, "doc").unwrap();

        assert!(matches!(
            &ops["view"],
            OperatorTree::Exclusion { base, .. }
                if **base == OperatorTree::Universe { subject_types: scope(&["bot", "user"]) }
        ));
    }

    #[test]
    fn scope_tolerates_self_reference() {
        let source = "entity user {} entity doc { relation owner @user action loop = owner or not loop }";
        let ops = compile_entity(source, "doc").unwrap();

        assert!(ops.contains_key("loop"));
    }

    #[test]
    fn same_operator_chains_are_flattened_in_order() {
        let source = "entity user {} entity doc { relation a @user relation b @user relation c @user relation d @user action p = a and b and (c and d) action q = a or (b and c) or d }";
        let ops = compile_entity(source, "doc").unwrap();

        assert_eq!(
            ops["p"],
            OperatorTree::Intersection(vec![
                OperatorTree::direct("a"),
                OperatorTree::direct("b"),
                OperatorTree::direct("c"),
                OperatorTree::direct("d"),
            ])
        );
        assert_eq!(
            ops["q"],
            OperatorTree::Union(vec![
                OperatorTree::direct("a"),
                OperatorTree::Intersection(vec![
                    OperatorTree::direct("b"),
                    OperatorTree::direct("c"),
                ]),
                OperatorTree::direct("d"),
            ])
        );
    }

    #[test]
    fn undefined_reference_rejected_with_position() {
        let err = compile_entity("entity user {} entity doc {\n  action read = viewer\n}", "doc")
            .unwrap_err();

        assert_eq!(
            err,
            CompileError::UndefinedReference {
                line: 2,
                column: 17,
                entity: "doc".to_string(),
                name: "viewer".to_string(),
            }
        );
    }

    #[test]
    fn traversal_through_permission_rejected() {
        let source = "entity user {} entity doc { relation owner @user action edit = owner action read = edit.owner }";
        let err = compile_entity(source, "doc").unwrap_err();

        assert!(matches!(
            err,
            CompileError::InvalidTraversal { ref via, .. } if via == "edit"
        ));
    }

    #[test]
    fn traversal_target_relation_not_checked_at_compile_time() {
        let source = "entity user {} entity folder {} entity doc { relation parent @folder action read = parent.anything }";
        let ops = compile_entity(source, "doc").unwrap();

        assert_eq!(ops["read"], OperatorTree::tuple_to_userset("parent", "anything"));
    }
}
