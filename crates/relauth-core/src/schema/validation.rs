use std::collections::{HashMap, HashSet};

use super::ast::{EntityStatement, SchemaStatement};
use super::model::{
    EntityDefinition, PermissionDefinition, RelationDefinition, RelationTypeRef, Schema,
};
use super::token::Position;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{line}:{column}:{message}")]
    Duplication {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("{message}")]
    Type { message: String },
}

fn duplication(position: Position, message: String) -> ValidationError {
    ValidationError::Duplication {
        line: position.line,
        column: position.column,
        message,
    }
}

/// Checks names and type references and builds the uncompiled model.
/// Stops at the first problem, in source order.
pub fn validate(ast: &SchemaStatement) -> Result<Schema, ValidationError> {
    let mut seen_entities = HashSet::new();
    for entity in &ast.statements {
        let name = entity.name.literal();
        if !seen_entities.insert(name.clone()) {
            return Err(duplication(
                entity.open_brace,
                format!("duplication found for {name}"),
            ));
        }
        check_member_names(entity)?;
    }

    let members: HashMap<String, HashSet<String>> = ast
        .statements
        .iter()
        .map(|entity| {
            let names = entity
                .relations
                .iter()
                .map(|r| r.name.literal())
                .chain(entity.permissions.iter().map(|p| p.name.literal()))
                .collect();
            (entity.name.literal(), names)
        })
        .collect();

    let entities = ast
        .statements
        .iter()
        .map(|entity| build_entity(entity, &members))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Schema::new(entities))
}

fn check_member_names(entity: &EntityStatement) -> Result<(), ValidationError> {
    let entity_name = entity.name.literal();
    let mut declared: Vec<_> = entity
        .relations
        .iter()
        .map(|r| &r.name)
        .chain(entity.permissions.iter().map(|p| &p.name))
        .collect();
    declared.sort_by_key(|name| name.position);

    let mut seen = HashSet::new();
    for name in declared {
        let literal = name.literal();
        if !seen.insert(literal.clone()) {
            return Err(duplication(
                name.position,
                format!("duplication found for {entity_name}#{literal}"),
            ));
        }
    }
    Ok(())
}

fn build_entity(
    entity: &EntityStatement,
    members: &HashMap<String, HashSet<String>>,
) -> Result<EntityDefinition, ValidationError> {
    let name = entity.name.literal();

    let mut relations = Vec::with_capacity(entity.relations.len());
    for relation in &entity.relations {
        let relation_name = relation.name.literal();
        let mut relation_types = Vec::with_capacity(relation.relation_types.len());
        for reference in &relation.relation_types {
            let target = reference.entity.literal();
            let Some(target_members) = members.get(&target) else {
                return Err(ValidationError::Type {
                    message: format!(
                        "entity '{target}' referenced by {name}#{relation_name} is not defined"
                    ),
                });
            };
            let subject_relation = reference.relation.as_ref().map(|r| r.literal());
            if let Some(ref subject_relation) = subject_relation
                && !target_members.contains(subject_relation)
            {
                return Err(ValidationError::Type {
                    message: format!(
                        "'{target}#{subject_relation}' referenced by {name}#{relation_name} is not defined"
                    ),
                });
            }
            relation_types.push(RelationTypeRef {
                entity: target,
                relation: subject_relation,
            });
        }
        relations.push(RelationDefinition {
            name: relation_name,
            relation_types,
        });
    }

    let permissions = entity
        .permissions
        .iter()
        .map(|p| PermissionDefinition {
            name: p.name.literal(),
            expression: p.expression.expression.clone(),
        })
        .collect();

    Ok(EntityDefinition {
        name,
        relations,
        permissions,
        operators: HashMap::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLimits {
    pub max_entities: usize,
    pub max_relations_per_entity: usize,
    pub max_permissions_per_entity: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_entities: 50,
            max_relations_per_entity: 30,
            max_permissions_per_entity: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    #[error("too many entities: {count} exceeds limit of {limit}")]
    TooManyEntities { count: usize, limit: usize },
    #[error("too many relations in entity '{entity}': {count} exceeds limit of {limit}")]
    TooManyRelations {
        entity: String,
        count: usize,
        limit: usize,
    },
    #[error("too many permissions in entity '{entity}': {count} exceeds limit of {limit}")]
    TooManyPermissions {
        entity: String,
        count: usize,
        limit: usize,
    },
}

pub fn validate_schema_limits(
    schema: &Schema,
    limits: &SchemaLimits,
) -> Result<(), Vec<LimitError>> {
    let mut errors = Vec::new();

    let entities = schema.entities();
    if entities.len() > limits.max_entities {
        errors.push(LimitError::TooManyEntities {
            count: entities.len(),
            limit: limits.max_entities,
        });
    }

    for entity in entities {
        if entity.relations.len() > limits.max_relations_per_entity {
            errors.push(LimitError::TooManyRelations {
                entity: entity.name.clone(),
                count: entity.relations.len(),
                limit: limits.max_relations_per_entity,
            });
        }
        if entity.permissions.len() > limits.max_permissions_per_entity {
            errors.push(LimitError::TooManyPermissions {
                entity: entity.name.clone(),
                count: entity.permissions.len(),
                limit: limits.max_permissions_per_entity,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;
    use crate::schema::parser::parse;

    fn validate_source(source: &str) -> Result<Schema, ValidationError> {
        validate(&parse(source).unwrap())
    }

    fn limits_with(max_entities: usize, max_rels: usize, max_perms: usize) -> SchemaLimits {
        SchemaLimits {
            max_entities,
            max_relations_per_entity: max_rels,
            max_permissions_per_entity: max_perms,
        }
    }

    // --- Duplicates ---

    #[test]
    fn valid_schema_builds_model() {
        let schema = validate_source(
            "entity user {} entity organization { relation admin @user action manage = admin }",
        )
        .unwrap();

        let org = schema.entity("organization").unwrap();
        assert_eq!(org.relations[0].name, "admin");
        assert_eq!(
            org.relations[0].relation_types,
            vec![RelationTypeRef {
                entity: "user".to_string(),
                relation: None
            }]
        );
        assert_eq!(org.permissions[0].name, "manage");
        assert!(org.defines("admin"));
        assert!(org.defines("manage"));
        assert!(!org.defines("member"));
    }

    #[test]
    fn duplicate_entity_reported_at_second_open_brace() {
        let err = validate_source("entity user {}\nentity user {}").unwrap_err();

        assert_eq!(
            err,
            ValidationError::Duplication {
                line: 2,
                column: 13,
                message: "duplication found for user".to_string(),
            }
        );
        assert_eq!(err.to_string(), "2:13:duplication found for user");
    }

    #[test]
    fn duplicate_relation_reported_at_second_name() {
        let input = "entity user {}\nentity organization {\n    relation member @user\n    relation member @user\n}";
        let err = validate_source(input).unwrap_err();

        assert_eq!(
            err.to_string(),
            "4:14:duplication found for organization#member"
        );
    }

    #[test]
    fn relation_and_permission_share_namespace() {
        let input = "entity user {}\nentity repo {\n  relation owner @user\n  action owner = owner\n}";
        let err = validate_source(input).unwrap_err();

        assert_eq!(err.to_string(), "4:10:duplication found for repo#owner");
    }

    #[test]
    fn duplicate_permission_reported_even_when_declared_before_relations() {
        let input =
            "entity user {}\nentity repo {\n  action read = owner\n  relation owner @user\n  permission read = owner\n}";
        let err = validate_source(input).unwrap_err();

        assert_eq!(err.to_string(), "5:14:duplication found for repo#read");
    }

    #[test]
    fn first_duplicate_in_source_order_wins() {
        let input = "entity user {}\nentity user {\n  relation a @user\n  relation a @user\n}";
        let err = validate_source(input).unwrap_err();

        assert_eq!(err.to_string(), "2:13:duplication found for user");
    }

    // --- Type references ---

    #[test]
    fn forward_references_resolve() {
        let schema =
            validate_source("entity repo { relation parent @organization } entity organization {}")
                .unwrap();

        assert!(schema.entity("repo").is_some());
    }

    #[test]
    fn unknown_entity_reference_rejected() {
        let err = validate_source("entity repo { relation owner @user }").unwrap_err();

        assert!(matches!(
            &err,
            ValidationError::Type { message } if message.contains("'user'")
        ));
    }

    #[test]
    fn unknown_subject_relation_rejected() {
        let err = validate_source(
            "entity user {} entity team { relation owner @user } entity repo { relation reader @team#member }",
        )
        .unwrap_err();

        assert!(matches!(
            &err,
            ValidationError::Type { message } if message.contains("team#member")
        ));
    }

    #[test]
    fn subject_set_reference_may_name_a_permission() {
        let schema = validate_source(
            "entity user {} entity team { relation owner @user action member = owner } entity repo { relation reader @team#member }",
        )
        .unwrap();

        let reader = schema.entity("repo").unwrap().relation("reader").unwrap();
        assert_eq!(reader.relation_types[0].relation.as_deref(), Some("member"));
    }

    // --- Limits ---

    #[test]
    fn schema_within_limits_passes() {
        let schema =
            parse_schema("entity user {} entity group { relation member @user }").unwrap();

        assert!(validate_schema_limits(&schema, &SchemaLimits::default()).is_ok());
    }

    #[test]
    fn exceeding_max_entities_rejected() {
        let schema = parse_schema("entity a {} entity b {} entity c {}").unwrap();

        let errors = validate_schema_limits(&schema, &limits_with(2, 30, 30)).unwrap_err();

        assert_eq!(errors, vec![LimitError::TooManyEntities { count: 3, limit: 2 }]);
    }

    #[test]
    fn exceeding_max_relations_rejected() {
        let schema = parse_schema(
            "entity user {} entity doc { relation a @user relation b @user relation c @user }",
        )
        .unwrap();

        let errors = validate_schema_limits(&schema, &limits_with(50, 2, 30)).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            LimitError::TooManyRelations {
                entity,
                count: 3,
                limit: 2
            } if entity == "doc"
        ));
    }

    #[test]
    fn all_limit_violations_reported_together() {
        let schema = parse_schema(
            "entity user {} entity doc { relation a @user relation b @user action p1 = a action p2 = b }",
        )
        .unwrap();

        let errors = validate_schema_limits(&schema, &limits_with(1, 1, 1)).unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(matches!(&errors[1], LimitError::TooManyRelations { .. }));
        assert!(matches!(&errors[2], LimitError::TooManyPermissions { .. }));
    }
}
