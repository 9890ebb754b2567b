use std::collections::HashMap;

use super::ast::Expression;
use super::compiler::OperatorTree;

/// A validated, compiled schema. Built once per schema version and shared
/// read-only between concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: Vec<EntityDefinition>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(entities: Vec<EntityDefinition>) -> Self {
        let index = entities
            .iter()
            .enumerate()
            .map(|(i, entity)| (entity.name.clone(), i))
            .collect();
        Self { entities, index }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    pub fn entities(&self) -> &[EntityDefinition] {
        &self.entities
    }

    pub(crate) fn entities_mut(&mut self) -> impl Iterator<Item = &mut EntityDefinition> {
        self.entities.iter_mut()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    pub name: String,
    pub relations: Vec<RelationDefinition>,
    pub permissions: Vec<PermissionDefinition>,
    pub operators: HashMap<String, OperatorTree>,
}

impl EntityDefinition {
    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDefinition> {
        self.permissions.iter().find(|p| p.name == name)
    }

    /// The compiled tree of a permission.
    pub fn operator(&self, permission: &str) -> Option<&OperatorTree> {
        self.operators.get(permission)
    }

    /// Whether `name` is a relation or a permission of this entity.
    pub fn defines(&self, name: &str) -> bool {
        self.relation(name).is_some() || self.permission(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDefinition {
    pub name: String,
    pub relation_types: Vec<RelationTypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTypeRef {
    pub entity: String,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDefinition {
    pub name: String,
    pub expression: Expression,
}
