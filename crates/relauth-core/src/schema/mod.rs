pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod token;
pub mod validation;

pub use compiler::{CompileError, Leaf, OperatorTree};
pub use model::{
    EntityDefinition, PermissionDefinition, RelationDefinition, RelationTypeRef, Schema,
};
pub use parser::ParseError;
pub use validation::{LimitError, SchemaLimits, ValidationError, validate_schema_limits};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("schema exceeds limits: {}", format_limit_errors(.0))]
    Limits(Vec<LimitError>),
}

fn format_limit_errors(errors: &[LimitError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parses, validates and compiles schema text. Nothing is returned unless
/// every stage succeeds.
pub fn parse_schema(source: &str) -> Result<Schema, SchemaError> {
    let ast = parser::parse(source)?;
    let mut schema = validation::validate(&ast)?;
    for entity in schema.entities_mut() {
        entity.operators = compiler::compile(entity)?;
    }
    tracing::debug!(entities = schema.entities().len(), "schema compiled");
    Ok(schema)
}

/// [`parse_schema`] followed by [`validate_schema_limits`].
pub fn parse_schema_with_limits(
    source: &str,
    limits: &SchemaLimits,
) -> Result<Schema, SchemaError> {
    let schema = parse_schema(source)?;
    validate_schema_limits(&schema, limits).map_err(SchemaError::Limits)?;
    Ok(schema)
}
