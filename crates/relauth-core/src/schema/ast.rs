use std::fmt;

use super::token::Position;

/// A possibly dotted name as written in the source, e.g. `owner` or
/// `parent.admin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub segments: Vec<String>,
    pub position: Position,
}

impl Identifier {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            segments: vec![name.into()],
            position,
        }
    }

    pub fn dotted(segments: Vec<String>, position: Position) -> Self {
        Self { segments, position }
    }

    pub fn literal(&self) -> String {
        self.segments.join(".")
    }

    /// The single segment of an undotted name.
    pub fn as_simple(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [name] => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaStatement {
    pub statements: Vec<EntityStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStatement {
    pub name: Identifier,
    pub open_brace: Position,
    pub relations: Vec<RelationStatement>,
    pub permissions: Vec<PermissionStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationStatement {
    pub name: Identifier,
    pub relation_types: Vec<RelationTypeStatement>,
}

/// `@user` or `@organization#member`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTypeStatement {
    pub entity: Identifier,
    pub relation: Option<Identifier>,
}

impl fmt::Display for RelationTypeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.entity)?;
        if let Some(ref relation) = self.relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKeyword {
    Action,
    Permission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionStatement {
    pub keyword: PermissionKeyword,
    pub name: Identifier,
    pub expression: ExpressionStatement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionStatement {
    pub expression: Expression,
}

impl fmt::Display for ExpressionStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.expression, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOperator {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    And,
    Or,
}

impl fmt::Display for InfixOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Identifier(Identifier),
    Prefix {
        operator: PrefixOperator,
        right: Box<Expression>,
    },
    Infix {
        operator: InfixOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn not(right: Expression) -> Self {
        Self::Prefix {
            operator: PrefixOperator::Not,
            right: Box::new(right),
        }
    }

    pub fn infix(operator: InfixOperator, left: Expression, right: Expression) -> Self {
        Self::Infix {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infix { .. } => write!(f, "({self})"),
            _ => fmt::Display::fmt(self, f),
        }
    }
}

/// Normalized source form: nested infix operands are parenthesized, so
/// `a and b and c` renders as `(a and b) and c`.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(ident) => fmt::Display::fmt(ident, f),
            Self::Prefix {
                operator: PrefixOperator::Not,
                right,
            } => {
                f.write_str("not ")?;
                right.fmt_operand(f)
            }
            Self::Infix {
                operator,
                left,
                right,
            } => {
                left.fmt_operand(f)?;
                write!(f, " {operator} ")?;
                right.fmt_operand(f)
            }
        }
    }
}
