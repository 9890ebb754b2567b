use std::sync::LazyLock;

use pest::Parser;
use pest::error::{ErrorVariant, InputLocation, LineColLocation};
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

use super::ast::{
    EntityStatement, Expression, ExpressionStatement, Identifier, InfixOperator,
    PermissionKeyword, PermissionStatement, RelationStatement, RelationTypeStatement,
    SchemaStatement,
};
use super::lexer::{Lexer, token_kind};
use super::token::{Position, Token, TokenKind};

#[derive(Parser)]
#[grammar = "schema/grammar.pest"]
pub(super) struct SchemaParser;

/// Operator precedence, loosest first.
static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{line}:{column}:{message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
}

impl ParseError {
    pub fn position(&self) -> Position {
        match self {
            Self::Syntax { line, column, .. } => Position::new(*line, *column),
        }
    }

    fn from_pest(err: pest::error::Error<Rule>, source: &str) -> Self {
        let (line, column) = match &err.line_col {
            LineColLocation::Pos(pos) | LineColLocation::Span(pos, _) => *pos,
        };
        let offset = match &err.location {
            InputLocation::Pos(offset) | InputLocation::Span((offset, _)) => *offset,
        };
        let found = describe(&Lexer::new(source.get(offset..).unwrap_or_default()).next_token());

        let message = match err.variant {
            ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
                let mut names: Vec<String> = Vec::new();
                for name in positives.into_iter().map(expected) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                format!("expected {}, found {found}", one_of(&names))
            }
            ErrorVariant::ParsingError { .. } => format!("unexpected {found}"),
            ErrorVariant::CustomError { message } => message,
        };
        syntax_error(Position::new(line, column), message)
    }
}

fn syntax_error(position: Position, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line: position.line,
        column: position.column,
        message: message.into(),
    }
}

fn missing_token(position: Position, context: &str) -> ParseError {
    syntax_error(position, format!("missing token: {context}"))
}

fn unexpected_rule(position: Position, rule: Rule) -> ParseError {
    syntax_error(position, format!("unexpected rule: {rule:?}"))
}

fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Ident => format!("identifier '{}'", token.literal),
        TokenKind::Illegal => format!("illegal character '{}'", token.literal),
        TokenKind::Eof => "end of input".to_string(),
        kind => format!("'{kind}'"),
    }
}

/// How an expected rule reads in an error message.
fn expected(rule: Rule) -> String {
    match token_kind(rule) {
        Some(TokenKind::Ident) => return "identifier".to_string(),
        Some(TokenKind::Eof) => return "end of input".to_string(),
        Some(kind) => return format!("'{kind}'"),
        None => {}
    }
    match rule {
        Rule::schema | Rule::entity_statement => "'entity'",
        Rule::relation_statement => "'relation'",
        Rule::permission_statement => "'action' or 'permission'",
        Rule::relation_type => "'@'",
        Rule::reference => "identifier",
        Rule::group => "'('",
        Rule::expression => "expression",
        _ => "token",
    }
    .to_string()
}

fn one_of(names: &[String]) -> String {
    match names.split_last() {
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
        None => String::new(),
    }
}

pub(super) fn position_of(pair: &Pair<'_, Rule>) -> Position {
    let (line, column) = pair.line_col();
    Position::new(line, column)
}

fn identifier(pair: &Pair<'_, Rule>) -> Identifier {
    Identifier::new(pair.as_str(), position_of(pair))
}

/// Parses schema text into its syntax tree.
pub fn parse(source: &str) -> Result<SchemaStatement, ParseError> {
    let schema = SchemaParser::parse(Rule::schema, source)
        .map_err(|err| ParseError::from_pest(err, source))?
        .next()
        .ok_or_else(|| missing_token(Position::new(1, 1), "schema"))?;

    let statements = schema
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::entity_statement)
        .map(parse_entity)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SchemaStatement { statements })
}

fn parse_entity(pair: Pair<'_, Rule>) -> Result<EntityStatement, ParseError> {
    let position = position_of(&pair);
    let mut name = None;
    let mut open_brace = None;
    let mut relations = Vec::new();
    let mut permissions = Vec::new();

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::ident => name = Some(identifier(&item)),
            Rule::lbrace => open_brace = Some(position_of(&item)),
            Rule::relation_statement => relations.push(parse_relation(item)?),
            Rule::permission_statement => permissions.push(parse_permission(item)?),
            _ => {}
        }
    }

    Ok(EntityStatement {
        name: name.ok_or_else(|| missing_token(position, "entity name"))?,
        open_brace: open_brace.ok_or_else(|| missing_token(position, "entity body"))?,
        relations,
        permissions,
    })
}

fn parse_relation(pair: Pair<'_, Rule>) -> Result<RelationStatement, ParseError> {
    let position = position_of(&pair);
    let mut name = None;
    let mut relation_types = Vec::new();

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::ident => name = Some(identifier(&item)),
            Rule::relation_type => relation_types.push(parse_relation_type(item)?),
            _ => {}
        }
    }

    Ok(RelationStatement {
        name: name.ok_or_else(|| missing_token(position, "relation name"))?,
        relation_types,
    })
}

fn parse_relation_type(pair: Pair<'_, Rule>) -> Result<RelationTypeStatement, ParseError> {
    let position = position_of(&pair);
    let mut idents = pair
        .into_inner()
        .filter(|item| item.as_rule() == Rule::ident);
    let entity = idents
        .next()
        .map(|item| identifier(&item))
        .ok_or_else(|| missing_token(position, "relation type"))?;
    let relation = idents.next().map(|item| identifier(&item));

    Ok(RelationTypeStatement { entity, relation })
}

fn parse_permission(pair: Pair<'_, Rule>) -> Result<PermissionStatement, ParseError> {
    let position = position_of(&pair);
    let mut keyword = PermissionKeyword::Permission;
    let mut name = None;
    let mut expression = None;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::action_kw => keyword = PermissionKeyword::Action,
            Rule::ident => name = Some(identifier(&item)),
            Rule::expression => expression = Some(parse_expression(item)?),
            _ => {}
        }
    }

    Ok(PermissionStatement {
        keyword,
        name: name.ok_or_else(|| missing_token(position, "permission name"))?,
        expression: ExpressionStatement {
            expression: expression
                .ok_or_else(|| missing_token(position, "permission expression"))?,
        },
    })
}

fn parse_expression(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    PRATT
        .map_primary(parse_operand)
        .map_prefix(|_, right| Ok(Expression::not(right?)))
        .map_infix(|left, op, right| {
            let operator = match op.as_rule() {
                Rule::and_op => InfixOperator::And,
                Rule::or_op => InfixOperator::Or,
                other => return Err(unexpected_rule(position_of(&op), other)),
            };
            Ok(Expression::infix(operator, left?, right?))
        })
        .parse(pair.into_inner())
}

fn parse_operand(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    let position = position_of(&pair);
    match pair.as_rule() {
        Rule::reference => {
            let segments = pair
                .into_inner()
                .filter(|item| item.as_rule() == Rule::ident)
                .map(|item| item.as_str().to_string())
                .collect();
            Ok(Expression::Identifier(Identifier::dotted(segments, position)))
        }
        Rule::group => {
            let inner = pair
                .into_inner()
                .find(|item| item.as_rule() == Rule::expression)
                .ok_or_else(|| missing_token(position, "grouped expression"))?;
            parse_expression(inner)
        }
        other => Err(unexpected_rule(position, other)),
    }
}
