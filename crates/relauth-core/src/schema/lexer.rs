use std::collections::VecDeque;

use pest::Parser;
use pest::iterators::Pair;

use super::parser::{Rule, SchemaParser, position_of};
use super::token::{Position, Token, TokenKind};

/// Turns schema text into tokens. Never fails: characters outside the
/// language come back as [`TokenKind::Illegal`] and the stream ends with
/// [`TokenKind::Eof`], repeated forever.
pub struct Lexer {
    tokens: VecDeque<Token>,
    end: Position,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let mut tokens = VecDeque::new();
        let mut end = Position::new(1, 1);

        match SchemaParser::parse(Rule::tokens, source) {
            Ok(pairs) => {
                for pair in pairs.flat_map(Pair::into_inner) {
                    let position = position_of(&pair);
                    match token_kind(pair.as_rule()) {
                        Some(TokenKind::Eof) => end = position,
                        Some(kind) => tokens.push_back(Token::new(kind, pair.as_str(), position)),
                        None => {}
                    }
                }
            }
            Err(err) => {
                let (line, column) = match err.line_col {
                    pest::error::LineColLocation::Pos(pos)
                    | pest::error::LineColLocation::Span(pos, _) => pos,
                };
                end = Position::new(line, column);
                tokens.push_back(Token::new(TokenKind::Illegal, source, end));
            }
        }

        Self { tokens, end }
    }

    pub fn next_token(&mut self) -> Token {
        self.tokens
            .pop_front()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, "", self.end))
    }

    /// Every token up to and including the first `Eof`.
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.is(TokenKind::Eof);
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }
}

/// The token a grammar rule stands for, if it is a terminal.
pub(super) fn token_kind(rule: Rule) -> Option<TokenKind> {
    let kind = match rule {
        Rule::ident => TokenKind::Ident,
        Rule::entity_kw => TokenKind::Entity,
        Rule::relation_kw => TokenKind::Relation,
        Rule::permission_kw => TokenKind::Permission,
        Rule::action_kw => TokenKind::Action,
        Rule::and_op => TokenKind::And,
        Rule::or_op => TokenKind::Or,
        Rule::not_op => TokenKind::Not,
        Rule::sign => TokenKind::Sign,
        Rule::hash => TokenKind::Hash,
        Rule::dot => TokenKind::Dot,
        Rule::assign => TokenKind::Assign,
        Rule::lbrace => TokenKind::LBrace,
        Rule::rbrace => TokenKind::RBrace,
        Rule::lparen => TokenKind::LParen,
        Rule::rparen => TokenKind::RParen,
        Rule::semicolon => TokenKind::Semicolon,
        Rule::illegal => TokenKind::Illegal,
        Rule::EOI => TokenKind::Eof,
        _ => return None,
    };
    Some(kind)
}
