use std::fmt;

/// 1-based source position of a token's first character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,

    Entity,
    Relation,
    Permission,
    Action,
    And,
    Or,
    Not,

    Sign,
    Hash,
    Dot,
    Assign,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Semicolon,

    Illegal,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ident => "identifier",
            Self::Entity => "entity",
            Self::Relation => "relation",
            Self::Permission => "permission",
            Self::Action => "action",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Sign => "@",
            Self::Hash => "#",
            Self::Dot => ".",
            Self::Assign => "=",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Semicolon => ";",
            Self::Illegal => "illegal character",
            Self::Eof => "end of input",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            literal: literal.into(),
            position,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}
