//! # LQL Tokens
//!
//! Token ids and the lexeme record handed from the lexer to the parser.
//! A token carries its id, the lexeme value (quotes stripped for string
//! literals, lower-cased for keywords) and the 1-based line/column of its
//! first character.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenId {
    /// End of the token stream. Emitted exactly once.
    Eof,
    /// Lexical failure; the token value carries the message.
    Error,
    /// Synthetic token class minted when rebuilding an AST from its plain
    /// form. Has no parser prototype.
    General,

    Value,
    NodeKind,
    True,
    False,
    Null,

    At,
    Ordering,
    Filtering,
    NullTraversal,

    Comma,
    Group,
    End,
    As,
    Format,

    Get,
    Lookup,
    From,
    Where,
    Unique,
    UniqueCount,
    IsNotNull,
    Ascending,
    Descending,
    Traverse,
    Primary,
    Show,
    /// Parser-synthesised grouping of one show clause element.
    ShowTerm,
    With,
    /// Parser-synthesised list node (from a bracket expression).
    List,

    Not,
    Or,
    And,

    Geq,
    Leq,
    Neq,
    Eq,
    Gt,
    Lt,

    Like,
    In,
    Contains,
    BeginsWith,
    EndsWith,
    ContainsNot,
    NotIn,

    Plus,
    Minus,
    Times,
    Div,
    ModInt,
    DivInt,

    Lparen,
    Rparen,
    Lbrack,
    Rbrack,
}

/// One lexeme of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexToken {
    pub id: TokenId,
    pub value: String,
    pub line: usize,
    pub column: usize,
}

impl LexToken {
    pub fn new(id: TokenId, value: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            id,
            value: value.into(),
            line,
            column,
        }
    }

    /// Synthetic token used when rebuilding an AST from its plain form.
    pub fn general(value: impl Into<String>) -> Self {
        Self::new(TokenId::General, value, 0, 0)
    }
}

impl fmt::Display for LexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" (line {}, column {})",
            self.value, self.line, self.column
        )
    }
}
