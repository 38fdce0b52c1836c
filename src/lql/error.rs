//! # Parser Errors
//!
//! All parser errors are terminal: the parse is abandoned on the first one.
//! Every error carries the source name the parser was given, the offending
//! token's value and its line/column.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The token stream ended where more input was required.
    UnexpectedEnd,
    /// The lexer reported a malformed lexeme.
    LexicalError,
    /// A token without a parser prototype was encountered.
    UnknownToken,
    /// The token cannot start an expression.
    ImpossibleNullDenotation,
    /// The token cannot continue an expression.
    ImpossibleLeftDenotation,
    /// A structurally valid token in the wrong place.
    UnexpectedToken,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ParseErrorKind::UnexpectedEnd => "Unexpected end",
            ParseErrorKind::LexicalError => "Lexical error",
            ParseErrorKind::UnknownToken => "Unknown term",
            ParseErrorKind::ImpossibleNullDenotation => "Term cannot start an expression",
            ParseErrorKind::ImpossibleLeftDenotation => "Term can only start an expression",
            ParseErrorKind::UnexpectedToken => "Unexpected term",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub source_name: String,
    pub kind: ParseErrorKind,
    pub detail: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error in {}: {}", self.source_name, self.kind)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        write!(f, " at line {} column {}", self.line, self.column)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_detail() {
        let err = ParseError {
            source_name: "demo".into(),
            kind: ParseErrorKind::UnexpectedToken,
            detail: "from".into(),
            line: 1,
            column: 10,
        };

        assert_eq!(
            err.to_string(),
            "Parse error in demo: Unexpected term (from) at line 1 column 10"
        );
    }

    #[test]
    fn display_without_detail() {
        let err = ParseError {
            source_name: "demo".into(),
            kind: ParseErrorKind::UnexpectedEnd,
            detail: String::new(),
            line: 1,
            column: 4,
        };

        assert_eq!(
            err.to_string(),
            "Parse error in demo: Unexpected end at line 1 column 4"
        );
    }
}
