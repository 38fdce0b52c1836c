//! # LQL Lexer
//!
//! Single-pass tokenizer for the LQL query language. The lexer is a fused
//! iterator: it yields tokens until exactly one `Eof` token (or a single
//! `Error` token on lexical failure) and then ends.
//!
//! ## Rules
//!
//! - Keywords are case-insensitive; their token value is the lower-cased
//!   lexeme. Keyword lookup goes through a compile-time perfect hash map.
//! - An identifier immediately following `get` or `lookup` lexes as a
//!   `NodeKind` token; every other identifier, number literal or quoted
//!   string lexes as `Value`. Identifiers may contain `:` and `.`, which is
//!   what lets traversal specs like `PartOf:Album:Contains:Song` stay a
//!   single value.
//! - String literals take single or double quotes; the quotes are stripped
//!   and backslash escapes (`\n`, `\t`, `\\`, `\"`, `\'`) are decoded.
//! - Line and column are 1-based and point at the first character of the
//!   lexeme.

use phf::phf_map;

use super::token::{LexToken, TokenId};

static KEYWORDS: phf::Map<&'static str, TokenId> = phf_map! {
    "get" => TokenId::Get,
    "lookup" => TokenId::Lookup,
    "from" => TokenId::From,
    "group" => TokenId::Group,
    "where" => TokenId::Where,
    "traverse" => TokenId::Traverse,
    "end" => TokenId::End,
    "primary" => TokenId::Primary,
    "show" => TokenId::Show,
    "as" => TokenId::As,
    "format" => TokenId::Format,
    "with" => TokenId::With,
    "unique" => TokenId::Unique,
    "uniquecount" => TokenId::UniqueCount,
    "isnotnull" => TokenId::IsNotNull,
    "ascending" => TokenId::Ascending,
    "descending" => TokenId::Descending,
    "true" => TokenId::True,
    "false" => TokenId::False,
    "null" => TokenId::Null,
    "not" => TokenId::Not,
    "or" => TokenId::Or,
    "and" => TokenId::And,
    "like" => TokenId::Like,
    "in" => TokenId::In,
    "contains" => TokenId::Contains,
    "beginswith" => TokenId::BeginsWith,
    "endswith" => TokenId::EndsWith,
    "containsnot" => TokenId::ContainsNot,
    "notin" => TokenId::NotIn,
    "ordering" => TokenId::Ordering,
    "filtering" => TokenId::Filtering,
    "nulltraversal" => TokenId::NullTraversal,
};

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':' || c == '.'
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    prev: Option<TokenId>,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            prev: None,
            done: false,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn scan_word(&mut self, line: usize, column: usize) -> LexToken {
        let mut text = String::new();
        while matches!(self.chars.peek(), Some(&c) if is_ident_continue(c)) {
            text.push(self.bump().unwrap());
        }

        let lower = text.to_ascii_lowercase();
        if let Some(&id) = KEYWORDS.get(lower.as_str()) {
            return LexToken::new(id, lower, line, column);
        }

        let id = match self.prev {
            Some(TokenId::Get) | Some(TokenId::Lookup) => TokenId::NodeKind,
            _ => TokenId::Value,
        };
        LexToken::new(id, text, line, column)
    }

    fn scan_number(&mut self, line: usize, column: usize) -> LexToken {
        let mut text = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
        }
        if matches!(self.chars.peek(), Some(&'.')) {
            text.push(self.bump().unwrap());
            while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.bump().unwrap());
            }
        }
        LexToken::new(TokenId::Value, text, line, column)
    }

    fn scan_string(&mut self, quote: char, line: usize, column: usize) -> LexToken {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    return LexToken::new(TokenId::Error, "unterminated string", line, column);
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some(c @ ('"' | '\'')) => value.push(c),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => {
                        return LexToken::new(TokenId::Error, "unterminated string", line, column);
                    }
                },
                Some(c) => value.push(c),
            }
        }
        LexToken::new(TokenId::Value, value, line, column)
    }

    fn scan_symbol(&mut self, line: usize, column: usize) -> LexToken {
        let c = match self.bump() {
            Some(c) => c,
            None => return LexToken::new(TokenId::Eof, "", line, column),
        };

        let follows = |lexer: &mut Self, expect: char| -> bool {
            if matches!(lexer.chars.peek(), Some(&next) if next == expect) {
                lexer.bump();
                true
            } else {
                false
            }
        };

        let (id, value) = match c {
            '>' if follows(self, '=') => (TokenId::Geq, ">="),
            '>' => (TokenId::Gt, ">"),
            '<' if follows(self, '=') => (TokenId::Leq, "<="),
            '<' => (TokenId::Lt, "<"),
            '!' if follows(self, '=') => (TokenId::Neq, "!="),
            '=' => (TokenId::Eq, "="),
            '+' => (TokenId::Plus, "+"),
            '-' => (TokenId::Minus, "-"),
            '*' => (TokenId::Times, "*"),
            '/' if follows(self, '/') => (TokenId::DivInt, "//"),
            '/' => (TokenId::Div, "/"),
            // A '%' glued to a word is a format directive value ("%d"), not
            // the modulo operator.
            '%' if matches!(self.chars.peek(), Some(&next) if is_ident_start(next)) => {
                let mut text = String::from("%");
                while matches!(self.chars.peek(), Some(&next) if is_ident_continue(next)) {
                    text.push(self.bump().unwrap());
                }
                return LexToken::new(TokenId::Value, text, line, column);
            }
            '%' => (TokenId::ModInt, "%"),
            '(' => (TokenId::Lparen, "("),
            ')' => (TokenId::Rparen, ")"),
            '[' => (TokenId::Lbrack, "["),
            ']' => (TokenId::Rbrack, "]"),
            ',' => (TokenId::Comma, ","),
            '@' => (TokenId::At, "@"),
            other => {
                return LexToken::new(
                    TokenId::Error,
                    format!("unexpected character '{}'", other),
                    line,
                    column,
                );
            }
        };

        LexToken::new(id, value, line, column)
    }
}

impl Iterator for Lexer<'_> {
    type Item = LexToken;

    fn next(&mut self) -> Option<LexToken> {
        if self.done {
            return None;
        }

        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }

        let line = self.line;
        let column = self.column;

        let token = match self.chars.peek() {
            None => {
                self.done = true;
                LexToken::new(TokenId::Eof, "", line, column)
            }
            Some(&c) if is_ident_start(c) => self.scan_word(line, column),
            Some(&c) if c.is_ascii_digit() => self.scan_number(line, column),
            Some(&c) if c == '"' || c == '\'' => {
                self.bump();
                self.scan_string(c, line, column)
            }
            Some(_) => self.scan_symbol(line, column),
        };

        if token.id == TokenId::Error {
            self.done = true;
        }
        self.prev = Some(token.id);

        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(input: &str) -> Vec<TokenId> {
        Lexer::new(input).map(|t| t.id).collect()
    }

    #[test]
    fn empty_input_yields_a_single_eof() {
        assert_eq!(ids(""), vec![TokenId::Eof]);
        assert_eq!(ids("   \n\t "), vec![TokenId::Eof]);
    }

    #[test]
    fn keywords_are_case_insensitive_and_lowercased() {
        let tokens: Vec<_> = Lexer::new("GET Song WHERE").collect();

        assert_eq!(tokens[0].id, TokenId::Get);
        assert_eq!(tokens[0].value, "get");
        assert_eq!(tokens[2].id, TokenId::Where);
        assert_eq!(tokens[2].value, "where");
    }

    #[test]
    fn identifier_after_get_is_a_node_kind() {
        let tokens: Vec<_> = Lexer::new("get Song where name").collect();

        assert_eq!(tokens[1].id, TokenId::NodeKind);
        assert_eq!(tokens[1].value, "Song");
        assert_eq!(tokens[3].id, TokenId::Value);
        assert_eq!(tokens[3].value, "name");
    }

    #[test]
    fn identifier_after_lookup_is_a_node_kind() {
        let tokens: Vec<_> = Lexer::new("lookup Artist \"a1\"").collect();

        assert_eq!(tokens[1].id, TokenId::NodeKind);
        assert_eq!(tokens[2].id, TokenId::Value);
        assert_eq!(tokens[2].value, "a1");
    }

    #[test]
    fn traversal_specs_stay_one_value() {
        let tokens: Vec<_> = Lexer::new("traverse PartOf:Album:Contains:Song").collect();

        assert_eq!(tokens[0].id, TokenId::Traverse);
        assert_eq!(tokens[1].id, TokenId::Value);
        assert_eq!(tokens[1].value, "PartOf:Album:Contains:Song");
    }

    #[test]
    fn operators_tokenize_greedily() {
        assert_eq!(
            ids("a >= b <= c != d // e / f"),
            vec![
                TokenId::Value,
                TokenId::Geq,
                TokenId::Value,
                TokenId::Leq,
                TokenId::Value,
                TokenId::Neq,
                TokenId::Value,
                TokenId::DivInt,
                TokenId::Value,
                TokenId::Div,
                TokenId::Value,
                TokenId::Eof,
            ]
        );
    }

    #[test]
    fn string_literals_strip_quotes_and_decode_escapes() {
        let tokens: Vec<_> = Lexer::new(r#"get Song where name = "Aria\n1" or name = 'two'"#)
            .collect();

        let strings: Vec<_> = tokens
            .iter()
            .filter(|t| t.id == TokenId::Value && t.value != "name")
            .collect();
        assert_eq!(strings[0].value, "Aria\n1");
        assert_eq!(strings[1].value, "two");
    }

    #[test]
    fn unterminated_string_is_a_lexical_error() {
        let tokens: Vec<_> = Lexer::new("get Song where name = \"oops").collect();

        let last = tokens.last().unwrap();
        assert_eq!(last.id, TokenId::Error);
        assert_eq!(last.value, "unterminated string");
    }

    #[test]
    fn illegal_character_is_a_lexical_error_and_ends_the_stream() {
        let tokens: Vec<_> = Lexer::new("a ; b").collect();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].id, TokenId::Error);
        assert_eq!(tokens[1].value, "unexpected character ';'");
    }

    #[test]
    fn positions_are_one_based_lines_and_columns() {
        let tokens: Vec<_> = Lexer::new("get Song\n  show name").collect();

        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 8));
    }

    #[test]
    fn numbers_lex_as_values() {
        let tokens: Vec<_> = Lexer::new("1 + 2.5 * 3").collect();

        assert_eq!(tokens[0].value, "1");
        assert_eq!(tokens[2].value, "2.5");
        assert_eq!(tokens[4].value, "3");
        assert_eq!(
            tokens.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![
                TokenId::Value,
                TokenId::Plus,
                TokenId::Value,
                TokenId::Times,
                TokenId::Value,
                TokenId::Eof,
            ]
        );
    }

    #[test]
    fn percent_glued_to_a_word_is_a_format_value() {
        let tokens: Vec<_> = Lexer::new("show name format %d").collect();
        assert_eq!(tokens[3].id, TokenId::Value);
        assert_eq!(tokens[3].value, "%d");

        assert_eq!(
            ids("a % b"),
            vec![TokenId::Value, TokenId::ModInt, TokenId::Value, TokenId::Eof]
        );
    }

    #[test]
    fn at_symbol_is_the_function_token() {
        assert_eq!(
            ids("show @count()"),
            vec![
                TokenId::Show,
                TokenId::At,
                TokenId::Value,
                TokenId::Lparen,
                TokenId::Rparen,
                TokenId::Eof,
            ]
        );
    }
}
