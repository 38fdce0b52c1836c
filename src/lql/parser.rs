//! # LQL Parser - Pratt-Style AST Builder
//!
//! This module implements the top-down operator-precedence (Pratt) parser
//! for LQL. The parser pulls tokens from the lexer with one token of
//! lookahead and produces an owning tree of [`AstNode`]s.
//!
//! ## Prototype Table
//!
//! Every token class has a static prototype giving its symbolic node name,
//! its binding power, and its denotations:
//!
//! - the *null denotation* applies when the token starts an expression;
//! - the *left denotation* applies when the token continues one.
//!
//! Denotations are fieldless enum variants dispatched in a single `match`
//! each, which keeps the table plain data and lets the compiler check
//! exhaustiveness. The table is a compile-time constant: there is no
//! initialisation order to get wrong and nothing is ever mutated.
//!
//! ## Binding Powers
//!
//! | Operators | Binding |
//! |-----------|---------|
//! | not | 20 |
//! | or | 30 |
//! | and | 40 |
//! | comparisons and set predicates | 60 |
//! | + - | 110 |
//! | * / % // | 120 |
//! | ( [ | 150 |
//! | everything else | 0 |
//!
//! Infix operators parse their right operand at their own binding power, so
//! operators of equal precedence are left-associative. Prefix operators
//! parse their operand at binding + 20, so a prefix form binds tighter than
//! the same token's infix form.
//!
//! ## Main Loop
//!
//! `run(right_binding)` takes the current node, requires its null
//! denotation, then keeps absorbing left denotations while the lookahead
//! token binds tighter than `right_binding`. Errors are terminal: the first
//! one abandons the parse.
//!
//! ## Runtime Decoration
//!
//! When constructed with a [`RuntimeProvider`], every instantiated node is
//! handed to the provider and the returned handle is stored verbatim on the
//! node. The parser never looks inside the handle.
//!
//! ## Plain Form
//!
//! [`AstNode::plain`] converts a tree into the JSON-serialisable
//! [`PlainNode`] form `{name, value, children}`; [`AstNode::from_plain`] is
//! the inverse, minting synthetic `General` tokens. The round trip preserves
//! structure up to token positions.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{ParseError, ParseErrorKind};
use super::lexer::Lexer;
use super::token::{LexToken, TokenId};

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(input: &str) -> String {
        parse("test", input).unwrap().to_string()
    }

    #[test]
    fn get_with_where_clause() {
        assert_eq!(
            tree("get Song where name = \"Aria1\""),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 WHERE\n\
             \x20   EQ\n\
             \x20     VALUE: name\n\
             \x20     VALUE: Aria1\n"
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            tree("1 + 2 * 3"),
            "PLUS\n\
             \x20 VALUE: 1\n\
             \x20 TIMES\n\
             \x20   VALUE: 2\n\
             \x20   VALUE: 3\n"
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(
            tree("(1 + 2) * 3"),
            "TIMES\n\
             \x20 PLUS\n\
             \x20   VALUE: 1\n\
             \x20   VALUE: 2\n\
             \x20 VALUE: 3\n"
        );
    }

    #[test]
    fn redundant_parentheses_change_nothing() {
        let bare = parse("test", "1 + 2 * 3").unwrap();
        let wrapped = parse("test", "1 + (2 * 3)").unwrap();

        assert_eq!(bare, wrapped);
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        assert_eq!(
            tree("a and b and c"),
            "AND\n\
             \x20 AND\n\
             \x20   VALUE: a\n\
             \x20   VALUE: b\n\
             \x20 VALUE: c\n"
        );

        assert_eq!(
            tree("1 - 2 - 3"),
            "MINUS\n\
             \x20 MINUS\n\
             \x20   VALUE: 1\n\
             \x20   VALUE: 2\n\
             \x20 VALUE: 3\n"
        );
    }

    #[test]
    fn not_binds_looser_than_comparisons() {
        assert_eq!(
            tree("not a = 1 and b"),
            "AND\n\
             \x20 NOT\n\
             \x20   EQ\n\
             \x20     VALUE: a\n\
             \x20     VALUE: 1\n\
             \x20 VALUE: b\n"
        );
    }

    #[test]
    fn show_clause_with_as_and_format() {
        assert_eq!(
            tree("get Song show name as Title, @count() format %d"),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 SHOW\n\
             \x20   SHOWTERM: name\n\
             \x20     AS\n\
             \x20       VALUE: Title\n\
             \x20   SHOWTERM\n\
             \x20     FUNC\n\
             \x20       VALUE: count\n\
             \x20     FORMAT\n\
             \x20       VALUE: %d\n"
        );
    }

    #[test]
    fn function_with_arguments() {
        assert_eq!(
            tree("get Song show @objget(1, 2, 3)"),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 SHOW\n\
             \x20   SHOWTERM\n\
             \x20     FUNC\n\
             \x20       VALUE: objget\n\
             \x20       VALUE: 1\n\
             \x20       VALUE: 2\n\
             \x20       VALUE: 3\n"
        );
    }

    #[test]
    fn lookup_with_several_keys() {
        assert_eq!(
            tree("lookup Song \"a\", \"b\", \"c\" where x = 1"),
            "LOOKUP\n\
             \x20 NODEKIND: Song\n\
             \x20 VALUE: a\n\
             \x20 VALUE: b\n\
             \x20 VALUE: c\n\
             \x20 WHERE\n\
             \x20   EQ\n\
             \x20     VALUE: x\n\
             \x20     VALUE: 1\n"
        );
    }

    #[test]
    fn from_group_hangs_the_name_off_the_group_node() {
        assert_eq!(
            tree("get Song from group Best"),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 FROM\n\
             \x20   GROUP\n\
             \x20     VALUE: Best\n"
        );
    }

    #[test]
    fn traverse_absorbs_clauses_until_end() {
        assert_eq!(
            tree("get Song traverse PartOf:Album where a = 1 end show name"),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 TRAVERSE\n\
             \x20   VALUE: PartOf:Album\n\
             \x20   WHERE\n\
             \x20     EQ\n\
             \x20       VALUE: a\n\
             \x20       VALUE: 1\n\
             \x20 SHOW\n\
             \x20   SHOWTERM: name\n"
        );
    }

    #[test]
    fn with_clause_directives() {
        assert_eq!(
            tree("get Song with ordering(ascending name), filtering(isnotnull name)"),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 WITH\n\
             \x20   ORDERING\n\
             \x20     ASCENDING\n\
             \x20       VALUE: name\n\
             \x20   FILTERING\n\
             \x20     ISNOTNULL\n\
             \x20       VALUE: name\n"
        );
    }

    #[test]
    fn bracket_lists_become_list_nodes() {
        assert_eq!(
            tree("get Song where name in [1, 2, 3]"),
            "GET\n\
             \x20 NODEKIND: Song\n\
             \x20 WHERE\n\
             \x20   IN\n\
             \x20     VALUE: name\n\
             \x20     LIST\n\
             \x20       VALUE: 1\n\
             \x20       VALUE: 2\n\
             \x20       VALUE: 3\n"
        );
    }

    #[test]
    fn plus_works_as_a_prefix_operator() {
        assert_eq!(
            tree("+ 1"),
            "PLUS\n\
             \x20 VALUE: 1\n"
        );
    }

    #[test]
    fn bare_get_fails_with_unexpected_end() {
        let err = parse("demo", "get").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
    }

    #[test]
    fn dangling_operator_fails_with_unexpected_end() {
        let err = parse("demo", "1 +").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
    }

    #[test]
    fn comma_cannot_start_an_expression() {
        let err = parse("demo", ", a").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ImpossibleNullDenotation);
    }

    #[test]
    fn parenthesis_cannot_continue_an_expression() {
        let err = parse("demo", "1 (2)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ImpossibleLeftDenotation);
    }

    #[test]
    fn lexical_errors_surface_with_position() {
        let err = parse("demo", "get Song where name = \"oops").unwrap_err();

        assert_eq!(err.kind, ParseErrorKind::LexicalError);
        assert_eq!(err.detail, "unterminated string");
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 23);
    }

    #[test]
    fn wrong_token_after_get_is_unexpected() {
        let err = parse("demo", "get where").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!(err.detail, "where");
    }

    #[test]
    fn error_messages_name_the_source() {
        let err = parse("demo", "1 +").unwrap_err();
        assert!(err.to_string().starts_with("Parse error in demo:"));
    }

    #[test]
    fn plain_form_round_trips() {
        let ast = parse("test", "get Song where name = \"Aria1\" show name as T").unwrap();

        let plain = ast.plain();
        let rebuilt = AstNode::from_plain(&plain).unwrap();

        assert_eq!(rebuilt, ast);
        assert_eq!(rebuilt.plain(), plain);
    }

    #[test]
    fn plain_form_serialises_to_json_and_back() {
        let ast = parse("test", "1 + 2 * 3").unwrap();
        let plain = ast.plain();

        let json = plain.to_json().unwrap();
        let decoded = PlainNode::from_json(&json).unwrap();

        assert_eq!(decoded, plain);
        // Leaves carry no children key at all.
        assert!(!json.contains("\"children\":[]"));
    }

    #[test]
    fn from_plain_rejects_unknown_names() {
        let plain = PlainNode {
            name: "NO_SUCH_NODE".into(),
            value: String::new(),
            children: vec![],
        };

        let err = AstNode::from_plain(&plain).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownToken);
    }

    #[test]
    fn general_tokens_have_no_prototype() {
        let plain = parse("test", "a and b").unwrap().plain();
        let rebuilt = AstNode::from_plain(&plain).unwrap();

        assert_eq!(rebuilt.token.id, TokenId::General);
        assert!(node_proto(TokenId::General).is_none());
    }

    struct CountingProvider {
        nodes: usize,
    }

    impl RuntimeProvider for CountingProvider {
        fn runtime(&mut self, _node: &AstNode) -> Box<dyn Any> {
            self.nodes += 1;
            Box::new(self.nodes)
        }
    }

    #[test]
    fn runtime_provider_decorates_every_node() {
        let mut provider = CountingProvider { nodes: 0 };

        let ast = parse_with_runtime("test", "a and b", &mut provider).unwrap();

        assert!(provider.nodes >= 4); // a, and, b, eof
        let handle = ast.runtime().unwrap();
        assert!(handle.downcast_ref::<usize>().is_some());
    }

    #[test]
    fn nodes_without_provider_carry_no_runtime() {
        let ast = parse("test", "a and b").unwrap();
        assert!(ast.runtime().is_none());
    }

    #[test]
    fn node_names_round_trip_through_strings() {
        for name in [
            NodeName::Value,
            NodeName::NodeKind,
            NodeName::Func,
            NodeName::UniqueCount,
            NodeName::ContainsNot,
            NodeName::ShowTerm,
            NodeName::DivInt,
            NodeName::Eof,
        ] {
            assert_eq!(NodeName::from_str(name.as_str()), Some(name));
        }
        assert_eq!(NodeName::from_str("bogus"), None);
    }
}

// AST nodes
// =========

/// Symbolic node names. The string forms are the stable plain-AST names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeName {
    Value,
    NodeKind,
    True,
    False,
    Null,
    Func,
    Ordering,
    Filtering,
    NullTraversal,
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
    ShowTerm,
    With,
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
    Comma,
    Group,
    End,
    As,
    Format,
    Eof,
}

impl NodeName {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeName::Value => "VALUE",
            NodeName::NodeKind => "NODEKIND",
            NodeName::True => "TRUE",
            NodeName::False => "FALSE",
            NodeName::Null => "NULL",
            NodeName::Func => "FUNC",
            NodeName::Ordering => "ORDERING",
            NodeName::Filtering => "FILTERING",
            NodeName::NullTraversal => "NULLTRAVERSAL",
            NodeName::Get => "GET",
            NodeName::Lookup => "LOOKUP",
            NodeName::From => "FROM",
            NodeName::Where => "WHERE",
            NodeName::Unique => "UNIQUE",
            NodeName::UniqueCount => "UNIQUECOUNT",
            NodeName::IsNotNull => "ISNOTNULL",
            NodeName::Ascending => "ASCENDING",
            NodeName::Descending => "DESCENDING",
            NodeName::Traverse => "TRAVERSE",
            NodeName::Primary => "PRIMARY",
            NodeName::Show => "SHOW",
            NodeName::ShowTerm => "SHOWTERM",
            NodeName::With => "WITH",
            NodeName::List => "LIST",
            NodeName::Not => "NOT",
            NodeName::Or => "OR",
            NodeName::And => "AND",
            NodeName::Geq => "GEQ",
            NodeName::Leq => "LEQ",
            NodeName::Neq => "NEQ",
            NodeName::Eq => "EQ",
            NodeName::Gt => "GT",
            NodeName::Lt => "LT",
            NodeName::Like => "LIKE",
            NodeName::In => "IN",
            NodeName::Contains => "CONTAINS",
            NodeName::BeginsWith => "BEGINSWITH",
            NodeName::EndsWith => "ENDSWITH",
            NodeName::ContainsNot => "CONTAINSNOT",
            NodeName::NotIn => "NOTIN",
            NodeName::Plus => "PLUS",
            NodeName::Minus => "MINUS",
            NodeName::Times => "TIMES",
            NodeName::Div => "DIV",
            NodeName::ModInt => "MODINT",
            NodeName::DivInt => "DIVINT",
            NodeName::Lparen => "LPAREN",
            NodeName::Rparen => "RPAREN",
            NodeName::Lbrack => "LBRACK",
            NodeName::Rbrack => "RBRACK",
            NodeName::Comma => "COMMA",
            NodeName::Group => "GROUP",
            NodeName::End => "END",
            NodeName::As => "AS",
            NodeName::Format => "FORMAT",
            NodeName::Eof => "EOF",
        }
    }

    pub fn from_str(s: &str) -> Option<NodeName> {
        let name = match s {
            "VALUE" => NodeName::Value,
            "NODEKIND" => NodeName::NodeKind,
            "TRUE" => NodeName::True,
            "FALSE" => NodeName::False,
            "NULL" => NodeName::Null,
            "FUNC" => NodeName::Func,
            "ORDERING" => NodeName::Ordering,
            "FILTERING" => NodeName::Filtering,
            "NULLTRAVERSAL" => NodeName::NullTraversal,
            "GET" => NodeName::Get,
            "LOOKUP" => NodeName::Lookup,
            "FROM" => NodeName::From,
            "WHERE" => NodeName::Where,
            "UNIQUE" => NodeName::Unique,
            "UNIQUECOUNT" => NodeName::UniqueCount,
            "ISNOTNULL" => NodeName::IsNotNull,
            "ASCENDING" => NodeName::Ascending,
            "DESCENDING" => NodeName::Descending,
            "TRAVERSE" => NodeName::Traverse,
            "PRIMARY" => NodeName::Primary,
            "SHOW" => NodeName::Show,
            "SHOWTERM" => NodeName::ShowTerm,
            "WITH" => NodeName::With,
            "LIST" => NodeName::List,
            "NOT" => NodeName::Not,
            "OR" => NodeName::Or,
            "AND" => NodeName::And,
            "GEQ" => NodeName::Geq,
            "LEQ" => NodeName::Leq,
            "NEQ" => NodeName::Neq,
            "EQ" => NodeName::Eq,
            "GT" => NodeName::Gt,
            "LT" => NodeName::Lt,
            "LIKE" => NodeName::Like,
            "IN" => NodeName::In,
            "CONTAINS" => NodeName::Contains,
            "BEGINSWITH" => NodeName::BeginsWith,
            "ENDSWITH" => NodeName::EndsWith,
            "CONTAINSNOT" => NodeName::ContainsNot,
            "NOTIN" => NodeName::NotIn,
            "PLUS" => NodeName::Plus,
            "MINUS" => NodeName::Minus,
            "TIMES" => NodeName::Times,
            "DIV" => NodeName::Div,
            "MODINT" => NodeName::ModInt,
            "DIVINT" => NodeName::DivInt,
            "LPAREN" => NodeName::Lparen,
            "RPAREN" => NodeName::Rparen,
            "LBRACK" => NodeName::Lbrack,
            "RBRACK" => NodeName::Rbrack,
            "COMMA" => NodeName::Comma,
            "GROUP" => NodeName::Group,
            "END" => NodeName::End,
            "AS" => NodeName::As,
            "FORMAT" => NodeName::Format,
            "EOF" => NodeName::Eof,
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Null denotations: how a token behaves at the start of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullDenotation {
    /// The node is complete as it stands (terminals).
    Term,
    /// Parenthesised inner expression; the paren token is discarded.
    Inner,
    /// One operand parsed at binding + 20.
    Prefix,
    Get,
    Lookup,
    From,
    Traverse,
    Func,
    WithFunc,
    Show,
    With,
    List,
}

/// Left denotations: how a token continues an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeftDenotation {
    /// Binary operator; the right operand parses at the operator's own
    /// binding, making equal-precedence chains left-associative.
    Infix,
}

#[derive(Debug, Clone, Copy)]
struct NodeProto {
    name: NodeName,
    binding: i32,
    null_denotation: Option<NullDenotation>,
    left_denotation: Option<LeftDenotation>,
}

const fn proto(
    name: NodeName,
    binding: i32,
    null_denotation: Option<NullDenotation>,
    left_denotation: Option<LeftDenotation>,
) -> NodeProto {
    NodeProto {
        name,
        binding,
        null_denotation,
        left_denotation,
    }
}

/// The static token-to-prototype table. `Error` is handled before lookup
/// and `General` deliberately has no prototype, so feeding a reconstructed
/// plain-AST token back through the parser reports an unknown term.
fn node_proto(id: TokenId) -> Option<NodeProto> {
    use LeftDenotation::Infix;
    use NullDenotation::*;

    let proto = match id {
        TokenId::Error | TokenId::General => return None,

        TokenId::Eof => proto(NodeName::Eof, 0, Some(Term), None),
        TokenId::Value => proto(NodeName::Value, 0, Some(Term), None),
        TokenId::NodeKind => proto(NodeName::NodeKind, 0, Some(Term), None),
        TokenId::True => proto(NodeName::True, 0, Some(Term), None),
        TokenId::False => proto(NodeName::False, 0, Some(Term), None),
        TokenId::Null => proto(NodeName::Null, 0, Some(Term), None),

        TokenId::At => proto(NodeName::Func, 0, Some(Func), None),
        TokenId::Ordering => proto(NodeName::Ordering, 0, Some(WithFunc), None),
        TokenId::Filtering => proto(NodeName::Filtering, 0, Some(WithFunc), None),
        TokenId::NullTraversal => proto(NodeName::NullTraversal, 0, Some(WithFunc), None),

        // Tokens always handled inside another denotation.
        TokenId::Comma => proto(NodeName::Comma, 0, None, None),
        TokenId::Group => proto(NodeName::Group, 0, None, None),
        TokenId::End => proto(NodeName::End, 0, None, None),
        TokenId::As => proto(NodeName::As, 0, None, None),
        TokenId::Format => proto(NodeName::Format, 0, None, None),

        TokenId::Get => proto(NodeName::Get, 0, Some(Get), None),
        TokenId::Lookup => proto(NodeName::Lookup, 0, Some(Lookup), None),
        TokenId::From => proto(NodeName::From, 0, Some(From), None),
        TokenId::Where => proto(NodeName::Where, 0, Some(Prefix), None),

        TokenId::Unique => proto(NodeName::Unique, 0, Some(Prefix), None),
        TokenId::UniqueCount => proto(NodeName::UniqueCount, 0, Some(Prefix), None),
        TokenId::IsNotNull => proto(NodeName::IsNotNull, 0, Some(Prefix), None),
        TokenId::Ascending => proto(NodeName::Ascending, 0, Some(Prefix), None),
        TokenId::Descending => proto(NodeName::Descending, 0, Some(Prefix), None),

        TokenId::Traverse => proto(NodeName::Traverse, 0, Some(Traverse), None),
        TokenId::Primary => proto(NodeName::Primary, 0, Some(Prefix), None),
        TokenId::Show => proto(NodeName::Show, 0, Some(Show), None),
        TokenId::ShowTerm => proto(NodeName::ShowTerm, 0, Some(Show), None),
        TokenId::With => proto(NodeName::With, 0, Some(With), None),
        TokenId::List => proto(NodeName::List, 0, None, None),

        TokenId::Not => proto(NodeName::Not, 20, Some(Prefix), None),
        TokenId::Or => proto(NodeName::Or, 30, None, Some(Infix)),
        TokenId::And => proto(NodeName::And, 40, None, Some(Infix)),

        TokenId::Geq => proto(NodeName::Geq, 60, None, Some(Infix)),
        TokenId::Leq => proto(NodeName::Leq, 60, None, Some(Infix)),
        TokenId::Neq => proto(NodeName::Neq, 60, None, Some(Infix)),
        TokenId::Eq => proto(NodeName::Eq, 60, None, Some(Infix)),
        TokenId::Gt => proto(NodeName::Gt, 60, None, Some(Infix)),
        TokenId::Lt => proto(NodeName::Lt, 60, None, Some(Infix)),

        TokenId::Like => proto(NodeName::Like, 60, None, Some(Infix)),
        TokenId::In => proto(NodeName::In, 60, None, Some(Infix)),
        TokenId::Contains => proto(NodeName::Contains, 60, None, Some(Infix)),
        TokenId::BeginsWith => proto(NodeName::BeginsWith, 60, None, Some(Infix)),
        TokenId::EndsWith => proto(NodeName::EndsWith, 60, None, Some(Infix)),
        TokenId::ContainsNot => proto(NodeName::ContainsNot, 60, None, Some(Infix)),
        TokenId::NotIn => proto(NodeName::NotIn, 60, None, Some(Infix)),

        TokenId::Plus => proto(NodeName::Plus, 110, Some(Prefix), Some(Infix)),
        TokenId::Minus => proto(NodeName::Minus, 110, Some(Prefix), Some(Infix)),
        TokenId::Times => proto(NodeName::Times, 120, None, Some(Infix)),
        TokenId::Div => proto(NodeName::Div, 120, None, Some(Infix)),
        TokenId::ModInt => proto(NodeName::ModInt, 120, None, Some(Infix)),
        TokenId::DivInt => proto(NodeName::DivInt, 120, None, Some(Infix)),

        TokenId::Lparen => proto(NodeName::Lparen, 150, Some(Inner), None),
        TokenId::Rparen => proto(NodeName::Rparen, 0, None, None),
        TokenId::Lbrack => proto(NodeName::Lbrack, 150, Some(List), None),
        TokenId::Rbrack => proto(NodeName::Rbrack, 0, None, None),
    };
    Some(proto)
}

/// One node of the AST. Children are owned in order; operator nodes carry
/// one child (prefix) or two children (infix, left then right).
pub struct AstNode {
    pub name: NodeName,
    pub token: LexToken,
    pub children: Vec<AstNode>,
    runtime: Option<Box<dyn Any>>,
    binding: i32,
    null_denotation: Option<NullDenotation>,
    left_denotation: Option<LeftDenotation>,
}

impl AstNode {
    fn from_proto(proto: &NodeProto, token: LexToken) -> Self {
        Self {
            name: proto.name,
            token,
            children: Vec::new(),
            runtime: None,
            binding: proto.binding,
            null_denotation: proto.null_denotation,
            left_denotation: proto.left_denotation,
        }
    }

    /// Binding power of this node.
    pub fn binding(&self) -> i32 {
        self.binding
    }

    /// The opaque runtime handle attached by a [`RuntimeProvider`], if any.
    pub fn runtime(&self) -> Option<&dyn Any> {
        self.runtime.as_deref()
    }

    /// Converts this node and its children into the plain form.
    pub fn plain(&self) -> PlainNode {
        PlainNode {
            name: self.name.to_string(),
            value: self.token.value.clone(),
            children: self.children.iter().map(AstNode::plain).collect(),
        }
    }

    /// Rebuilds an AST from its plain form, minting synthetic `General`
    /// tokens. The result carries no bindings, denotations or runtime
    /// handles.
    pub fn from_plain(plain: &PlainNode) -> Result<AstNode, ParseError> {
        let Some(name) = NodeName::from_str(&plain.name) else {
            return Err(ParseError {
                source_name: "plain ast".into(),
                kind: ParseErrorKind::UnknownToken,
                detail: plain.name.clone(),
                line: 0,
                column: 0,
            });
        };

        let children = plain
            .children
            .iter()
            .map(AstNode::from_plain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AstNode {
            name,
            token: LexToken::general(&plain.value),
            children,
            runtime: None,
            binding: 0,
            null_denotation: None,
            left_denotation: None,
        })
    }

    fn level_string(&self, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..indent {
            f.write_str("  ")?;
        }

        let with_value = matches!(self.name, NodeName::Value | NodeName::NodeKind)
            || (self.name == NodeName::ShowTerm && self.token.value != "@");
        if with_value {
            writeln!(f, "{}: {}", self.name, self.token.value)?;
        } else {
            writeln!(f, "{}", self.name)?;
        }

        for child in &self.children {
            child.level_string(indent + 1, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.level_string(0, f)
    }
}

impl fmt::Debug for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AstNode")
            .field("name", &self.name)
            .field("token", &self.token)
            .field("children", &self.children)
            .finish()
    }
}

/// Structural equality: node names, token values and children. Token
/// positions, bindings and runtime handles are ignored.
impl PartialEq for AstNode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.token.value == other.token.value
            && self.children == other.children
    }
}

impl Eq for AstNode {}

/// The JSON-serialisable plain form of an AST node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainNode {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlainNode>,
}

impl PlainNode {
    /// Serialises the plain form to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a plain form back from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<PlainNode> {
        serde_json::from_str(json)
    }
}

/// Attaches opaque runtime handles to AST nodes at instantiation.
pub trait RuntimeProvider {
    fn runtime(&mut self, node: &AstNode) -> Box<dyn Any>;
}

// Parser
// ======

/// Parses `input`, identified as `name` in error messages.
pub fn parse(name: &str, input: &str) -> Result<AstNode, ParseError> {
    let mut parser = Parser::new(name, input, None)?;
    parser.run(0)
}

/// Like [`parse`], with every node decorated through `provider`.
pub fn parse_with_runtime(
    name: &str,
    input: &str,
    provider: &mut dyn RuntimeProvider,
) -> Result<AstNode, ParseError> {
    let mut parser = Parser::new(name, input, Some(provider))?;
    parser.run(0)
}

struct Parser<'a, 'p> {
    name: &'a str,
    tokens: Lexer<'a>,
    /// One node of lookahead; always present between calls.
    node: Option<AstNode>,
    last_line: usize,
    last_column: usize,
    runtime_provider: Option<&'p mut dyn RuntimeProvider>,
}

impl<'a, 'p> Parser<'a, 'p> {
    fn new(
        name: &'a str,
        input: &'a str,
        runtime_provider: Option<&'p mut dyn RuntimeProvider>,
    ) -> Result<Self, ParseError> {
        let mut parser = Self {
            name,
            tokens: Lexer::new(input),
            node: None,
            last_line: 1,
            last_column: 1,
            runtime_provider,
        };

        let first = parser.next_node()?;
        parser.node = Some(first);
        Ok(parser)
    }

    fn error(&self, kind: ParseErrorKind, detail: &str) -> ParseError {
        ParseError {
            source_name: self.name.to_string(),
            kind,
            detail: detail.to_string(),
            line: self.last_line,
            column: self.last_column,
        }
    }

    fn error_at(&self, kind: ParseErrorKind, token: &LexToken) -> ParseError {
        ParseError {
            source_name: self.name.to_string(),
            kind,
            detail: token.value.clone(),
            line: token.line,
            column: token.column,
        }
    }

    /// Instantiates a prototype against a concrete token, attaching a
    /// runtime handle when a provider is present.
    fn instantiate(&mut self, proto: &NodeProto, token: LexToken) -> AstNode {
        let mut node = AstNode::from_proto(proto, token);
        if let Some(provider) = &mut self.runtime_provider {
            node.runtime = Some(provider.runtime(&node));
        }
        node
    }

    /// Pulls the next token and turns it into a node.
    fn next_node(&mut self) -> Result<AstNode, ParseError> {
        let Some(token) = self.tokens.next() else {
            return Err(self.error(ParseErrorKind::UnexpectedEnd, ""));
        };

        self.last_line = token.line;
        self.last_column = token.column;

        if token.id == TokenId::Error {
            return Err(self.error_at(ParseErrorKind::LexicalError, &token));
        }

        let Some(proto) = node_proto(token.id) else {
            return Err(self.error_at(ParseErrorKind::UnknownToken, &token));
        };

        Ok(self.instantiate(&proto, token))
    }

    /// Swaps the lookahead for the next node and returns the old one.
    fn advance(&mut self) -> Result<AstNode, ParseError> {
        let next = self.next_node()?;
        match std::mem::replace(&mut self.node, Some(next)) {
            Some(node) => Ok(node),
            None => Err(self.error(ParseErrorKind::UnexpectedEnd, "")),
        }
    }

    fn current_id(&self) -> TokenId {
        self.node.as_ref().map(|n| n.token.id).unwrap_or(TokenId::Eof)
    }

    fn current_binding(&self) -> i32 {
        self.node.as_ref().map(|n| n.binding).unwrap_or(0)
    }

    fn current_token(&self) -> Option<LexToken> {
        self.node.as_ref().map(|n| n.token.clone())
    }

    /// The main Pratt loop.
    fn run(&mut self, right_binding: i32) -> Result<AstNode, ParseError> {
        let n = self.advance()?;

        let Some(nd) = n.null_denotation else {
            return Err(self.error_at(ParseErrorKind::ImpossibleNullDenotation, &n.token));
        };

        let mut left = self.null_denotation(nd, n)?;

        while right_binding < self.current_binding() {
            let op = self.advance()?;

            let Some(ld) = op.left_denotation else {
                return Err(self.error_at(ParseErrorKind::ImpossibleLeftDenotation, &op.token));
            };

            left = self.left_denotation(ld, op, left)?;
        }

        Ok(left)
    }

    /// Skips the current token, which must be one of `ids`.
    fn skip_token(&mut self, ids: &[TokenId]) -> Result<(), ParseError> {
        let current = self.current_id();
        if !ids.contains(&current) {
            if current == TokenId::Eof {
                return Err(self.error(ParseErrorKind::UnexpectedEnd, ""));
            }
            let token = self.current_token().unwrap_or_else(|| LexToken::general(""));
            return Err(self.error_at(ParseErrorKind::UnexpectedToken, &token));
        }

        self.advance()?;
        Ok(())
    }

    /// Skips the current token if it matches, reporting whether it did.
    fn consume(&mut self, id: TokenId) -> Result<bool, ParseError> {
        if self.current_id() == id {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Accepts the current token as a child of `parent`; it must have the
    /// given id.
    fn accept_child(&mut self, parent: &mut AstNode, id: TokenId) -> Result<(), ParseError> {
        let current = self.advance()?;

        if current.token.id == id {
            parent.children.push(current);
            Ok(())
        } else if current.token.id == TokenId::Eof {
            Err(self.error(ParseErrorKind::UnexpectedEnd, ""))
        } else {
            Err(self.error_at(ParseErrorKind::UnexpectedToken, &current.token))
        }
    }

    fn null_denotation(
        &mut self,
        nd: NullDenotation,
        mut node: AstNode,
    ) -> Result<AstNode, ParseError> {
        match nd {
            NullDenotation::Term => Ok(node),

            NullDenotation::Inner => {
                let exp = self.run(0)?;
                self.skip_token(&[TokenId::Rparen])?;
                Ok(exp)
            }

            NullDenotation::Prefix => {
                // A prefix operator only prefixes the next item.
                let operand = self.run(node.binding + 20)?;
                node.children.push(operand);
                Ok(node)
            }

            NullDenotation::Get => {
                self.accept_child(&mut node, TokenId::NodeKind)?;

                while self.current_id() != TokenId::Eof {
                    let exp = self.run(0)?;
                    node.children.push(exp);
                }
                Ok(node)
            }

            NullDenotation::Lookup => {
                self.accept_child(&mut node, TokenId::NodeKind)?;
                self.accept_child(&mut node, TokenId::Value)?;

                while self.consume(TokenId::Comma)? {
                    self.accept_child(&mut node, TokenId::Value)?;
                }

                while self.current_id() != TokenId::Eof {
                    let exp = self.run(0)?;
                    node.children.push(exp);
                }
                Ok(node)
            }

            NullDenotation::From => {
                self.accept_child(&mut node, TokenId::Group)?;
                // The group name hangs off the GROUP node, not FROM.
                self.accept_child(&mut node.children[0], TokenId::Value)?;
                Ok(node)
            }

            NullDenotation::Traverse => {
                self.accept_child(&mut node, TokenId::Value)?;

                while self.current_id() != TokenId::Eof && self.current_id() != TokenId::End {
                    let exp = self.run(0)?;
                    node.children.push(exp);
                }

                if self.current_id() == TokenId::End {
                    self.skip_token(&[TokenId::End])?;
                }
                Ok(node)
            }

            NullDenotation::Func => {
                self.accept_child(&mut node, TokenId::Value)?;
                self.skip_token(&[TokenId::Lparen])?;

                if self.current_id() == TokenId::Value {
                    self.accept_child(&mut node, TokenId::Value)?;
                    while self.consume(TokenId::Comma)? {
                        self.accept_child(&mut node, TokenId::Value)?;
                    }
                }

                self.skip_token(&[TokenId::Rparen])?;
                Ok(node)
            }

            NullDenotation::WithFunc => {
                self.skip_token(&[TokenId::Lparen])?;

                while self.current_id() != TokenId::Rparen {
                    let exp = self.run(0)?;
                    node.children.push(exp);

                    if self.current_id() == TokenId::Comma {
                        self.skip_token(&[TokenId::Comma])?;
                    }
                }

                self.skip_token(&[TokenId::Rparen])?;
                Ok(node)
            }

            NullDenotation::Show => {
                if matches!(self.current_id(), TokenId::Value | TokenId::At) {
                    self.accept_show_term(&mut node)?;

                    while self.consume(TokenId::Comma)? {
                        self.accept_show_term(&mut node)?;
                    }
                }
                Ok(node)
            }

            NullDenotation::With => {
                while self.current_id() != TokenId::Eof {
                    let exp = self.run(0)?;
                    node.children.push(exp);

                    if self.current_id() == TokenId::Comma {
                        self.skip_token(&[TokenId::Comma])?;
                    }
                }
                Ok(node)
            }

            NullDenotation::List => {
                // The bracket token is replaced by a synthetic LIST node.
                let proto = node_proto(TokenId::List)
                    .ok_or_else(|| self.error(ParseErrorKind::UnknownToken, "list"))?;
                let mut list = self.instantiate(&proto, node.token.clone());

                while self.current_id() != TokenId::Rbrack {
                    let exp = self.run(0)?;
                    list.children.push(exp);

                    if self.current_id() == TokenId::Comma {
                        self.skip_token(&[TokenId::Comma])?;
                    }
                }

                self.skip_token(&[TokenId::Rbrack])?;
                Ok(list)
            }
        }
    }

    /// One element of a show clause: a function or a value, optionally with
    /// `as` and `format` suffixes.
    fn accept_show_term(&mut self, parent: &mut AstNode) -> Result<(), ParseError> {
        let proto = node_proto(TokenId::ShowTerm)
            .ok_or_else(|| self.error(ParseErrorKind::UnknownToken, "show term"))?;
        let token = match self.current_token() {
            Some(token) => token,
            None => return Err(self.error(ParseErrorKind::UnexpectedEnd, "")),
        };
        let mut term = self.instantiate(&proto, token);

        if self.current_id() == TokenId::At {
            let exp = self.run(0)?;
            term.children.push(exp);
        } else {
            self.skip_token(&[TokenId::Value])?;
        }

        if self.current_id() == TokenId::As {
            self.accept_child(&mut term, TokenId::As)?;
            let idx = term.children.len() - 1;
            self.accept_child(&mut term.children[idx], TokenId::Value)?;
        }

        if self.current_id() == TokenId::Format {
            self.accept_child(&mut term, TokenId::Format)?;
            let idx = term.children.len() - 1;
            self.accept_child(&mut term.children[idx], TokenId::Value)?;
        }

        parent.children.push(term);
        Ok(())
    }

    fn left_denotation(
        &mut self,
        ld: LeftDenotation,
        mut op: AstNode,
        left: AstNode,
    ) -> Result<AstNode, ParseError> {
        match ld {
            LeftDenotation::Infix => {
                let right = self.run(op.binding)?;
                op.children.push(left);
                op.children.push(right);
                Ok(op)
            }
        }
    }
}
