//! # LQL - Lattice Query Language
//!
//! Lexer and parser for LQL, the query language of the graph layer. A query
//! reads like
//!
//! ```text
//! get Song where name = "Aria1" and ranking > 4
//!     traverse PartOf:Album end
//!     show name as Title, @count() format %d
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! input -> Lexer -> LexToken stream -> Parser -> AstNode tree
//! ```
//!
//! The lexer is a lazy, fused iterator; the parser is a pull-driven Pratt
//! parser with exactly one node of lookahead and no hidden state. Each
//! `parse` call is independent; parsers share nothing mutable, and the
//! token prototype table is a compile-time constant.
//!
//! The resulting tree converts to and from a plain, JSON-serialisable form
//! (see [`AstNode::plain`] and [`AstNode::from_plain`]), which is what the
//! REST surface ships over the wire.

pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use error::{ParseError, ParseErrorKind};
pub use lexer::Lexer;
pub use parser::{parse, parse_with_runtime, AstNode, NodeName, PlainNode, RuntimeProvider};
pub use token::{LexToken, TokenId};
