//! # LatticeDB - Embedded Graph Database Core
//!
//! LatticeDB is the storage and query core of an embedded graph database:
//! a file-backed record store with typed page management, a persistent
//! hash-tree index, and the parser for LQL, a small graph query language.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Graph layer / REST (out of tree)  │
//! ├──────────────────┬──────────────────┤
//! │    LQL parser    │   HTree index    │
//! ├──────────────────┴──────────────────┤
//! │   StorageManager (mem / disk slots) │
//! ├─────────────────────────────────────┤
//! │   PagedStorageFile (typed pages)    │
//! ├─────────────────────────────────────┤
//! │   StorageFile (record exclusion)    │
//! ├─────────────────────────────────────┤
//! │   Memory-mapped record file         │
//! └─────────────────────────────────────┘
//! ```
//!
//! Two data paths meet at the top:
//!
//! - **Storage**: a typed record request travels through the storage
//!   manager to pages, records and finally mmap'd disk bytes.
//! - **Query**: token stream → Pratt parser → AST, ready for a runtime
//!   provider to decorate with executable components.
//!
//! ## Concurrency Model
//!
//! Single-threaded cooperative per storage file. The record in-use set is
//! the single source of truth: every page mutation holds exactly one record
//! at a time, and a competing holder surfaces as a recoverable
//! `AlreadyInUse` error rather than blocking. Parsers are independent per
//! call and share no mutable state.
//!
//! ## Module Overview
//!
//! - [`storage`]: record file, page views, typed page lists, free-slot
//!   bookkeeping, storage managers
//! - [`htree`]: persistent hash tree index over a storage manager
//! - [`lql`]: lexer and Pratt parser producing plain-convertible ASTs

#[macro_use]
mod macros;

pub mod htree;
pub mod lql;
pub mod storage;

pub use htree::HTree;
pub use lql::{parse, parse_with_runtime, AstNode, ParseError, ParseErrorKind};
pub use storage::{
    DiskStorageManager, Location, MemStorageManager, PagedStorageFile, PageType, StorageError,
    StorageFile, StorageManager,
};
