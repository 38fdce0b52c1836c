//! # Storage Module
//!
//! This module provides the record and page storage layer for LatticeDB. The
//! layer is built bottom-up from a memory-mapped record file to typed page
//! lists and reusable slot management:
//!
//! - `mmap`: growable memory-mapped record file (`RecordMap`)
//! - `record`: `Record`, the fixed-size buffer that is the unit of I/O and
//!   mutual exclusion
//! - `file`: `StorageFile`, exclusive record holds with dirty write-back
//! - `view`: `PageView`, the typed header overlay that turns a record into a
//!   page
//! - `paging`: `PagedStorageFile`, doubly-linked page lists per page type
//! - `slots`: free physical and logical slot managers
//! - `manager`: the `StorageManager` trait plus in-memory and on-disk
//!   implementations
//!
//! ## Record Model
//!
//! A storage file is an array of fixed-size records (4 KiB by default)
//! addressed by a 32-bit id. Record 0 is the root record:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ---------------------------------
//! 0       4     format magic ("LTDB", big-endian)
//! 4       64    16 x u32 root slots (big-endian)
//! ```
//!
//! Records 1..N are user records. There is no inter-record padding; the
//! record size is implied by file length / id arithmetic.
//!
//! ## Exclusion Model
//!
//! At most one holder per record. `StorageFile::get` hands out an owned
//! `Record`; a second `get` for the same id fails with
//! [`StorageError::AlreadyInUse`] until the record is released. Callers that
//! hit `AlreadyInUse` during a list traversal abort the traversal; nothing in
//! this layer retries.
//!
//! ## Locations
//!
//! A [`Location`] is a 64-bit value packing `{record id: u32, byte offset
//! inside the record: u32}`. Location 0 doubles as "none" everywhere a
//! location is persisted, which works because record 0 is reserved for the
//! root table and never addressed by links.
//!
//! ## Endianness
//!
//! Every multi-byte integer persisted by this module is big-endian, using
//! `zerocopy::big_endian` wrapper types for header structs and explicit
//! `to_be_bytes`/`from_be_bytes` for in-payload values.
//!
//! ## Failure Semantics
//!
//! I/O errors propagate unchanged and are never retried internally.
//! Persistent-state corruption surfaces as [`StorageError::Format`]. The
//! format assumes clean shutdown; cross-record updates are not atomic.

mod file;
mod mmap;
mod record;
mod view;

pub mod manager;
pub mod paging;
pub mod slots;

pub use file::StorageFile;
pub use manager::{DiskStorageManager, MemStorageManager, StorageManager};
pub use mmap::RecordMap;
pub use paging::PagedStorageFile;
pub use record::Record;
pub use view::{PageType, PageView, PAGE_HEADER_SIZE, VIEW_MAGIC};

use thiserror::Error;

/// Default size in bytes of a single record.
pub const RECORD_SIZE: usize = 4096;

/// Id of the reserved root record.
pub const ROOT_RECORD: u32 = 0;

/// Format magic stored in the first four bytes of the root record.
pub const ROOT_MAGIC: u32 = 0x4C54_4442; // "LTDB"

/// Number of u32 root slots in the root record.
pub const TOTAL_ROOT_SLOTS: usize = 16;

/// Byte length of the root table (magic + root slots).
pub const ROOT_TABLE_SIZE: usize = 4 + TOTAL_ROOT_SLOTS * 4;

const _: () = assert!(ROOT_TABLE_SIZE <= RECORD_SIZE);

/// A 64-bit storage location: record id in the high half, byte offset inside
/// the record in the low half. Zero means "none".
pub type Location = u64;

/// Packs a record id and an in-record byte offset into a [`Location`].
#[inline]
pub fn location_of(record: u32, offset: u32) -> Location {
    ((record as u64) << 32) | offset as u64
}

/// Record id component of a location.
#[inline]
pub fn location_record(loc: Location) -> u32 {
    (loc >> 32) as u32
}

/// In-record byte offset component of a location.
#[inline]
pub fn location_offset(loc: Location) -> u32 {
    loc as u32
}

/// Error kinds callers of the storage layer distinguish programmatically.
///
/// Storage APIs return `eyre::Result`; these kinds ride the report chain and
/// are recovered with `err.downcast_ref::<StorageError>()`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The record is currently held by another caller.
    #[error("record {0} is already in use")]
    AlreadyInUse(u32),

    /// The record was expected to be held but is not.
    #[error("record {0} was not in use")]
    NotInUse(u32),

    /// Persistent state does not match the expected on-disk format.
    #[error("storage format error: {0}")]
    Format(String),

    /// The storage file cannot close while records are held.
    #[error("cannot close storage file '{0}': records are still in use")]
    InUse(String),

    /// No slot is stored at the given location.
    #[error("no slot stored at location {0:#018x}")]
    SlotNotFound(Location),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_packs_record_and_offset() {
        let loc = location_of(7, 1024);
        assert_eq!(location_record(loc), 7);
        assert_eq!(location_offset(loc), 1024);
    }

    #[test]
    fn location_zero_is_none() {
        assert_eq!(location_of(0, 0), 0);
    }

    #[test]
    fn location_roundtrips_extremes() {
        let loc = location_of(u32::MAX, u32::MAX);
        assert_eq!(location_record(loc), u32::MAX);
        assert_eq!(location_offset(loc), u32::MAX);
    }
}
