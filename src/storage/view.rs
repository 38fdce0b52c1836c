//! # PageView
//!
//! A `PageView` reinterprets a raw [`Record`] as a typed page. It is a pure
//! overlay: all state lives in the record's bytes, and writes through the
//! view mark the record dirty (via `Record::data_mut`), so releasing the
//! record with `release_in_use` is enough to persist view writes.
//!
//! ## Page Header Layout (20 bytes, big-endian)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ----------------------------------------
//! 0       1     magic      View magic byte (0x1D)
//! 1       1     page_type  Page type tag (see PageType)
//! 2       8     next       Location of the next page (0 = none)
//! 10      8     prev       Location of the previous page (0 = none)
//! 18      2     data_len   Payload length in bytes
//! 20      ...   payload
//! ```
//!
//! ## Page Types
//!
//! The tag values are persisted and stable:
//!
//! - **Free** (1): unallocated page on the free list
//! - **Data** (2): page carrying physical data slots
//! - **FreePhysicalSlot** (3): free physical slot bookkeeping
//! - **FreeLogicalSlot** (4): free logical slot bookkeeping
//! - **Translation** (5): logical-to-physical pointer cells
//!
//! An unknown tag (or a wrong magic byte) on wrap fails with
//! [`StorageError::Format`].

use eyre::{ensure, Result};
use zerocopy::big_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::record::Record;
use super::{Location, StorageError};

/// Magic byte identifying a record interpreted as a page.
pub const VIEW_MAGIC: u8 = 0x1D;

/// Byte length of the page header.
pub const PAGE_HEADER_SIZE: usize = 20;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Free = 1,
    Data = 2,
    FreePhysicalSlot = 3,
    FreeLogicalSlot = 4,
    Translation = 5,
}

impl PageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PageType::Free),
            2 => Some(PageType::Data),
            3 => Some(PageType::FreePhysicalSlot),
            4 => Some(PageType::FreeLogicalSlot),
            5 => Some(PageType::Translation),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct PageHeader {
    magic: u8,
    page_type: u8,
    next: U64,
    prev: U64,
    data_len: U16,
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    zerocopy_be_accessors! {
        next: u64,
        prev: u64,
        data_len: u16,
    }
}

/// Typed overlay over a record.
#[derive(Debug)]
pub struct PageView<'a> {
    record: &'a mut Record,
}

impl<'a> PageView<'a> {
    /// Wraps an existing page record, validating magic and type.
    pub fn wrap(record: &'a mut Record) -> Result<Self> {
        ensure!(
            record.len() >= PAGE_HEADER_SIZE,
            "record {} is too small for a page header: {} < {}",
            record.id(),
            record.len(),
            PAGE_HEADER_SIZE
        );

        let data = record.data();
        if data[0] != VIEW_MAGIC {
            return Err(StorageError::Format(format!(
                "record {} is not a page (magic {:#04x})",
                record.id(),
                data[0]
            ))
            .into());
        }
        if PageType::from_tag(data[1]).is_none() {
            return Err(StorageError::Format(format!(
                "record {} has unknown page type tag {}",
                record.id(),
                data[1]
            ))
            .into());
        }

        Ok(Self { record })
    }

    /// Stamps a fresh page header over the record (links cleared, payload
    /// length zero) and returns the view.
    pub fn init(record: &'a mut Record, page_type: PageType) -> Result<Self> {
        ensure!(
            record.len() >= PAGE_HEADER_SIZE,
            "record {} is too small for a page header: {} < {}",
            record.id(),
            record.len(),
            PAGE_HEADER_SIZE
        );

        let header = PageHeader {
            magic: VIEW_MAGIC,
            page_type: page_type.tag(),
            next: U64::new(0),
            prev: U64::new(0),
            data_len: U16::new(0),
        };
        record.data_mut()[..PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());

        Ok(Self { record })
    }

    fn header(&self) -> &PageHeader {
        // The record length and header bytes were validated at construction;
        // an unaligned header read from a fixed-size slice cannot fail.
        PageHeader::ref_from_bytes(&self.record.data()[..PAGE_HEADER_SIZE]).unwrap()
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        PageHeader::mut_from_bytes(&mut self.record.data_mut()[..PAGE_HEADER_SIZE]).unwrap()
    }

    pub fn page_type(&self) -> PageType {
        // Validated at construction.
        PageType::from_tag(self.header().page_type).unwrap()
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.header_mut().page_type = page_type.tag();
    }

    pub fn next(&self) -> Location {
        self.header().next()
    }

    pub fn set_next(&mut self, loc: Location) {
        self.header_mut().set_next(loc);
    }

    pub fn prev(&self) -> Location {
        self.header().prev()
    }

    pub fn set_prev(&mut self, loc: Location) {
        self.header_mut().set_prev(loc);
    }

    pub fn data_len(&self) -> u16 {
        self.header().data_len()
    }

    pub fn set_data_len(&mut self, len: u16) {
        self.header_mut().set_data_len(len);
    }

    /// Payload capacity in bytes.
    pub fn data_space(&self) -> usize {
        self.record.len() - PAGE_HEADER_SIZE
    }

    pub fn data(&self) -> &[u8] {
        &self.record.data()[PAGE_HEADER_SIZE..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.record.data_mut()[PAGE_HEADER_SIZE..]
    }

    pub fn record_id(&self) -> u32 {
        self.record.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_header_size_is_20_bytes() {
        assert_eq!(std::mem::size_of::<PageHeader>(), 20);
    }

    #[test]
    fn init_stamps_magic_type_and_clears_links() {
        let mut rec = Record::new(1, 128);

        let view = PageView::init(&mut rec, PageType::Data).unwrap();

        assert_eq!(view.page_type(), PageType::Data);
        assert_eq!(view.next(), 0);
        assert_eq!(view.prev(), 0);
        assert_eq!(view.data_len(), 0);
        assert_eq!(view.data_space(), 108);
        assert!(rec.dirty());
    }

    #[test]
    fn header_fields_are_big_endian_on_disk() {
        let mut rec = Record::new(1, 128);

        let mut view = PageView::init(&mut rec, PageType::Free).unwrap();
        view.set_next(0x0000_0002_0000_0000);
        view.set_prev(0x0000_0003_0000_0010);
        view.set_data_len(0x1234);

        let data = rec.data();
        assert_eq!(data[0], VIEW_MAGIC);
        assert_eq!(data[1], 1);
        assert_eq!(&data[2..10], &[0, 0, 0, 2, 0, 0, 0, 0]);
        assert_eq!(&data[10..18], &[0, 0, 0, 3, 0, 0, 0, 0x10]);
        assert_eq!(&data[18..20], &[0x12, 0x34]);
    }

    #[test]
    fn wrap_rejects_wrong_magic() {
        let mut rec = Record::new(1, 128);

        let err = PageView::wrap(&mut rec).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Format(_))
        ));
    }

    #[test]
    fn wrap_rejects_unknown_page_type() {
        let mut rec = Record::new(1, 128);
        {
            PageView::init(&mut rec, PageType::Data).unwrap();
        }
        rec.data_mut()[1] = 99;

        let err = PageView::wrap(&mut rec).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Format(_))
        ));
    }

    #[test]
    fn wrap_reads_back_initialised_header() {
        let mut rec = Record::new(1, 128);
        {
            let mut view = PageView::init(&mut rec, PageType::Translation).unwrap();
            view.set_next(42);
            view.set_data_len(7);
        }

        let view = PageView::wrap(&mut rec).unwrap();
        assert_eq!(view.page_type(), PageType::Translation);
        assert_eq!(view.next(), 42);
        assert_eq!(view.data_len(), 7);
    }

    #[test]
    fn payload_writes_mark_record_dirty() {
        let mut rec = Record::new(1, 128);
        {
            PageView::init(&mut rec, PageType::Data).unwrap();
        }
        rec.set_dirty(false);

        {
            let mut view = PageView::wrap(&mut rec).unwrap();
            view.data_mut()[0] = 0xAB;
        }

        assert!(rec.dirty());
    }

    #[test]
    fn page_type_tags_are_stable() {
        assert_eq!(PageType::Free.tag(), 1);
        assert_eq!(PageType::Data.tag(), 2);
        assert_eq!(PageType::FreePhysicalSlot.tag(), 3);
        assert_eq!(PageType::FreeLogicalSlot.tag(), 4);
        assert_eq!(PageType::Translation.tag(), 5);
        assert_eq!(PageType::from_tag(0), None);
        assert_eq!(PageType::from_tag(6), None);
    }
}
