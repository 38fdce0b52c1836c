//! # FreeLogicalSlotManager
//!
//! Tracks freed logical pointer cells for reuse. Page payload layout:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  --------------------------------
//! 0       2     entry count (u16, big-endian)
//! 2       8*N   entries: cell locations (u64)
//! ```
//!
//! Cells are recycled LIFO: `get` pops the most recently parked location,
//! which keeps the hot end of the entry array in place and avoids shifting.

use eyre::{ensure, Result};
use tracing::trace;

use super::super::paging::PagedStorageFile;
use super::super::view::{PageType, PAGE_HEADER_SIZE};
use super::super::{location_record, Location};
use super::{entry_count, set_entry_count};

const ENTRY_SIZE: usize = 8;

#[derive(Debug)]
pub struct FreeLogicalSlotManager {
    entries: u64,
}

impl FreeLogicalSlotManager {
    /// Binds a manager to a paged storage file, counting the resident
    /// entries.
    pub fn open(psf: &PagedStorageFile) -> Result<Self> {
        let mut entries = 0u64;

        let mut page = psf.first(PageType::FreeLogicalSlot);
        while page != 0 {
            entries += psf.with_page(location_record(page), |view| {
                Ok(entry_count(view.data()) as u64)
            })?;
            page = psf.next(page)?;
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn page_capacity(psf: &PagedStorageFile) -> usize {
        let record_size = psf.storage().lock().record_size();
        (record_size - PAGE_HEADER_SIZE - 2) / ENTRY_SIZE
    }

    /// Pops a reusable cell location, or `None` when nothing is parked.
    pub fn get(&mut self, psf: &mut PagedStorageFile) -> Result<Option<Location>> {
        if self.entries == 0 {
            return Ok(None);
        }

        let page = psf.first(PageType::FreeLogicalSlot);
        if page == 0 {
            return Ok(None);
        }

        let (loc, remaining) = psf.with_page(location_record(page), |view| {
            let payload = view.data();
            let count = entry_count(payload);
            ensure!(count > 0, "free logical slot page {} is empty", view.record_id());
            ensure!(
                2 + count * ENTRY_SIZE <= payload.len(),
                "corrupt free logical slot page {}",
                view.record_id()
            );

            let off = 2 + (count - 1) * ENTRY_SIZE;
            let loc = u64::from_be_bytes(payload[off..off + 8].try_into().unwrap());

            set_entry_count(view.data_mut(), count - 1);
            Ok((loc, count - 1))
        })?;

        self.entries -= 1;
        if remaining == 0 {
            psf.free_page(page)?;
        }

        trace!(loc, "reused logical slot");

        Ok(Some(loc))
    }

    /// Parks a freed cell location for reuse.
    pub fn add(&mut self, psf: &mut PagedStorageFile, loc: Location) -> Result<()> {
        ensure!(loc != 0, "cannot add the null location as a free slot");

        let capacity = Self::page_capacity(psf);

        let mut target = 0;
        let mut page = psf.first(PageType::FreeLogicalSlot);
        while page != 0 {
            let count = psf.with_page(location_record(page), |view| {
                Ok(entry_count(view.data()))
            })?;
            if count < capacity {
                target = page;
                break;
            }
            page = psf.next(page)?;
        }

        if target == 0 {
            target = psf.allocate_page(PageType::FreeLogicalSlot)?;
        }

        psf.with_page(location_record(target), |view| {
            let record_id = view.record_id();
            let payload = view.data_mut();
            let count = entry_count(payload);
            let off = 2 + count * ENTRY_SIZE;
            ensure!(
                off + ENTRY_SIZE <= payload.len(),
                "corrupt free logical slot page {}",
                record_id
            );
            payload[off..off + 8].copy_from_slice(&loc.to_be_bytes());
            set_entry_count(payload, count + 1);
            Ok(())
        })?;

        self.entries += 1;
        trace!(loc, "parked logical slot");

        Ok(())
    }

    /// Writes back everything this manager touched.
    pub fn flush(&mut self, psf: &mut PagedStorageFile) -> Result<()> {
        psf.flush()
    }
}
