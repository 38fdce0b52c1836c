//! # FreePhysicalSlotManager
//!
//! Tracks deleted physical slots available for reuse. Entries live in the
//! payloads of FREE_PHYSICAL_SLOT_PAGE pages:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -----------------------------------
//! 0       2     entry count (u16, big-endian)
//! 2       12*N  entries {location: u64, length: u32}
//! ```
//!
//! Entries within one page are non-overlapping and sorted by length
//! ascending, so the first entry with a sufficient length is also the
//! tightest fit within that page. Across pages the first page wins; a
//! request never returns a slot shorter than asked for.
//!
//! When removing the last entry of a page the page itself is handed back to
//! the paged storage file.

use eyre::{ensure, Result};
use tracing::trace;

use super::super::paging::PagedStorageFile;
use super::super::view::{PageType, PAGE_HEADER_SIZE};
use super::super::{location_record, Location};
use super::{entry_count, set_entry_count};

const ENTRY_SIZE: usize = 12;

#[derive(Debug)]
pub struct FreePhysicalSlotManager {
    entries: u64,
}

impl FreePhysicalSlotManager {
    /// Binds a manager to a paged storage file, counting the resident
    /// entries.
    pub fn open(psf: &PagedStorageFile) -> Result<Self> {
        let mut entries = 0u64;

        let mut page = psf.first(PageType::FreePhysicalSlot);
        while page != 0 {
            entries += psf.with_page(location_record(page), |view| {
                Ok(entry_count(view.data()) as u64)
            })?;
            page = psf.next(page)?;
        }

        Ok(Self { entries })
    }

    /// Number of free slot entries currently resident.
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

    fn read_entry(payload: &[u8], index: usize) -> (Location, u32) {
        let off = 2 + index * ENTRY_SIZE;
        let loc = u64::from_be_bytes(payload[off..off + 8].try_into().unwrap());
        let len = u32::from_be_bytes(payload[off + 8..off + 12].try_into().unwrap());
        (loc, len)
    }

    fn write_entry(payload: &mut [u8], index: usize, loc: Location, len: u32) {
        let off = 2 + index * ENTRY_SIZE;
        payload[off..off + 8].copy_from_slice(&loc.to_be_bytes());
        payload[off + 8..off + 12].copy_from_slice(&len.to_be_bytes());
    }

    /// Hands out a reusable slot of at least `length` bytes, removing its
    /// entry. Returns `None` when no resident slot is large enough.
    pub fn get(&mut self, psf: &mut PagedStorageFile, length: u32) -> Result<Option<Location>> {
        if self.entries == 0 {
            return Ok(None);
        }

        let mut page = psf.first(PageType::FreePhysicalSlot);
        while page != 0 {
            let next = psf.next(page)?;

            let found = psf.with_page(location_record(page), |view| {
                let payload = view.data();
                let count = entry_count(payload);
                ensure!(
                    2 + count * ENTRY_SIZE <= payload.len(),
                    "corrupt free physical slot page {}",
                    view.record_id()
                );

                let mut found = None;
                for i in 0..count {
                    let (loc, len) = Self::read_entry(payload, i);
                    if len >= length {
                        found = Some((i, loc));
                        break;
                    }
                }

                if let Some((index, loc)) = found {
                    let payload = view.data_mut();
                    payload.copy_within(
                        2 + (index + 1) * ENTRY_SIZE..2 + count * ENTRY_SIZE,
                        2 + index * ENTRY_SIZE,
                    );
                    set_entry_count(payload, count - 1);
                    return Ok(Some((loc, count - 1)));
                }

                Ok(None)
            })?;

            if let Some((loc, remaining)) = found {
                self.entries -= 1;
                if remaining == 0 {
                    psf.free_page(page)?;
                }
                trace!(loc, length, "reused physical slot");
                return Ok(Some(loc));
            }

            page = next;
        }

        Ok(None)
    }

    /// Parks a deleted slot of `length` bytes for reuse.
    pub fn add(&mut self, psf: &mut PagedStorageFile, loc: Location, length: u32) -> Result<()> {
        ensure!(loc != 0, "cannot add the null location as a free slot");

        let capacity = Self::page_capacity(psf);

        let mut target = 0;
        let mut page = psf.first(PageType::FreePhysicalSlot);
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
            target = psf.allocate_page(PageType::FreePhysicalSlot)?;
        }

        psf.with_page(location_record(target), |view| {
            let record_id = view.record_id();
            let payload = view.data_mut();
            let count = entry_count(payload);
            ensure!(
                2 + (count + 1) * ENTRY_SIZE <= payload.len(),
                "corrupt free physical slot page {}",
                record_id
            );

            // Keep the page sorted by length ascending.
            let mut index = count;
            for i in 0..count {
                let (_, len) = Self::read_entry(payload, i);
                if len > length {
                    index = i;
                    break;
                }
            }

            payload.copy_within(
                2 + index * ENTRY_SIZE..2 + count * ENTRY_SIZE,
                2 + (index + 1) * ENTRY_SIZE,
            );
            Self::write_entry(payload, index, loc, length);
            set_entry_count(payload, count + 1);
            Ok(())
        })?;

        self.entries += 1;
        trace!(loc, length, "parked physical slot");

        Ok(())
    }

    /// Writes back everything this manager touched.
    pub fn flush(&mut self, psf: &mut PagedStorageFile) -> Result<()> {
        psf.flush()
    }
}
