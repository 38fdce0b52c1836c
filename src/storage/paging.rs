//! # PagedStorageFile
//!
//! `PagedStorageFile` allocates, links, traverses and frees typed pages over
//! a shared [`StorageFile`]. Every allocated page belongs to exactly one
//! doubly-linked list keyed by its [`PageType`]; list heads and tails are
//! persisted as root slots in the root record.
//!
//! ## Root Slot Assignment
//!
//! For page type `t` (tag 1..=5), root slot `2*(t-1)` holds the list head
//! record id and slot `2*(t-1)+1` the list tail. Slots 10..15 are not used by
//! this layer and are exposed through `root`/`set_root` for higher layers.
//! The slot order follows the page type tags (Free..Translation) and is part
//! of the on-disk format.
//!
//! ## List Discipline
//!
//! Insertion is always at the head, so pages of a type are in LIFO order
//! over allocation time; callers must not rely on any other ordering. Every
//! list patch holds exactly one record at a time (prev, then self, then
//! next, never nesting holds). An external holder of any record along a
//! traversal surfaces as [`StorageError::AlreadyInUse`] and aborts the
//! traversal; nothing here retries.
//!
//! ## Growth
//!
//! When the free-page list is empty, allocation appends exactly one new
//! record to the file and stamps it as the new page.

use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::Mutex;
use tracing::debug;

use super::file::StorageFile;
use super::view::{PageType, PageView};
use super::{
    location_of, location_record, Location, StorageError, ROOT_MAGIC, ROOT_RECORD,
    TOTAL_ROOT_SLOTS,
};

pub struct PagedStorageFile {
    sf: Arc<Mutex<StorageFile>>,
    roots: [u32; TOTAL_ROOT_SLOTS],
}

impl PagedStorageFile {
    /// Binds a paged view to a storage file, initialising the root table on
    /// a fresh file and loading it otherwise.
    pub fn new(sf: Arc<Mutex<StorageFile>>) -> Result<Self> {
        let mut roots = [0u32; TOTAL_ROOT_SLOTS];

        {
            let mut guard = sf.lock();
            let mut rec = guard.get(ROOT_RECORD)?;

            let magic = u32::from_be_bytes(rec.data()[0..4].try_into().unwrap());

            if magic == ROOT_MAGIC {
                for (i, slot) in roots.iter_mut().enumerate() {
                    let off = 4 + i * 4;
                    *slot = u32::from_be_bytes(rec.data()[off..off + 4].try_into().unwrap());
                }
                guard.release_in_use(rec)?;
            } else if rec.data()[..super::ROOT_TABLE_SIZE].iter().all(|&b| b == 0) {
                rec.data_mut()[0..4].copy_from_slice(&ROOT_MAGIC.to_be_bytes());
                guard.release_in_use(rec)?;
            } else {
                guard.release_in_use(rec)?;
                return Err(StorageError::Format(format!(
                    "root record carries unknown format magic {:#010x}",
                    magic
                ))
                .into());
            }
        }

        Ok(Self { sf, roots })
    }

    /// The underlying storage file handle.
    pub fn storage(&self) -> &Arc<Mutex<StorageFile>> {
        &self.sf
    }

    fn head_slot(page_type: PageType) -> usize {
        2 * (page_type.tag() as usize - 1)
    }

    fn tail_slot(page_type: PageType) -> usize {
        Self::head_slot(page_type) + 1
    }

    fn store_roots(&self) -> Result<()> {
        let mut guard = self.sf.lock();
        let mut rec = guard.get(ROOT_RECORD)?;

        let data = rec.data_mut();
        data[0..4].copy_from_slice(&ROOT_MAGIC.to_be_bytes());
        for (i, slot) in self.roots.iter().enumerate() {
            let off = 4 + i * 4;
            data[off..off + 4].copy_from_slice(&slot.to_be_bytes());
        }

        guard.release_in_use(rec)
    }

    /// Runs `f` over the page view of record `id`, holding the record for
    /// exactly the duration of the call. The record is released on the error
    /// path as well.
    pub(crate) fn with_page<R>(
        &self,
        id: u32,
        f: impl FnOnce(&mut PageView) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.sf.lock();
        let mut rec = guard.get(id)?;

        let result = PageView::wrap(&mut rec).and_then(|mut view| f(&mut view));
        let released = guard.release_in_use(rec);

        result.and_then(|value| released.map(|_| value))
    }

    /// Like `with_page` but stamps a fresh header of `page_type` first.
    fn with_page_init<R>(
        &self,
        id: u32,
        page_type: PageType,
        f: impl FnOnce(&mut PageView) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.sf.lock();
        let mut rec = guard.get(id)?;

        let result = PageView::init(&mut rec, page_type).and_then(|mut view| f(&mut view));
        let released = guard.release_in_use(rec);

        result.and_then(|value| released.map(|_| value))
    }

    /// Pops the head of the free-page list, if any. Only updates the cached
    /// roots; the caller persists them.
    fn pop_free_page(&mut self) -> Result<Option<u32>> {
        let head = self.roots[Self::head_slot(PageType::Free)];
        if head == 0 {
            return Ok(None);
        }

        let next = self.with_page(head, |view| Ok(view.next()))?;
        let next_id = location_record(next);

        self.roots[Self::head_slot(PageType::Free)] = next_id;
        if next_id != 0 {
            self.with_page(next_id, |view| {
                view.set_prev(0);
                Ok(())
            })?;
        } else {
            self.roots[Self::tail_slot(PageType::Free)] = 0;
        }

        Ok(Some(head))
    }

    /// Appends one new record to the file and returns its id.
    fn append_record(&self) -> Result<u32> {
        let mut guard = self.sf.lock();
        let id = guard.record_count();
        let rec = guard.get(id)?;
        guard.release_in_use(rec)?;
        Ok(id)
    }

    /// Allocates a page of the given type and inserts it at the head of that
    /// type's list.
    pub fn allocate_page(&mut self, page_type: PageType) -> Result<Location> {
        ensure!(
            page_type != PageType::Free,
            "cannot allocate a page of the free-page type"
        );

        let id = match self.pop_free_page()? {
            Some(id) => id,
            None => self.append_record()?,
        };

        let old_head = self.roots[Self::head_slot(page_type)];

        self.with_page_init(id, page_type, |view| {
            view.set_next(location_of(old_head, 0));
            view.set_prev(0);
            Ok(())
        })?;

        if old_head != 0 {
            self.with_page(old_head, |view| {
                view.set_prev(location_of(id, 0));
                Ok(())
            })?;
        }

        self.roots[Self::head_slot(page_type)] = id;
        if self.roots[Self::tail_slot(page_type)] == 0 {
            self.roots[Self::tail_slot(page_type)] = id;
        }
        self.store_roots()?;

        debug!(id, ?page_type, "allocated page");

        Ok(location_of(id, 0))
    }

    /// Unlinks the page from its current list and pushes it onto the
    /// free-page list.
    pub fn free_page(&mut self, loc: Location) -> Result<()> {
        let id = location_record(loc);
        ensure!(id != ROOT_RECORD, "cannot free the root record");

        let (page_type, prev, next) =
            self.with_page(id, |view| Ok((view.page_type(), view.prev(), view.next())))?;

        if page_type == PageType::Free {
            return Err(StorageError::Format(format!("page {} is already free", id)).into());
        }

        let prev_id = location_record(prev);
        let next_id = location_record(next);

        if prev_id != 0 {
            self.with_page(prev_id, |view| {
                view.set_next(next);
                Ok(())
            })?;
        } else {
            self.roots[Self::head_slot(page_type)] = next_id;
        }

        if next_id != 0 {
            self.with_page(next_id, |view| {
                view.set_prev(prev);
                Ok(())
            })?;
        } else {
            self.roots[Self::tail_slot(page_type)] = prev_id;
        }

        let old_free = self.roots[Self::head_slot(PageType::Free)];

        self.with_page_init(id, PageType::Free, |view| {
            view.set_next(location_of(old_free, 0));
            view.set_prev(0);
            Ok(())
        })?;

        if old_free != 0 {
            self.with_page(old_free, |view| {
                view.set_prev(location_of(id, 0));
                Ok(())
            })?;
        } else {
            self.roots[Self::tail_slot(PageType::Free)] = id;
        }
        self.roots[Self::head_slot(PageType::Free)] = id;
        self.store_roots()?;

        debug!(id, ?page_type, "freed page");

        Ok(())
    }

    /// Location of the first page of a type (0 = none).
    pub fn first(&self, page_type: PageType) -> Location {
        location_of(self.roots[Self::head_slot(page_type)], 0)
    }

    /// Location of the last page of a type (0 = none).
    pub fn last(&self, page_type: PageType) -> Location {
        location_of(self.roots[Self::tail_slot(page_type)], 0)
    }

    /// Location of the page following `loc` in its list (0 = none).
    pub fn next(&self, loc: Location) -> Result<Location> {
        self.with_page(location_record(loc), |view| Ok(view.next()))
    }

    /// Location of the page preceding `loc` in its list (0 = none).
    pub fn prev(&self, loc: Location) -> Result<Location> {
        self.with_page(location_record(loc), |view| Ok(view.prev()))
    }

    /// Walks the list of `page_type` from head to tail and returns the
    /// number of pages. A record held by another caller anywhere along the
    /// walk aborts it with [`StorageError::AlreadyInUse`]; a walk exceeding
    /// the file's record count fails with a format error (cycle guard).
    pub fn count_pages(&self, page_type: PageType) -> Result<u64> {
        let total = self.sf.lock().record_count() as u64;

        let mut count = 0u64;
        let mut cur = self.first(page_type);
        while cur != 0 {
            if count >= total {
                return Err(
                    StorageError::Format(format!("cycle in {:?} page list", page_type)).into(),
                );
            }
            count += 1;
            cur = self.next(cur)?;
        }

        Ok(count)
    }

    /// Reads one of the root slots reserved for higher layers (indices
    /// 10..16).
    pub fn root(&self, slot: usize) -> u32 {
        self.roots[slot]
    }

    /// Writes one of the root slots reserved for higher layers and persists
    /// the root table.
    pub fn set_root(&mut self, slot: usize, value: u32) -> Result<()> {
        self.roots[slot] = value;
        self.store_roots()
    }

    pub fn flush(&self) -> Result<()> {
        self.sf.lock().flush()
    }

    /// Closes the underlying storage file; refuses while any record is held.
    pub fn close(self) -> Result<()> {
        self.sf.lock().close()
    }
}

/// First root slot free for higher layers.
pub const FIRST_FREE_ROOT_SLOT: usize = 10;
