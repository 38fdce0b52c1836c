//! # Storage Managers
//!
//! A [`StorageManager`] stores variable-length byte blobs and names them by
//! stable 64-bit [`Location`]s. It is the seam between the index layer (and
//! the graph layer above it) and the paged storage subsystem.
//!
//! Two implementations:
//!
//! - [`MemStorageManager`]: a hash map, for tests and scratch work.
//! - [`DiskStorageManager`]: stable locations over one storage file.
//!
//! ## Disk Layout
//!
//! The disk manager separates a blob's *identity* from its *bytes*:
//!
//! - A **physical slot** lives in a DATA_PAGE payload: an 8-byte big-endian
//!   header `{capacity: u32, length: u32}` followed by the data. New slots
//!   are carved from the head data page, whose header payload-length field
//!   doubles as the fill cursor; deleted slots are recycled through the
//!   [`FreePhysicalSlotManager`].
//! - A **logical slot** is an 8-byte cell in a TRANSLATION_PAGE payload
//!   holding the physical slot's location. The cell's own location is what
//!   `insert` returns, and it never changes: an update that outgrows its
//!   physical slot moves the bytes and re-points the cell. Freed cells are
//!   recycled through the [`FreeLogicalSlotManager`].
//!
//! A blob must fit into a single page payload; the maximum data size for the
//! default record size is `RECORD_SIZE - 28` bytes.

use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::file::StorageFile;
use super::paging::PagedStorageFile;
use super::slots::{FreeLogicalSlotManager, FreePhysicalSlotManager};
use super::view::{PageType, PAGE_HEADER_SIZE};
use super::{location_of, location_offset, location_record, Location, StorageError};

/// Byte-blob storage addressed by stable 64-bit locations.
pub trait StorageManager {
    /// Stores a blob and returns its location.
    fn insert(&mut self, data: &[u8]) -> Result<Location>;

    /// Retrieves the blob stored at `loc`.
    fn fetch(&mut self, loc: Location) -> Result<Vec<u8>>;

    /// Replaces the blob stored at `loc`. The location stays valid.
    fn update(&mut self, loc: Location, data: &[u8]) -> Result<()>;

    /// Deletes the blob stored at `loc` and recycles its space.
    fn free(&mut self, loc: Location) -> Result<()>;

    /// Forces pending writes to stable storage.
    fn flush(&mut self) -> Result<()>;
}

/// In-memory storage manager.
#[derive(Debug)]
pub struct MemStorageManager {
    slots: HashMap<Location, Vec<u8>>,
    next: Location,
}

impl Default for MemStorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorageManager {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl StorageManager for MemStorageManager {
    fn insert(&mut self, data: &[u8]) -> Result<Location> {
        let loc = self.next;
        self.next += 1;
        self.slots.insert(loc, data.to_vec());
        Ok(loc)
    }

    fn fetch(&mut self, loc: Location) -> Result<Vec<u8>> {
        self.slots
            .get(&loc)
            .cloned()
            .ok_or_else(|| StorageError::SlotNotFound(loc).into())
    }

    fn update(&mut self, loc: Location, data: &[u8]) -> Result<()> {
        match self.slots.get_mut(&loc) {
            Some(slot) => {
                *slot = data.to_vec();
                Ok(())
            }
            None => Err(StorageError::SlotNotFound(loc).into()),
        }
    }

    fn free(&mut self, loc: Location) -> Result<()> {
        self.slots
            .remove(&loc)
            .map(|_| ())
            .ok_or_else(|| StorageError::SlotNotFound(loc).into())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

const SLOT_HEADER_SIZE: usize = 8;
const CELL_SIZE: usize = 8;

/// Root slots carrying the user root location (high / low u32 halves).
const ROOT_SLOT_USER_HI: usize = 14;
const ROOT_SLOT_USER_LO: usize = 15;

/// On-disk storage manager with stable logical locations.
pub struct DiskStorageManager {
    psf: PagedStorageFile,
    physical_free: FreePhysicalSlotManager,
    logical_free: FreeLogicalSlotManager,
}

impl DiskStorageManager {
    /// Opens (or creates) a disk storage manager over the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let sf = Arc::new(Mutex::new(StorageFile::open(path)?));
        Self::new(sf)
    }

    /// Binds a disk storage manager to an already-open storage file.
    pub fn new(sf: Arc<Mutex<StorageFile>>) -> Result<Self> {
        let psf = PagedStorageFile::new(sf)?;
        let physical_free = FreePhysicalSlotManager::open(&psf)?;
        let logical_free = FreeLogicalSlotManager::open(&psf)?;

        debug!(
            physical_free = physical_free.len(),
            logical_free = logical_free.len(),
            "opened disk storage manager"
        );

        Ok(Self {
            psf,
            physical_free,
            logical_free,
        })
    }

    /// Largest blob this manager can store.
    pub fn max_data_size(&self) -> usize {
        self.psf.storage().lock().record_size() - PAGE_HEADER_SIZE - SLOT_HEADER_SIZE
    }

    /// A root location higher layers may persist (e.g. an index root). Zero
    /// when never set.
    pub fn root_location(&self) -> Location {
        location_of(
            self.psf.root(ROOT_SLOT_USER_HI),
            self.psf.root(ROOT_SLOT_USER_LO),
        )
    }

    pub fn set_root_location(&mut self, loc: Location) -> Result<()> {
        self.psf.set_root(ROOT_SLOT_USER_HI, location_record(loc))?;
        self.psf.set_root(ROOT_SLOT_USER_LO, location_offset(loc))
    }

    /// Closes the underlying storage file; refuses while records are held.
    pub fn close(self) -> Result<()> {
        self.psf.close()
    }

    /// In-payload offset of a slot location, rejecting locations that point
    /// into the page header.
    fn slot_offset(loc: Location) -> Result<usize> {
        (location_offset(loc) as usize)
            .checked_sub(PAGE_HEADER_SIZE)
            .ok_or_else(|| {
                StorageError::Format(format!(
                    "location {:#018x} points into a page header",
                    loc
                ))
                .into()
            })
    }

    /// Carves `total` bytes out of the head page of `page_type`, allocating
    /// a fresh page when the head is missing or full.
    fn carve(&mut self, page_type: PageType, total: usize) -> Result<Location> {
        let head = self.psf.first(page_type);
        if head != 0 {
            let carved = self.psf.with_page(location_record(head), |view| {
                let used = view.data_len() as usize;
                if used + total <= view.data_space() {
                    view.set_data_len((used + total) as u16);
                    Ok(Some(location_of(
                        view.record_id(),
                        (PAGE_HEADER_SIZE + used) as u32,
                    )))
                } else {
                    Ok(None)
                }
            })?;
            if let Some(loc) = carved {
                return Ok(loc);
            }
        }

        let page = self.psf.allocate_page(page_type)?;
        self.psf.with_page(location_record(page), |view| {
            ensure!(
                total <= view.data_space(),
                "slot of {} bytes exceeds the page payload of {}",
                total,
                view.data_space()
            );
            view.set_data_len(total as u16);
            Ok(location_of(view.record_id(), PAGE_HEADER_SIZE as u32))
        })
    }

    /// Finds a physical slot with room for `data_len` bytes and returns its
    /// location together with its capacity.
    fn alloc_physical(&mut self, data_len: usize) -> Result<(Location, u32)> {
        let capacity = (data_len.max(SLOT_HEADER_SIZE) as u32).next_multiple_of(8);
        let total = capacity as usize + SLOT_HEADER_SIZE;

        if let Some(loc) = self.physical_free.get(&mut self.psf, total as u32)? {
            // A recycled slot keeps the capacity it was created with.
            let (capacity, _) = self.read_slot_header(loc)?;
            return Ok((loc, capacity));
        }

        let loc = self.carve(PageType::Data, total)?;
        Ok((loc, capacity))
    }

    fn write_slot(&self, loc: Location, capacity: u32, data: &[u8]) -> Result<()> {
        self.psf.with_page(location_record(loc), |view| {
            ensure!(
                view.page_type() == PageType::Data,
                "location {:#018x} does not point into a data page",
                loc
            );

            let off = Self::slot_offset(loc)?;
            let payload = view.data_mut();
            ensure!(
                data.len() <= capacity as usize && off + SLOT_HEADER_SIZE + data.len() <= payload.len(),
                "slot write of {} bytes does not fit at location {:#018x}",
                data.len(),
                loc
            );
            payload[off..off + 4].copy_from_slice(&capacity.to_be_bytes());
            payload[off + 4..off + 8].copy_from_slice(&(data.len() as u32).to_be_bytes());
            payload[off + 8..off + 8 + data.len()].copy_from_slice(data);
            Ok(())
        })
    }

    fn read_slot_header(&self, loc: Location) -> Result<(u32, u32)> {
        self.psf.with_page(location_record(loc), |view| {
            ensure!(
                view.page_type() == PageType::Data,
                "location {:#018x} does not point into a data page",
                loc
            );

            let off = Self::slot_offset(loc)?;
            let payload = view.data();
            ensure!(
                off + SLOT_HEADER_SIZE <= payload.len(),
                "slot header at location {:#018x} exceeds the page payload",
                loc
            );
            let capacity = u32::from_be_bytes(payload[off..off + 4].try_into().unwrap());
            let length = u32::from_be_bytes(payload[off + 4..off + 8].try_into().unwrap());
            Ok((capacity, length))
        })
    }

    fn read_slot(&self, loc: Location) -> Result<Vec<u8>> {
        self.psf.with_page(location_record(loc), |view| {
            ensure!(
                view.page_type() == PageType::Data,
                "location {:#018x} does not point into a data page",
                loc
            );

            let off = Self::slot_offset(loc)?;
            let payload = view.data();
            ensure!(
                off + SLOT_HEADER_SIZE <= payload.len(),
                "slot header at location {:#018x} exceeds the page payload",
                loc
            );
            let length = u32::from_be_bytes(payload[off + 4..off + 8].try_into().unwrap()) as usize;
            ensure!(
                off + SLOT_HEADER_SIZE + length <= payload.len(),
                "slot length {} at location {:#018x} exceeds the page payload",
                length,
                loc
            );
            Ok(payload[off + 8..off + 8 + length].to_vec())
        })
    }

    /// Allocates a logical pointer cell, recycling freed cells first.
    fn alloc_cell(&mut self) -> Result<Location> {
        if let Some(loc) = self.logical_free.get(&mut self.psf)? {
            return Ok(loc);
        }
        self.carve(PageType::Translation, CELL_SIZE)
    }

    fn write_cell(&self, cell: Location, physical: Location) -> Result<()> {
        self.psf.with_page(location_record(cell), |view| {
            ensure!(
                view.page_type() == PageType::Translation,
                "location {:#018x} does not point into a translation page",
                cell
            );

            let off = Self::slot_offset(cell)?;
            ensure!(
                off + CELL_SIZE <= view.data_space(),
                "pointer cell at location {:#018x} exceeds the page payload",
                cell
            );
            view.data_mut()[off..off + 8].copy_from_slice(&physical.to_be_bytes());
            Ok(())
        })
    }

    fn read_cell(&self, cell: Location) -> Result<Location> {
        let physical = self.psf.with_page(location_record(cell), |view| {
            ensure!(
                view.page_type() == PageType::Translation,
                "location {:#018x} does not point into a translation page",
                cell
            );

            let off = Self::slot_offset(cell)?;
            ensure!(
                off + CELL_SIZE <= view.data_space(),
                "pointer cell at location {:#018x} exceeds the page payload",
                cell
            );
            Ok(u64::from_be_bytes(
                view.data()[off..off + 8].try_into().unwrap(),
            ))
        })?;

        if physical == 0 {
            return Err(StorageError::SlotNotFound(cell).into());
        }

        Ok(physical)
    }
}

impl StorageManager for DiskStorageManager {
    fn insert(&mut self, data: &[u8]) -> Result<Location> {
        ensure!(
            data.len() <= self.max_data_size(),
            "blob of {} bytes exceeds the maximum slot size of {}",
            data.len(),
            self.max_data_size()
        );

        let (physical, capacity) = self.alloc_physical(data.len())?;
        self.write_slot(physical, capacity, data)
            .wrap_err_with(|| format!("failed to write slot at location {:#018x}", physical))?;

        let cell = self.alloc_cell()?;
        self.write_cell(cell, physical)?;

        trace!(cell, physical, len = data.len(), "inserted slot");

        Ok(cell)
    }

    fn fetch(&mut self, loc: Location) -> Result<Vec<u8>> {
        let physical = self
            .read_cell(loc)
            .wrap_err_with(|| format!("failed to fetch slot at location {:#018x}", loc))?;
        self.read_slot(physical)
            .wrap_err_with(|| format!("failed to fetch slot at location {:#018x}", loc))
    }

    fn update(&mut self, loc: Location, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() <= self.max_data_size(),
            "blob of {} bytes exceeds the maximum slot size of {}",
            data.len(),
            self.max_data_size()
        );

        let physical = self
            .read_cell(loc)
            .wrap_err_with(|| format!("failed to update slot at location {:#018x}", loc))?;
        let (capacity, _) = self.read_slot_header(physical)?;

        if data.len() <= capacity as usize {
            return self.write_slot(physical, capacity, data);
        }

        // The slot is outgrown: move the bytes, keep the location.
        self.physical_free
            .add(&mut self.psf, physical, capacity + SLOT_HEADER_SIZE as u32)?;
        let (physical, capacity) = self.alloc_physical(data.len())?;
        self.write_slot(physical, capacity, data)?;
        self.write_cell(loc, physical)?;

        trace!(cell = loc, physical, len = data.len(), "relocated slot");

        Ok(())
    }

    fn free(&mut self, loc: Location) -> Result<()> {
        let physical = self
            .read_cell(loc)
            .wrap_err_with(|| format!("failed to free slot at location {:#018x}", loc))?;
        let (capacity, _) = self.read_slot_header(physical)?;

        self.physical_free
            .add(&mut self.psf, physical, capacity + SLOT_HEADER_SIZE as u32)?;

        self.write_cell(loc, 0)?;
        self.logical_free.add(&mut self.psf, loc)?;

        trace!(cell = loc, physical, "freed slot");

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.psf.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_manager_roundtrip() {
        let mut mgr = MemStorageManager::new();

        let loc = mgr.insert(b"hello").unwrap();
        assert_eq!(mgr.fetch(loc).unwrap(), b"hello");

        mgr.update(loc, b"world!").unwrap();
        assert_eq!(mgr.fetch(loc).unwrap(), b"world!");

        mgr.free(loc).unwrap();
        let err = mgr.fetch(loc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::SlotNotFound(_))
        ));
    }

    fn scratch_disk() -> (tempfile::TempDir, DiskStorageManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DiskStorageManager::open(dir.path().join("data.lat")).unwrap();
        (dir, mgr)
    }

    #[test]
    fn disk_roundtrip() {
        let (_dir, mut mgr) = scratch_disk();

        let a = mgr.insert(b"alpha").unwrap();
        let b = mgr.insert(b"beta").unwrap();

        assert_ne!(a, b);
        assert_eq!(mgr.fetch(a).unwrap(), b"alpha");
        assert_eq!(mgr.fetch(b).unwrap(), b"beta");
    }

    #[test]
    fn update_in_place_keeps_location() {
        let (_dir, mut mgr) = scratch_disk();

        let loc = mgr.insert(b"12345678").unwrap();
        mgr.update(loc, b"123").unwrap();

        assert_eq!(mgr.fetch(loc).unwrap(), b"123");
    }

    #[test]
    fn update_that_outgrows_the_slot_keeps_location() {
        let (_dir, mut mgr) = scratch_disk();

        let loc = mgr.insert(b"tiny").unwrap();
        let big = vec![0x5A; 600];
        mgr.update(loc, &big).unwrap();

        assert_eq!(mgr.fetch(loc).unwrap(), big);
    }

    #[test]
    fn fetch_after_free_fails_with_slot_not_found() {
        let (_dir, mut mgr) = scratch_disk();

        let loc = mgr.insert(b"gone").unwrap();
        mgr.free(loc).unwrap();

        let err = mgr.fetch(loc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::SlotNotFound(_))
        ));
        assert!(err.to_string().contains("failed to fetch slot"));
    }

    #[test]
    fn freed_space_is_recycled() {
        let (_dir, mut mgr) = scratch_disk();

        let loc = mgr.insert(&[1u8; 256]).unwrap();
        mgr.free(loc).unwrap();

        let reused = mgr.insert(&[2u8; 200]).unwrap();
        // Both the logical cell and the physical slot come back.
        assert_eq!(reused, loc);
        assert!(mgr.physical_free.is_empty());
        assert_eq!(mgr.fetch(reused).unwrap(), vec![2u8; 200]);
    }

    #[test]
    fn blobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.lat");
        let (a, b);

        {
            let mut mgr = DiskStorageManager::open(&path).unwrap();
            a = mgr.insert(b"persistent").unwrap();
            b = mgr.insert(&vec![7u8; 900]).unwrap();
            mgr.set_root_location(a).unwrap();
            mgr.flush().unwrap();
            mgr.close().unwrap();
        }

        let mut mgr = DiskStorageManager::open(&path).unwrap();
        assert_eq!(mgr.root_location(), a);
        assert_eq!(mgr.fetch(a).unwrap(), b"persistent");
        assert_eq!(mgr.fetch(b).unwrap(), vec![7u8; 900]);
    }

    #[test]
    fn oversized_blob_is_rejected() {
        let (_dir, mut mgr) = scratch_disk();

        let too_big = vec![0u8; mgr.max_data_size() + 1];
        assert!(mgr.insert(&too_big).is_err());
    }
}
