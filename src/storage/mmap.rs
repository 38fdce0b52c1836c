//! # Memory-Mapped Record File
//!
//! `RecordMap` is the lowest storage building block: a growable memory-mapped
//! file cut into fixed-size records. It knows nothing about holds, pages or
//! dirty tracking; it hands out raw `&[u8]` / `&mut [u8]` slices and grows the
//! mapping on demand.
//!
//! ## Safety Model
//!
//! Memory-mapped regions become invalid when the file is grown and remapped.
//! Instead of runtime guards, the borrow checker enforces safety at compile
//! time: `record()` borrows `&self`, `record_mut()` and `grow()` borrow
//! `&mut self`, so no record slice can outlive a remap.
//!
//! ## Growth
//!
//! `grow()` extends the file to exactly the requested record count and
//! remaps. The caller (`StorageFile::flush`) grows once per flush to cover
//! the highest dirty record, so the file length always equals
//! `record_count * record_size` and reopen can derive the record count from
//! the file length alone.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct RecordMap {
    file: File,
    mmap: MmapMut,
    record_size: usize,
    record_count: u32,
}

impl RecordMap {
    /// Opens an existing record file. The file length must be a non-zero
    /// multiple of `record_size`.
    pub fn open<P: AsRef<Path>>(path: P, record_size: usize) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open storage file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty storage file '{}'",
            path.display()
        );

        ensure!(
            file_size % record_size as u64 == 0,
            "storage file '{}' size {} is not a multiple of record size {}",
            path.display(),
            file_size,
            record_size
        );

        let record_count = (file_size / record_size as u64) as u32;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally, leading to undefined behavior. This is safe
        // because:
        // 1. The file is opened with exclusive write access (read+write mode)
        // 2. Storage files are not meant to be modified by external processes
        // 3. The mmap lifetime is tied to RecordMap, preventing use-after-unmap
        // 4. All access goes through record()/record_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            record_size,
            record_count,
        })
    }

    /// Creates a new record file holding `initial_record_count` zeroed
    /// records. Truncates any existing file at the path.
    pub fn create<P: AsRef<Path>>(
        path: P,
        record_size: usize,
        initial_record_count: u32,
    ) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            initial_record_count > 0,
            "initial record count must be at least 1"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create storage file '{}'", path.display()))?;

        let file_size = initial_record_count as u64 * record_size as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The file size is set to a valid multiple of record_size
        // 3. The mmap lifetime is tied to RecordMap, preventing use-after-unmap
        // 4. All access goes through record()/record_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            record_size,
            record_count: initial_record_count,
        })
    }

    pub fn record(&self, id: u32) -> Result<&[u8]> {
        ensure!(
            id < self.record_count,
            "record {} out of bounds (record_count={})",
            id,
            self.record_count
        );

        let offset = id as usize * self.record_size;
        Ok(&self.mmap[offset..offset + self.record_size])
    }

    pub fn record_mut(&mut self, id: u32) -> Result<&mut [u8]> {
        ensure!(
            id < self.record_count,
            "record {} out of bounds (record_count={})",
            id,
            self.record_count
        );

        let offset = id as usize * self.record_size;
        Ok(&mut self.mmap[offset..offset + self.record_size])
    }

    pub fn grow(&mut self, new_record_count: u32) -> Result<()> {
        if new_record_count <= self.record_count {
            return Ok(());
        }

        self.mmap
            .flush_async()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_record_count as u64 * self.record_size as u64;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because the old mmap becomes
        // invalid. This is safe because:
        // 1. grow() requires &mut self, so no record slices can exist
        // 2. We flushed the old mmap above, ensuring data reached the file
        // 3. The file was extended to new_size before remapping
        // 4. The old mmap is dropped when we assign the new one
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };

        self.record_count = new_record_count;

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }
}
