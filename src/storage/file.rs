//! # StorageFile
//!
//! `StorageFile` provides safe, mutually-exclusive access to fixed-size
//! records addressed by a 32-bit id, backed by a [`RecordMap`].
//!
//! ## Hold Discipline
//!
//! - `get(id)` acquires a record for exclusive use; while held, any further
//!   `get(id)` fails with [`StorageError::AlreadyInUse`].
//! - `release_in_use` releases a clean hold; `release_in_use_dirty` releases
//!   and marks the record for write-back. A record whose payload was written
//!   through `data_mut` is flagged dirty either way.
//! - `flush` forces dirty records to disk, atomic per record but not across
//!   records.
//! - `close` fails while any record is held.
//!
//! ## Growth
//!
//! `get` of an id beyond the current file returns a zeroed record and
//! extends the logical record count; the file itself grows lazily when a
//! dirty record past the end is flushed. Records that were only ever read
//! therefore never consume disk space.
//!
//! ## Buffer Pool
//!
//! Released-clean buffers are pooled and reused by later `get` calls, so a
//! steady-state workload allocates no new record buffers.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use super::mmap::RecordMap;
use super::record::Record;
use super::{StorageError, RECORD_SIZE};

#[derive(Debug)]
pub struct StorageFile {
    path: PathBuf,
    record_size: usize,
    map: RecordMap,
    record_count: u32,
    in_use: HashSet<u32>,
    dirty: HashMap<u32, Record>,
    pool: Vec<Record>,
}

impl StorageFile {
    /// Opens (or creates) a storage file with the default record size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_record_size(path, RECORD_SIZE)
    }

    /// Opens (or creates) a storage file with an explicit record size. On
    /// reopen the record size must evenly divide the existing file length.
    pub fn open_with_record_size<P: AsRef<Path>>(path: P, record_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        ensure!(
            record_size >= super::ROOT_TABLE_SIZE,
            "record size {} is below the minimum of {}",
            record_size,
            super::ROOT_TABLE_SIZE
        );

        let exists = path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let map = if exists {
            RecordMap::open(&path, record_size)
                .wrap_err_with(|| StorageError::Format(format!(
                    "'{}' is not a record file of size {}",
                    path.display(),
                    record_size
                )))?
        } else {
            RecordMap::create(&path, record_size, 1)?
        };

        let record_count = map.record_count();

        debug!(path = %path.display(), record_count, record_size, "opened storage file");

        Ok(Self {
            path,
            record_size,
            map,
            record_count,
            in_use: HashSet::new(),
            dirty: HashMap::new(),
            pool: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of records the file logically holds (highest id touched + 1).
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Acquires record `id` for exclusive use.
    ///
    /// A record sitting in the dirty set is handed back out with its pending
    /// contents (still flagged dirty) rather than re-read from disk. An id
    /// past the end of the file yields a zeroed record and extends the
    /// logical record count.
    pub fn get(&mut self, id: u32) -> Result<Record> {
        if self.in_use.contains(&id) {
            return Err(StorageError::AlreadyInUse(id).into());
        }

        let rec = if let Some(rec) = self.dirty.remove(&id) {
            rec
        } else {
            let mut rec = match self.pool.pop() {
                Some(mut rec) => {
                    rec.reset(id);
                    rec
                }
                None => Record::new(id, self.record_size),
            };

            if id < self.map.record_count() {
                rec.data_mut().copy_from_slice(self.map.record(id)?);
                rec.set_dirty(false);
            }

            rec
        };

        self.in_use.insert(id);
        if id >= self.record_count {
            self.record_count = id + 1;
        }

        trace!(id, "record acquired");

        Ok(rec)
    }

    /// Releases a clean hold. A record whose payload was written through
    /// `data_mut` is still parked for write-back.
    pub fn release_in_use(&mut self, rec: Record) -> Result<()> {
        let id = rec.id();

        if !self.in_use.remove(&id) {
            return Err(StorageError::NotInUse(id).into());
        }

        if rec.dirty() {
            self.dirty.insert(id, rec);
        } else {
            self.pool.push(rec);
        }

        trace!(id, "record released");

        Ok(())
    }

    /// Releases a hold and marks the record for write-back.
    pub fn release_in_use_dirty(&mut self, mut rec: Record) -> Result<()> {
        rec.set_dirty(true);
        self.release_in_use(rec)
    }

    /// Writes all dirty records to disk and syncs. Atomic per record, not
    /// across records.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let max_id = self.dirty.keys().copied().max().unwrap_or(0);
        if max_id >= self.map.record_count() {
            self.map
                .grow(max_id + 1)
                .wrap_err("failed to grow storage file for flush")?;
        }

        debug!(dirty = self.dirty.len(), "flushing storage file");

        for (id, mut rec) in self.dirty.drain() {
            let target = self.map.record_mut(id)?;
            target.copy_from_slice(rec.data());
            rec.set_dirty(false);
            self.pool.push(rec);
        }

        self.map.sync()
    }

    /// Flushes and forces everything to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.map.sync()
    }

    /// Closes the file. Fails with [`StorageError::InUse`] if any record is
    /// still held.
    pub fn close(&mut self) -> Result<()> {
        if !self.in_use.is_empty() {
            return Err(StorageError::InUse(self.path.display().to_string()).into());
        }

        self.sync()?;
        debug!(path = %self.path.display(), "closed storage file");
        Ok(())
    }

    /// Number of records currently held. Exposed for the paging layer's
    /// close check and for tests.
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }
}
