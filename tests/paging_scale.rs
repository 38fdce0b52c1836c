//! # Paging Scale Tests
//!
//! End-to-end exercise of the paged storage file through the public API:
//! page counting under growth, the abort-on-contention contract of list
//! traversals, and clean shutdown.
//!
//! Each test verifies observable behaviour only; on-disk layout details are
//! covered by the unit tests inside the storage modules.

use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::tempdir;

use latticedb::storage::{PagedStorageFile, PageType, StorageError, StorageFile};

#[test]
fn page_counting_under_contention() {
    let dir = tempdir().unwrap();
    let sf = Arc::new(Mutex::new(
        StorageFile::open(dir.path().join("scale.lat")).unwrap(),
    ));
    let mut psf = PagedStorageFile::new(Arc::clone(&sf)).unwrap();

    assert_eq!(psf.count_pages(PageType::Data).unwrap(), 0);

    for i in 0..5u64 {
        psf.allocate_page(PageType::Data).unwrap();
        assert_eq!(psf.count_pages(PageType::Data).unwrap(), i + 1);
    }

    // A record held elsewhere aborts the traversal.
    let rec = sf.lock().get(1).unwrap();
    let err = psf.count_pages(PageType::Data).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::AlreadyInUse(1))
    ));
    sf.lock().release_in_use(rec).unwrap();

    let rec = sf.lock().get(3).unwrap();
    let err = psf.count_pages(PageType::Data).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::AlreadyInUse(3))
    ));
    sf.lock().release_in_use(rec).unwrap();

    psf.close().unwrap();
}

#[test]
fn count_matches_hops_from_first_to_a_zero_next() {
    let dir = tempdir().unwrap();
    let sf = Arc::new(Mutex::new(
        StorageFile::open(dir.path().join("hops.lat")).unwrap(),
    ));
    let mut psf = PagedStorageFile::new(sf).unwrap();

    for _ in 0..7 {
        psf.allocate_page(PageType::Translation).unwrap();
    }
    psf.free_page(psf.first(PageType::Translation)).unwrap();

    let mut hops = 0u64;
    let mut cur = psf.first(PageType::Translation);
    while cur != 0 {
        hops += 1;
        cur = psf.next(cur).unwrap();
    }

    assert_eq!(psf.count_pages(PageType::Translation).unwrap(), hops);
    assert_eq!(hops, 6);
}

#[test]
fn lists_survive_a_close_and_reopen_cycle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reopen.lat");

    {
        let sf = Arc::new(Mutex::new(StorageFile::open(&path).unwrap()));
        let mut psf = PagedStorageFile::new(sf).unwrap();
        for _ in 0..3 {
            psf.allocate_page(PageType::Data).unwrap();
        }
        psf.allocate_page(PageType::FreePhysicalSlot).unwrap();
        psf.close().unwrap();
    }

    let sf = Arc::new(Mutex::new(StorageFile::open(&path).unwrap()));
    let psf = PagedStorageFile::new(sf).unwrap();
    assert_eq!(psf.count_pages(PageType::Data).unwrap(), 3);
    assert_eq!(psf.count_pages(PageType::FreePhysicalSlot).unwrap(), 1);
    psf.close().unwrap();
}
