//! Integration tests for the heap file access method.
//!
//! Covers the end-to-end scenarios: single-record round trips, directory
//! growth and shrinkage, persistence across reopen, pin-leak checks on
//! every public operation, and a randomized workload against a model.

use std::collections::HashMap;
use std::sync::Arc;

use bedrock::heap::{DirectoryPage, HeapError, HeapFile, MAX_ENTRIES, MAX_RECORD_SIZE, RecordId};
use bedrock::storage::{BufferPool, ClockReplacer, DiskManager, FileDisk, MemoryDisk};
use rand::Rng;
use tempfile::tempdir;

fn pool(frames: usize) -> Arc<BufferPool<MemoryDisk, ClockReplacer>> {
    Arc::new(BufferPool::with_clock(MemoryDisk::new(), frames))
}

#[tokio::test]
async fn test_single_record_roundtrip() {
    let pool = pool(8);
    let file = HeapFile::open(Arc::clone(&pool), "f").await.unwrap();

    let rid = file.insert(&[0x41, 0x42, 0x43]).await.unwrap();
    assert_eq!(rid.slot_id, 0);
    assert_eq!(file.read(rid).await.unwrap(), vec![0x41, 0x42, 0x43]);
    assert_eq!(file.record_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_inserts_spill_to_second_data_page() {
    let pool = pool(8);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    // 400-byte records: two fit on one data page, the third does not
    // once a slot is reserved for the next insert.
    let rid0 = file.insert(&[0u8; 400]).await.unwrap();
    let rid1 = file.insert(&[1u8; 400]).await.unwrap();
    let rid2 = file.insert(&[2u8; 400]).await.unwrap();

    assert_eq!(rid0.page_id, rid1.page_id);
    assert_ne!(rid1.page_id, rid2.page_id);

    // Both data pages hang off the head directory page.
    {
        let guard = pool.fetch_page(file.head_page()).await.unwrap();
        let dir = DirectoryPage::new(guard);
        assert_eq!(dir.entry_count(), 2);
        assert_eq!(dir.entry(0).page_id, rid0.page_id);
        assert_eq!(dir.entry(0).record_count, 2);
        assert_eq!(dir.entry(1).page_id, rid2.page_id);
        assert_eq!(dir.entry(1).record_count, 1);
    }

    file.delete_file().await.unwrap();
}

#[tokio::test]
async fn test_boundary_record_sizes() {
    let pool = pool(8);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    // PAGE_SIZE - 24 fills one data page completely.
    let rid = file.insert(&vec![0xEE; MAX_RECORD_SIZE]).await.unwrap();
    assert_eq!(file.read(rid).await.unwrap().len(), MAX_RECORD_SIZE);
    {
        let guard = pool.fetch_page(file.head_page()).await.unwrap();
        let dir = DirectoryPage::new(guard);
        assert_eq!(dir.entry(0).free_count, 0);
    }

    // One byte more is rejected before any page is touched.
    let result = file.insert(&vec![0u8; MAX_RECORD_SIZE + 1]).await;
    assert!(matches!(
        result,
        Err(HeapError::RecordTooLarge { size, max }) if size == max + 1
    ));

    file.delete_file().await.unwrap();
}

#[tokio::test]
async fn test_delete_reinsert_cycles_data_page() {
    let pool = pool(8);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    // Directory: no entries yet.
    let rid = file.insert(&[7u8; 100]).await.unwrap();
    let first_data_page = rid.page_id;

    // Deleting the only record removes the entry and frees the page.
    file.delete(rid).await.unwrap();
    assert_eq!(file.record_count().await.unwrap(), 0);
    {
        let guard = pool.fetch_page(file.head_page()).await.unwrap();
        let dir = DirectoryPage::new(guard);
        assert_eq!(dir.entry_count(), 0);
    }

    // Reinserting allocates a fresh data page (the freed id comes back).
    let rid = file.insert(&[8u8; 100]).await.unwrap();
    assert_eq!(rid.page_id, first_data_page);
    assert_eq!(file.record_count().await.unwrap(), 1);

    file.delete_file().await.unwrap();
}

#[tokio::test]
async fn test_directory_chain_grows_and_shrinks() {
    // One max-size record per data page forces one directory entry per
    // insert; MAX_ENTRIES + 1 inserts overflow the head directory page.
    let pool = pool(8);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    let mut rids = Vec::new();
    for _ in 0..MAX_ENTRIES + 1 {
        rids.push(file.insert(&vec![1u8; MAX_RECORD_SIZE]).await.unwrap());
    }
    assert_eq!(file.record_count().await.unwrap(), MAX_ENTRIES + 1);

    // A second directory page was created and linked from the head.
    let second_dir = {
        let guard = pool.fetch_page(file.head_page()).await.unwrap();
        let dir = DirectoryPage::new(guard);
        assert_eq!(dir.entry_count(), MAX_ENTRIES);
        dir.next_page().expect("head should link a second directory page")
    };
    {
        let guard = pool.fetch_page(second_dir).await.unwrap();
        let dir = DirectoryPage::new(guard);
        assert_eq!(dir.entry_count(), 1);
        assert_eq!(dir.prev_page(), Some(file.head_page()));
        assert_eq!(dir.next_page(), None);
    }

    // Deleting the overflow record empties the non-head directory page,
    // which is unlinked and freed. The head stays.
    file.delete(*rids.last().unwrap()).await.unwrap();
    {
        let guard = pool.fetch_page(file.head_page()).await.unwrap();
        let dir = DirectoryPage::new(guard);
        assert_eq!(dir.next_page(), None);
        assert_eq!(dir.entry_count(), MAX_ENTRIES);
    }
    assert_eq!(file.record_count().await.unwrap(), MAX_ENTRIES);

    file.delete_file().await.unwrap();
}

#[tokio::test]
async fn test_named_file_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.db");
    let mut rids = Vec::new();

    {
        let disk = FileDisk::open(&path).await.unwrap();
        let pool = Arc::new(BufferPool::with_clock(disk, 8));
        let file = HeapFile::open(Arc::clone(&pool), "inventory").await.unwrap();

        for i in 0..3u8 {
            rids.push(file.insert(&vec![i; 64 + i as usize]).await.unwrap());
        }
        assert_eq!(file.record_count().await.unwrap(), 3);

        pool.flush_all().await.unwrap();
    }

    let disk = FileDisk::open(&path).await.unwrap();
    let pool = Arc::new(BufferPool::with_clock(disk, 8));
    let file = HeapFile::open(Arc::clone(&pool), "inventory").await.unwrap();

    assert_eq!(file.record_count().await.unwrap(), 3);
    for (i, rid) in rids.iter().enumerate() {
        assert_eq!(file.read(*rid).await.unwrap(), vec![i as u8; 64 + i]);
    }
}

#[tokio::test]
async fn test_update_unpins_clean_on_failure() {
    let pool = pool(4);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    let rid = file.insert(b"fixed-size").await.unwrap();
    let unpinned = pool.num_unpinned();

    // Equal length succeeds.
    file.update(rid, b"FIXED-SIZE").await.unwrap();
    assert_eq!(file.read(rid).await.unwrap(), b"FIXED-SIZE");
    assert_eq!(pool.num_unpinned(), unpinned);

    // A length change fails and must not leak the pin.
    let result = file.update(rid, b"longer than before").await;
    assert!(matches!(result, Err(HeapError::RecordSizeMismatch { .. })));
    assert_eq!(pool.num_unpinned(), unpinned);

    // The record is unchanged.
    assert_eq!(file.read(rid).await.unwrap(), b"FIXED-SIZE");

    file.delete_file().await.unwrap();
}

/// Asserts pin counts are balanced around every public operation,
/// error paths included.
#[tokio::test]
async fn test_no_pin_leaks() {
    let pool = pool(4);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();
    let unpinned = pool.num_unpinned();

    let rid = file.insert(b"payload").await.unwrap();
    assert_eq!(pool.num_unpinned(), unpinned);

    file.read(rid).await.unwrap();
    assert_eq!(pool.num_unpinned(), unpinned);

    file.update(rid, b"PAYLOAD").await.unwrap();
    assert_eq!(pool.num_unpinned(), unpinned);

    file.record_count().await.unwrap();
    assert_eq!(pool.num_unpinned(), unpinned);

    // Error paths.
    assert!(file.insert(&vec![0u8; MAX_RECORD_SIZE + 100]).await.is_err());
    assert_eq!(pool.num_unpinned(), unpinned);

    let dead = RecordId::new(rid.page_id, 99);
    assert!(file.read(dead).await.is_err());
    assert_eq!(pool.num_unpinned(), unpinned);

    assert!(file.update(dead, b"x").await.is_err());
    assert_eq!(pool.num_unpinned(), unpinned);

    assert!(file.delete(dead).await.is_err());
    assert_eq!(pool.num_unpinned(), unpinned);

    file.delete(rid).await.unwrap();
    assert_eq!(pool.num_unpinned(), unpinned);

    file.delete_file().await.unwrap();
    assert_eq!(pool.num_unpinned(), unpinned);
}

#[tokio::test]
async fn test_rid_stability_under_churn() {
    let pool = pool(8);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    let stable = file.insert(b"stable-record").await.unwrap();
    let mut churn = Vec::new();
    for i in 0..20u8 {
        churn.push(file.insert(&vec![i; 32]).await.unwrap());
    }
    for rid in churn.drain(..) {
        file.delete(rid).await.unwrap();
    }
    for i in 0..20u8 {
        churn.push(file.insert(&vec![i; 48]).await.unwrap());
    }

    // The untouched record still reads back through its original rid.
    assert_eq!(file.read(stable).await.unwrap(), b"stable-record");

    file.delete_file().await.unwrap();
}

#[tokio::test]
async fn test_two_files_share_one_pool() {
    let pool = pool(8);
    let a = HeapFile::open(Arc::clone(&pool), "a").await.unwrap();
    let b = HeapFile::open(Arc::clone(&pool), "b").await.unwrap();

    let rid_a = a.insert(b"from a").await.unwrap();
    let rid_b = b.insert(b"from b").await.unwrap();

    assert_eq!(a.read(rid_a).await.unwrap(), b"from a");
    assert_eq!(b.read(rid_b).await.unwrap(), b"from b");
    assert_eq!(a.record_count().await.unwrap(), 1);
    assert_eq!(b.record_count().await.unwrap(), 1);
}

/// Randomized workload checked against an in-memory model: insert count
/// minus delete count equals record_count, and every live rid reads back
/// the bytes last written to it.
#[tokio::test]
async fn test_randomized_workload_matches_model() {
    let pool = pool(16);
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    let mut rng = rand::rng();
    let mut model: HashMap<RecordId, Vec<u8>> = HashMap::new();

    for _ in 0..500 {
        match rng.random_range(0..4u8) {
            // insert
            0 | 1 => {
                let len = rng.random_range(1..300usize);
                let byte = rng.random_range(0..=255u8);
                let record = vec![byte; len];
                let rid = file.insert(&record).await.unwrap();
                let evicted = model.insert(rid, record);
                assert!(evicted.is_none(), "insert reused a live rid");
            }
            // delete a live record
            2 => {
                let victim = model.keys().next().copied();
                if let Some(rid) = victim {
                    file.delete(rid).await.unwrap();
                    model.remove(&rid);
                }
            }
            // update a live record in place
            _ => {
                let target = model.iter().next().map(|(&rid, bytes)| (rid, bytes.len()));
                if let Some((rid, len)) = target {
                    let replacement = vec![rng.random_range(0..=255u8); len];
                    file.update(rid, &replacement).await.unwrap();
                    model.insert(rid, replacement);
                }
            }
        }

        assert_eq!(file.record_count().await.unwrap(), model.len());
    }

    // Every surviving record reads back, and the scan sees exactly the
    // model contents.
    for (rid, bytes) in &model {
        assert_eq!(&file.read(*rid).await.unwrap(), bytes);
    }
    let mut scanned: Vec<_> = file.scan().collect_all().await.unwrap();
    scanned.sort_by_key(|(rid, _)| (rid.page_id, rid.slot_id));
    let mut expected: Vec<_> = model.into_iter().collect();
    expected.sort_by_key(|(rid, _)| (rid.page_id, rid.slot_id));
    assert_eq!(scanned, expected);

    file.delete_file().await.unwrap();
}

/// The buffer pool reports honest state for generic disks as well; run a
/// heap workload over FileDisk to cover the file superblock path.
#[tokio::test]
async fn test_heap_over_file_disk() {
    let dir = tempdir().unwrap();
    let disk = FileDisk::open(dir.path().join("heap.db")).await.unwrap();
    run_small_workload(disk).await;
}

#[tokio::test]
async fn test_heap_over_memory_disk() {
    run_small_workload(MemoryDisk::new()).await;
}

async fn run_small_workload<D: DiskManager>(disk: D) {
    let pool = Arc::new(BufferPool::with_clock(disk, 4));
    let file = HeapFile::open(Arc::clone(&pool), "workload").await.unwrap();

    let mut rids = Vec::new();
    for i in 0..50u8 {
        rids.push(file.insert(&vec![i; 150]).await.unwrap());
    }
    assert_eq!(file.record_count().await.unwrap(), 50);

    for rid in rids.iter().step_by(2) {
        file.delete(*rid).await.unwrap();
    }
    assert_eq!(file.record_count().await.unwrap(), 25);

    let collected = file.scan().collect_all().await.unwrap();
    assert_eq!(collected.len(), 25);

    file.delete_file().await.unwrap();
    assert_eq!(pool.num_unpinned(), pool.pool_size());
}

/// Directory-page views stay readable through a tiny pool: the chain walk
/// never needs more than one pin at a time.
#[tokio::test]
async fn test_heap_works_with_two_frames() {
    let pool: Arc<BufferPool<MemoryDisk, ClockReplacer>> =
        Arc::new(BufferPool::with_clock(MemoryDisk::new(), 2));
    let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

    let mut rids = Vec::new();
    for i in 0..10u8 {
        rids.push(file.insert(&vec![i; 200]).await.unwrap());
    }
    for (i, rid) in rids.iter().enumerate() {
        assert_eq!(file.read(*rid).await.unwrap(), vec![i as u8; 200]);
    }

    file.delete_file().await.unwrap();
}
