//! Integration tests for the disk extendible hash table

use std::sync::Arc;

use carbide::buffer::BufferPoolManager;
use carbide::index::{
    BytewiseComparator, Crc32HashFunction, DiskExtendibleHashTable, IdentityHashFunction,
    IntegerComparator,
};
use carbide::storage::disk::DiskManager;
use carbide::storage::page::{HashDirectoryPageRef, HashHeaderPageRef};
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    (Arc::new(BufferPoolManager::new(pool_size, 2, dm)), temp_file)
}

/// A table with 4-byte integer keys whose hash is the key value itself,
/// so tests control bucket placement exactly.
fn small_table(
    bpm: &Arc<BufferPoolManager>,
    directory_max_depth: u32,
    bucket_max_size: u32,
) -> DiskExtendibleHashTable<IntegerComparator, IdentityHashFunction> {
    DiskExtendibleHashTable::new(
        Arc::clone(bpm),
        IntegerComparator,
        IdentityHashFunction,
        0,
        directory_max_depth,
        bucket_max_size,
        4,
        4,
    )
    .unwrap()
}

fn key(k: u32) -> [u8; 4] {
    k.to_le_bytes()
}

/// Reads the global depth of the single directory behind the header.
fn global_depth(
    bpm: &Arc<BufferPoolManager>,
    table: &DiskExtendibleHashTable<IntegerComparator, IdentityHashFunction>,
) -> u32 {
    let header_guard = bpm.fetch_page_read(table.header_page_id()).unwrap();
    let header = HashHeaderPageRef::new(header_guard.data());
    let directory_page_id = header.directory_page_id(0).expect("directory exists");
    drop(header_guard);

    let guard = bpm.fetch_page_read(directory_page_id).unwrap();
    HashDirectoryPageRef::new(guard.data()).global_depth()
}

#[test]
fn test_insert_and_get() {
    let (bpm, _temp) = create_bpm(16);
    let table = small_table(&bpm, 4, 8);

    assert!(table.insert(&key(1), b"one!").unwrap());
    assert!(table.insert(&key(2), b"two!").unwrap());

    assert_eq!(table.get(&key(1)).unwrap(), Some(b"one!".to_vec()));
    assert_eq!(table.get(&key(2)).unwrap(), Some(b"two!".to_vec()));
    assert_eq!(table.get(&key(3)).unwrap(), None);
}

#[test]
fn test_duplicate_keys_rejected() {
    let (bpm, _temp) = create_bpm(16);
    let table = small_table(&bpm, 4, 8);

    assert!(table.insert(&key(7), b"aaaa").unwrap());
    assert!(!table.insert(&key(7), b"bbbb").unwrap());
    assert_eq!(table.get(&key(7)).unwrap(), Some(b"aaaa".to_vec()));
}

#[test]
fn test_bucket_split_grows_directory() {
    // bucket_max_size = 2. Keys 0b000 and 0b100 collide on their low bits
    // until the bucket discriminates on two of them, so inserting 0b010
    // forces two successive splits and a global depth of 2.
    let (bpm, _temp) = create_bpm(16);
    let table = small_table(&bpm, 4, 2);

    assert!(table.insert(&key(0b000), b"e000").unwrap());
    assert!(table.insert(&key(0b100), b"e100").unwrap());
    assert_eq!(global_depth(&bpm, &table), 0);

    assert!(table.insert(&key(0b010), b"e010").unwrap());
    assert_eq!(global_depth(&bpm, &table), 2);

    assert!(table.insert(&key(0b110), b"e110").unwrap());
    assert_eq!(global_depth(&bpm, &table), 2);

    for k in [0b000, 0b100, 0b010, 0b110] {
        assert!(table.get(&key(k)).unwrap().is_some(), "lost key {:#05b}", k);
    }
    table.verify_integrity().unwrap();
}

#[test]
fn test_empty_buckets_merge_and_directory_shrinks() {
    // Continues the split scenario: removing the 0b?10 keys empties their
    // bucket, which merges back with its split image, after which every
    // slot sits at local depth zero and the directory shrinks fully.
    let (bpm, _temp) = create_bpm(16);
    let table = small_table(&bpm, 4, 2);

    for k in [0b000, 0b100, 0b010, 0b110] {
        assert!(table.insert(&key(k), b"vvvv").unwrap());
    }
    assert_eq!(global_depth(&bpm, &table), 2);

    assert!(table.remove(&key(0b010)).unwrap());
    assert!(table.remove(&key(0b110)).unwrap());

    assert_eq!(global_depth(&bpm, &table), 0);
    assert_eq!(table.get(&key(0b000)).unwrap(), Some(b"vvvv".to_vec()));
    assert_eq!(table.get(&key(0b100)).unwrap(), Some(b"vvvv".to_vec()));
    assert_eq!(table.get(&key(0b010)).unwrap(), None);
    assert_eq!(table.get(&key(0b110)).unwrap(), None);
    table.verify_integrity().unwrap();
}

#[test]
fn test_insert_fails_at_max_local_depth() {
    // One-slot buckets and a one-bit directory: keys 0 and 2 share bit 0,
    // so no amount of splitting separates them within max_depth = 1.
    let (bpm, _temp) = create_bpm(16);
    let table = small_table(&bpm, 1, 1);

    assert!(table.insert(&key(0), b"aaaa").unwrap());
    assert!(!table.insert(&key(2), b"bbbb").unwrap());

    // The table stays consistent and usable
    assert_eq!(table.get(&key(0)).unwrap(), Some(b"aaaa".to_vec()));
    assert_eq!(table.get(&key(2)).unwrap(), None);
    assert!(table.insert(&key(1), b"cccc").unwrap());
    assert_eq!(table.get(&key(1)).unwrap(), Some(b"cccc".to_vec()));
    table.verify_integrity().unwrap();
}

#[test]
fn test_remove_missing_key() {
    let (bpm, _temp) = create_bpm(16);
    let table = small_table(&bpm, 4, 8);

    assert!(!table.remove(&key(5)).unwrap());
    assert!(table.insert(&key(5), b"vvvv").unwrap());
    assert!(table.remove(&key(5)).unwrap());
    assert!(!table.remove(&key(5)).unwrap());
}

#[test]
fn test_round_trip_with_real_hash() {
    let (bpm, _temp) = create_bpm(64);
    let table = DiskExtendibleHashTable::new(
        Arc::clone(&bpm),
        BytewiseComparator,
        Crc32HashFunction,
        1,
        9,
        4, // tiny buckets force plenty of splits
        8,
        8,
    )
    .unwrap();

    let entry = |i: u64| (format!("k{:07}", i), i.to_le_bytes());

    for i in 0..300 {
        let (k, v) = entry(i);
        assert!(table.insert(k.as_bytes(), &v).unwrap(), "insert {} failed", i);
    }
    table.verify_integrity().unwrap();

    for i in 0..300 {
        let (k, v) = entry(i);
        assert_eq!(table.get(k.as_bytes()).unwrap(), Some(v.to_vec()));
    }

    // Remove the even keys
    for i in (0..300).step_by(2) {
        let (k, _) = entry(i);
        assert!(table.remove(k.as_bytes()).unwrap(), "remove {} failed", i);
    }
    table.verify_integrity().unwrap();

    for i in 0..300 {
        let (k, v) = entry(i);
        let expected = if i % 2 == 0 { None } else { Some(v.to_vec()) };
        assert_eq!(table.get(k.as_bytes()).unwrap(), expected, "key {}", i);
    }
}

#[test]
fn test_removing_everything_shrinks_directory() {
    let (bpm, _temp) = create_bpm(64);
    let table = small_table(&bpm, 6, 2);

    for k in 0..64 {
        assert!(table.insert(&key(k), b"vvvv").unwrap());
    }
    assert!(global_depth(&bpm, &table) > 0);

    for k in 0..64 {
        assert!(table.remove(&key(k)).unwrap());
    }
    assert_eq!(global_depth(&bpm, &table), 0);
    table.verify_integrity().unwrap();

    // The empty table accepts inserts again
    assert!(table.insert(&key(9), b"back").unwrap());
    assert_eq!(table.get(&key(9)).unwrap(), Some(b"back".to_vec()));
}

#[test]
fn test_concurrent_readers() {
    use std::thread;

    let (bpm, _temp) = create_bpm(64);
    let table = Arc::new(DiskExtendibleHashTable::new(
        Arc::clone(&bpm),
        BytewiseComparator,
        Crc32HashFunction,
        1,
        9,
        8,
        8,
        8,
    )
    .unwrap());

    for i in 0..100u64 {
        let k = format!("k{:07}", i);
        table.insert(k.as_bytes(), &i.to_le_bytes()).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..100u64 {
                    let k = format!("k{:07}", i);
                    let got = table.get(k.as_bytes()).unwrap();
                    assert_eq!(got, Some(i.to_le_bytes().to_vec()));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
