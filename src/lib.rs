//! Carbide - the storage-engine core of a disk-oriented database
//!
//! This crate provides the buffer management and index primitives that the
//! higher layers of a DBMS are built on. Data lives in fixed-size pages on
//! disk; a buffer pool caches the hot ones in memory and an extendible
//! hash index organizes key/value lookups over them.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and on-disk page formats
//!   - `DiskManager`: reads and writes pages in a single database file
//!   - `DiskScheduler`: FIFO request queue with a background I/O worker
//!   - `HashHeaderPage`/`HashDirectoryPage`/`HashBucketPage`: page formats
//!     of the extendible hash index
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: page table, free list, pin accounting
//!   - `LruKReplacer`: LRU-K eviction policy
//!   - `FrameHeader`: per-frame metadata and the page bytes
//!   - `BasicPageGuard`/`ReadPageGuard`/`WritePageGuard`: RAII pin + latch
//!
//! - **Index** (`index`): `DiskExtendibleHashTable`, generic over a key
//!   comparator and hash function
//!
//! - **Trie** (`trie`): persistent copy-on-write prefix tree used as an
//!   in-memory key/value primer
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carbide::buffer::BufferPoolManager;
//! use carbide::index::{BytewiseComparator, Crc32HashFunction, DiskExtendibleHashTable};
//! use carbide::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let table = DiskExtendibleHashTable::new(
//!     Arc::clone(&bpm),
//!     BytewiseComparator,
//!     Crc32HashFunction,
//!     2,  // header_max_depth
//!     9,  // directory_max_depth
//!     64, // bucket_max_size
//!     8,  // key_size
//!     8,  // value_size
//! )
//! .unwrap();
//!
//! table.insert(b"aaaaaaaa", b"11111111").unwrap();
//! assert_eq!(
//!     table.get(b"aaaaaaaa").unwrap(),
//!     Some(b"11111111".to_vec())
//! );
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;
pub mod trie;

// Re-export commonly used types at the crate root
pub use common::{CarbideError, FrameId, PageId, Result};
