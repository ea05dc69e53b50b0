use std::sync::Arc;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{PageId, Result, PAGE_SIZE};
use crate::storage::page::{
    HashBucketPage, HashBucketPageRef, HashDirectoryPage, HashDirectoryPageRef, HashHeaderPage,
    HashHeaderPageRef, HASH_DIRECTORY_MAX_DEPTH, HASH_HEADER_MAX_DEPTH,
};

use super::{HashFunction, KeyComparator};

/// Disk-backed extendible hash table over fixed-width keys and values.
///
/// Pages form a three-level structure: one header page routes the top hash
/// bits to a directory page, which routes the low bits to a bucket page
/// holding the entries. Buckets split when full (growing the directory as
/// needed) and merge with their split image when empty, shrinking the
/// directory back.
///
/// There is no table-wide lock: every traversal takes page guards level by
/// level, and structural changes happen under the directory's write guard.
pub struct DiskExtendibleHashTable<C: KeyComparator, H: HashFunction> {
    bpm: Arc<BufferPoolManager>,
    cmp: C,
    hash_fn: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    key_size: usize,
    value_size: usize,
}

impl<C: KeyComparator, H: HashFunction> DiskExtendibleHashTable<C, H> {
    /// Creates a table, allocating and initializing its header page.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hash_fn: H,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
        key_size: usize,
        value_size: usize,
    ) -> Result<Self> {
        assert!(header_max_depth <= HASH_HEADER_MAX_DEPTH);
        assert!(directory_max_depth <= HASH_DIRECTORY_MAX_DEPTH);
        assert!(bucket_max_size > 0);
        assert!(
            8 + bucket_max_size as usize * (key_size + value_size) <= PAGE_SIZE,
            "bucket entries must fit a page"
        );

        let header_page_id = {
            let mut guard = bpm.new_page_guarded()?.upgrade_write();
            let page_id = guard.page_id();
            let mut header = HashHeaderPage::new(guard.data_mut());
            header.init(header_max_depth);
            page_id
        };

        Ok(Self {
            bpm,
            cmp,
            hash_fn,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            key_size,
            value_size,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up the value stored for `key`. Read guards only; each level's
    /// guard is dropped as soon as the child page id is known.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        assert_eq!(key.len(), self.key_size);
        let hash = self.hash_fn.hash_key(key);

        let directory_page_id = {
            let guard = self.bpm.fetch_page_read(self.header_page_id)?;
            let header = HashHeaderPageRef::new(guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        let Some(directory_page_id) = directory_page_id else {
            return Ok(None);
        };

        let bucket_page_id = {
            let guard = self.bpm.fetch_page_read(directory_page_id)?;
            let directory = HashDirectoryPageRef::new(guard.data());
            directory.bucket_page_id(directory.hash_to_bucket_index(hash))
        };
        let Some(bucket_page_id) = bucket_page_id else {
            return Ok(None);
        };

        let guard = self.bpm.fetch_page_read(bucket_page_id)?;
        let bucket = HashBucketPageRef::new(guard.data(), self.key_size, self.value_size);
        Ok(bucket.lookup(key, &self.cmp).map(|value| value.to_vec()))
    }

    /// Inserts a key/value pair. Returns false, leaving the table
    /// unchanged, when the key is already present or when the target
    /// bucket is at max local depth and still cannot admit the key.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        assert_eq!(key.len(), self.key_size);
        assert_eq!(value.len(), self.value_size);
        let hash = self.hash_fn.hash_key(key);

        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let directory_idx = {
            let header = HashHeaderPageRef::new(header_guard.data());
            header.hash_to_directory_index(hash)
        };
        let directory_page_id = {
            let header = HashHeaderPageRef::new(header_guard.data());
            header.directory_page_id(directory_idx)
        };

        let Some(directory_page_id) = directory_page_id else {
            return self.insert_to_new_directory(&mut header_guard, directory_idx, hash, key, value);
        };
        drop(header_guard);

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        loop {
            let (bucket_idx, bucket_page_id) = {
                let directory = HashDirectoryPageRef::new(directory_guard.data());
                let idx = directory.hash_to_bucket_index(hash);
                (idx, directory.bucket_page_id(idx))
            };

            let Some(bucket_page_id) = bucket_page_id else {
                return self.insert_to_new_bucket(&mut directory_guard, bucket_idx, key, value);
            };

            let bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
            let (is_full, is_duplicate) = {
                let bucket =
                    HashBucketPageRef::new(bucket_guard.data(), self.key_size, self.value_size);
                (bucket.is_full(), bucket.lookup(key, &self.cmp).is_some())
            };

            if is_duplicate {
                return Ok(false);
            }

            if !is_full {
                let mut bucket_guard = bucket_guard;
                let mut bucket =
                    HashBucketPage::new(bucket_guard.data_mut(), self.key_size, self.value_size);
                return Ok(bucket.insert(key, value, &self.cmp));
            }

            // A split is required; give up once the bucket already
            // discriminates on every bit the directory can offer.
            {
                let directory = HashDirectoryPageRef::new(directory_guard.data());
                if directory.local_depth(bucket_idx) == self.directory_max_depth {
                    log::debug!(
                        "insert aborted: bucket at max local depth {}",
                        self.directory_max_depth
                    );
                    return Ok(false);
                }
            }

            self.split_bucket(&mut directory_guard, bucket_guard, bucket_idx, bucket_page_id)?;
        }
    }

    /// Removes the entry for `key`. Returns false when the key is absent.
    /// Empty buckets merge with their split images and the directory
    /// shrinks while it can.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        assert_eq!(key.len(), self.key_size);
        let hash = self.hash_fn.hash_key(key);

        let directory_page_id = {
            let guard = self.bpm.fetch_page_read(self.header_page_id)?;
            let header = HashHeaderPageRef::new(guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        let Some(directory_page_id) = directory_page_id else {
            return Ok(false);
        };

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let (bucket_idx, bucket_page_id) = {
            let directory = HashDirectoryPageRef::new(directory_guard.data());
            let idx = directory.hash_to_bucket_index(hash);
            (idx, directory.bucket_page_id(idx))
        };
        let Some(bucket_page_id) = bucket_page_id else {
            return Ok(false);
        };

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        let removed = {
            let mut bucket =
                HashBucketPage::new(bucket_guard.data_mut(), self.key_size, self.value_size);
            bucket.remove(key, &self.cmp)
        };
        if !removed {
            return Ok(false);
        }

        self.merge_buckets(&mut directory_guard, bucket_guard, bucket_idx)?;

        loop {
            let can_shrink = {
                let directory = HashDirectoryPageRef::new(directory_guard.data());
                directory.can_shrink()
            };
            if !can_shrink {
                break;
            }
            let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
            directory.decr_global_depth();
            log::debug!("directory shrank to global depth {}", directory.global_depth());
        }

        Ok(true)
    }

    /// Walks every directory reachable from the header and asserts the
    /// depth and slot-pairing invariants.
    pub fn verify_integrity(&self) -> Result<()> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header = HashHeaderPageRef::new(header_guard.data());

        let mut directory_ids = Vec::new();
        for i in 0..header.max_size() {
            if let Some(page_id) = header.directory_page_id(i) {
                directory_ids.push(page_id);
            }
        }
        drop(header_guard);

        for page_id in directory_ids {
            let guard = self.bpm.fetch_page_read(page_id)?;
            HashDirectoryPageRef::new(guard.data()).verify_integrity();
        }
        Ok(())
    }

    /// First insert routed to an empty header slot: builds the directory
    /// and its first bucket. Writing the directory pointer dirties the
    /// header page.
    fn insert_to_new_directory(
        &self,
        header_guard: &mut WritePageGuard,
        directory_idx: usize,
        hash: u32,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        let mut directory_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let directory_page_id = directory_guard.page_id();
        {
            let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
            directory.init(self.directory_max_depth);
        }

        {
            let mut header = HashHeaderPage::new(header_guard.data_mut());
            header.set_directory_page_id(directory_idx, directory_page_id);
        }

        let bucket_idx = {
            let directory = HashDirectoryPageRef::new(directory_guard.data());
            directory.hash_to_bucket_index(hash)
        };
        log::debug!("created directory {} for new hash prefix", directory_page_id);
        self.insert_to_new_bucket(&mut directory_guard, bucket_idx, key, value)
    }

    /// Fills an unoccupied directory slot with a fresh bucket holding the
    /// single entry.
    fn insert_to_new_bucket(
        &self,
        directory_guard: &mut WritePageGuard,
        bucket_idx: usize,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        let mut bucket_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let bucket_page_id = bucket_guard.page_id();

        let mut bucket =
            HashBucketPage::new(bucket_guard.data_mut(), self.key_size, self.value_size);
        bucket.init(self.bucket_max_size);
        let inserted = bucket.insert(key, value, &self.cmp);

        let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
        directory.set_bucket_page_id(bucket_idx, bucket_page_id);
        Ok(inserted)
    }

    /// Splits the full bucket at `bucket_idx` into two, raising the local
    /// depth by one and growing the directory first when the bucket
    /// already uses every live directory bit. The old bucket page is
    /// deleted once its entries are redistributed.
    fn split_bucket(
        &self,
        directory_guard: &mut WritePageGuard,
        bucket_guard: WritePageGuard,
        bucket_idx: usize,
        old_page_id: PageId,
    ) -> Result<()> {
        let (old_local_depth, global_depth) = {
            let directory = HashDirectoryPageRef::new(directory_guard.data());
            (directory.local_depth(bucket_idx), directory.global_depth())
        };

        if old_local_depth == global_depth {
            let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
            directory.incr_global_depth();
            log::debug!("directory grew to global depth {}", directory.global_depth());
        }

        let new_local_depth = old_local_depth + 1;
        let distinguishing_bit = 1u32 << old_local_depth;

        // Pull the entries out, then release and delete the old page
        let entries: Vec<(Vec<u8>, Vec<u8>)> = {
            let bucket =
                HashBucketPageRef::new(bucket_guard.data(), self.key_size, self.value_size);
            (0..bucket.size())
                .map(|i| {
                    let (k, v) = bucket.entry_at(i);
                    (k.to_vec(), v.to_vec())
                })
                .collect()
        };
        drop(bucket_guard);

        let mut low_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let mut high_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let low_page_id = low_guard.page_id();
        let high_page_id = high_guard.page_id();

        {
            let mut low =
                HashBucketPage::new(low_guard.data_mut(), self.key_size, self.value_size);
            low.init(self.bucket_max_size);
            let mut high =
                HashBucketPage::new(high_guard.data_mut(), self.key_size, self.value_size);
            high.init(self.bucket_max_size);

            for (key, value) in &entries {
                let target = if self.hash_fn.hash_key(key) & distinguishing_bit == 0 {
                    &mut low
                } else {
                    &mut high
                };
                let inserted = target.insert(key, value, &self.cmp);
                debug_assert!(inserted, "redistributed entry must fit an empty bucket");
            }
        }

        // Re-aim every slot that referenced the old bucket
        {
            let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
            for i in 0..directory.size() {
                if directory.bucket_page_id(i) == Some(old_page_id) {
                    directory.set_local_depth(i, new_local_depth as u8);
                    let target = if (i as u32) & distinguishing_bit == 0 {
                        low_page_id
                    } else {
                        high_page_id
                    };
                    directory.set_bucket_page_id(i, target);
                }
            }
        }

        drop(low_guard);
        drop(high_guard);
        self.bpm.delete_page(old_page_id)?;

        log::debug!(
            "split bucket {} into {} and {} at local depth {}",
            old_page_id,
            low_page_id,
            high_page_id,
            new_local_depth
        );
        Ok(())
    }

    /// Repeatedly merges the bucket at `bucket_idx` with its split image
    /// while the two share a local depth and either is empty. The
    /// non-empty bucket survives; every slot referencing either bucket is
    /// re-aimed at the survivor with its local depth lowered.
    fn merge_buckets(
        &self,
        directory_guard: &mut WritePageGuard,
        bucket_guard: WritePageGuard,
        bucket_idx: usize,
    ) -> Result<()> {
        let mut bucket_guard = bucket_guard;

        loop {
            let (bucket_page_id, image_page_id) = {
                let directory = HashDirectoryPageRef::new(directory_guard.data());
                let local_depth = directory.local_depth(bucket_idx);
                if local_depth == 0 {
                    break;
                }
                let image_idx = directory.split_image_index(bucket_idx);
                if directory.local_depth(image_idx) != local_depth {
                    break;
                }
                let Some(image_page_id) = directory.bucket_page_id(image_idx) else {
                    break;
                };
                let bucket_page_id = directory
                    .bucket_page_id(bucket_idx)
                    .expect("merging bucket must be mapped");
                if bucket_page_id == image_page_id {
                    break;
                }
                (bucket_page_id, image_page_id)
            };

            let bucket_empty = {
                let bucket =
                    HashBucketPageRef::new(bucket_guard.data(), self.key_size, self.value_size);
                bucket.is_empty()
            };
            let image_guard = self.bpm.fetch_page_write(image_page_id)?;
            let image_empty = {
                let image =
                    HashBucketPageRef::new(image_guard.data(), self.key_size, self.value_size);
                image.is_empty()
            };

            if !bucket_empty && !image_empty {
                break;
            }

            let (survivor_id, loser_id, survivor_guard, loser_guard) = if bucket_empty {
                (image_page_id, bucket_page_id, image_guard, bucket_guard)
            } else {
                (bucket_page_id, image_page_id, bucket_guard, image_guard)
            };

            {
                let mut directory = HashDirectoryPage::new(directory_guard.data_mut());
                for i in 0..directory.size() {
                    let slot = directory.bucket_page_id(i);
                    if slot == Some(loser_id) || slot == Some(survivor_id) {
                        directory.set_bucket_page_id(i, survivor_id);
                        directory.decr_local_depth(i);
                    }
                }
            }

            drop(loser_guard);
            self.bpm.delete_page(loser_id)?;
            log::debug!("merged bucket {} into {}", loser_id, survivor_id);

            bucket_guard = survivor_guard;
        }

        Ok(())
    }
}
