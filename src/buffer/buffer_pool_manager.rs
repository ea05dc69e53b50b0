use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{CarbideError, FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{BasicPageGuard, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Page table and free list, guarded together by the pool mutex
struct PoolCore {
    /// Maps resident page IDs to the frames that hold them
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page
    free_list: VecDeque<FrameId>,
}

/// State shared with guard release callbacks
struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    core: Mutex<PoolCore>,
    replacer: LruKReplacer,
}

impl BufferPoolState {
    /// Releases one pin on `page_id`, ORing in the holder's dirty flag and
    /// flipping the frame evictable on the last unpin.
    fn release_pin(&self, page_id: PageId, is_dirty: bool) {
        let core = self.core.lock();
        if let Some(&frame_id) = core.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            if is_dirty {
                frame.set_dirty(true);
            }
            if let Some(0) = frame.unpin() {
                self.replacer.set_evictable(frame_id, true);
            }
        }
    }
}

/// BufferPoolManager mediates every page access: it owns the frame array,
/// tracks which page lives where, and uses the LRU-K replacer to choose
/// victims when the pool is full. All disk traffic goes through the disk
/// scheduler, and the pool mutex is never held across an I/O wait or a
/// frame-latch acquisition.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value
    /// for LRU-K, and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            core: Mutex::new(PoolCore {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruKReplacer::new(k, pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a brand-new page and pins it into a frame.
    /// The fresh page is zeroed and born dirty, with a pin count of one;
    /// the caller is responsible for the matching `unpin_page`.
    pub fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        let frame_id = self.acquire_frame()?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                self.return_frame_to_free_list(frame_id);
                return Err(e);
            }
        };

        {
            let mut data = frame.write_data();
            data.fill(0);
        }
        frame.set_page_id(page_id);
        frame.set_dirty(true);
        frame.pin();

        let mut core = self.state.core.lock();
        core.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        Ok((page_id, Arc::clone(frame)))
    }

    /// Pins the page into a frame, reading it from disk if it is not
    /// resident, and returns the frame. The caller is responsible for the
    /// matching `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if page_id == INVALID_PAGE_ID {
            return Err(CarbideError::InvalidPageId(page_id));
        }

        if let Some(frame) = self.try_fetch_resident(page_id) {
            return Ok(frame);
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.state.frames[frame_id.as_usize()];

        // Fill the frame while it is still unreachable from the page table,
        // holding its latch so late-arriving readers see complete bytes.
        let mut data = frame.write_data();
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data[..]) {
            drop(data);
            self.return_frame_to_free_list(frame_id);
            return Err(e);
        }
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        {
            // Lock order is frame latch -> pool mutex; the pool mutex is
            // never held while waiting on a latch, so this cannot deadlock.
            let mut core = self.state.core.lock();
            if let Some(&other) = core.page_table.get(&page_id) {
                // Another thread loaded the page while we were reading.
                // Pin theirs and yield our frame.
                let other_frame = &self.state.frames[other.as_usize()];
                other_frame.pin();
                self.state.replacer.record_access(other);
                self.state.replacer.set_evictable(other, false);
                drop(core);

                drop(data);
                frame.reset();
                self.return_frame_to_free_list(frame_id);
                return Ok(Arc::clone(other_frame));
            }
            core.page_table.insert(page_id, frame_id);
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
        }
        drop(data);

        Ok(Arc::clone(frame))
    }

    /// Releases one pin on a resident page, ORing `is_dirty` into the
    /// frame's dirty bit. Returns false if the page is not resident or was
    /// not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let core = self.state.core.lock();
        let Some(&frame_id) = core.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        if is_dirty {
            frame.set_dirty(true);
        }
        match frame.unpin() {
            None => false,
            Some(0) => {
                self.state.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
        }
    }

    /// Writes a resident page out and clears its dirty bit. The page may
    /// still be pinned. Returns false if the page is not resident; a failed
    /// write leaves the dirty bit set.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(CarbideError::InvalidPageId(page_id));
        }

        let frame = {
            let core = self.state.core.lock();
            match core.page_table.get(&page_id) {
                Some(&frame_id) => Arc::clone(&self.state.frames[frame_id.as_usize()]),
                None => return Ok(false),
            }
        };

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);

        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let core = self.state.core.lock();
            core.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates it on disk. Returns true
    /// if the page is not resident, false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let frame_id = {
            let mut core = self.state.core.lock();
            let Some(&frame_id) = core.page_table.get(&page_id) else {
                return Ok(true);
            };
            let frame = &self.state.frames[frame_id.as_usize()];
            if frame.pin_count() > 0 {
                return Ok(false);
            }
            core.page_table.remove(&page_id);
            self.state.replacer.remove(frame_id);
            frame_id
        };

        self.state.frames[frame_id.as_usize()].reset();
        self.return_frame_to_free_list(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id);
        Ok(true)
    }

    /// Allocates a new page and wraps its pin in a guard.
    pub fn new_page_guarded(&self) -> Result<BasicPageGuard> {
        let (page_id, frame) = self.new_page()?;
        Ok(BasicPageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Fetches a page and wraps its pin in a guard without latching.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Fetches a page under a shared content latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Fetches a page under an exclusive content latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let core = self.state.core.lock();
        core.page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.core.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins a resident page, recording the access. Returns None on a miss.
    fn try_fetch_resident(&self, page_id: PageId) -> Option<Arc<FrameHeader>> {
        let core = self.state.core.lock();
        let &frame_id = core.page_table.get(&page_id)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        frame.pin();
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);
        Some(Arc::clone(frame))
    }

    /// Obtains an empty frame: from the free list if possible, otherwise by
    /// evicting the replacer's victim. A dirty victim is written back while
    /// its page-table mapping is still in place, so a concurrent fetch of
    /// the same page keeps hitting the frame instead of reading stale bytes
    /// from disk; the mapping is removed only once disk holds the current
    /// bytes. The returned frame is reset and reachable from neither the
    /// page table nor the free list. The pool mutex is released before any
    /// I/O.
    fn acquire_frame(&self) -> Result<FrameId> {
        loop {
            let (frame_id, dirty_victim) = {
                let mut core = self.state.core.lock();
                if let Some(frame_id) = core.free_list.pop_front() {
                    return Ok(frame_id);
                }
                let Some(frame_id) = self.state.replacer.evict() else {
                    return Err(CarbideError::PoolExhausted);
                };
                let frame = &self.state.frames[frame_id.as_usize()];
                let old_page_id = frame.page_id();
                if frame.is_dirty() {
                    (frame_id, Some(old_page_id))
                } else {
                    // Disk already holds the current bytes; the mapping can
                    // go away atomically with the eviction decision.
                    core.page_table.remove(&old_page_id);
                    (frame_id, None)
                }
            };

            let frame = &self.state.frames[frame_id.as_usize()];

            let Some(old_page_id) = dirty_victim else {
                frame.reset();
                return Ok(frame_id);
            };

            log::debug!("evicting dirty page {}, writing back", old_page_id);
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if let Err(e) = self.disk_scheduler.schedule_write_sync(old_page_id, &data) {
                log::warn!("write-back of {} failed, keeping it resident: {}", old_page_id, e);
                let core = self.state.core.lock();
                if core.page_table.get(&old_page_id) == Some(&frame_id) && frame.pin_count() == 0
                {
                    self.state.replacer.record_access(frame_id);
                    self.state.replacer.set_evictable(frame_id, true);
                }
                drop(core);
                return Err(e);
            }
            frame.set_dirty(false);

            let mut core = self.state.core.lock();
            if core.page_table.get(&old_page_id) != Some(&frame_id)
                || frame.pin_count() > 0
                || frame.is_dirty()
            {
                // The page was re-pinned, re-dirtied, or deleted while the
                // write-back ran; it is not ours to take. Pick another.
                drop(core);
                continue;
            }
            core.page_table.remove(&old_page_id);
            // A racer that pinned and unpinned during the write-back left a
            // fresh replacer entry behind; clear it with the mapping.
            self.state.replacer.remove(frame_id);
            drop(core);

            frame.reset();
            return Ok(frame_id);
        }
    }

    fn return_frame_to_free_list(&self, frame_id: FrameId) {
        self.state.core.lock().free_list.push_back(frame_id);
    }

    fn release_callback(&self) -> Box<dyn FnOnce(PageId, bool) + Send + Sync> {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.release_pin(page_id, is_dirty);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, frame) = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(0));
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.is_dirty());
        assert_eq!(bpm.free_frame_count(), 9);

        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        // The dirty bit set at birth must survive a clean unpin
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_manager_unpin_semantics() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, _frame) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(page_id, false));
        // Second unpin of an unpinned page fails
        assert!(!bpm.unpin_page(page_id, false));
        // Unknown pages fail
        assert!(!bpm.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_buffer_pool_manager_guarded_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let guard = bpm.new_page_guarded().unwrap();
            guard.page_id()
        };

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }

        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        {
            let guard = bpm.fetch_page_read(page_id).unwrap();
            assert_eq!(guard.data()[0], 42);
            assert_eq!(guard.data()[100], 255);
        }
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_flush_persists() {
        let (bpm, temp) = create_bpm(10);

        let (page_id, frame) = bpm.new_page().unwrap();
        frame.write_data()[0] = 42;
        bpm.unpin_page(page_id, true);

        bpm.flush_page(page_id).unwrap();
        assert!(!frame.is_dirty());

        drop(bpm);
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);

        let guard = bpm2.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_eviction_flushes_dirty_victim() {
        let (bpm, _temp) = create_bpm(3);

        // Fill the pool: p1 dirtied, p2 clean, p3 kept pinned
        let (p1, f1) = bpm.new_page().unwrap();
        f1.write_data()[0] = 0xaa;
        let (p2, _f2) = bpm.new_page().unwrap();
        let (_p3, _f3) = bpm.new_page().unwrap();

        bpm.unpin_page(p1, true);
        bpm.unpin_page(p2, false);

        // p1 was touched first, so its frame is the victim; its bytes must
        // be written back before the frame is reused
        let (p4, _f4) = bpm.new_page().unwrap();
        assert_eq!(p4, PageId::new(3));
        assert_eq!(bpm.get_pin_count(p1), None);

        // Reloading p1 must observe the flushed bytes; p2 is the next
        // victim and is clean, so no second write-back happens
        let writes_before = bpm.disk_manager().num_writes();
        let frame = bpm.fetch_page(p1).unwrap();
        assert_eq!(frame.read_data()[0], 0xaa);
        assert_eq!(bpm.get_pin_count(p2), None);
        assert_eq!(bpm.disk_manager().num_writes(), writes_before);
    }

    #[test]
    fn test_buffer_pool_manager_pool_exhausted() {
        let (bpm, _temp) = create_bpm(2);

        let (_p1, _f1) = bpm.new_page().unwrap();
        let (_p2, _f2) = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(CarbideError::PoolExhausted)));
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, _frame) = bpm.new_page().unwrap();

        // Pinned pages cannot be deleted
        assert!(!bpm.delete_page(page_id).unwrap());

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Deleting a non-resident page reports success
        assert!(bpm.delete_page(PageId::new(99)).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_concurrent_fetches() {
        use std::thread;

        let (bpm, _temp) = create_bpm(10);
        let bpm = Arc::new(bpm);

        let (page_id, _frame) = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bpm = Arc::clone(&bpm);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let frame = bpm.fetch_page(page_id).unwrap();
                        assert_eq!(frame.page_id(), page_id);
                        assert!(bpm.unpin_page(page_id, false));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }
}
