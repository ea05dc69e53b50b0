use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback that releases the guard's pin exactly once. Receives the page
/// id and whether the holder dirtied the page.
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Shared plumbing for the three guard flavors: the pinned frame and the
/// one-shot release callback. A guard whose callback has been taken (moved
/// from or upgraded) is inert and its drop does nothing.
struct PageGuardCore {
    page_id: PageId,
    /// Keeps the frame alive for the guard's lifetime
    frame: Arc<FrameHeader>,
    release_callback: Option<ReleaseCallback>,
    /// Whether the holder wrote through this guard
    is_dirty: bool,
}

impl PageGuardCore {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// Scoped ownership of a pin without a content latch. Useful as a staging
/// handle: upgrade to a read or write guard to actually touch the bytes.
pub struct BasicPageGuard {
    core: PageGuardCore,
}

impl BasicPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        Self {
            core: PageGuardCore::new(page_id, frame, release_callback),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.core.page_id
    }

    /// Acquires the shared content latch, transferring the pin to the
    /// returned read guard.
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let frame = Arc::clone(&self.core.frame);
        let callback = self
            .core
            .release_callback
            .take()
            .expect("guard already released");
        // Safety: the frame stays alive through the Arc held by the new guard
        unsafe { ReadPageGuard::new(self.core.page_id, frame, callback) }
    }

    /// Acquires the exclusive content latch, transferring the pin to the
    /// returned write guard.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let frame = Arc::clone(&self.core.frame);
        let callback = self
            .core
            .release_callback
            .take()
            .expect("guard already released");
        // Safety: as above
        unsafe { WritePageGuard::new(self.core.page_id, frame, callback) }
    }

    /// Drops this guard, releasing the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.core.release();
    }
}

/// RAII guard for shared access to a page: pin + reader latch.
/// Unpins and unlatches on drop, on every exit path.
pub struct ReadPageGuard {
    core: PageGuardCore,
    /// Read latch on the page bytes, released before the pin
    _data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The caller must pass the frame whose latch is being erased to
    /// 'static; the Arc stored alongside keeps it alive.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            core: PageGuardCore::new(page_id, frame, release_callback),
            _data_guard: data_guard,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.core.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self._data_guard[..]
    }

    /// Drops this guard, releasing the latch and the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.core.release();
    }
}

/// RAII guard for exclusive access to a page: pin + writer latch.
/// Writing through the guard marks the page dirty; drop releases the latch
/// first and then the pin.
pub struct WritePageGuard {
    core: PageGuardCore,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    /// The caller must pass the frame whose latch is being erased to
    /// 'static; the Arc stored alongside keeps it alive.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            core: PageGuardCore::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.core.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().expect("latch held until drop")[..]
    }

    /// Mutable view of the page bytes; marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.core.is_dirty = true;
        &mut self.data_guard.as_mut().expect("latch held until drop")[..]
    }

    /// Drops this guard, releasing the latch and the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Latch first, then the pin
        self.data_guard.take();
        self.core.release();
    }
}
