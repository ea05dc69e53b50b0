use crate::common::{PageId, PAGE_SIZE};

/// Largest directory depth whose id and depth arrays fit one page:
/// 8 + 5 * 2^depth <= PAGE_SIZE
pub const HASH_DIRECTORY_MAX_DEPTH: u32 = 9;

const MAX_DEPTH_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const BUCKET_IDS_OFFSET: usize = 8;

/// Middle level of the on-disk extendible hash table.
///
/// Page layout (all fields little-endian):
///
/// ```text
/// | max_depth (4) | global_depth (4)
/// | bucket_page_ids (4 * 2^max_depth) | local_depths (1 * 2^max_depth) |
/// ```
///
/// Only the first `2^global_depth` slots are live. A hash is routed to a
/// bucket by its low `global_depth` bits. Slots `i` and `j` share a bucket
/// iff they agree on the low `local_depths[i]` bits. A stored bucket id of
/// 0 marks an unoccupied slot (page 0 is the table's header page).
pub struct HashDirectoryPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HashDirectoryPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self, max_depth: u32) {
        assert!(max_depth <= HASH_DIRECTORY_MAX_DEPTH);
        self.data.fill(0);
        self.data[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4].copy_from_slice(&max_depth.to_le_bytes());
    }

    pub fn as_ref(&self) -> HashDirectoryPageRef<'_> {
        HashDirectoryPageRef::new(self.data)
    }

    pub fn max_depth(&self) -> u32 {
        self.as_ref().max_depth()
    }

    pub fn global_depth(&self) -> u32 {
        self.as_ref().global_depth()
    }

    pub fn size(&self) -> usize {
        self.as_ref().size()
    }

    pub fn hash_to_bucket_index(&self, hash: u32) -> usize {
        self.as_ref().hash_to_bucket_index(hash)
    }

    pub fn bucket_page_id(&self, idx: usize) -> Option<PageId> {
        self.as_ref().bucket_page_id(idx)
    }

    pub fn local_depth(&self, idx: usize) -> u32 {
        self.as_ref().local_depth(idx)
    }

    pub fn split_image_index(&self, idx: usize) -> usize {
        self.as_ref().split_image_index(idx)
    }

    pub fn can_shrink(&self) -> bool {
        self.as_ref().can_shrink()
    }

    pub fn set_bucket_page_id(&mut self, idx: usize, page_id: PageId) {
        assert!(idx < self.as_ref().max_size());
        let offset = BUCKET_IDS_OFFSET + idx * 4;
        self.data[offset..offset + 4].copy_from_slice(&page_id.as_u32().to_le_bytes());
    }

    pub fn set_local_depth(&mut self, idx: usize, local_depth: u8) {
        let max_size = self.as_ref().max_size();
        assert!(idx < max_size);
        assert!((local_depth as u32) <= self.max_depth());
        self.data[BUCKET_IDS_OFFSET + max_size * 4 + idx] = local_depth;
    }

    pub fn incr_local_depth(&mut self, idx: usize) {
        let depth = self.local_depth(idx);
        self.set_local_depth(idx, (depth + 1) as u8);
    }

    pub fn decr_local_depth(&mut self, idx: usize) {
        let depth = self.local_depth(idx);
        assert!(depth > 0);
        self.set_local_depth(idx, (depth - 1) as u8);
    }

    /// Doubles the directory by mirroring every live slot `i` into
    /// `i + size`, bucket id and local depth verbatim, then bumps the
    /// global depth. Mirrored slots keep pointing at the shared buckets
    /// until a split rewrites them.
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(global_depth < self.max_depth());

        let size = self.size();
        let depths_offset = BUCKET_IDS_OFFSET + self.as_ref().max_size() * 4;
        for i in 0..size {
            let page_id = self.as_ref().raw_bucket_page_id(i);
            let depth = self.data[depths_offset + i];
            let offset = BUCKET_IDS_OFFSET + (i + size) * 4;
            self.data[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
            self.data[depths_offset + i + size] = depth;
        }

        self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&(global_depth + 1).to_le_bytes());
    }

    /// Halves the directory: zeroes the retired upper half and decrements
    /// the global depth. Callers must check `can_shrink` first.
    pub fn decr_global_depth(&mut self) {
        assert!(self.can_shrink());

        let global_depth = self.global_depth();
        let new_size = self.size() / 2;
        let max_size = self.as_ref().max_size();

        for i in new_size..self.size() {
            let offset = BUCKET_IDS_OFFSET + i * 4;
            self.data[offset..offset + 4].fill(0);
            self.data[BUCKET_IDS_OFFSET + max_size * 4 + i] = 0;
        }

        self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&(global_depth - 1).to_le_bytes());
    }
}

/// Read-only view of a directory page, usable under a shared latch.
pub struct HashDirectoryPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HashDirectoryPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn max_depth(&self) -> u32 {
        let bytes: [u8; 4] = self.data[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes)
    }

    pub fn global_depth(&self) -> u32 {
        let bytes: [u8; 4] = self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Number of live slots.
    pub fn size(&self) -> usize {
        1usize << self.global_depth()
    }

    /// Capacity of the slot arrays.
    pub fn max_size(&self) -> usize {
        1usize << self.max_depth()
    }

    /// Routes a hash by its low `global_depth` bits.
    pub fn hash_to_bucket_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.size() - 1)
    }

    fn raw_bucket_page_id(&self, idx: usize) -> u32 {
        let offset = BUCKET_IDS_OFFSET + idx * 4;
        let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Returns the bucket recorded at `idx`, or None for an unoccupied slot.
    pub fn bucket_page_id(&self, idx: usize) -> Option<PageId> {
        assert!(idx < self.max_size());
        match self.raw_bucket_page_id(idx) {
            0 => None,
            raw => Some(PageId::new(raw)),
        }
    }

    pub fn local_depth(&self, idx: usize) -> u32 {
        assert!(idx < self.max_size());
        self.data[BUCKET_IDS_OFFSET + self.max_size() * 4 + idx] as u32
    }

    /// The slot this one pairs with across the most recent split: the
    /// index with the topmost local-depth bit flipped.
    pub fn split_image_index(&self, idx: usize) -> usize {
        let local_depth = self.local_depth(idx);
        assert!(local_depth > 0);
        idx ^ (1usize << (local_depth - 1))
    }

    /// The directory may halve iff every live slot discriminates on fewer
    /// bits than the directory does.
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        if global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < global_depth)
    }

    /// Asserts the structural invariants: local depths bounded by the
    /// global depth, and slots that agree on their low local-depth bits
    /// share both bucket and depth.
    pub fn verify_integrity(&self) {
        let global_depth = self.global_depth();
        assert!(global_depth <= self.max_depth());

        for i in 0..self.size() {
            let local_depth = self.local_depth(i);
            assert!(
                local_depth <= global_depth,
                "slot {} has local depth {} above global depth {}",
                i,
                local_depth,
                global_depth
            );

            if let Some(page_id) = self.bucket_page_id(i) {
                let canonical = i & ((1usize << local_depth) - 1);
                assert_eq!(
                    self.bucket_page_id(canonical),
                    Some(page_id),
                    "slots {} and {} disagree on their shared bucket",
                    i,
                    canonical
                );
                assert_eq!(self.local_depth(canonical), local_depth);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_init() {
        let mut data = [0xffu8; PAGE_SIZE];
        let mut dir = HashDirectoryPage::new(&mut data);
        dir.init(3);

        assert_eq!(dir.max_depth(), 3);
        assert_eq!(dir.global_depth(), 0);
        assert_eq!(dir.size(), 1);
        assert_eq!(dir.bucket_page_id(0), None);
        assert_eq!(dir.local_depth(0), 0);
    }

    #[test]
    fn test_directory_hash_routing_uses_low_bits() {
        let mut data = [0u8; PAGE_SIZE];
        let mut dir = HashDirectoryPage::new(&mut data);
        dir.init(4);
        dir.set_bucket_page_id(0, PageId::new(5));
        dir.incr_global_depth();
        dir.incr_global_depth();

        assert_eq!(dir.global_depth(), 2);
        assert_eq!(dir.hash_to_bucket_index(0b0000), 0);
        assert_eq!(dir.hash_to_bucket_index(0b0110), 2);
        assert_eq!(dir.hash_to_bucket_index(0b1111), 3);
    }

    #[test]
    fn test_directory_growth_mirrors_slots() {
        let mut data = [0u8; PAGE_SIZE];
        let mut dir = HashDirectoryPage::new(&mut data);
        dir.init(3);

        dir.set_bucket_page_id(0, PageId::new(10));
        dir.incr_global_depth();

        // Slot 1 inherited slot 0's bucket and depth
        assert_eq!(dir.size(), 2);
        assert_eq!(dir.bucket_page_id(1), Some(PageId::new(10)));
        assert_eq!(dir.local_depth(1), 0);

        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.set_bucket_page_id(1, PageId::new(11));
        dir.incr_global_depth();

        assert_eq!(dir.size(), 4);
        assert_eq!(dir.bucket_page_id(2), Some(PageId::new(10)));
        assert_eq!(dir.bucket_page_id(3), Some(PageId::new(11)));
        assert_eq!(dir.local_depth(2), 1);
        assert_eq!(dir.local_depth(3), 1);
        dir.as_ref().verify_integrity();
    }

    #[test]
    fn test_directory_shrink() {
        let mut data = [0u8; PAGE_SIZE];
        let mut dir = HashDirectoryPage::new(&mut data);
        dir.init(3);

        dir.set_bucket_page_id(0, PageId::new(10));
        dir.incr_global_depth();

        // Both slots at local depth 0 < global depth 1
        assert!(dir.can_shrink());
        dir.decr_global_depth();

        assert_eq!(dir.global_depth(), 0);
        assert_eq!(dir.size(), 1);
        assert_eq!(dir.bucket_page_id(0), Some(PageId::new(10)));
        assert!(!dir.can_shrink());
    }

    #[test]
    fn test_directory_split_image() {
        let mut data = [0u8; PAGE_SIZE];
        let mut dir = HashDirectoryPage::new(&mut data);
        dir.init(4);
        dir.set_bucket_page_id(0, PageId::new(5));
        dir.incr_global_depth();
        dir.incr_global_depth();
        dir.set_local_depth(2, 2);

        assert_eq!(dir.split_image_index(2), 0);
        dir.set_local_depth(2, 1);
        assert_eq!(dir.split_image_index(2), 3);
    }
}
