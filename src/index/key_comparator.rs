use std::cmp::Ordering;

/// Total order over fixed-width index keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Compares keys as raw bytes, lexicographically.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Compares 4-byte keys as little-endian u32 values.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let a_val = u32::from_le_bytes(a[..4].try_into().expect("key shorter than 4 bytes"));
        let b_val = u32::from_le_bytes(b[..4].try_into().expect("key shorter than 4 bytes"));
        a_val.cmp(&b_val)
    }
}
