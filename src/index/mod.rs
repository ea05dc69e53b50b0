pub mod hash_function;
pub mod hash_table;
pub mod key_comparator;

pub use hash_function::{Crc32HashFunction, HashFunction, IdentityHashFunction};
pub use hash_table::DiskExtendibleHashTable;
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
