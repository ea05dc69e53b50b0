use std::sync::Arc;

use carbide::buffer::BufferPoolManager;
use carbide::index::{BytewiseComparator, Crc32HashFunction, DiskExtendibleHashTable};
use carbide::storage::disk::DiskManager;
use carbide::trie::Trie;

fn main() {
    env_logger::init();

    println!("Carbide - disk-oriented storage engine core");
    println!("===========================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    // Buffer pool with 16 frames and LRU-2 replacement
    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    let table = DiskExtendibleHashTable::new(
        Arc::clone(&bpm),
        BytewiseComparator,
        Crc32HashFunction,
        2,  // header_max_depth
        9,  // directory_max_depth
        16, // bucket_max_size
        8,  // key_size
        8,  // value_size
    )
    .expect("Failed to create hash table");
    println!("Created hash table (header page {})", table.header_page_id());

    for i in 0..40u64 {
        let key = format!("key{:05}", i);
        let value = i.to_le_bytes();
        table
            .insert(key.as_bytes(), &value)
            .expect("insert failed");
    }
    println!("Inserted 40 entries");

    let found = table
        .get(b"key00007")
        .expect("get failed")
        .map(|v| u64::from_le_bytes(v.try_into().unwrap()));
    println!("get(key00007) = {:?}", found);

    let removed = table.remove(b"key00007").expect("remove failed");
    println!("remove(key00007) = {}", removed);
    println!(
        "get(key00007) after remove = {:?}\n",
        table.get(b"key00007").expect("get failed")
    );

    bpm.flush_all_pages().expect("flush failed");
    println!(
        "Flushed all pages ({} disk writes total)\n",
        bpm.disk_manager().num_writes()
    );

    // The trie: every mutation yields a new version, old ones stay valid
    let t1 = Trie::new().put("hello", 1u32);
    let t2 = t1.put("world", 2u32);
    let t3 = t2.remove("hello");

    println!("trie v1: hello={:?}", t1.get::<u32>("hello"));
    println!(
        "trie v2: hello={:?} world={:?}",
        t2.get::<u32>("hello"),
        t2.get::<u32>("world")
    );
    println!(
        "trie v3: hello={:?} world={:?}",
        t3.get::<u32>("hello"),
        t3.get::<u32>("world")
    );

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
