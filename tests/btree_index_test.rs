use std::sync::Arc;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

mod common;
use common::create_test_buffer_pool;

use stratadb::index::btree::BTreeIndex;

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<i32> = BTreeIndex::new("test_idx", buffer_pool, 64, 64)?;

    assert!(index.is_empty());
    assert_eq!(index.get(&1)?, None);

    assert!(index.insert(1, 100)?);
    assert!(index.insert(2, 200)?);
    assert!(index.insert(3, 300)?);
    assert!(!index.is_empty());

    assert_eq!(index.get(&1)?, Some(100));
    assert_eq!(index.get(&2)?, Some(200));
    assert_eq!(index.get(&3)?, Some(300));
    assert_eq!(index.get(&4)?, None);
    Ok(())
}

#[test]
fn test_duplicate_insert_rejected() -> Result<()> {
    // Duplicates return false and leave the original mapping intact
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<i32> = BTreeIndex::new("dup_idx", buffer_pool, 4, 4)?;

    assert!(index.insert(10, 1)?);
    assert!(index.insert(20, 2)?);
    assert!(index.insert(30, 3)?);

    assert!(!index.insert(20, 999)?);
    assert_eq!(index.get(&20)?, Some(2));
    Ok(())
}

#[test]
fn test_split_cascade_and_iteration() -> Result<()> {
    // With leaf_max = 3 and internal_max = 3, inserting 1..=7 in order grows
    // the tree to height 3 and iteration yields everything in order
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<i32> = BTreeIndex::new("cascade_idx", buffer_pool, 3, 3)?;

    let mut root_history = vec![index.root_page_id()];
    for key in 1..=7 {
        assert!(index.insert(key, (key * 10) as u32)?);
        if index.root_page_id() != *root_history.last().unwrap() {
            root_history.push(index.root_page_id());
        }
        // The tree stays well formed after every insert
        for probe in 1..=key {
            assert_eq!(index.get(&probe)?, Some((probe * 10) as u32), "probe {}", probe);
        }
    }
    // Empty -> leaf root, then two root splits: height reaches 3 at key 7
    assert_eq!(root_history.len(), 4);

    let entries: Vec<(i32, u32)> = index.iter()?.collect::<Result<_, _>>()?;
    assert_eq!(
        entries,
        vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50), (6, 60), (7, 70)]
    );
    Ok(())
}

#[test]
fn test_shuffled_inserts_and_lookups() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let index: BTreeIndex<i64> = BTreeIndex::new("shuffle_idx", buffer_pool, 8, 8)?;

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = (0..500).collect();
    keys.shuffle(&mut rng);

    for &key in &keys {
        assert!(index.insert(key, key as u32 + 1)?);
    }
    for key in 0..500 {
        assert_eq!(index.get(&key)?, Some(key as u32 + 1));
    }

    // Iteration is sorted regardless of insertion order
    let collected: Vec<i64> = index
        .iter()?
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<Result<_, _>>()?;
    let expected: Vec<i64> = (0..500).collect();
    assert_eq!(collected, expected);
    Ok(())
}

#[test]
fn test_remove_and_reinsert() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<i32> = BTreeIndex::new("remove_idx", buffer_pool, 4, 4)?;

    for key in 0..40 {
        index.insert(key, key as u32)?;
    }

    // Remove the even keys
    for key in (0..40).step_by(2) {
        assert!(index.remove(&key)?, "key {}", key);
    }
    assert!(!index.remove(&2)?);

    for key in 0..40 {
        let expected = if key % 2 == 0 { None } else { Some(key as u32) };
        assert_eq!(index.get(&key)?, expected, "key {}", key);
    }

    // Reinsert into the merged tree
    for key in (0..40).step_by(2) {
        assert!(index.insert(key, (key * 7) as u32)?);
    }
    for key in (0..40).step_by(2) {
        assert_eq!(index.get(&key)?, Some((key * 7) as u32));
    }
    Ok(())
}

#[test]
fn test_drain_to_empty_and_reuse() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<i32> = BTreeIndex::new("drain_idx", buffer_pool, 3, 3)?;

    for key in 0..30 {
        index.insert(key, key as u32)?;
    }
    for key in 0..30 {
        assert!(index.remove(&key)?, "key {}", key);
    }

    assert!(index.is_empty());
    assert_eq!(index.iter()?.count(), 0);

    // An emptied tree accepts inserts again
    index.insert(5, 50)?;
    assert_eq!(index.get(&5)?, Some(50));
    assert!(!index.is_empty());
    Ok(())
}

#[test]
fn test_iter_from_and_range_scan() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<i32> = BTreeIndex::new("range_idx", buffer_pool, 4, 4)?;

    for key in (0..100).step_by(10) {
        index.insert(key, key as u32)?;
    }

    // Bound between keys: iteration starts at the next larger key
    let from_35: Vec<i32> = index
        .iter_from(&35)?
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<Result<_, _>>()?;
    assert_eq!(from_35, vec![40, 50, 60, 70, 80, 90]);

    // Bound on an existing key is inclusive
    let from_50: Vec<i32> = index
        .iter_from(&50)?
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<Result<_, _>>()?;
    assert_eq!(from_50, vec![50, 60, 70, 80, 90]);

    // Bound past the last key yields nothing
    assert_eq!(index.iter_from(&95)?.count(), 0);

    assert_eq!(index.range_scan(&20, &60)?, vec![20, 30, 40, 50, 60]);
    assert_eq!(index.range_scan(&60, &20)?, Vec::<u32>::new());
    Ok(())
}

#[test]
fn test_string_keys() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index: BTreeIndex<String> = BTreeIndex::new("str_idx", buffer_pool, 4, 4)?;

    let words = ["pear", "apple", "quince", "banana", "fig", "cherry", "date"];
    for (i, word) in words.iter().enumerate() {
        index.insert(word.to_string(), i as u32)?;
    }

    assert_eq!(index.get(&"fig".to_string())?, Some(4));
    let keys: Vec<String> = index
        .iter()?
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        keys,
        vec!["apple", "banana", "cherry", "date", "fig", "pear", "quince"]
    );
    Ok(())
}

#[test]
fn test_root_persisted_across_reopen() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;

    let root_before = {
        let index: BTreeIndex<i32> = BTreeIndex::new("persist_idx", buffer_pool.clone(), 4, 4)?;
        for key in 0..50 {
            index.insert(key, key as u32)?;
        }
        index.root_page_id()
    };

    // A second handle over the same pool adopts the recorded root
    let reopened: BTreeIndex<i32> = BTreeIndex::new("persist_idx", buffer_pool, 4, 4)?;
    assert_eq!(reopened.root_page_id(), root_before);
    for key in 0..50 {
        assert_eq!(reopened.get(&key)?, Some(key as u32));
    }
    Ok(())
}

#[test]
fn test_two_indexes_share_header_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;

    let first: BTreeIndex<i32> = BTreeIndex::new("first_idx", buffer_pool.clone(), 4, 4)?;
    let second: BTreeIndex<i32> = BTreeIndex::new("second_idx", buffer_pool, 4, 4)?;

    first.insert(1, 10)?;
    second.insert(1, 99)?;

    assert_eq!(first.get(&1)?, Some(10));
    assert_eq!(second.get(&1)?, Some(99));
    assert_ne!(first.root_page_id(), second.root_page_id());
    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    use std::thread;

    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let index: Arc<BTreeIndex<i64>> =
        Arc::new(BTreeIndex::new("concurrent_idx", buffer_pool, 16, 16)?);

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            for i in 0..200i64 {
                let key = worker * 1000 + i;
                index.insert(key, key as u32).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..4i64 {
        for i in 0..200i64 {
            let key = worker * 1000 + i;
            assert_eq!(index.get(&key)?, Some(key as u32), "key {}", key);
        }
    }
    Ok(())
}

#[test]
fn test_concurrent_readers_during_inserts() -> Result<()> {
    use std::thread;

    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let index: Arc<BTreeIndex<i64>> =
        Arc::new(BTreeIndex::new("mixed_idx", buffer_pool, 8, 8)?);

    for key in 0..500i64 {
        index.insert(key, key as u32)?;
    }

    let writer = {
        let index = index.clone();
        thread::spawn(move || {
            for key in 500..1000i64 {
                index.insert(key, key as u32).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let index = index.clone();
            thread::spawn(move || {
                for key in 0..500i64 {
                    assert_eq!(index.get(&key).unwrap(), Some(key as u32));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for key in 0..1000i64 {
        assert_eq!(index.get(&key)?, Some(key as u32));
    }
    Ok(())
}
