use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use parking_lot::Mutex;

/// A bucket holds up to `capacity` entries and carries its local depth
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, capacity: usize) -> Self {
        Self {
            local_depth,
            items: Vec::with_capacity(capacity),
        }
    }
}

struct TableInner<K, V> {
    global_depth: u32,
    bucket_capacity: usize,
    // Directory slots point into the bucket slab; several slots may share a
    // bucket while its local depth is below the global depth
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Extendible hash table used as the buffer pool's page directory.
///
/// Inserting into a full bucket doubles the directory when the bucket's
/// local depth has caught up with the global depth, then splits the bucket
/// on the next local-depth bit and rewires the directory slots that pointed
/// at it. Splits repeat until the insert fits.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<TableInner<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_capacity: usize) -> Self {
        assert!(bucket_capacity >= 1, "bucket capacity must be at least 1");
        Self {
            inner: Mutex::new(TableInner {
                global_depth: 0,
                bucket_capacity,
                directory: vec![0],
                buckets: vec![Bucket::new(0, bucket_capacity)],
            }),
        }
    }

    fn hash(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_of(global_depth: u32, key: &K) -> usize {
        (Self::hash(key) & ((1u64 << global_depth) - 1)) as usize
    }

    /// Look up the value stored for a key
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = Self::index_of(inner.global_depth, key);
        let bucket = &inner.buckets[inner.directory[slot]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert a key-value pair; an existing key is updated in place
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let slot = Self::index_of(inner.global_depth, &key);
            let bucket_idx = inner.directory[slot];
            let capacity = inner.bucket_capacity;
            {
                let bucket = &mut inner.buckets[bucket_idx];
                if let Some(item) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                    item.1 = value;
                    return;
                }
                if bucket.items.len() < capacity {
                    bucket.items.push((key, value));
                    return;
                }
            }

            // Full bucket: grow the directory if needed, split, retry
            if inner.buckets[bucket_idx].local_depth == inner.global_depth {
                Self::double_directory(&mut inner);
            }
            Self::split_bucket(&mut inner, bucket_idx);
        }
    }

    /// Remove a key; returns whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let slot = Self::index_of(inner.global_depth, key);
        let bucket_idx = inner.directory[slot];
        let bucket = &mut inner.buckets[bucket_idx];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    fn double_directory(inner: &mut TableInner<K, V>) {
        // Each existing slot is duplicated; the new upper half mirrors the
        // lower half until some bucket splits
        let current = inner.directory.clone();
        inner.directory.extend(current);
        inner.global_depth += 1;
    }

    fn split_bucket(inner: &mut TableInner<K, V>, bucket_idx: usize) {
        let local_depth = inner.buckets[bucket_idx].local_depth;
        debug_assert!(local_depth < inner.global_depth);

        let mask = 1u64 << local_depth;
        let new_depth = local_depth + 1;
        let capacity = inner.bucket_capacity;

        // Rehash on the next bit: clear bit stays, set bit moves
        let old_items = std::mem::take(&mut inner.buckets[bucket_idx].items);
        let mut sibling = Bucket::new(new_depth, capacity);
        inner.buckets[bucket_idx].local_depth = new_depth;
        for (k, v) in old_items {
            if Self::hash(&k) & mask != 0 {
                sibling.items.push((k, v));
            } else {
                inner.buckets[bucket_idx].items.push((k, v));
            }
        }
        inner.buckets.push(sibling);
        let sibling_idx = inner.buckets.len() - 1;

        // Rewire the directory slots that pointed at the split bucket
        for slot in 0..inner.directory.len() {
            if inner.directory[slot] == bucket_idx && (slot as u64) & mask != 0 {
                inner.directory[slot] = sibling_idx;
            }
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Local depth of the bucket a key currently maps to
    pub fn local_depth_of(&self, key: &K) -> u32 {
        let inner = self.inner.lock();
        let slot = Self::index_of(inner.global_depth, key);
        inner.buckets[inner.directory[slot]].local_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);
        for i in 0..64u32 {
            table.insert(i, i * 10);
        }
        for i in 0..64u32 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert_eq!(table.find(&64), None);

        assert!(table.remove(&13));
        assert!(!table.remove(&13));
        assert_eq!(table.find(&13), None);
        assert_eq!(table.find(&14), Some(140));
    }

    #[test]
    fn test_update_in_place() {
        let table: ExtendibleHashTable<u32, &str> = ExtendibleHashTable::new(2);
        table.insert(1, "a");
        table.insert(1, "b");
        assert_eq!(table.find(&1), Some("b"));
    }

    #[test]
    fn test_directory_growth() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(1);
        assert_eq!(table.global_depth(), 0);
        assert_eq!(table.num_buckets(), 1);

        for i in 0..32u32 {
            table.insert(i, i);
        }
        // With single-entry buckets the table is forced to split repeatedly
        assert!(table.global_depth() >= 5);
        assert!(table.num_buckets() >= 32);
        for i in 0..32u32 {
            assert_eq!(table.find(&i), Some(i));
        }
    }

    #[test]
    fn test_local_depth_bounded_by_global() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);
        for i in 0..128u32 {
            table.insert(i, i);
            assert!(table.local_depth_of(&i) <= table.global_depth());
        }
    }
}
