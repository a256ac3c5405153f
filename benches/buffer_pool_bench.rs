use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use stratadb::storage::buffer::BufferPoolManager;

fn create_buffer_pool(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(pool_size, 2, file.path()).unwrap());
    (pool, file)
}

fn bench_page_creation(c: &mut Criterion) {
    c.bench_function("new_page_unpin", |b| {
        let (pool, _file) = create_buffer_pool(64);
        b.iter(|| {
            let (_, page_id) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false).unwrap();
            black_box(page_id);
        });
    });
}

fn bench_fetch_resident(c: &mut Criterion) {
    c.bench_function("fetch_resident_page", |b| {
        let (pool, _file) = create_buffer_pool(64);
        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false).unwrap();

        b.iter(|| {
            let page = pool.fetch_page(page_id).unwrap();
            black_box(page.read().page_id);
            pool.unpin_page(page_id, false).unwrap();
        });
    });
}

fn bench_fetch_with_eviction(c: &mut Criterion) {
    c.bench_function("fetch_cycling_small_pool", |b| {
        let (pool, _file) = create_buffer_pool(8);
        let mut page_ids = Vec::new();
        for _ in 0..64 {
            let (_, page_id) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false).unwrap();
            page_ids.push(page_id);
        }

        let mut cursor = 0usize;
        b.iter(|| {
            let page_id = page_ids[cursor % page_ids.len()];
            cursor = cursor.wrapping_add(17);
            let page = pool.fetch_page(page_id).unwrap();
            black_box(page.read().page_id);
            pool.unpin_page(page_id, false).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_page_creation,
    bench_fetch_resident,
    bench_fetch_with_eviction
);
criterion_main!(benches);
