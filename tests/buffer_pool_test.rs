use anyhow::Result;

mod common;
use common::{
    create_test_buffer_pool, create_test_buffer_pool_with_k, generate_test_data,
    init_test_logging,
};

use stratadb::common::types::PAGE_SIZE;
use stratadb::storage::buffer::BufferPoolError;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    // Page IDs start above the invalid sentinel
    assert!(page_id > 0);
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    let test_data = generate_test_data(64);
    {
        let mut page_guard = page.write();
        page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    // Fill the pool with other pages so the modified one is evicted
    for _ in 0..3 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false)?;
    }

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..100 + test_data.len()], &test_data[..]);
    }
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_eviction_writes_back_dirty_page() -> Result<()> {
    // Pool of 3, K = 2; a dirty unpinned page must hit the disk before its
    // frame is reused
    init_test_logging();
    let (buffer_pool, temp_file) = create_test_buffer_pool_with_k(3, 2)?;

    let (page_a, page_a_id) = buffer_pool.new_page()?;
    {
        let mut guard = page_a.write();
        guard.data[0..4].copy_from_slice(b"AAAA");
    }
    let (_, page_b_id) = buffer_pool.new_page()?;
    let (_, page_c_id) = buffer_pool.new_page()?;

    buffer_pool.unpin_page(page_a_id, true)?;

    // Pool is full of pinned B and C plus evictable dirty A; the next
    // new_page must evict A and write it out first
    let (_, page_d_id) = buffer_pool.new_page()?;
    assert!(page_d_id > page_c_id);

    let raw = std::fs::read(temp_file.path())?;
    let offset = (page_a_id as usize - 1) * PAGE_SIZE;
    assert_eq!(&raw[offset..offset + 4], b"AAAA");

    buffer_pool.unpin_page(page_b_id, false)?;
    buffer_pool.unpin_page(page_c_id, false)?;
    buffer_pool.unpin_page(page_d_id, false)?;
    Ok(())
}

#[test]
fn test_pool_exhaustion_and_recovery() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut pages = Vec::new();
    for _ in 0..3 {
        pages.push(buffer_pool.new_page()?);
    }

    // All frames pinned: no new page, no fetch
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // Unpinning one page frees a frame
    let victim_id = pages[0].1;
    buffer_pool.unpin_page(victim_id, false)?;
    let (_, new_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_id, false)?;

    for (_, id) in &pages[1..] {
        buffer_pool.unpin_page(*id, false)?;
    }
    Ok(())
}

#[test]
fn test_unpin_errors() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    // Unpinning a page that is not resident fails
    assert!(matches!(
        buffer_pool.unpin_page(42, false),
        Err(BufferPoolError::PageNotFound(42))
    ));

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    // A second unpin drops the count below zero and must fail
    assert!(matches!(
        buffer_pool.unpin_page(page_id, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));
    Ok(())
}

#[test]
fn test_pin_count_blocks_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (_, pinned_id) = buffer_pool.new_page()?;

    // Fill and cycle the remaining frames; the pinned page must survive
    for _ in 0..6 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false)?;
    }

    let fetched = buffer_pool.fetch_page(pinned_id)?;
    assert_eq!(fetched.read().page_id, pinned_id);

    buffer_pool.unpin_page(pinned_id, false)?;
    buffer_pool.unpin_page(pinned_id, false)?;
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(4)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[10..14].copy_from_slice(b"DATA");
    }
    buffer_pool.flush_page(page_id)?;

    let raw = std::fs::read(temp_file.path())?;
    let offset = (page_id as usize - 1) * PAGE_SIZE;
    assert_eq!(&raw[offset + 10..offset + 14], b"DATA");

    assert!(matches!(
        buffer_pool.flush_page(999),
        Err(BufferPoolError::PageNotFound(999))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_flush_all_pages_uses_stored_ids() -> Result<()> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(4)?;

    let mut expected = Vec::new();
    for marker in [b'x', b'y', b'z'] {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            guard.data[0] = marker;
        }
        buffer_pool.unpin_page(page_id, true)?;
        expected.push((page_id, marker));
    }

    buffer_pool.flush_all_pages()?;

    // Every page lands at the offset of its own id, regardless of which
    // frame held it
    let raw = std::fs::read(temp_file.path())?;
    for (page_id, marker) in expected {
        let offset = (page_id as usize - 1) * PAGE_SIZE;
        assert_eq!(raw[offset], marker, "page {}", page_id);
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Pinned pages cannot be deleted
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;

    // Deleting a page that is not resident is a quiet no-op
    buffer_pool.delete_page(page_id)?;

    // The freed frame is reusable
    let (_, new_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_id, false)?;
    Ok(())
}

#[test]
fn test_concurrent_pin_unpin() -> Result<()> {
    use std::thread;

    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = buffer_pool.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let page = pool.fetch_page(page_id).unwrap();
                {
                    let guard = page.read();
                    assert_eq!(guard.page_id, page_id);
                }
                pool.unpin_page(page_id, false).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Pin count is balanced again: the page can be deleted
    buffer_pool.delete_page(page_id)?;
    Ok(())
}
