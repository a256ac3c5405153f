mod basic_operations;
mod frame_management;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Buffer pool frame: one slot that can hold a page, plus its bookkeeping.
///
/// The page pointer is shared with callers; pin count and dirty flag stay
/// under the pool latch. `page_id` duplicates the resident page's id so the
/// pool never has to take a page latch just to identify a frame.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    free_list: VecDeque<FrameId>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
}

/// Fixed-capacity cache of disk pages.
///
/// Every successful `new_page`/`fetch_page` pins the page and must be paired
/// with an `unpin_page` once the caller is done; only unpinned frames are
/// offered to the replacer.
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Arc<DiskManager>,
    latch: Mutex<PoolInner>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(i as FrameId);
        }

        Ok(Self {
            pool_size,
            disk_manager,
            latch: Mutex::new(PoolInner {
                frames,
                free_list,
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                replacer: LruKReplacer::new(pool_size, replacer_k),
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}
