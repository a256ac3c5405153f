use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Sentinel for "no page"; valid page IDs start at 1
pub const INVALID_PAGE_ID: PageId = 0;

/// The first allocated page holds the named root-id records
pub const HEADER_PAGE_ID: PageId = 1;

/// Page ID type
pub type PageId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Record ID type
pub type Rid = u32;

/// Table OID type
pub type TableOid = u32;

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the page contents and reset the id
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a page. The `RwLock` is the page latch.
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read guard on a page latch; can outlive the borrow of the `PagePtr`
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write guard on a page latch
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
