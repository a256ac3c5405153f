use std::sync::Arc;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{PageId, PageReadGuard, PageWriteGuard};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

/// Descent mode: read-only lookup, the optimistic write fast path
/// (read-latch ancestors, write-latch only the leaf), or a full pessimistic
/// insert/delete descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LatchMode {
    Read,
    Optimistic,
    Insert,
    Delete,
}

impl LatchMode {
    pub(crate) fn is_pessimistic(self) -> bool {
        matches!(self, LatchMode::Insert | LatchMode::Delete)
    }
}

/// Guard on the root-id latch; the uniform-release sentinel of the
/// acquired-latch set
pub(crate) enum RootLatch<'a> {
    Read(RwLockReadGuard<'a, PageId>),
    Write(RwLockWriteGuard<'a, PageId>),
}

/// An owned latch on one page of the descent path
pub(crate) enum PageLatch {
    Read(PageReadGuard),
    Write(PageWriteGuard),
}

impl PageLatch {
    pub(crate) fn page_id(&self) -> PageId {
        match self {
            PageLatch::Read(guard) => guard.page_id,
            PageLatch::Write(guard) => guard.page_id,
        }
    }
}

/// Latch crabbing bookkeeping for one tree operation: the root-id latch,
/// the ordered path of page latches (root side first), and pages emptied by
/// merges, which are freed only after every latch is dropped.
pub(crate) struct LatchContext<'a> {
    buffer_pool: &'a Arc<BufferPoolManager>,
    pub(crate) root: Option<RootLatch<'a>>,
    pub(crate) path: Vec<PageLatch>,
    deleted: Vec<PageId>,
}

impl<'a> LatchContext<'a> {
    pub(crate) fn new(buffer_pool: &'a Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            root: None,
            path: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Current root page id, read through the held root latch
    pub(crate) fn root_id(&self) -> PageId {
        match self.root.as_ref().expect("root latch not held") {
            RootLatch::Read(guard) => **guard,
            RootLatch::Write(guard) => **guard,
        }
    }

    /// Publish a new root id. Requires the root write latch.
    pub(crate) fn set_root_id(&mut self, page_id: PageId) {
        match self.root.as_mut().expect("root latch not held") {
            RootLatch::Write(guard) => **guard = page_id,
            RootLatch::Read(_) => unreachable!("root update under a read latch"),
        }
    }

    pub(crate) fn holds_root_latch(&self) -> bool {
        self.root.is_some()
    }

    pub(crate) fn push(&mut self, latch: PageLatch) {
        self.path.push(latch);
    }

    /// Mutable access to the write guard at a path position. The descent
    /// mode guarantees the variant; a read guard here is a protocol bug.
    pub(crate) fn write_guard(&mut self, depth: usize) -> &mut PageWriteGuard {
        match &mut self.path[depth] {
            PageLatch::Write(guard) => guard,
            PageLatch::Read(_) => unreachable!("write access through a read latch"),
        }
    }

    /// The write guard for a page id somewhere on the latched path, if any.
    /// Structural updates use this to reach pages this operation already
    /// holds instead of re-latching them.
    pub(crate) fn find_write_latched(&mut self, page_id: PageId) -> Option<&mut PageWriteGuard> {
        self.path.iter_mut().find_map(|latch| match latch {
            PageLatch::Write(guard) if guard.page_id == page_id => Some(guard),
            _ => None,
        })
    }

    /// Defer freeing a page until all latches are gone
    pub(crate) fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Release every held latch from the root side down and unpin the pages.
    ///
    /// The `dirty_height` deepest pages of the path are unpinned dirty; the
    /// ancestors above them were never modified. Deferred page deletions run
    /// last, once nothing is latched or pinned by this operation.
    pub(crate) fn release_all(&mut self, dirty_height: usize) -> Result<(), BufferPoolError> {
        self.root = None;

        let held = self.path.len();
        for (index, latch) in self.path.drain(..).enumerate() {
            let remaining = held - index;
            let page_id = latch.page_id();
            drop(latch);
            self.buffer_pool.unpin_page(page_id, remaining <= dirty_height)?;
        }

        for page_id in self.deleted.drain(..) {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }
}

impl Drop for LatchContext<'_> {
    fn drop(&mut self) {
        // Normal paths release explicitly; this is the error-path fallback
        // so pins are not leaked. Latches drop with the guards.
        if !self.path.is_empty() || !self.deleted.is_empty() {
            let _ = self.release_all(0);
        }
    }
}
