mod deletion;
mod operations;
mod range_scan;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PagePtr, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchContext, LatchMode, PageLatch, RootLatch};
use crate::index::btree::node::{BTreeNode, LeafNode, LEAF_PAGE_TAG};
use crate::index::btree::serialization::{calculate_btree_order, deserialize_node, serialize_node};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;

pub use range_scan::TreeIterator;

/// Concurrent disk-resident B+Tree over the buffer pool.
///
/// Unique keys map to record IDs. Readers crab down with shared latches;
/// writers first try the optimistic descent (write-latching only the leaf)
/// and fall back to a pessimistic full-path descent when a structural
/// change may propagate.
pub struct BTreeIndex<K> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    /// The root page id, guarded by the dedicated root-id latch
    root_page_id: RwLock<PageId>,
    /// Whether this index already has a record on the header page
    header_record_created: AtomicBool,
    leaf_max_size: usize,
    internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) the index named `name` with explicit fan-out limits.
    ///
    /// A fresh database file gets its header page here; an index that was
    /// already recorded on the header page adopts its persisted root.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf nodes need room for two entries");
        assert!(internal_max_size >= 3, "internal nodes need room for three children");
        let index_name = name.into();

        let allocated_pages = buffer_pool
            .disk_manager()
            .num_pages()
            .map_err(crate::storage::buffer::BufferPoolError::from)?;
        if allocated_pages == 0 {
            let (page, page_id) = buffer_pool.new_page()?;
            debug_assert_eq!(page_id, HEADER_PAGE_ID);
            HeaderPage::init(&mut page.write());
            buffer_pool.unpin_page(page_id, true)?;
        }

        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let recorded_root = HeaderPage::get_record(&header.read(), &index_name);
        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(recorded_root.unwrap_or(INVALID_PAGE_ID)),
            header_record_created: AtomicBool::new(recorded_root.is_some()),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    /// Open the index with a fan-out derived from the key size
    pub fn with_default_order(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let order = calculate_btree_order::<K>();
        Self::new(name, buffer_pool, order, order)
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Look up the record ID stored for a key
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let mut ctx = LatchContext::new(&self.buffer_pool);
        self.latch_root(&mut ctx, LatchMode::Read);
        if ctx.root_id() == INVALID_PAGE_ID {
            ctx.release_all(0)?;
            return Ok(None);
        }

        let leaf = self.crab_to_leaf(&mut ctx, Some(key), LatchMode::Read)?;
        let result = leaf.get(key);
        ctx.release_all(0)?;
        Ok(result)
    }

    /// Take the root-id latch in the mode's flavor; every tree operation
    /// starts here
    fn latch_root<'a>(&'a self, ctx: &mut LatchContext<'a>, mode: LatchMode) {
        let latch = if mode.is_pessimistic() {
            RootLatch::Write(self.root_page_id.write())
        } else {
            RootLatch::Read(self.root_page_id.read())
        };
        ctx.root = Some(latch);
    }

    /// Crab from the root to the leaf responsible for `key` (the leftmost
    /// leaf when `key` is `None`), leaving the latched path in the context.
    /// Ancestors above a safe node are released as the descent passes it.
    fn crab_to_leaf(
        &self,
        ctx: &mut LatchContext<'_>,
        key: Option<&K>,
        mode: LatchMode,
    ) -> Result<LeafNode<K>, BTreeError> {
        let mut current_id = ctx.root_id();

        loop {
            let page = self.buffer_pool.fetch_page(current_id)?;
            let latch = Self::latch_page(&page, mode);
            let node = match &latch {
                PageLatch::Read(guard) => deserialize_node::<K>(guard),
                PageLatch::Write(guard) => deserialize_node::<K>(guard),
            };
            let node = match node {
                Ok(node) => node,
                Err(e) => {
                    drop(latch);
                    self.buffer_pool.unpin_page(current_id, false)?;
                    return Err(e);
                }
            };

            // A safe node cannot be affected by changes below it, so the
            // latches above are no longer needed
            if node.is_safe(mode) {
                ctx.release_all(0)?;
            }
            ctx.push(latch);

            match node {
                BTreeNode::Leaf(leaf) => return Ok(leaf),
                BTreeNode::Internal(internal) => {
                    current_id = match key {
                        Some(key) => internal.child_at(internal.child_index(key)),
                        None => internal.child_at(0),
                    };
                }
            }
        }
    }

    /// Latch one page according to the descent mode. The optimistic mode
    /// write-latches leaves and read-latches everything else; the page type
    /// byte is stable for a page's lifetime, so peeking it unlatched is
    /// sound.
    fn latch_page(page: &PagePtr, mode: LatchMode) -> PageLatch {
        match mode {
            LatchMode::Read => PageLatch::Read(page.read_arc()),
            LatchMode::Insert | LatchMode::Delete => PageLatch::Write(page.write_arc()),
            LatchMode::Optimistic => {
                let is_leaf = page.read().data[0] == LEAF_PAGE_TAG;
                if is_leaf {
                    PageLatch::Write(page.write_arc())
                } else {
                    PageLatch::Read(page.read_arc())
                }
            }
        }
    }

    /// Allocate and pin a fresh tree page
    fn create_page(&self) -> Result<(PagePtr, PageId), BTreeError> {
        Ok(self.buffer_pool.new_page()?)
    }

    /// Record the new root id on the header page: an insert the first time,
    /// an update afterwards. Callers hold the root-id write latch, which
    /// serializes header-record access for this index.
    fn update_root_record(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        debug!("index {} root is now page {}", self.index_name, root_page_id);
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = header.write();
            if self.header_record_created.load(Ordering::Acquire) {
                HeaderPage::update_record(&mut guard, &self.index_name, root_page_id)?;
            } else {
                HeaderPage::insert_record(&mut guard, &self.index_name, root_page_id)?;
                self.header_record_created.store(true, Ordering::Release);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    /// Re-point a child page at a new parent. Pages this operation already
    /// write-latched are updated through their held guard; everything else
    /// is reachable only through latches this operation holds, so a short
    /// private latch is safe.
    fn set_parent_pointer(
        &self,
        ctx: &mut LatchContext<'_>,
        page_id: PageId,
        parent_id: PageId,
    ) -> Result<(), BTreeError> {
        if let Some(guard) = ctx.find_write_latched(page_id) {
            let mut node: BTreeNode<K> = deserialize_node(guard)?;
            node.set_parent(parent_id);
            serialize_node(&node, guard)?;
            return Ok(());
        }

        let page = self.buffer_pool.fetch_page(page_id)?;
        let outcome = {
            let mut guard = page.write();
            match deserialize_node::<K>(&guard) {
                Ok(mut node) => {
                    node.set_parent(parent_id);
                    serialize_node(&node, &mut guard)
                }
                Err(e) => Err(e),
            }
        };
        self.buffer_pool.unpin_page(page_id, true)?;
        outcome
    }
}
