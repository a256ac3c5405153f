use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchContext, LatchMode};
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use crate::index::btree::serialization::{deserialize_node, serialize_node};

use super::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a key-record pair.
    ///
    /// Returns `Ok(false)` without mutating anything when the key already
    /// exists. The optimistic descent handles the common in-place case; a
    /// full leaf restarts the operation with write latches down the path.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        self.insert_with_mode(key, rid, LatchMode::Optimistic)
    }

    fn insert_with_mode(&self, key: K, rid: Rid, mode: LatchMode) -> Result<bool, BTreeError> {
        let mut ctx = LatchContext::new(&self.buffer_pool);
        self.latch_root(&mut ctx, mode);

        if ctx.root_id() == INVALID_PAGE_ID {
            // Starting a new tree changes the root id, which needs the
            // root-id write latch
            if mode == LatchMode::Optimistic {
                ctx.release_all(0)?;
                return self.insert_with_mode(key, rid, LatchMode::Insert);
            }
            self.start_new_tree(&mut ctx, key, rid)?;
            ctx.release_all(0)?;
            return Ok(true);
        }

        let mut leaf = self.crab_to_leaf(&mut ctx, Some(&key), mode)?;
        if leaf.get(&key).is_some() {
            ctx.release_all(0)?;
            return Ok(false);
        }

        // The optimistic fast path only covers an in-place leaf insert
        if mode == LatchMode::Optimistic && leaf.size() >= self.leaf_max_size - 1 {
            ctx.release_all(0)?;
            return self.insert_with_mode(key, rid, LatchMode::Insert);
        }

        let leaf_depth = ctx.path.len() - 1;
        let mut dirty_height = 1;

        if leaf.size() < self.leaf_max_size - 1 {
            leaf.insert(key, rid);
            serialize_node(&BTreeNode::Leaf(leaf), ctx.write_guard(leaf_depth))?;
        } else {
            // Claim the sibling page before touching the leaf, so a page
            // shortage surfaces while the tree is still untouched
            let (sibling_page, sibling_id) = self.create_page()?;
            leaf.insert(key, rid);
            let sibling = leaf.split(sibling_id);
            let promoted = sibling.keys[0].clone();

            serialize_node(&BTreeNode::Leaf(leaf), ctx.write_guard(leaf_depth))?;
            serialize_node(&BTreeNode::Leaf(sibling), &mut sibling_page.write())?;

            self.insert_in_parent(&mut ctx, leaf_depth, promoted, sibling_id, &mut dirty_height)?;
            self.buffer_pool.unpin_page(sibling_id, true)?;
        }

        ctx.release_all(dirty_height)?;
        Ok(true)
    }

    /// First insert into an empty tree: the new leaf is the root
    fn start_new_tree(
        &self,
        ctx: &mut LatchContext<'_>,
        key: K,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let (page, page_id) = self.create_page()?;
        let mut root = LeafNode::new(INVALID_PAGE_ID, self.leaf_max_size);
        root.insert(key, rid);
        serialize_node(&BTreeNode::Leaf(root), &mut page.write())?;
        self.buffer_pool.unpin_page(page_id, true)?;

        ctx.set_root_id(page_id);
        self.update_root_record(page_id)
    }

    /// Publish a split: hook `right_id` (the new right sibling of the node
    /// latched at `depth`) into the parent, splitting upwards as needed.
    ///
    /// When the split node is the deepest latched ancestor it must be the
    /// root — anything else would have been released as safe — and the tree
    /// grows a new root.
    fn insert_in_parent(
        &self,
        ctx: &mut LatchContext<'_>,
        depth: usize,
        key: K,
        right_id: PageId,
        dirty_height: &mut usize,
    ) -> Result<(), BTreeError> {
        *dirty_height += 1;

        if depth == 0 {
            debug_assert!(ctx.holds_root_latch(), "root split without the root-id latch");
            let left_id = ctx.path[0].page_id();

            let (root_page, root_id) = self.create_page()?;
            let mut new_root = InternalNode::new(INVALID_PAGE_ID, self.internal_max_size);
            new_root.keys.push(key);
            new_root.children.push(left_id);
            new_root.children.push(right_id);
            serialize_node(&BTreeNode::Internal(new_root), &mut root_page.write())?;
            self.buffer_pool.unpin_page(root_id, true)?;

            self.set_parent_pointer(ctx, left_id, root_id)?;
            self.set_parent_pointer(ctx, right_id, root_id)?;

            ctx.set_root_id(root_id);
            self.update_root_record(root_id)?;
            return Ok(());
        }

        let parent_depth = depth - 1;
        let mut parent = match deserialize_node::<K>(ctx.write_guard(parent_depth))? {
            BTreeNode::Internal(node) => node,
            BTreeNode::Leaf(_) => unreachable!("leaf page latched as an ancestor"),
        };

        if parent.size() < self.internal_max_size {
            parent.insert(key, right_id);
            serialize_node(&BTreeNode::Internal(parent), ctx.write_guard(parent_depth))?;
            return Ok(());
        }

        // Parent overflow: temp-insert into the full node and split it,
        // promoting the middle key another level up
        let (sibling_page, sibling_id) = self.create_page()?;
        let (promoted, sibling) = parent.insert_and_split(key, right_id);
        let moved_children = sibling.children.clone();

        serialize_node(&BTreeNode::Internal(parent), ctx.write_guard(parent_depth))?;
        serialize_node(&BTreeNode::Internal(sibling), &mut sibling_page.write())?;

        for child in moved_children {
            self.set_parent_pointer(ctx, child, sibling_id)?;
        }

        self.insert_in_parent(ctx, parent_depth, promoted, sibling_id, dirty_height)?;
        self.buffer_pool.unpin_page(sibling_id, true)?;
        Ok(())
    }
}
