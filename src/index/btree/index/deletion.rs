use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchContext, LatchMode};
use crate::index::btree::node::{BTreeNode, InternalNode};
use crate::index::btree::serialization::{deserialize_node, serialize_node};

use super::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Remove a key. Returns whether it was present.
    ///
    /// The optimistic descent handles leaves that cannot underflow; any
    /// possible redistribution or merge restarts pessimistically.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        self.remove_with_mode(key, LatchMode::Optimistic)
    }

    fn remove_with_mode(&self, key: &K, mode: LatchMode) -> Result<bool, BTreeError> {
        let mut ctx = LatchContext::new(&self.buffer_pool);
        self.latch_root(&mut ctx, mode);

        if ctx.root_id() == INVALID_PAGE_ID {
            ctx.release_all(0)?;
            return Ok(false);
        }

        let leaf = self.crab_to_leaf(&mut ctx, Some(key), mode)?;

        if mode == LatchMode::Optimistic && leaf.size() <= leaf.min_size() {
            // Removing may underflow this leaf (or empty a leaf root);
            // restart with the full write path
            let structurally_safe = leaf.parent == INVALID_PAGE_ID && leaf.size() > 1;
            if !structurally_safe {
                ctx.release_all(0)?;
                return self.remove_with_mode(key, LatchMode::Delete);
            }
        }

        let leaf_depth = ctx.path.len() - 1;
        let mut dirty_height = 0;
        let removed = self.delete_entry(&mut ctx, leaf_depth, key, &mut dirty_height)?;
        ctx.release_all(dirty_height)?;
        Ok(removed)
    }

    /// Remove `key` from the node latched at `depth`, then restore the
    /// occupancy invariant, recursing into the parent when a merge removes
    /// a separator from it.
    fn delete_entry(
        &self,
        ctx: &mut LatchContext<'_>,
        depth: usize,
        key: &K,
        dirty_height: &mut usize,
    ) -> Result<bool, BTreeError> {
        let mut node: BTreeNode<K> = deserialize_node(ctx.write_guard(depth))?;
        let removed = match &mut node {
            BTreeNode::Leaf(leaf) => leaf.remove(key),
            BTreeNode::Internal(internal) => internal.remove_key(key),
        };
        if !removed {
            return Ok(false);
        }
        serialize_node(&node, ctx.write_guard(depth))?;
        *dirty_height += 1;

        if node.size() >= node.min_size() {
            return Ok(true);
        }

        if node.is_root() {
            debug_assert!(ctx.holds_root_latch(), "root change without the root-id latch");
            match &node {
                // A single-child internal root hands the tree to that child
                BTreeNode::Internal(internal) if internal.size() == 1 => {
                    let old_root = ctx.path[depth].page_id();
                    let new_root = internal.child_at(0);
                    self.set_parent_pointer(ctx, new_root, INVALID_PAGE_ID)?;
                    ctx.set_root_id(new_root);
                    self.update_root_record(new_root)?;
                    ctx.mark_deleted(old_root);
                }
                // An emptied leaf root empties the tree
                BTreeNode::Leaf(leaf) if leaf.size() == 0 => {
                    let old_root = ctx.path[depth].page_id();
                    ctx.set_root_id(INVALID_PAGE_ID);
                    self.update_root_record(INVALID_PAGE_ID)?;
                    ctx.mark_deleted(old_root);
                }
                _ => {}
            }
            return Ok(true);
        }

        if !self.try_redistribute(ctx, depth, key, dirty_height)? {
            self.try_merge(ctx, depth, key, dirty_height)?;
        }
        Ok(true)
    }

    /// Try to refill the underflowing node at `depth` by borrowing one
    /// entry: from the right sibling first, then from the left. Siblings
    /// are latched only while the parent's write latch is held, and one at
    /// a time.
    fn try_redistribute(
        &self,
        ctx: &mut LatchContext<'_>,
        depth: usize,
        key: &K,
        dirty_height: &mut usize,
    ) -> Result<bool, BTreeError> {
        let parent_depth = depth - 1;
        let mut parent = self.parent_node(ctx, parent_depth)?;
        let child_index = parent.child_index(key);
        debug_assert_eq!(
            parent.child_at(child_index),
            ctx.path[depth].page_id(),
            "descent position does not match the parent entry"
        );

        // Right sibling
        if child_index + 1 < parent.size() {
            if self.borrow_from_sibling(ctx, depth, &mut parent, child_index, false, dirty_height)? {
                return Ok(true);
            }
        }

        // Left sibling
        if child_index > 0 {
            if self.borrow_from_sibling(ctx, depth, &mut parent, child_index, true, dirty_height)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Borrow one entry from a sibling when it has entries to spare,
    /// rotating the separator through the parent. Returns whether the
    /// borrow happened.
    fn borrow_from_sibling(
        &self,
        ctx: &mut LatchContext<'_>,
        depth: usize,
        parent: &mut InternalNode<K>,
        child_index: usize,
        sibling_on_left: bool,
        dirty_height: &mut usize,
    ) -> Result<bool, BTreeError> {
        let parent_depth = depth - 1;
        let separator_index = if sibling_on_left { child_index - 1 } else { child_index };
        let sibling_id = if sibling_on_left {
            parent.child_at(child_index - 1)
        } else {
            parent.child_at(child_index + 1)
        };

        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        let mut sibling_guard = sibling_page.write_arc();
        let mut sibling: BTreeNode<K> = deserialize_node(&sibling_guard)?;

        if sibling.size() <= sibling.min_size() {
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, false)?;
            return Ok(false);
        }

        let mut node: BTreeNode<K> = deserialize_node(ctx.write_guard(depth))?;
        let mut moved_child = None;
        match (&mut node, &mut sibling) {
            (BTreeNode::Leaf(cur), BTreeNode::Leaf(other)) => {
                if sibling_on_left {
                    let (k, v) = other.pop_back();
                    cur.push_front(k, v);
                    parent.keys[separator_index] = cur.keys[0].clone();
                } else {
                    let (k, v) = other.pop_front();
                    cur.push_back(k, v);
                    parent.keys[separator_index] = other.keys[0].clone();
                }
            }
            (BTreeNode::Internal(cur), BTreeNode::Internal(other)) => {
                // The separator comes down into this node and the
                // sibling's boundary key replaces it in the parent
                let separator = parent.keys[separator_index].clone();
                let (new_separator, child) = if sibling_on_left {
                    let (k, child) = other.pop_back_entry();
                    cur.push_front_entry(separator, child);
                    (k, child)
                } else {
                    let (k, child) = other.pop_front_entry();
                    cur.push_back_entry(separator, child);
                    (k, child)
                };
                parent.keys[separator_index] = new_separator;
                moved_child = Some(child);
            }
            _ => unreachable!("sibling pages disagree on the node kind"),
        }

        serialize_node(&sibling, &mut sibling_guard)?;
        serialize_node(&node, ctx.write_guard(depth))?;
        serialize_node(&BTreeNode::Internal(parent.clone()), ctx.write_guard(parent_depth))?;
        drop(sibling_guard);
        self.buffer_pool.unpin_page(sibling_id, true)?;

        if let Some(child) = moved_child {
            let cur_id = ctx.path[depth].page_id();
            self.set_parent_pointer(ctx, child, cur_id)?;
        }

        *dirty_height += 1;
        Ok(true)
    }

    /// Merge the underflowing node at `depth` with a sibling — into itself
    /// when a right sibling exists, into the left sibling otherwise. The
    /// emptied page is freed after latch release, and the separator is
    /// removed from the parent recursively.
    fn try_merge(
        &self,
        ctx: &mut LatchContext<'_>,
        depth: usize,
        key: &K,
        dirty_height: &mut usize,
    ) -> Result<(), BTreeError> {
        let parent_depth = depth - 1;
        let parent = self.parent_node(ctx, parent_depth)?;
        let child_index = parent.child_index(key);

        if child_index + 1 < parent.size() {
            // Concatenate the right sibling into this node
            let sibling_id = parent.child_at(child_index + 1);
            let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
            let sibling_guard = sibling_page.write_arc();
            let sibling: BTreeNode<K> = deserialize_node(&sibling_guard)?;

            let separator = parent.keys[child_index].clone();
            let mut node: BTreeNode<K> = deserialize_node(ctx.write_guard(depth))?;
            let moved_children = match (&mut node, sibling) {
                (BTreeNode::Leaf(cur), BTreeNode::Leaf(right)) => {
                    cur.merge_from(right);
                    Vec::new()
                }
                (BTreeNode::Internal(cur), BTreeNode::Internal(right)) => {
                    let moved = right.children.clone();
                    cur.merge_from(separator.clone(), right);
                    moved
                }
                _ => unreachable!("sibling pages disagree on the node kind"),
            };
            serialize_node(&node, ctx.write_guard(depth))?;
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true)?;
            ctx.mark_deleted(sibling_id);

            let cur_id = ctx.path[depth].page_id();
            for child in moved_children {
                self.set_parent_pointer(ctx, child, cur_id)?;
            }

            self.delete_entry(ctx, parent_depth, &separator, dirty_height)?;
        } else if child_index > 0 {
            // Concatenate this node into the left sibling
            let sibling_id = parent.child_at(child_index - 1);
            let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
            let mut sibling_guard = sibling_page.write_arc();
            let mut sibling: BTreeNode<K> = deserialize_node(&sibling_guard)?;

            let separator = parent.keys[child_index - 1].clone();
            let node: BTreeNode<K> = deserialize_node(ctx.write_guard(depth))?;
            let moved_children = match (&mut sibling, node) {
                (BTreeNode::Leaf(left), BTreeNode::Leaf(cur)) => {
                    left.merge_from(cur);
                    Vec::new()
                }
                (BTreeNode::Internal(left), BTreeNode::Internal(cur)) => {
                    let moved = cur.children.clone();
                    left.merge_from(separator.clone(), cur);
                    moved
                }
                _ => unreachable!("sibling pages disagree on the node kind"),
            };
            serialize_node(&sibling, &mut sibling_guard)?;
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true)?;

            let cur_id = ctx.path[depth].page_id();
            ctx.mark_deleted(cur_id);
            for child in moved_children {
                self.set_parent_pointer(ctx, child, sibling_id)?;
            }

            self.delete_entry(ctx, parent_depth, &separator, dirty_height)?;
        }

        Ok(())
    }

    fn parent_node(
        &self,
        ctx: &mut LatchContext<'_>,
        parent_depth: usize,
    ) -> Result<InternalNode<K>, BTreeError> {
        match deserialize_node::<K>(ctx.write_guard(parent_depth))? {
            BTreeNode::Internal(node) => Ok(node),
            BTreeNode::Leaf(_) => unreachable!("leaf page latched as an ancestor"),
        }
    }
}
