use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

use super::BTreeIndex;

/// Forward iterator over the leaf chain.
///
/// Exactly one leaf is pinned at a time; the pin moves on advance and is
/// dropped with the iterator. Iteration is not safe against concurrent
/// writers without external serialization.
pub struct TreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    position: Option<LeafPosition<K>>,
}

struct LeafPosition<K> {
    page_id: PageId,
    leaf: LeafNode<K>,
    index: usize,
}

impl<K> TreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            position: None,
        }
    }

    /// Pin a leaf and snapshot its contents
    fn load_leaf(
        buffer_pool: &Arc<BufferPoolManager>,
        page_id: PageId,
    ) -> Result<LeafNode<K>, BTreeError> {
        let page = buffer_pool.fetch_page(page_id)?;
        let node = {
            let guard = page.read();
            deserialize_node::<K>(&guard)
        };
        match node {
            Ok(BTreeNode::Leaf(leaf)) => Ok(leaf),
            Ok(BTreeNode::Internal(_)) => {
                buffer_pool.unpin_page(page_id, false)?;
                Err(BTreeError::InvalidPageFormat)
            }
            Err(e) => {
                buffer_pool.unpin_page(page_id, false)?;
                Err(e)
            }
        }
    }

    /// Move the pin from the current leaf to its successor
    fn advance_leaf(&mut self) -> Result<(), BTreeError> {
        let Some(position) = self.position.take() else {
            return Ok(());
        };
        let next = position.leaf.next;
        self.buffer_pool.unpin_page(position.page_id, false)?;

        if let Some(next_id) = next {
            let leaf = Self::load_leaf(&self.buffer_pool, next_id)?;
            self.position = Some(LeafPosition {
                page_id: next_id,
                leaf,
                index: 0,
            });
        }
        Ok(())
    }
}

impl<K> Iterator for TreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let position = self.position.as_mut()?;
            if position.index < position.leaf.size() {
                let key = position.leaf.keys[position.index].clone();
                let rid = position.leaf.values[position.index];
                position.index += 1;
                return Some(Ok((key, rid)));
            }

            if let Err(e) = self.advance_leaf() {
                self.position = None;
                return Some(Err(e));
            }
        }
    }
}

impl<K> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        if let Some(position) = self.position.take() {
            let _ = self.buffer_pool.unpin_page(position.page_id, false);
        }
    }
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Iterate over all entries in key order
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        match self.find_first_leaf(None)? {
            Some((page_id, leaf)) => Ok(TreeIterator {
                buffer_pool: self.buffer_pool.clone(),
                position: Some(LeafPosition {
                    page_id,
                    leaf,
                    index: 0,
                }),
            }),
            None => Ok(TreeIterator::empty(self.buffer_pool.clone())),
        }
    }

    /// Iterate over entries with keys >= `key`
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        let Some((page_id, leaf)) = self.find_first_leaf(Some(key))? else {
            return Ok(TreeIterator::empty(self.buffer_pool.clone()));
        };

        let index = leaf.lower_bound(key);
        if index < leaf.size() {
            return Ok(TreeIterator {
                buffer_pool: self.buffer_pool.clone(),
                position: Some(LeafPosition { page_id, leaf, index }),
            });
        }

        // Every key in this leaf is smaller; the iterator starts at the
        // first slot of the next leaf
        let next = leaf.next;
        self.buffer_pool.unpin_page(page_id, false)?;
        match next {
            Some(next_id) => {
                let leaf = TreeIterator::load_leaf(&self.buffer_pool, next_id)?;
                Ok(TreeIterator {
                    buffer_pool: self.buffer_pool.clone(),
                    position: Some(LeafPosition {
                        page_id: next_id,
                        leaf,
                        index: 0,
                    }),
                })
            }
            None => Ok(TreeIterator::empty(self.buffer_pool.clone())),
        }
    }

    /// Collect every record ID with a key in `[start, end]`
    pub fn range_scan(&self, start: &K, end: &K) -> Result<Vec<Rid>, BTreeError> {
        if start > end {
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        for entry in self.iter_from(start)? {
            let (key, rid) = entry?;
            if &key > end {
                break;
            }
            result.push(rid);
        }
        Ok(result)
    }

    /// Descend without latches to the leaf for `key` (leftmost when `None`),
    /// returning it pinned. `None` for an empty tree.
    fn find_first_leaf(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(PageId, LeafNode<K>)>, BTreeError> {
        let mut current_id = self.root_page_id();
        if current_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        loop {
            let page = self.buffer_pool.fetch_page(current_id)?;
            let node = {
                let guard = page.read();
                deserialize_node::<K>(&guard)
            };
            let node = match node {
                Ok(node) => node,
                Err(e) => {
                    self.buffer_pool.unpin_page(current_id, false)?;
                    return Err(e);
                }
            };

            match node {
                BTreeNode::Leaf(leaf) => return Ok(Some((current_id, leaf))),
                BTreeNode::Internal(internal) => {
                    let next_id = match key {
                        Some(key) => internal.child_at(internal.child_index(key)),
                        None => internal.child_at(0),
                    };
                    self.buffer_pool.unpin_page(current_id, false)?;
                    current_id = next_id;
                }
            }
        }
    }
}
