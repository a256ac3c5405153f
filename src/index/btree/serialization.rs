use std::mem;
use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{
    BTreeNode, InternalNode, LeafNode, INTERNAL_PAGE_TAG, LEAF_PAGE_TAG,
};

// Common header layout:
// - type tag: u8 (1 = leaf, 2 = internal)
// - size: u16 (leaf: key count; internal: child count)
// - max_size: u16
// - parent_page_id: u32
// - page_id: u32
// Leaf pages append a u32 next-leaf pointer (0 = none). A u16 offset to the
// values/children section follows the header, then the length-prefixed keys.
const COMMON_HEADER_SIZE: usize = 1 + 2 + 2 + 4 + 4;
const LEAF_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 4;

fn write_common_header(page: &mut Page, tag: u8, size: usize, max_size: usize, parent: PageId) {
    page.data[0] = tag;
    LittleEndian::write_u16(&mut page.data[1..3], size as u16);
    LittleEndian::write_u16(&mut page.data[3..5], max_size as u16);
    LittleEndian::write_u32(&mut page.data[5..9], parent);
    LittleEndian::write_u32(&mut page.data[9..13], page.page_id);
}

fn write_keys<K: Serialize>(
    page: &mut Page,
    keys: &[K],
    mut offset: usize,
) -> Result<usize, BTreeError> {
    for key in keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        page.data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }
    Ok(offset)
}

fn read_keys<K: DeserializeOwned>(
    page: &Page,
    count: usize,
    mut offset: usize,
) -> Result<(Vec<K>, usize), BTreeError> {
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + key_len > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key = bincode::deserialize(&page.data[offset..offset + key_len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        keys.push(key);
        offset += key_len;
    }
    Ok((keys, offset))
}

/// Serialize a B+Tree node into a page
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Clone + Ord + Serialize,
{
    page.data.fill(0);

    match node {
        BTreeNode::Leaf(leaf) => {
            write_common_header(page, LEAF_PAGE_TAG, leaf.size(), leaf.max_size, leaf.parent);
            LittleEndian::write_u32(
                &mut page.data[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 4],
                leaf.next.unwrap_or(INVALID_PAGE_ID),
            );

            let values_offset_loc = LEAF_HEADER_SIZE;
            let offset = write_keys(page, &leaf.keys, values_offset_loc + 2)?;
            LittleEndian::write_u16(
                &mut page.data[values_offset_loc..values_offset_loc + 2],
                offset as u16,
            );

            let mut offset = offset;
            for value in &leaf.values {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], *value);
                offset += 4;
            }
        }
        BTreeNode::Internal(internal) => {
            write_common_header(
                page,
                INTERNAL_PAGE_TAG,
                internal.size(),
                internal.max_size,
                internal.parent,
            );

            let values_offset_loc = COMMON_HEADER_SIZE;
            let offset = write_keys(page, &internal.keys, values_offset_loc + 2)?;
            LittleEndian::write_u16(
                &mut page.data[values_offset_loc..values_offset_loc + 2],
                offset as u16,
            );

            let mut offset = offset;
            for child in &internal.children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Deserialize a B+Tree node from a page, dispatching on the type tag
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: Clone + Ord + DeserializeOwned,
{
    let tag = page.data[0];
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let parent = LittleEndian::read_u32(&page.data[5..9]);

    match tag {
        LEAF_PAGE_TAG => {
            let next_raw =
                LittleEndian::read_u32(&page.data[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 4]);
            let next = if next_raw == INVALID_PAGE_ID {
                None
            } else {
                Some(next_raw)
            };

            let values_offset =
                LittleEndian::read_u16(&page.data[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + 2]) as usize;
            let (keys, end) = read_keys::<K>(page, size, LEAF_HEADER_SIZE + 2)?;
            if end != values_offset {
                return Err(BTreeError::InvalidPageFormat);
            }

            let mut values = Vec::with_capacity(size);
            let mut offset = values_offset;
            for _ in 0..size {
                values.push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
                offset += 4;
            }

            Ok(BTreeNode::Leaf(LeafNode {
                parent,
                max_size,
                next,
                keys,
                values,
            }))
        }
        INTERNAL_PAGE_TAG => {
            let values_offset = LittleEndian::read_u16(
                &page.data[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 2],
            ) as usize;
            // An internal node with n children stores n - 1 separator keys
            let key_count = size.saturating_sub(1);
            let (keys, end) = read_keys::<K>(page, key_count, COMMON_HEADER_SIZE + 2)?;
            if end != values_offset {
                return Err(BTreeError::InvalidPageFormat);
            }

            let mut children = Vec::with_capacity(size);
            let mut offset = values_offset;
            for _ in 0..size {
                children.push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
                offset += 4;
            }

            Ok(BTreeNode::Internal(InternalNode {
                parent,
                max_size,
                keys,
                children,
            }))
        }
        _ => Err(BTreeError::InvalidPageFormat),
    }
}

/// Estimate how many fixed-size keys fit on one page, for callers that do
/// not pick the fan-out themselves
pub fn calculate_btree_order<K>() -> usize {
    let key_size = mem::size_of::<K>().max(1);
    // length prefix + key bytes + a u32 value or child pointer
    let entry_size = 2 + key_size + 4;
    let available = PAGE_SIZE - LEAF_HEADER_SIZE - 2;
    (available / entry_size).max(4)
}
