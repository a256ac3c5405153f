use std::sync::Arc;
use log::debug;

use crate::common::types::{FrameId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::disk::DiskManager;

use super::{BufferPoolManager, PoolInner};

impl BufferPoolManager {
    /// Claim a frame: free list first, otherwise a replacer victim.
    ///
    /// A victim frame's dirty page is written back and its old mapping is
    /// dropped from the page directory before the frame is handed out.
    pub(super) fn acquire_frame(
        inner: &mut PoolInner,
        disk_manager: &Arc<DiskManager>,
    ) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = inner.replacer.evict() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let frame = &mut inner.frames[frame_id as usize];
        debug_assert_eq!(frame.pin_count, 0, "replacer returned a pinned frame");

        let old_page_id = frame.page_id;
        if frame.is_dirty {
            debug!("writing back dirty page {} before evicting frame {}", old_page_id, frame_id);
            let page_guard = frame.page.read();
            disk_manager.write_page(&page_guard)?;
        }
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;

        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}
