use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;

use super::BufferPoolManager;

impl BufferPoolManager {
    /// Create a brand-new page, pinned once.
    ///
    /// A frame is claimed before the page ID is allocated, so a full pool
    /// does not grow the database file.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut guard = self.latch.lock();
        let inner = &mut *guard;

        let frame_id = Self::acquire_frame(inner, &self.disk_manager)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                // Hand the claimed frame back so the pool stays whole
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        let frame = &mut inner.frames[frame_id as usize];
        {
            let mut page_guard = frame.page.write();
            page_guard.reset();
            page_guard.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id)?;
        inner.replacer.set_evictable(frame_id, false);

        Ok((page, page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident. Pins it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page ID".to_string(),
            ));
        }

        let mut guard = self.latch.lock();
        let inner = &mut *guard;

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            inner.replacer.record_access(frame_id)?;
            inner.replacer.set_evictable(frame_id, false);
            let frame = &mut inner.frames[frame_id as usize];
            frame.pin_count += 1;
            return Ok(frame.page.clone());
        }

        let frame_id = Self::acquire_frame(inner, &self.disk_manager)?;
        let frame = &mut inner.frames[frame_id as usize];
        {
            let mut page_guard = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page_guard)?;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id)?;
        inner.replacer.set_evictable(frame_id, false);

        Ok(page)
    }

    /// Drop one pin on a page, OR-merging the dirty flag.
    ///
    /// Fails when the page is not resident or not pinned. When the pin count
    /// reaches zero the frame becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut guard = self.latch.lock();
        let inner = &mut *guard;

        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut inner.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write a page to disk regardless of its dirty state and clear the flag.
    ///
    /// The caller must not hold the page's write latch.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.latch.lock();
        let inner = &mut *guard;

        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut inner.frames[frame_id as usize];
        {
            let page_guard = frame.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page, each under its own stored page ID
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut guard = self.latch.lock();

        for frame in guard.frames.iter_mut() {
            if frame.page_id == INVALID_PAGE_ID {
                continue;
            }
            {
                let page_guard = frame.page.read();
                debug_assert_eq!(page_guard.page_id, frame.page_id);
                self.disk_manager.write_page(&page_guard)?;
            }
            frame.is_dirty = false;
        }

        Ok(())
    }

    /// Remove a page from the pool and give its ID back to the disk manager.
    ///
    /// Not-resident pages are a no-op; pinned pages are an error. A dirty
    /// page is written out before the frame is freed.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.latch.lock();
        let inner = &mut *guard;

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(());
        };

        let frame = &mut inner.frames[frame_id as usize];
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }
        if frame.is_dirty {
            let page_guard = frame.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame.page.write().reset();
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id)?;
        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }
}
