use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;

// Layout:
// - record_count: u16
// - records: [name_len: u16][name bytes][root_page_id: u32]
const COUNT_SIZE: usize = 2;
const MAX_NAME_LEN: usize = 64;

/// View over the header page, which stores one `(index_name, root_page_id)`
/// record per index. The first time a root is published the record is
/// inserted; afterwards it is updated in place.
pub struct HeaderPage;

impl HeaderPage {
    /// Reset a freshly allocated page to an empty header
    pub fn init(page: &mut Page) {
        page.data.fill(0);
    }

    fn record_count(page: &Page) -> usize {
        LittleEndian::read_u16(&page.data[0..COUNT_SIZE]) as usize
    }

    fn set_record_count(page: &mut Page, count: usize) {
        LittleEndian::write_u16(&mut page.data[0..COUNT_SIZE], count as u16);
    }

    /// Walk the records, returning (offset, root_id_offset) of the match
    fn locate(page: &Page, name: &str) -> Option<usize> {
        let count = Self::record_count(page);
        let mut offset = COUNT_SIZE;
        for _ in 0..count {
            let name_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
            let name_start = offset + 2;
            let record_name = &page.data[name_start..name_start + name_len];
            if record_name == name.as_bytes() {
                return Some(offset);
            }
            offset = name_start + name_len + 4;
        }
        None
    }

    /// Byte length of the used region
    fn used_bytes(page: &Page) -> usize {
        let count = Self::record_count(page);
        let mut offset = COUNT_SIZE;
        for _ in 0..count {
            let name_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
            offset += 2 + name_len + 4;
        }
        offset
    }

    /// Look up the root page ID recorded for an index
    pub fn get_record(page: &Page, name: &str) -> Option<PageId> {
        let offset = Self::locate(page, name)?;
        let name_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        let root_offset = offset + 2 + name_len;
        Some(LittleEndian::read_u32(&page.data[root_offset..root_offset + 4]))
    }

    /// Insert a new `(name, root_page_id)` record
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> Result<(), PageError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(PageError::InvalidName(name.to_string()));
        }
        if Self::locate(page, name).is_some() {
            return Err(PageError::DuplicateRecord(name.to_string()));
        }

        let offset = Self::used_bytes(page);
        let record_len = 2 + name.len() + 4;
        if offset + record_len > PAGE_SIZE {
            return Err(PageError::InsufficientSpace);
        }

        LittleEndian::write_u16(&mut page.data[offset..offset + 2], name.len() as u16);
        let name_start = offset + 2;
        page.data[name_start..name_start + name.len()].copy_from_slice(name.as_bytes());
        let root_offset = name_start + name.len();
        LittleEndian::write_u32(&mut page.data[root_offset..root_offset + 4], root_page_id);

        let count = Self::record_count(page);
        Self::set_record_count(page, count + 1);
        Ok(())
    }

    /// Update the root page ID of an existing record
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> Result<(), PageError> {
        let offset = Self::locate(page, name)
            .ok_or_else(|| PageError::RecordNotFound(name.to_string()))?;
        let name_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        let root_offset = offset + 2 + name_len;
        LittleEndian::write_u32(&mut page.data[root_offset..root_offset + 4], root_page_id);
        Ok(())
    }
}
