use crate::{
    common::{PageID, PAGE_SIZE},
    disk::check_page_len,
    error::Result,
};

/// In-memory copy of one page. The buffer pool owns it while cached and hands
/// out shared handles; only the holder of the page's exclusive lock writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    page_id: PageID,
    data: Box<[u8]>,
}
impl Page {
    pub fn new(page_id: PageID) -> Self {
        Self {
            page_id,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }
    pub fn from_data(page_id: PageID, data: Box<[u8]>) -> Result<Self> {
        check_page_len(data.len())?;
        Ok(Self { page_id, data })
    }
    pub fn page_id(&self) -> PageID {
        self.page_id
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..(offset + bytes.len())].copy_from_slice(bytes);
    }
    pub fn read_at(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..(offset + len)]
    }
}
