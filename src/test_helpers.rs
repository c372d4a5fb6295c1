use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use crate::{
    buffer::BufferPool,
    catalog::{Catalog, Schema},
    common::{PageID, TableID, PAGE_SIZE},
    disk::{MemoryPageStore, PageStore},
    error::{Error, Result},
    lock::LockManager,
};

/// In-memory store whose reads and writes can be switched to fail.
pub struct FailingPageStore {
    inner: MemoryPageStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}
impl FailingPageStore {
    pub fn new(table_id: TableID, num_pages: u32) -> Self {
        Self {
            inner: MemoryPageStore::with_pages(table_id, num_pages),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
    fn injected() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "injected failure",
        ))
    }
}
impl PageStore for FailingPageStore {
    fn read_page(&self, page_number: u32, data: &mut [u8]) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.read_page(page_number, data)
    }
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.write_page(page_number, data)
    }
    fn allocate_page(&self) -> Result<u32> {
        self.inner.allocate_page()
    }
    fn num_pages(&self) -> Result<u32> {
        self.inner.num_pages()
    }
}

/// A buffer pool over one in-memory table with `num_pages` zeroed pages.
pub fn setup_buffer_pool(capacity: usize, num_pages: u32) -> Result<(BufferPool, Arc<MemoryPageStore>)> {
    let store = Arc::new(MemoryPageStore::with_pages(TableID(1), num_pages));
    let buffer_pool = setup_buffer_pool_with_store(capacity, store.clone())?;
    Ok((buffer_pool, store))
}

pub fn setup_buffer_pool_with_store(
    capacity: usize,
    store: Arc<dyn PageStore>,
) -> Result<BufferPool> {
    let mut catalog = Catalog::default();
    catalog.add_table("t1", Schema::default(), store)?;
    BufferPool::new(
        Arc::new(RwLock::new(catalog)),
        Arc::new(LockManager::default()),
        capacity,
    )
}

pub fn page(n: u32) -> PageID {
    PageID::new(TableID(1), n)
}

pub fn stored_bytes(store: &dyn PageStore, page_number: u32) -> Result<Vec<u8>> {
    let mut data = vec![0u8; PAGE_SIZE];
    store.read_page(page_number, &mut data)?;
    Ok(data)
}
