use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, RwLock},
};

use crate::{
    common::{PageID, TableID, PAGE_SIZE},
    error::{Error, Result},
};

/// Where a table's pages live when they are not cached. Buffers passed in and
/// out are always exactly `PAGE_SIZE` bytes.
pub trait PageStore: Send + Sync {
    fn read_page(&self, page_number: u32, data: &mut [u8]) -> Result<()>;
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()>;
    fn allocate_page(&self) -> Result<u32>;
    fn num_pages(&self) -> Result<u32>;
}

pub(crate) fn check_page_len(len: usize) -> Result<()> {
    if len != PAGE_SIZE {
        return Err(Error::invalid_state(format!(
            "page buffer is {} bytes, expected {}",
            len, PAGE_SIZE
        )));
    }
    Ok(())
}

/// One file per table, page `n` at byte offset `n * PAGE_SIZE`.
pub struct HeapFileStore {
    table_id: TableID,
    data_file: Mutex<File>,
}

impl HeapFileStore {
    pub fn new(table_id: TableID, data_file_path: impl AsRef<Path>) -> Result<Self> {
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(data_file_path)?;
        Ok(Self {
            table_id,
            data_file: Mutex::new(data_file),
        })
    }
    fn file(&self) -> Result<std::sync::MutexGuard<'_, File>> {
        self.data_file.lock().map_err(|_| Error::LockPoisoned)
    }
    fn page_count(file: &File) -> Result<u32> {
        Ok((file.metadata()?.len() / PAGE_SIZE as u64) as u32)
    }
}

impl PageStore for HeapFileStore {
    fn read_page(&self, page_number: u32, data: &mut [u8]) -> Result<()> {
        check_page_len(data.len())?;
        let mut data_file = self.file()?;
        let num_pages = Self::page_count(&data_file)?;
        if page_number >= num_pages {
            return Err(Error::PageOutOfRange {
                page_id: PageID::new(self.table_id, page_number),
                num_pages,
            });
        }
        let offset = page_number as u64 * PAGE_SIZE as u64;
        data_file.seek(SeekFrom::Start(offset))?;
        data_file.read_exact(data)?;
        Ok(())
    }
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        check_page_len(data.len())?;
        let mut data_file = self.file()?;
        let offset = page_number as u64 * PAGE_SIZE as u64;
        data_file.seek(SeekFrom::Start(offset))?;
        data_file.write_all(data)?;
        data_file.sync_all()?;
        Ok(())
    }
    fn allocate_page(&self) -> Result<u32> {
        let mut data_file = self.file()?;
        let page_number = Self::page_count(&data_file)?;
        data_file.seek(SeekFrom::End(0))?;
        data_file.write_all(&[0; PAGE_SIZE])?;
        data_file.sync_all()?;
        Ok(page_number)
    }
    fn num_pages(&self) -> Result<u32> {
        Self::page_count(&*self.file()?)
    }
}

/// Page store kept entirely in memory.
pub struct MemoryPageStore {
    table_id: TableID,
    pages: RwLock<Vec<Box<[u8]>>>,
}

impl MemoryPageStore {
    pub fn new(table_id: TableID) -> Self {
        Self {
            table_id,
            pages: RwLock::new(vec![]),
        }
    }
    pub fn with_pages(table_id: TableID, num_pages: u32) -> Self {
        let pages = (0..num_pages)
            .map(|_| vec![0u8; PAGE_SIZE].into_boxed_slice())
            .collect();
        Self {
            table_id,
            pages: RwLock::new(pages),
        }
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&self, page_number: u32, data: &mut [u8]) -> Result<()> {
        check_page_len(data.len())?;
        let pages = self.pages.read().map_err(|_| Error::LockPoisoned)?;
        match pages.get(page_number as usize) {
            Some(page) => {
                data.copy_from_slice(page);
                Ok(())
            }
            None => Err(Error::PageOutOfRange {
                page_id: PageID::new(self.table_id, page_number),
                num_pages: pages.len() as u32,
            }),
        }
    }
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        check_page_len(data.len())?;
        let mut pages = self.pages.write().map_err(|_| Error::LockPoisoned)?;
        let index = page_number as usize;
        while pages.len() <= index {
            pages.push(vec![0u8; PAGE_SIZE].into_boxed_slice());
        }
        pages[index].copy_from_slice(data);
        Ok(())
    }
    fn allocate_page(&self) -> Result<u32> {
        let mut pages = self.pages.write().map_err(|_| Error::LockPoisoned)?;
        pages.push(vec![0u8; PAGE_SIZE].into_boxed_slice());
        Ok(pages.len() as u32 - 1)
    }
    fn num_pages(&self) -> Result<u32> {
        Ok(self.pages.read().map_err(|_| Error::LockPoisoned)?.len() as u32)
    }
}
