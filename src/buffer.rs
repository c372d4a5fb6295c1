use std::{
    collections::{hash_map::Entry, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
};

use tracing::{debug, info, warn};

use crate::{
    catalog::Catalog,
    common::{PageID, Permission, TableID, TransactionID, PAGE_SIZE},
    disk::PageStore,
    error::{Error, Result},
    ledger::TransactionLedger,
    lock::LockManager,
    page::Page,
};

use self::replacer::{Candidate, LRUReplacer, Replacer};

mod replacer;

const SHARD_COUNT: usize = 16;

struct Frame {
    page: Arc<RwLock<Page>>,
    dirtied_by: Option<TransactionID>,
    last_access: u64,
}
impl Frame {
    fn new(page: Page, last_access: u64) -> Self {
        Self {
            page: Arc::new(RwLock::new(page)),
            dirtied_by: None,
            last_access,
        }
    }
    fn touch(&mut self, last_access: u64, dirtied_by: Option<TransactionID>) -> Arc<RwLock<Page>> {
        self.last_access = last_access;
        if dirtied_by.is_some() {
            self.dirtied_by = dirtied_by;
        }
        self.page.clone()
    }
}

/// Bounded cache of pages in front of the tables' page stores, and the only
/// way to reach page contents.
///
/// Runs a no-steal/force discipline: a page dirtied by a running transaction
/// is never written back or evicted, and a committing transaction's pages are
/// all written back before its locks are released. A page handed out for
/// writing is treated as dirty from that moment on.
pub struct BufferPool {
    catalog: Arc<RwLock<Catalog>>,
    lock_manager: Arc<LockManager>,
    ledger: Mutex<TransactionLedger>,
    shards: Vec<Mutex<HashMap<PageID, Frame>>>,
    size: AtomicUsize,
    capacity: usize,
    replacer: Replacer,
}

impl BufferPool {
    pub fn new(
        catalog: Arc<RwLock<Catalog>>,
        lock_manager: Arc<LockManager>,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_state("buffer pool capacity must be positive"));
        }
        Ok(Self {
            catalog,
            lock_manager,
            ledger: Mutex::new(TransactionLedger::default()),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            size: AtomicUsize::new(0),
            capacity,
            replacer: Replacer::LRU(LRUReplacer::new()),
        })
    }

    /// Locks `page_id` for `txn_id` at `permission` and returns the page,
    /// reading it from its store on a miss.
    ///
    /// The null transaction may only read; it waits out any writer but keeps
    /// no lock afterwards.
    pub fn get_page(
        &self,
        txn_id: TransactionID,
        page_id: PageID,
        permission: Permission,
    ) -> Result<Arc<RwLock<Page>>> {
        if txn_id.is_null() {
            if permission.is_exclusive() {
                return Err(Error::invalid_state(
                    "the null transaction cannot write pages",
                ));
            }
            return self
                .lock_manager
                .with_readable(page_id, || self.fetch_page(page_id, None));
        }
        if self.ledger()?.is_forgotten(txn_id) {
            return Err(Error::invalid_state(format!(
                "{} has already completed",
                txn_id
            )));
        }

        self.lock_manager.acquire(txn_id, page_id, permission)?;
        let dirtied_by = permission.is_exclusive().then_some(txn_id);
        let page = self.fetch_page(page_id, dirtied_by)?;
        let mut ledger = self.ledger()?;
        match permission {
            Permission::ReadOnly => ledger.record_touched(txn_id, page_id)?,
            Permission::ReadWrite => ledger.mark_dirty(txn_id, page_id)?,
        }
        Ok(page)
    }

    /// Appends a zeroed page to `table_id`'s store and returns it locked for
    /// writing by `txn_id`.
    pub fn new_page(
        &self,
        txn_id: TransactionID,
        table_id: TableID,
    ) -> Result<(PageID, Arc<RwLock<Page>>)> {
        let page_number = self.page_store(table_id)?.allocate_page()?;
        let page_id = PageID::new(table_id, page_number);
        let page = self.get_page(txn_id, page_id, Permission::ReadWrite)?;
        Ok((page_id, page))
    }

    /// Ends `txn_id`. On commit every page it dirtied is written back before
    /// its locks go; on abort those pages are dropped so the next reader sees
    /// the stored contents. Must be called exactly once per transaction.
    ///
    /// If a write-back fails the transaction is aborted instead and the error
    /// is returned.
    pub fn transaction_complete(&self, txn_id: TransactionID, commit: bool) -> Result<()> {
        let (dirty_pages, touched_pages) = {
            let ledger = self.ledger()?;
            (
                ledger.dirty_pages_of(txn_id)?,
                ledger.touched_pages_of(txn_id)?.len(),
            )
        };
        let mut result = Ok(());
        if commit {
            for &page_id in &dirty_pages {
                if let Err(e) = self.write_back(page_id, true) {
                    warn!(txn = %txn_id, page = %page_id, error = %e, "flush failed, aborting");
                    result = Err(e);
                    break;
                }
            }
        }
        if !commit || result.is_err() {
            for &page_id in &dirty_pages {
                self.discard_if_dirtied_by(page_id, txn_id)?;
            }
        }
        self.lock_manager.release_all(txn_id)?;
        self.ledger()?.forget(txn_id)?;
        let committed = commit && result.is_ok();
        info!(
            txn = %txn_id,
            committed,
            touched_pages,
            dirty_pages = dirty_pages.len(),
            "transaction complete"
        );
        result
    }

    /// Writes `page_id` back to its store if it is dirty.
    ///
    /// Writing back a page whose transaction is still running breaks
    /// no-steal; outside of commit this is only for shutdown. The page stays
    /// marked dirty while that transaction holds its lock, so it is neither
    /// evicted nor skipped when the transaction commits.
    pub fn flush_page(&self, page_id: PageID) -> Result<()> {
        self.write_back(page_id, false)
    }

    /// Writes back every dirty page. Breaks no-steal if transactions are
    /// still running.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut dirty = vec![];
        for shard in &self.shards {
            let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
            dirty.extend(
                shard
                    .iter()
                    .filter(|(_, frame)| frame.dirtied_by.is_some())
                    .map(|(&page_id, _)| page_id),
            );
        }
        dirty.sort();
        for page_id in dirty {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops `page_id` from the cache without writing it back.
    pub fn discard_page(&self, page_id: PageID) -> Result<()> {
        if self.shard(page_id)?.remove(&page_id).is_some() {
            self.size.fetch_sub(1, Ordering::SeqCst);
            debug!(page = %page_id, "discarded page");
        }
        Ok(())
    }

    pub fn holds_lock(&self, txn_id: TransactionID, page_id: PageID) -> Result<bool> {
        self.lock_manager.holds(txn_id, page_id)
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<RwLock<Catalog>> {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_cached(&self, page_id: PageID) -> Result<bool> {
        Ok(self.shard(page_id)?.contains_key(&page_id))
    }

    /// Cached pages and the transaction that dirtied each, if any.
    pub fn cached_pages(&self) -> Result<Vec<(PageID, Option<TransactionID>)>> {
        let mut pages = vec![];
        for shard in &self.shards {
            let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
            pages.extend(shard.iter().map(|(&page_id, frame)| (page_id, frame.dirtied_by)));
        }
        pages.sort();
        Ok(pages)
    }

    pub fn active_transactions(&self) -> Result<Vec<TransactionID>> {
        Ok(self.ledger()?.active_transactions())
    }

    /// Pages `txn_id` has fetched so far, read or written.
    pub fn touched_pages(&self, txn_id: TransactionID) -> Result<Vec<PageID>> {
        self.ledger()?.touched_pages_of(txn_id)
    }

    /// Copies a dirty page to its store. The dirty mark is cleared when
    /// `committing`, or once the transaction that dirtied the page no longer
    /// holds its lock.
    fn write_back(&self, page_id: PageID, committing: bool) -> Result<()> {
        let (page, owner) = {
            let shard = self.shard(page_id)?;
            match shard.get(&page_id) {
                Some(Frame {
                    page,
                    dirtied_by: Some(owner),
                    ..
                }) => (page.clone(), *owner),
                _ => return Ok(()),
            }
        };
        let data = page.read().map_err(|_| Error::LockPoisoned)?.data().to_vec();
        self.page_store(page_id.table_id)?
            .write_page(page_id.page_number, &data)?;

        let still_owned = !committing && self.lock_manager.holds(owner, page_id)?;
        if !still_owned {
            if let Some(frame) = self.shard(page_id)?.get_mut(&page_id) {
                if frame.dirtied_by == Some(owner) {
                    frame.dirtied_by = None;
                }
            }
        }
        debug!(page = %page_id, txn = %owner, still_owned, "flushed page");
        Ok(())
    }

    fn fetch_page(
        &self,
        page_id: PageID,
        dirtied_by: Option<TransactionID>,
    ) -> Result<Arc<RwLock<Page>>> {
        if let Some(frame) = self.shard(page_id)?.get_mut(&page_id) {
            return Ok(frame.touch(self.replacer.record_access(), dirtied_by));
        }

        // read outside the shard so a slow store does not hold up other pages
        let mut data = vec![0u8; PAGE_SIZE];
        self.page_store(page_id.table_id)?
            .read_page(page_id.page_number, &mut data)?;
        let page = Page::from_data(page_id, data.into_boxed_slice())?;
        self.reserve_frame()?;

        let mut shard = self.shard(page_id)?;
        let last_access = self.replacer.record_access();
        match shard.entry(page_id) {
            Entry::Occupied(mut entry) => {
                // loaded by someone else in the meantime
                self.size.fetch_sub(1, Ordering::SeqCst);
                Ok(entry.get_mut().touch(last_access, dirtied_by))
            }
            Entry::Vacant(entry) => {
                debug!(page = %page_id, "loaded page");
                let frame = entry.insert(Frame::new(page, last_access));
                Ok(frame.touch(last_access, dirtied_by))
            }
        }
    }

    /// Claims room for one more frame, evicting if the pool is full.
    fn reserve_frame(&self) -> Result<()> {
        loop {
            let reserved = self
                .size
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                    (size < self.capacity).then_some(size + 1)
                })
                .is_ok();
            if reserved {
                return Ok(());
            }
            self.evict_page()?;
        }
    }

    /// Drops the least recently used clean page. Dirty pages are never
    /// candidates; if there are only dirty pages the pool is exhausted.
    fn evict_page(&self) -> Result<()> {
        loop {
            let mut candidates = vec![];
            for shard in &self.shards {
                let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
                candidates.extend(
                    shard
                        .iter()
                        .filter(|(_, frame)| frame.dirtied_by.is_none())
                        .map(|(&page_id, frame)| Candidate {
                            page_id,
                            last_access: frame.last_access,
                        }),
                );
            }
            let page_id = match self.replacer.victim(&candidates) {
                Some(page_id) => page_id,
                None => {
                    warn!(capacity = self.capacity, "no clean page to evict");
                    return Err(Error::ResourceExhausted {
                        capacity: self.capacity,
                    });
                }
            };
            let mut shard = self.shard(page_id)?;
            // may have been dirtied or dropped since the scan
            let clean = matches!(shard.get(&page_id), Some(frame) if frame.dirtied_by.is_none());
            if clean {
                shard.remove(&page_id);
                self.size.fetch_sub(1, Ordering::SeqCst);
                debug!(page = %page_id, "evicted page");
                return Ok(());
            }
        }
    }

    fn discard_if_dirtied_by(&self, page_id: PageID, txn_id: TransactionID) -> Result<()> {
        let mut shard = self.shard(page_id)?;
        let owned = matches!(shard.get(&page_id), Some(frame) if frame.dirtied_by == Some(txn_id));
        if owned {
            shard.remove(&page_id);
            self.size.fetch_sub(1, Ordering::SeqCst);
            debug!(page = %page_id, txn = %txn_id, "discarded page");
        }
        Ok(())
    }

    fn page_store(&self, table_id: TableID) -> Result<Arc<dyn PageStore>> {
        self.catalog
            .read()
            .map_err(|_| Error::LockPoisoned)?
            .page_store(table_id)
    }

    fn shard(&self, page_id: PageID) -> Result<MutexGuard<'_, HashMap<PageID, Frame>>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        page_id.hash(&mut hasher);
        let index = hasher.finish() as usize % SHARD_COUNT;
        self.shards[index].lock().map_err(|_| Error::LockPoisoned)
    }

    fn ledger(&self) -> Result<MutexGuard<'_, TransactionLedger>> {
        self.ledger.lock().map_err(|_| Error::LockPoisoned)
    }
}
