use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    common::{PageID, Permission, TransactionID},
    deadlock::WaitForGraph,
    error::{Error, Result},
};

/// Snapshot of who holds a page lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockHolders {
    Shared(Vec<TransactionID>),
    Exclusive(TransactionID),
}

/// Holders of one page lock. Either `shared` is non-empty or `exclusive` is
/// set, never both.
#[derive(Debug, Default)]
struct LockState {
    shared: HashSet<TransactionID>,
    exclusive: Option<TransactionID>,
}
impl LockState {
    fn holds(&self, txn_id: TransactionID, permission: Permission) -> bool {
        if self.exclusive == Some(txn_id) {
            return true;
        }
        match permission {
            Permission::ReadOnly => self.shared.contains(&txn_id),
            Permission::ReadWrite => false,
        }
    }
    fn can_grant(&self, txn_id: TransactionID, permission: Permission) -> bool {
        match (permission, self.exclusive) {
            (_, Some(holder)) => holder == txn_id,
            (Permission::ReadOnly, None) => true,
            (Permission::ReadWrite, None) => self.shared.iter().all(|&h| h == txn_id),
        }
    }
    fn grant(&mut self, txn_id: TransactionID, permission: Permission) {
        match permission {
            Permission::ReadOnly => {
                self.shared.insert(txn_id);
            }
            Permission::ReadWrite => {
                self.shared.remove(&txn_id);
                self.exclusive = Some(txn_id);
            }
        }
    }
    fn blockers(&self, txn_id: TransactionID, permission: Permission) -> Vec<TransactionID> {
        let mut blockers = vec![];
        if let Some(holder) = self.exclusive {
            blockers.push(holder);
        }
        if permission.is_exclusive() {
            blockers.extend(self.shared.iter().copied());
        }
        blockers.retain(|&h| h != txn_id);
        blockers.sort();
        blockers
    }
    fn release(&mut self, txn_id: TransactionID) -> bool {
        if self.exclusive == Some(txn_id) {
            self.exclusive = None;
            return true;
        }
        self.shared.remove(&txn_id)
    }
    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
    fn holders(&self) -> Option<LockHolders> {
        if let Some(holder) = self.exclusive {
            return Some(LockHolders::Exclusive(holder));
        }
        if self.shared.is_empty() {
            return None;
        }
        let mut holders = self.shared.iter().copied().collect::<Vec<_>>();
        holders.sort();
        Some(LockHolders::Shared(holders))
    }
}

#[derive(Default)]
struct PageLock {
    state: Mutex<LockState>,
    condvar: Condvar,
}
impl PageLock {
    fn state(&self) -> Result<MutexGuard<'_, LockState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned)
    }
}

/// Page-level shared/exclusive locks with strict two-phase semantics.
///
/// Each page has its own state and condition variable; the table mapping
/// pages to them is only held long enough to find or create an entry. The
/// wait-for graph sits behind one lock so cycle checks see a consistent view.
///
/// Lock order: page table, then page state, then the wait-for graph or the
/// per-transaction page sets.
#[derive(Default)]
pub struct LockManager {
    page_locks: Mutex<HashMap<PageID, Arc<PageLock>>>,
    pages_by_txn_id: Mutex<HashMap<TransactionID, HashSet<PageID>>>,
    wait_for_graph: Mutex<WaitForGraph>,
}

impl LockManager {
    /// Blocks until `txn_id` holds `page_id` at `permission` or stronger.
    ///
    /// Fails with `DeadlockDetected` if waiting would close a cycle; the caller
    /// must then abort `txn_id`.
    pub fn acquire(
        &self,
        txn_id: TransactionID,
        page_id: PageID,
        permission: Permission,
    ) -> Result<()> {
        if txn_id.is_null() {
            return Err(Error::invalid_state(
                "locks cannot be taken without a transaction",
            ));
        }
        let page_lock = self.page_lock(page_id)?;
        let result = self.acquire_page_lock(&page_lock, txn_id, page_id, permission);
        if result.is_err() {
            drop(page_lock);
            self.prune(page_id)?;
        }
        result
    }

    fn acquire_page_lock(
        &self,
        page_lock: &PageLock,
        txn_id: TransactionID,
        page_id: PageID,
        permission: Permission,
    ) -> Result<()> {
        let mut state = page_lock.state()?;
        if state.holds(txn_id, permission) {
            return Ok(());
        }
        loop {
            if state.can_grant(txn_id, permission) {
                state.grant(txn_id, permission);
                self.graph()?.remove_waiter(txn_id);
                self.pages_by_txn_id
                    .lock()
                    .map_err(|_| Error::LockPoisoned)?
                    .entry(txn_id)
                    .or_default()
                    .insert(page_id);
                // new holders change what the remaining waiters are blocked on
                page_lock.condvar.notify_all();
                debug!(txn = %txn_id, page = %page_id, ?permission, "lock granted");
                return Ok(());
            }
            let blockers = state.blockers(txn_id, permission);
            self.graph()?.add_edges(txn_id, &blockers)?;
            debug!(txn = %txn_id, page = %page_id, ?permission, ?blockers, "waiting for lock");
            state = page_lock
                .condvar
                .wait(state)
                .map_err(|_| Error::LockPoisoned)?;
        }
    }

    /// Runs `f` once nobody holds `page_id` exclusively, without taking a
    /// lock. No writer is granted the page until `f` returns, so `f` must not
    /// call back into the lock manager. Used for reads outside any transaction.
    pub fn with_readable<T, F>(&self, page_id: PageID, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let page_lock = self.page_lock(page_id)?;
        let result = {
            let mut state = page_lock.state()?;
            while state.exclusive.is_some() {
                state = page_lock
                    .condvar
                    .wait(state)
                    .map_err(|_| Error::LockPoisoned)?;
            }
            let result = f();
            drop(state);
            result
        };
        drop(page_lock);
        self.prune(page_id)?;
        result
    }

    /// Releases the lock `txn_id` holds on `page_id`.
    pub fn release(&self, txn_id: TransactionID, page_id: PageID) -> Result<()> {
        self.release_page_lock(txn_id, page_id)?;
        if let Some(pages) = self
            .pages_by_txn_id
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .get_mut(&txn_id)
        {
            pages.remove(&page_id);
        }
        Ok(())
    }

    /// Releases every lock `txn_id` holds and forgets its wait-for edges.
    pub fn release_all(&self, txn_id: TransactionID) -> Result<()> {
        let pages = self
            .pages_by_txn_id
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .remove(&txn_id)
            .unwrap_or_default();
        for page_id in pages {
            self.release_page_lock(txn_id, page_id)?;
        }
        self.graph()?.remove_all(txn_id);
        debug!(txn = %txn_id, "released all locks");
        Ok(())
    }

    pub fn holds(&self, txn_id: TransactionID, page_id: PageID) -> Result<bool> {
        let page_locks = self.page_locks()?;
        match page_locks.get(&page_id) {
            Some(page_lock) => Ok(page_lock.state()?.holds(txn_id, Permission::ReadOnly)),
            None => Ok(false),
        }
    }

    pub fn holders(&self, page_id: PageID) -> Result<Option<LockHolders>> {
        let page_locks = self.page_locks()?;
        match page_locks.get(&page_id) {
            Some(page_lock) => Ok(page_lock.state()?.holders()),
            None => Ok(None),
        }
    }

    pub fn locked_pages(&self, txn_id: TransactionID) -> Result<Vec<PageID>> {
        let mut pages = self
            .pages_by_txn_id
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .get(&txn_id)
            .map(|pages| pages.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        pages.sort();
        Ok(pages)
    }

    /// Transactions `txn_id` is currently waiting on.
    pub fn waiting_on(&self, txn_id: TransactionID) -> Result<Vec<TransactionID>> {
        Ok(self.graph()?.blockers_of(txn_id))
    }

    fn release_page_lock(&self, txn_id: TransactionID, page_id: PageID) -> Result<()> {
        let mut page_locks = self.page_locks()?;
        let page_lock = page_locks.get(&page_id).ok_or_else(|| {
            Error::invalid_state(format!("{} holds no lock on page {}", txn_id, page_id))
        })?;
        let mut state = page_lock.state()?;
        if !state.release(txn_id) {
            return Err(Error::invalid_state(format!(
                "{} holds no lock on page {}",
                txn_id, page_id
            )));
        }
        page_lock.condvar.notify_all();
        let unused = state.is_free() && Arc::strong_count(page_lock) == 1;
        drop(state);
        if unused {
            page_locks.remove(&page_id);
        }
        Ok(())
    }

    fn page_lock(&self, page_id: PageID) -> Result<Arc<PageLock>> {
        Ok(self.page_locks()?.entry(page_id).or_default().clone())
    }

    /// Drops the entry for `page_id` if it has no holders and nobody else
    /// references it. Clones are only made under the table lock, so the count
    /// cannot grow while it is held.
    fn prune(&self, page_id: PageID) -> Result<()> {
        let mut page_locks = self.page_locks()?;
        if let Some(page_lock) = page_locks.get(&page_id) {
            if Arc::strong_count(page_lock) == 1 && page_lock.state()?.is_free() {
                page_locks.remove(&page_id);
            }
        }
        Ok(())
    }

    fn page_locks(&self) -> Result<MutexGuard<'_, HashMap<PageID, Arc<PageLock>>>> {
        self.page_locks.lock().map_err(|_| Error::LockPoisoned)
    }

    fn graph(&self) -> Result<MutexGuard<'_, WaitForGraph>> {
        self.wait_for_graph.lock().map_err(|_| Error::LockPoisoned)
    }
}
