use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tracing::{debug, info};

use crate::{
    buffer::BufferPool,
    common::TransactionID,
    error::{Error, Result},
};

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum TransactionStatus {
    Running,
    Aborted,
    Committed,
}

/// Hands out transaction ids and ends each transaction exactly once.
pub struct TransactionManager {
    buffer_pool: Arc<BufferPool>,
    next_txn_id: AtomicU64,
    statuses: Mutex<HashMap<TransactionID, TransactionStatus>>,
    max_retries: usize,
}

impl TransactionManager {
    pub fn new(buffer_pool: Arc<BufferPool>, max_retries: usize) -> Self {
        Self {
            buffer_pool,
            next_txn_id: AtomicU64::new(TransactionID::NULL.0 + 1),
            statuses: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    pub fn begin(&self) -> Result<TransactionID> {
        let txn_id = TransactionID(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.statuses()?
            .insert(txn_id, TransactionStatus::Running);
        debug!(txn = %txn_id, "begin");
        Ok(txn_id)
    }

    pub fn commit(&self, txn_id: TransactionID) -> Result<()> {
        self.finish(txn_id, true)
    }

    pub fn abort(&self, txn_id: TransactionID) -> Result<()> {
        self.finish(txn_id, false)
    }

    pub fn status(&self, txn_id: TransactionID) -> Result<Option<TransactionStatus>> {
        Ok(self.statuses()?.get(&txn_id).copied())
    }

    pub fn running(&self) -> Result<Vec<TransactionID>> {
        let mut txn_ids = self
            .statuses()?
            .iter()
            .filter(|(_, &status)| status == TransactionStatus::Running)
            .map(|(&txn_id, _)| txn_id)
            .collect::<Vec<_>>();
        txn_ids.sort();
        Ok(txn_ids)
    }

    /// Runs `f` in a fresh transaction and commits it. A transaction refused
    /// by deadlock detection is aborted and `f` runs again under a new id, up
    /// to `max_retries` times; any other error aborts and is returned.
    pub fn run<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(TransactionID) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            let txn_id = self.begin()?;
            match f(txn_id) {
                Ok(value) => {
                    self.commit(txn_id)?;
                    return Ok(value);
                }
                Err(e) => {
                    self.abort(txn_id)?;
                    if !e.is_retryable() || attempt >= self.max_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    info!(txn = %txn_id, attempt, "retrying after deadlock");
                }
            }
        }
    }

    fn finish(&self, txn_id: TransactionID, commit: bool) -> Result<()> {
        {
            let statuses = self.statuses()?;
            match statuses.get(&txn_id) {
                Some(TransactionStatus::Running) => {}
                Some(status) => {
                    return Err(Error::invalid_state(format!(
                        "{} already finished as {:?}",
                        txn_id, status
                    )))
                }
                None => return Err(Error::invalid_state(format!("unknown transaction {}", txn_id))),
            }
        }
        let result = self.buffer_pool.transaction_complete(txn_id, commit);
        let status = if commit && result.is_ok() {
            TransactionStatus::Committed
        } else {
            TransactionStatus::Aborted
        };
        self.statuses()?.insert(txn_id, status);
        result
    }

    fn statuses(&self) -> Result<MutexGuard<'_, HashMap<TransactionID, TransactionStatus>>> {
        self.statuses.lock().map_err(|_| Error::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread};

    use anyhow::{anyhow, Result};

    use super::*;
    use crate::{
        common::Permission,
        disk::MemoryPageStore,
        test_helpers::{page, setup_buffer_pool, stored_bytes},
    };

    fn setup(
        num_pages: u32,
        max_retries: usize,
    ) -> Result<(Arc<TransactionManager>, Arc<MemoryPageStore>)> {
        let (buffer_pool, store) = setup_buffer_pool(4, num_pages)?;
        let transaction_manager = TransactionManager::new(Arc::new(buffer_pool), max_retries);
        Ok((Arc::new(transaction_manager), store))
    }

    #[test]
    fn test_transaction_manager_begin() -> Result<()> {
        let (transaction_manager, _) = setup(1, 0)?;
        let txn_id = transaction_manager.begin()?;
        assert_eq!(txn_id, TransactionID(1));
        assert_eq!(transaction_manager.begin()?, TransactionID(2));
        assert_eq!(
            transaction_manager.status(txn_id)?,
            Some(TransactionStatus::Running)
        );
        assert_eq!(
            transaction_manager.running()?,
            vec![TransactionID(1), TransactionID(2)]
        );
        Ok(())
    }

    #[test]
    fn test_transaction_manager_commit() -> Result<()> {
        let (transaction_manager, store) = setup(1, 0)?;
        let txn_id = transaction_manager.begin()?;
        let handle = transaction_manager
            .buffer_pool
            .get_page(txn_id, page(0), Permission::ReadWrite)?;
        handle.write().map_err(|_| anyhow!("lock error"))?.data_mut()[0] = 1;
        transaction_manager.commit(txn_id)?;

        assert_eq!(
            transaction_manager.status(txn_id)?,
            Some(TransactionStatus::Committed)
        );
        assert_eq!(stored_bytes(&*store, 0)?[0], 1);
        assert!(transaction_manager.running()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_transaction_manager_abort() -> Result<()> {
        let (transaction_manager, store) = setup(1, 0)?;
        let txn_id = transaction_manager.begin()?;
        let handle = transaction_manager
            .buffer_pool
            .get_page(txn_id, page(0), Permission::ReadWrite)?;
        handle.write().map_err(|_| anyhow!("lock error"))?.data_mut()[0] = 1;
        transaction_manager.abort(txn_id)?;

        assert_eq!(
            transaction_manager.status(txn_id)?,
            Some(TransactionStatus::Aborted)
        );
        assert_eq!(stored_bytes(&*store, 0)?[0], 0);
        Ok(())
    }

    #[test]
    fn test_finish_twice_is_invalid() -> Result<()> {
        let (transaction_manager, _) = setup(1, 0)?;
        let txn_id = transaction_manager.begin()?;
        transaction_manager.commit(txn_id)?;
        assert!(matches!(
            transaction_manager.abort(txn_id),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            transaction_manager.commit(TransactionID(99)),
            Err(Error::InvalidState(_))
        ));
        Ok(())
    }

    #[test]
    fn test_run_returns_non_retryable_errors() -> Result<()> {
        let (transaction_manager, _) = setup(1, 0)?;
        let calls = AtomicUsize::new(0);
        let result: crate::error::Result<()> = transaction_manager.run(|txn_id| {
            calls.fetch_add(1, Ordering::SeqCst);
            transaction_manager
                .buffer_pool
                .get_page(txn_id, page(5), Permission::ReadOnly)?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::PageOutOfRange { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            transaction_manager.status(TransactionID(1))?,
            Some(TransactionStatus::Aborted)
        );
        Ok(())
    }

    #[test]
    fn test_run_retries_deadlocks() -> Result<()> {
        // every round of an upgrade deadlock lets one transaction through
        let (transaction_manager, store) = setup(2, 1_000)?;
        let mut handles = vec![];
        for (first, second) in [(0, 1), (1, 0), (0, 1), (1, 0)] {
            let transaction_manager = transaction_manager.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                for _ in 0..5 {
                    transaction_manager.run(|txn_id| {
                        let buffer_pool = &transaction_manager.buffer_pool;
                        for n in [first, second] {
                            let handle = buffer_pool.get_page(txn_id, page(n), Permission::ReadOnly)?;
                            let value = handle.read().map_err(|_| Error::LockPoisoned)?.data()[0];
                            let handle = buffer_pool.get_page(txn_id, page(n), Permission::ReadWrite)?;
                            handle.write().map_err(|_| Error::LockPoisoned)?.data_mut()[0] = value + 1;
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().map_err(|_| anyhow!("thread error"))??;
        }
        assert_eq!(stored_bytes(&*store, 0)?[0], 20);
        assert_eq!(stored_bytes(&*store, 1)?[0], 20);
        assert!(transaction_manager.running()?.is_empty());
        Ok(())
    }
}
