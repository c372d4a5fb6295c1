use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use tracing::{info, warn};

use crate::{
    buffer::BufferPool,
    catalog::{Catalog, Schema},
    common::{TableID, TransactionID},
    concurrency::TransactionManager,
    config::Config,
    disk::HeapFileStore,
    error::{Error, Result},
    lock::LockManager,
};

const TABLE_FILE_EXTENSION: &str = "tbl";

pub struct Instance {
    pub config: Config,
    pub catalog: Arc<RwLock<Catalog>>,
    pub lock_manager: Arc<LockManager>,
    pub buffer_pool: Arc<BufferPool>,
    pub transaction_manager: Arc<TransactionManager>,
}

impl Instance {
    /// Opens the data directory named by `config`. With `init` the directory
    /// is wiped first; otherwise its table files are attached in name order.
    pub fn new(config: Config, init: bool) -> Result<Self> {
        let dir = &config.data_dir;
        if init && dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;

        let mut catalog = Catalog::default();
        if !init {
            for (name, path) in Self::table_files(dir)? {
                let store = HeapFileStore::new(catalog.next_table_id(), path)?;
                catalog.add_table(&name, Schema::default(), Arc::new(store))?;
            }
        }
        let catalog = Arc::new(RwLock::new(catalog));
        let lock_manager = Arc::new(LockManager::default());
        let buffer_pool = Arc::new(BufferPool::new(
            catalog.clone(),
            lock_manager.clone(),
            config.num_pages,
        )?);
        let transaction_manager = Arc::new(TransactionManager::new(
            buffer_pool.clone(),
            config.max_retries,
        ));
        info!(dir = %dir.display(), num_pages = config.num_pages, init, "instance opened");

        Ok(Self {
            config,
            catalog,
            lock_manager,
            buffer_pool,
            transaction_manager,
        })
    }

    // DDL
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<TableID> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::invalid_state(format!("invalid table name {:?}", name)));
        }
        let mut catalog = self.catalog.write().map_err(|_| Error::LockPoisoned)?;
        if catalog.table_id(name).is_ok() {
            return Err(Error::TableExists(name.to_string()));
        }
        let path = self
            .config
            .data_dir
            .join(format!("{}.{}", name, TABLE_FILE_EXTENSION));
        let store = HeapFileStore::new(catalog.next_table_id(), path)?;
        let table_id = catalog.add_table(name, schema, Arc::new(store))?;
        info!(table = name, table_id = %table_id, "table created");
        Ok(table_id)
    }

    pub fn table_id(&self, name: &str) -> Result<TableID> {
        self.catalog
            .read()
            .map_err(|_| Error::LockPoisoned)?
            .table_id(name)
    }

    // DCL
    pub fn begin(&self) -> Result<TransactionID> {
        self.transaction_manager.begin()
    }
    pub fn commit(&self, txn_id: TransactionID) -> Result<()> {
        self.transaction_manager.commit(txn_id)
    }
    pub fn rollback(&self, txn_id: TransactionID) -> Result<()> {
        self.transaction_manager.abort(txn_id)
    }

    /// Aborts whatever is still running, then writes back the remaining
    /// dirty pages. Uncommitted changes never reach the table files.
    pub fn shutdown(&self) -> Result<()> {
        for txn_id in self.transaction_manager.running()? {
            warn!(txn = %txn_id, "aborting running transaction at shutdown");
            self.transaction_manager.abort(txn_id)?;
        }
        // ids that went to the buffer pool without `begin`
        for txn_id in self.buffer_pool.active_transactions()? {
            warn!(txn = %txn_id, "aborting running transaction at shutdown");
            self.buffer_pool.transaction_complete(txn_id, false)?;
        }
        self.buffer_pool.flush_all_pages()?;
        info!("instance shut down");
        Ok(())
    }

    fn table_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut files = vec![];
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TABLE_FILE_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((name.to_string(), path.to_path_buf()));
            }
        }
        files.sort();
        Ok(files)
    }
}
