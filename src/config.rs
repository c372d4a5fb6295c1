use std::path::PathBuf;

use crate::common::DEFAULT_PAGES;

pub const DEFAULT_DATA_DIR: &str = "junkpool-data";
pub const DEFAULT_MAX_RETRIES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding one `<table>.tbl` file per table.
    pub data_dir: PathBuf,
    /// Buffer pool capacity in pages.
    pub num_pages: usize,
    /// How many times `TransactionManager::run` retries after a deadlock.
    pub max_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            num_pages: DEFAULT_PAGES,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
    pub fn with_num_pages(mut self, num_pages: usize) -> Self {
        self.num_pages = num_pages;
        self
    }
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }
}
