pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod config;
pub mod deadlock;
pub mod disk;
pub mod error;
pub mod instance;
pub mod ledger;
pub mod lock;
pub mod page;

#[cfg(test)]
pub mod test_helpers;
