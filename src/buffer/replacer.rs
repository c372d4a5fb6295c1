use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::PageID;

/// A page the buffer pool may drop, with the stamp of its last access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub page_id: PageID,
    pub last_access: u64,
}

pub trait Replaceable {
    fn record_access(&self) -> u64;
    fn victim(&self, candidates: &[Candidate]) -> Option<PageID>;
}

pub enum Replacer {
    LRU(LRUReplacer),
}
impl Replacer {
    pub fn record_access(&self) -> u64 {
        match self {
            Self::LRU(replacer) => replacer.record_access(),
        }
    }
    pub fn victim(&self, candidates: &[Candidate]) -> Option<PageID> {
        match self {
            Self::LRU(replacer) => replacer.victim(candidates),
        }
    }
}

/// Least recently used. Accesses are stamped from a shared counter so frames
/// in different shards can be compared without a common lock.
#[derive(Default)]
pub struct LRUReplacer {
    counter: AtomicU64,
}
impl LRUReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}
impl Replaceable for LRUReplacer {
    fn record_access(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
    fn victim(&self, candidates: &[Candidate]) -> Option<PageID> {
        candidates
            .iter()
            .min_by_key(|c| (c.last_access, c.page_id))
            .map(|c| c.page_id)
    }
}
