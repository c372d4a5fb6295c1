use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    common::{PageID, TransactionID},
    error::{Error, Result},
};

#[derive(Debug, Default)]
struct TransactionPages {
    touched: BTreeSet<PageID>,
    dirty: BTreeSet<PageID>,
}

/// Pages each running transaction has touched and dirtied. Consulted at
/// commit and abort to decide what to flush or throw away.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    transactions: HashMap<TransactionID, TransactionPages>,
    forgotten: HashSet<TransactionID>,
}

impl TransactionLedger {
    pub fn record_touched(&mut self, txn_id: TransactionID, page_id: PageID) -> Result<()> {
        self.entry(txn_id)?.touched.insert(page_id);
        Ok(())
    }

    /// Marking dirty implies touched.
    pub fn mark_dirty(&mut self, txn_id: TransactionID, page_id: PageID) -> Result<()> {
        let pages = self.entry(txn_id)?;
        pages.touched.insert(page_id);
        pages.dirty.insert(page_id);
        Ok(())
    }

    pub fn dirty_pages_of(&self, txn_id: TransactionID) -> Result<Vec<PageID>> {
        self.check_live(txn_id)?;
        Ok(self
            .transactions
            .get(&txn_id)
            .map(|pages| pages.dirty.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn touched_pages_of(&self, txn_id: TransactionID) -> Result<Vec<PageID>> {
        self.check_live(txn_id)?;
        Ok(self
            .transactions
            .get(&txn_id)
            .map(|pages| pages.touched.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Ends bookkeeping for `txn_id`. Any later use of the id is an error.
    pub fn forget(&mut self, txn_id: TransactionID) -> Result<()> {
        self.check_live(txn_id)?;
        self.transactions.remove(&txn_id);
        self.forgotten.insert(txn_id);
        Ok(())
    }

    pub fn is_forgotten(&self, txn_id: TransactionID) -> bool {
        self.forgotten.contains(&txn_id)
    }

    pub fn active_transactions(&self) -> Vec<TransactionID> {
        let mut txn_ids = self.transactions.keys().copied().collect::<Vec<_>>();
        txn_ids.sort();
        txn_ids
    }

    fn entry(&mut self, txn_id: TransactionID) -> Result<&mut TransactionPages> {
        self.check_live(txn_id)?;
        Ok(self.transactions.entry(txn_id).or_default())
    }

    fn check_live(&self, txn_id: TransactionID) -> Result<()> {
        if txn_id.is_null() {
            return Err(Error::invalid_state("the null transaction has no pages"));
        }
        if self.forgotten.contains(&txn_id) {
            return Err(Error::invalid_state(format!(
                "{} has already completed",
                txn_id
            )));
        }
        Ok(())
    }
}
