use std::fmt;

pub const PAGE_SIZE: usize = 4096;
pub const DEFAULT_PAGES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableID(pub u32);
pub const INVALID_TABLE_ID: TableID = TableID(0);
impl fmt::Display for TableID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a page: the table it belongs to and its position in that
/// table's page store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageID {
    pub table_id: TableID,
    pub page_number: u32,
}
impl PageID {
    pub fn new(table_id: TableID, page_number: u32) -> Self {
        Self {
            table_id,
            page_number,
        }
    }
}
impl fmt::Display for PageID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionID(pub u64);
impl TransactionID {
    /// Used for metadata-only reads that do not run inside a transaction.
    pub const NULL: TransactionID = TransactionID(0);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}
impl fmt::Display for TransactionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}
impl Permission {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Permission::ReadWrite)
    }
}
