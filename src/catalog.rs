use std::{collections::HashMap, sync::Arc};

use crate::{
    common::{TableID, INVALID_TABLE_ID},
    disk::PageStore,
    error::{Error, Result},
};

/// Fixed width of a varchar payload.
pub const STRING_LEN: usize = 128;

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Schema {
    pub columns: Vec<Column>,
}
impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|c| c.data_type.size()).sum()
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}
impl Column {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DataType {
    Integer,
    Varchar,
}
impl DataType {
    /// Bytes a value of this type occupies in a tuple. Varchars carry a
    /// 4-byte length prefix before the padded payload.
    pub fn size(&self) -> usize {
        match self {
            DataType::Integer => 4,
            DataType::Varchar => STRING_LEN + 4,
        }
    }
}

struct TableInfo {
    name: String,
    schema: Schema,
    store: Arc<dyn PageStore>,
}

pub struct Catalog {
    tables: HashMap<TableID, TableInfo>,
    table_ids: HashMap<String, TableID>,
    next_table_id: TableID,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            table_ids: HashMap::new(),
            next_table_id: TableID(INVALID_TABLE_ID.0 + 1),
        }
    }
}

impl Catalog {
    /// Reserves the id the next `add_table` will assign, so a store can be
    /// created knowing its table id.
    pub fn next_table_id(&self) -> TableID {
        self.next_table_id
    }
    pub fn add_table(
        &mut self,
        name: &str,
        schema: Schema,
        store: Arc<dyn PageStore>,
    ) -> Result<TableID> {
        if self.table_ids.contains_key(name) {
            return Err(Error::TableExists(name.to_string()));
        }
        let table_id = self.next_table_id;
        self.next_table_id.0 += 1;
        self.table_ids.insert(name.to_string(), table_id);
        self.tables.insert(
            table_id,
            TableInfo {
                name: name.to_string(),
                schema,
                store,
            },
        );
        Ok(table_id)
    }
    pub fn table_id(&self, name: &str) -> Result<TableID> {
        self.table_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }
    pub fn table_name(&self, table_id: TableID) -> Result<&str> {
        Ok(&self.table(table_id)?.name)
    }
    pub fn schema(&self, table_id: TableID) -> Result<&Schema> {
        Ok(&self.table(table_id)?.schema)
    }
    pub fn page_store(&self, table_id: TableID) -> Result<Arc<dyn PageStore>> {
        Ok(self.table(table_id)?.store.clone())
    }
    pub fn table_ids(&self) -> Vec<TableID> {
        let mut ids = self.tables.keys().copied().collect::<Vec<_>>();
        ids.sort();
        ids
    }
    fn table(&self, table_id: TableID) -> Result<&TableInfo> {
        self.tables
            .get(&table_id)
            .ok_or(Error::UnknownTable(table_id))
    }
}
