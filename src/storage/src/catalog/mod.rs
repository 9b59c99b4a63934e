// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Table/column definitions, kept independent of row data so the catalog can be replayed from
//! the WAL before a single `NodeGroup` is touched. `DiskArrayCollection` is the on-disk shape the
//! node-group metadata arrays (row counts, residency, compression metadata) are persisted in
//! alongside the catalog: a linked list of fixed-size header pages rather than one growable file.

mod disk_array;

pub use disk_array::{DiskArrayCollection, DiskArrayHeader};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use kuzu_common::error::{StorageError, StorageResult};
use kuzu_common::types::{LogicalType, TableId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: LogicalType,
}

/// One node table's schema: column list plus which column (by position) is the declared primary
/// key. Carried by value into `Table` at creation time and re-derived from a `CatalogDelta` WAL
/// record on recovery, so it must stay plain data with no handles into live storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTableCatalogEntry {
    pub table_id: TableId,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub pk_column_idx: usize,
}

impl NodeTableCatalogEntry {
    pub fn pk_column(&self) -> &ColumnDef {
        &self.columns[self.pk_column_idx]
    }

    pub fn column_types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }
}

/// Durable home for table/column definitions. Structural mutation (`create_table`) is the only
/// operation that needs exclusive access; reads take the table list by clone so callers never
/// hold the catalog lock across a scan or an insert.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, NodeTableCatalogEntry>>,
    name_to_id: RwLock<HashMap<String, TableId>>,
    next_table_id: AtomicU64,
    disk_arrays: DiskArrayCollection,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn disk_arrays(&self) -> &DiskArrayCollection {
        &self.disk_arrays
    }

    /// Registers a new table, rejecting a duplicate name or a PK column index outside the
    /// declared column list. `explicit_table_id` lets WAL replay reconstruct a table under its
    /// originally-assigned id instead of minting a fresh one.
    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        pk_column_idx: usize,
        explicit_table_id: Option<TableId>,
    ) -> StorageResult<NodeTableCatalogEntry> {
        if pk_column_idx >= columns.len() {
            return Err(StorageError::InvalidSchema(format!(
                "primary key column index {pk_column_idx} is out of range for table '{name}'"
            )));
        }
        let mut name_to_id = self.name_to_id.write().unwrap();
        if name_to_id.contains_key(name) {
            return Err(StorageError::TableAlreadyExists(name.to_string()));
        }
        let table_id = match explicit_table_id {
            Some(id) => {
                let mut next = self.next_table_id.load(Ordering::Acquire);
                while id >= next {
                    next = id + 1;
                }
                self.next_table_id.fetch_max(next, Ordering::AcqRel);
                id
            }
            None => self.next_table_id.fetch_add(1, Ordering::AcqRel),
        };
        let entry = NodeTableCatalogEntry {
            table_id,
            name: name.to_string(),
            columns,
            pk_column_idx,
        };
        name_to_id.insert(name.to_string(), table_id);
        self.tables
            .write()
            .unwrap()
            .insert(table_id, entry.clone());
        Ok(entry)
    }

    pub fn get_table(&self, table_id: TableId) -> StorageResult<NodeTableCatalogEntry> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound(table_id.to_string()))
    }

    pub fn get_table_id_by_name(&self, name: &str) -> StorageResult<TableId> {
        self.name_to_id
            .read()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.read().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<ColumnDef> {
        vec![
            ColumnDef {
                name: "id".into(),
                data_type: LogicalType::Int64,
            },
            ColumnDef {
                name: "name".into(),
                data_type: LogicalType::String,
            },
        ]
    }

    #[test]
    fn create_then_lookup_table_by_name() {
        let catalog = Catalog::new();
        let entry = catalog.create_table("person", cols(), 0, None).unwrap();
        let id = catalog.get_table_id_by_name("person").unwrap();
        assert_eq!(id, entry.table_id);
        assert_eq!(catalog.get_table(id).unwrap().name, "person");
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let catalog = Catalog::new();
        catalog.create_table("person", cols(), 0, None).unwrap();
        let err = catalog.create_table("person", cols(), 0, None).unwrap_err();
        assert!(matches!(err, StorageError::TableAlreadyExists(_)));
    }

    #[test]
    fn out_of_range_pk_column_is_rejected() {
        let catalog = Catalog::new();
        let err = catalog.create_table("person", cols(), 5, None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidSchema(_)));
    }

    #[test]
    fn explicit_table_id_advances_the_allocator() {
        let catalog = Catalog::new();
        catalog
            .create_table("old", cols(), 0, Some(41))
            .unwrap();
        let next = catalog.create_table("new", cols(), 0, None).unwrap();
        assert_eq!(next.table_id, 42);
    }
}
