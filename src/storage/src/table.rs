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

//! One node table: an ordered list of `NodeGroup`s plus the `PrimaryKeyIndex` that maps its
//! declared PK column to a table-relative row offset. This is the row-level counterpart to
//! `catalog::NodeTableCatalogEntry`, which only carries the schema.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use kuzu_common::constants::NODE_GROUP_SIZE;
use kuzu_common::error::{StorageError, StorageResult};
use kuzu_common::types::{LogicalType, Offset, TableId, Value};

use crate::catalog::NodeTableCatalogEntry;
use crate::index::{IndexBuilder, IndexBuilderSharedState, PkValue, PrimaryKeyIndex};
use crate::node_group::{NodeGroup, NodeGroupScanState};
use crate::transaction::{Transaction, UndoEntry};
use crate::vector::ValueVector;

/// A bound insert as the execution layer would hand it to the storage core: one `Vec<Value>` per
/// column, all the same length (one entry per row being appended).
pub struct BoundInsert {
    pub table_id: TableId,
    pub values: Vec<Vec<Value>>,
}

/// A bound scan: which table, which columns, in catalog column order.
pub struct BoundScan {
    pub table_id: TableId,
    pub column_ids: Vec<usize>,
}

fn pk_value_of(value: &Value) -> StorageResult<PkValue> {
    match value {
        Value::Int64(v) => Ok(PkValue::Int64(*v)),
        Value::String(v) => Ok(PkValue::String(v.clone())),
        Value::Null => Err(StorageError::NullPrimaryKey("primary key".into())),
        other => Err(StorageError::TypeMismatch(format!(
            "{other:?} is not a valid primary key type"
        ))),
    }
}

/// Table-relative row addressing: which `NodeGroup` (by position in `node_groups`) and which row
/// within it. Node groups are addressed by index rather than by pointer so the table can grow
/// without invalidating offsets already handed out through the PK index.
fn locate(row_offset: Offset) -> (usize, u64) {
    (
        (row_offset / NODE_GROUP_SIZE) as usize,
        row_offset % NODE_GROUP_SIZE,
    )
}

pub struct Table {
    catalog_entry: NodeTableCatalogEntry,
    node_groups: RwLock<Vec<NodeGroup>>,
    pk_index: Arc<PrimaryKeyIndex>,
}

impl Table {
    pub fn new(catalog_entry: NodeTableCatalogEntry) -> Self {
        Table {
            catalog_entry,
            node_groups: RwLock::new(Vec::new()),
            pk_index: Arc::new(PrimaryKeyIndex::new()),
        }
    }

    pub fn catalog_entry(&self) -> &NodeTableCatalogEntry {
        &self.catalog_entry
    }

    pub fn pk_index(&self) -> &PrimaryKeyIndex {
        &self.pk_index
    }

    fn column_types(&self) -> Vec<LogicalType> {
        self.catalog_entry.column_types()
    }

    /// Appends `values` as new rows, splitting the batch across as many `NodeGroup`s as needed
    /// when it crosses a `NODE_GROUP_SIZE` boundary (mirroring how a single `NodeGroup` already
    /// splits its own appends across `ChunkedNodeGroup`s). Returns the base table-relative row
    /// offset rows were appended at, plus the `(node_group_idx, chunked_group_idx,
    /// start_row_in_chunk, num_rows)` of every chunked-group segment actually written — the
    /// granularity `UndoEntry::Insert` and the commit-time version translation work at.
    fn append_rows(
        &self,
        transaction_id: u64,
        values: &[Vec<Value>],
        num_rows: u64,
    ) -> StorageResult<(Offset, Vec<(u64, usize, u64, u64)>)> {
        let mut first_offset = None;
        let mut written = 0u64;
        let mut touched = Vec::new();
        while written < num_rows {
            let (group_idx, group_start_row, batch_len, segments) = {
                let mut groups = self.node_groups.write().unwrap();
                if groups.last().map(|g| g.num_rows_left_to_append() == 0).unwrap_or(true) {
                    let idx = groups.len() as u64;
                    groups.push(NodeGroup::new(idx, self.column_types()));
                }
                let group_idx = groups.len() as u64 - 1;
                let group = groups.last().unwrap();
                let batch_len = group.num_rows_left_to_append().min(num_rows - written);
                let slice: Vec<Vec<Value>> = values
                    .iter()
                    .map(|col| col[written as usize..(written + batch_len) as usize].to_vec())
                    .collect();
                let (group_start_row, segments) = group.append(transaction_id, &slice, batch_len)?;
                (group_idx, group_start_row, batch_len, segments)
            };
            let offset = group_idx * NODE_GROUP_SIZE + group_start_row;
            if first_offset.is_none() {
                first_offset = Some(offset);
            }
            for (chunked_group_idx, start_row_in_chunk, num_rows_in_segment) in segments {
                touched.push((group_idx, chunked_group_idx, start_row_in_chunk, num_rows_in_segment));
            }
            written += batch_len;
        }
        Ok((first_offset.unwrap(), touched))
    }

    fn push_insert_undo_entries(&self, txn: &Transaction, touched: &[(u64, usize, u64, u64)]) {
        for &(node_group_idx, chunked_group_idx, start_row, num_rows) in touched {
            txn.undo_buffer().push(UndoEntry::Insert {
                table_id: self.catalog_entry.table_id,
                node_group_idx,
                chunked_group_idx,
                start_row,
                num_rows,
            });
        }
    }

    /// Appends `values` as new rows, checking the PK column for nulls and duplicates before a
    /// single row is written (so a rejected insert never partially lands). Returns the
    /// table-relative row offset of each new row, in the same order as the input columns.
    pub fn insert(&self, txn: &Transaction, values: &[Vec<Value>]) -> StorageResult<Vec<Offset>> {
        let pk_column = &values[self.catalog_entry.pk_column_idx];
        let pk_values: Vec<PkValue> = pk_column.iter().map(pk_value_of).collect::<StorageResult<_>>()?;
        for key in &pk_values {
            if self.pk_index.contains(key) {
                return Err(StorageError::DuplicatePrimaryKey(format!("{key:?}")));
            }
        }
        let num_rows = pk_values.len() as u64;
        let (base_offset, touched) = self.append_rows(txn.id(), values, num_rows)?;
        self.push_insert_undo_entries(txn, &touched);
        let mut offsets = Vec::with_capacity(pk_values.len());
        for (i, key) in pk_values.into_iter().enumerate() {
            let offset = base_offset + i as u64;
            // Can't happen in practice (we just reserved a fresh, disjoint row range), but keep
            // the index consistent with "no key inserted twice" even under a future concurrent
            // insert path that reorders this loop.
            self.pk_index.insert(key, offset)?;
            offsets.push(offset);
        }
        Ok(offsets)
    }

    /// Appends `values` the same way `insert` does, but lands the new rows' primary keys through
    /// the parallel `IndexBuilder` pipeline instead of one `pk_index.insert` per row. Worthwhile
    /// once a batch is large enough to amortize the thread fan-out; `insert` stays the right call
    /// for single-row writes.
    pub fn insert_batch(&self, txn: &Transaction, values: &[Vec<Value>]) -> StorageResult<Vec<Offset>> {
        let pk_column = &values[self.catalog_entry.pk_column_idx];
        let pk_values: Vec<PkValue> = pk_column.iter().map(pk_value_of).collect::<StorageResult<_>>()?;
        let mut seen_in_batch = HashSet::with_capacity(pk_values.len());
        for key in &pk_values {
            if self.pk_index.contains(key) || !seen_in_batch.insert(key.clone()) {
                return Err(StorageError::DuplicatePrimaryKey(format!("{key:?}")));
            }
        }
        let num_rows = pk_values.len() as u64;
        let (base_offset, touched) = self.append_rows(txn.id(), values, num_rows)?;
        self.push_insert_undo_entries(txn, &touched);
        let offsets: Vec<Offset> = (0..pk_values.len() as u64).map(|i| base_offset + i).collect();

        let shared_state = IndexBuilderSharedState::new(self.pk_index.clone());
        let pairs: Vec<(PkValue, Offset)> = pk_values.into_iter().zip(offsets.iter().copied()).collect();
        let num_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(pairs.len().max(1));
        let chunk_size = pairs.len().div_ceil(num_workers).max(1);
        std::thread::scope(|scope| {
            for chunk in pairs.chunks(chunk_size) {
                let shared_state = shared_state.clone();
                scope.spawn(move || {
                    let mut builder = IndexBuilder::new(shared_state);
                    let token = builder.producer_token();
                    for (key, offset) in chunk {
                        builder.insert(key.clone(), *offset);
                    }
                    builder.finished_producing();
                    token.quit();
                });
            }
        });
        shared_state.consume();
        shared_state.flush();

        Ok(offsets)
    }

    /// Replays a previously-logged insert at WAL-recovery time: same effect as `insert`, but
    /// duplicate-PK is not re-validated (the original insert already passed that check) so replay
    /// can't fail on data that was valid when it was first written. Returns the touched chunked-
    /// group segments so the caller can translate their version entries to the record's
    /// `commit_ts` the same way a live commit would.
    pub fn replay_insert(
        &self,
        transaction_id: u64,
        values: &[Vec<Value>],
    ) -> StorageResult<Vec<(u64, usize, u64, u64)>> {
        let pk_column = &values[self.catalog_entry.pk_column_idx];
        let num_rows = pk_column.len() as u64;
        let (base_offset, touched) = self.append_rows(transaction_id, values, num_rows)?;
        for (i, value) in pk_column.iter().enumerate() {
            let key = pk_value_of(value)?;
            let offset = base_offset + i as u64;
            let _ = self.pk_index.insert(key, offset);
        }
        Ok(touched)
    }

    pub fn lookup_offset(&self, key: &PkValue) -> StorageResult<Offset> {
        self.pk_index
            .lookup(key)
            .ok_or_else(|| StorageError::PrimaryKeyNotFound(format!("{key:?}")))
    }

    fn delete_row(&self, transaction_id: u64, offset: Offset) -> StorageResult<bool> {
        let (group_idx, row_in_group) = locate(offset);
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(group_idx)
            .ok_or_else(|| StorageError::InvalidSchema("row offset out of range".into()))?;
        group.delete(transaction_id, row_in_group)
    }

    /// Deletes the row with primary key `key`, removing it from the PK index immediately (no
    /// separate vacuum pass models that in this crate) and marking it deleted in its node group's
    /// `VersionInfo` so in-flight readers with an older snapshot still see it.
    pub fn delete_by_pk(&self, txn: &Transaction, key: &PkValue) -> StorageResult<Offset> {
        let offset = self.lookup_offset(key)?;
        self.delete_by_offset(txn, offset)?;
        self.pk_index.delete(key)?;
        Ok(offset)
    }

    pub fn delete_by_offset(&self, txn: &Transaction, offset: Offset) -> StorageResult<bool> {
        let (group_idx, row_in_group) = locate(offset);
        let deleted = self.delete_row(txn.id(), offset)?;
        if deleted {
            txn.undo_buffer().push(UndoEntry::Delete {
                table_id: self.catalog_entry.table_id,
                node_group_idx: group_idx as u64,
                row_idx: row_in_group,
            });
        }
        Ok(deleted)
    }

    /// Replays a previously-logged delete at WAL-recovery time: the undo buffer is irrelevant
    /// once a transaction is known-committed, so this skips straight to the row mutation.
    pub fn replay_delete(&self, transaction_id: u64, offset: Offset) -> StorageResult<bool> {
        self.delete_row(transaction_id, offset)
    }

    fn update_value(&self, offset: Offset, column_id: usize, value: Value) -> StorageResult<()> {
        let (group_idx, row_in_group) = locate(offset);
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(group_idx)
            .ok_or_else(|| StorageError::InvalidSchema("row offset out of range".into()))?;
        group.update(row_in_group, column_id, value)
    }

    /// Replays a previously-logged update at WAL-recovery time, and is also how `rollback`
    /// restores a row's `previous_value` from an `UndoEntry::Update` — neither path records a
    /// fresh undo entry of its own.
    pub fn replay_update(&self, offset: Offset, column_id: usize, value: Value) -> StorageResult<()> {
        self.update_value(offset, column_id, value)
    }

    /// Overwrites one column of the row at `offset`, recording the prior value in `txn`'s undo
    /// buffer so a rollback can restore it.
    pub fn update(
        &self,
        txn: &Transaction,
        offset: Offset,
        column_id: usize,
        value: Value,
    ) -> StorageResult<()> {
        let previous_value = self
            .get_value(u64::MAX, txn.id(), offset, column_id)?
            .ok_or_else(|| StorageError::InvalidSchema("row not visible to this transaction".into()))?;
        self.update_value(offset, column_id, value)?;
        let (group_idx, row_in_group) = locate(offset);
        txn.undo_buffer().push(UndoEntry::Update {
            table_id: self.catalog_entry.table_id,
            node_group_idx: group_idx as u64,
            row_idx: row_in_group,
            column_id,
            previous_value,
        });
        Ok(())
    }

    /// Translates one chunked-group segment's insertion entries from `transaction_id` to
    /// `commit_ts`, making it visible to a reader whose `start_ts` is a small commit counter.
    /// Called once per `UndoEntry::Insert` right after `TransactionManager::commit` assigns
    /// `commit_ts` (live commit), or with the WAL record's own `commit_ts` during replay.
    pub fn commit_insertion(
        &self,
        transaction_id: u64,
        commit_ts: u64,
        node_group_idx: u64,
        chunked_group_idx: usize,
        start_row: u64,
        num_rows: u64,
    ) -> StorageResult<()> {
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(node_group_idx as usize)
            .ok_or_else(|| StorageError::InvalidSchema("node group out of range".into()))?;
        group.commit_insertions(transaction_id, commit_ts, chunked_group_idx, start_row, num_rows);
        Ok(())
    }

    /// Undoes an `UndoEntry::Insert`: the row's bytes stay in the column chunk, but resetting the
    /// insertion entry to `INVALID_TRANSACTION` makes it permanently invisible.
    pub fn rollback_insertion(
        &self,
        node_group_idx: u64,
        chunked_group_idx: usize,
        start_row: u64,
        num_rows: u64,
    ) -> StorageResult<()> {
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(node_group_idx as usize)
            .ok_or_else(|| StorageError::InvalidSchema("node group out of range".into()))?;
        group.rollback_insertions(chunked_group_idx, start_row, num_rows);
        Ok(())
    }

    pub fn commit_deletion(
        &self,
        transaction_id: u64,
        commit_ts: u64,
        node_group_idx: u64,
        row_idx: u64,
    ) -> StorageResult<()> {
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(node_group_idx as usize)
            .ok_or_else(|| StorageError::InvalidSchema("node group out of range".into()))?;
        group.commit_deletion(transaction_id, commit_ts, row_idx);
        Ok(())
    }

    /// Undoes an `UndoEntry::Delete`: clears the deletion entry so the row is visible again.
    pub fn rollback_deletion(&self, node_group_idx: u64, row_idx: u64) -> StorageResult<()> {
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(node_group_idx as usize)
            .ok_or_else(|| StorageError::InvalidSchema("node group out of range".into()))?;
        group.rollback_deletion(row_idx);
        Ok(())
    }

    /// `commit_deletion` addressed by table-relative offset rather than `(node_group_idx,
    /// row_idx)`, for callers (WAL replay) that only have the offset a `DeleteRow` record named.
    pub fn commit_deletion_at_offset(
        &self,
        transaction_id: u64,
        commit_ts: u64,
        offset: Offset,
    ) -> StorageResult<()> {
        let (group_idx, row_in_group) = locate(offset);
        self.commit_deletion(transaction_id, commit_ts, group_idx as u64, row_in_group)
    }

    pub fn get_value(
        &self,
        start_ts: u64,
        transaction_id: u64,
        offset: Offset,
        column_id: usize,
    ) -> StorageResult<Option<Value>> {
        let (group_idx, row_in_group) = locate(offset);
        let groups = self.node_groups.read().unwrap();
        let group = groups
            .get(group_idx)
            .ok_or_else(|| StorageError::InvalidSchema("row offset out of range".into()))?;
        group.get_value(start_ts, transaction_id, row_in_group, column_id)
    }

    pub fn lookup_row(
        &self,
        start_ts: u64,
        transaction_id: u64,
        key: &PkValue,
    ) -> StorageResult<Option<Vec<Value>>> {
        let offset = match self.pk_index.lookup(key) {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let mut row = Vec::with_capacity(self.catalog_entry.columns.len());
        for column_id in 0..self.catalog_entry.columns.len() {
            match self.get_value(start_ts, transaction_id, offset, column_id)? {
                Some(v) => row.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(row))
    }

    /// Materializes every visible row for `scan` as a vector of rows, looping `NodeGroup::scan`
    /// to exhaustion for each node group in turn. A real execution operator would instead pull
    /// one vector's worth of rows at a time through `NodeGroupScanState`; this crate's only
    /// caller (the demo CLI and tests) wants the whole result set at once.
    pub fn scan_all(
        &self,
        start_ts: u64,
        transaction_id: u64,
        column_ids: &[usize],
    ) -> Vec<Vec<Value>> {
        let groups = self.node_groups.read().unwrap();
        let mut rows = Vec::new();
        for group in groups.iter() {
            let mut state = NodeGroupScanState::new();
            loop {
                let mut out: Vec<ValueVector> = column_ids
                    .iter()
                    .map(|&id| ValueVector::new(self.catalog_entry.columns[id].data_type))
                    .collect();
                let result = group.scan(start_ts, transaction_id, column_ids, &mut state, &mut out);
                if result.is_empty() {
                    break;
                }
                for i in 0..out[0].len() {
                    rows.push(out.iter().map(|v| v.get(i).clone()).collect());
                }
            }
        }
        rows
    }

    pub fn row_count(&self, start_ts: u64, transaction_id: u64) -> u64 {
        let column_ids: Vec<usize> = vec![self.catalog_entry.pk_column_idx];
        self.scan_all(start_ts, transaction_id, &column_ids).len() as u64
    }

    pub fn finalize_versions_at_checkpoint(&self) {
        for group in self.node_groups.read().unwrap().iter() {
            group.finalize_versions_at_checkpoint();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::transaction::TransactionType;

    fn person_table() -> Table {
        let entry = NodeTableCatalogEntry {
            table_id: 0,
            name: "person".into(),
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    data_type: LogicalType::Int64,
                },
                ColumnDef {
                    name: "age".into(),
                    data_type: LogicalType::Int64,
                },
            ],
            pk_column_idx: 0,
        };
        Table::new(entry)
    }

    fn write_txn() -> Transaction {
        Transaction::new(1u64 << 63, TransactionType::Write, 0)
    }

    #[test]
    fn insert_then_lookup_by_pk() {
        let table = person_table();
        let txn = write_txn();
        let values = vec![vec![Value::Int64(1)], vec![Value::Int64(30)]];
        table.insert(&txn, &values).unwrap();
        let row = table
            .lookup_row(0, txn.id(), &PkValue::Int64(1))
            .unwrap()
            .unwrap();
        assert_eq!(row, vec![Value::Int64(1), Value::Int64(30)]);
    }

    #[test]
    fn duplicate_pk_insert_is_rejected() {
        let table = person_table();
        let txn = write_txn();
        let values = vec![vec![Value::Int64(5)], vec![Value::Int64(1)]];
        table.insert(&txn, &values).unwrap();
        let err = table.insert(&txn, &values).unwrap_err();
        assert!(matches!(err, StorageError::DuplicatePrimaryKey(_)));
    }

    #[test]
    fn null_pk_insert_is_rejected() {
        let table = person_table();
        let txn = write_txn();
        let values = vec![vec![Value::Null], vec![Value::Int64(1)]];
        let err = table.insert(&txn, &values).unwrap_err();
        assert!(matches!(err, StorageError::NullPrimaryKey(_)));
    }

    #[test]
    fn delete_by_pk_then_lookup_misses() {
        let table = person_table();
        let txn = write_txn();
        let values = vec![vec![Value::Int64(9)], vec![Value::Int64(1)]];
        table.insert(&txn, &values).unwrap();
        table.delete_by_pk(&txn, &PkValue::Int64(9)).unwrap();
        let err = table.delete_by_pk(&txn, &PkValue::Int64(9)).unwrap_err();
        assert!(matches!(err, StorageError::PrimaryKeyNotFound(_)));
    }

    #[test]
    fn scan_all_returns_every_inserted_row() {
        let table = person_table();
        let txn = write_txn();
        for i in 0..10 {
            table
                .insert(&txn, &[vec![Value::Int64(i)], vec![Value::Int64(i * 2)]])
                .unwrap();
        }
        table.finalize_versions_at_checkpoint();
        let rows = table.scan_all(0, txn.id() + 1, &[0, 1]);
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn insert_batch_lands_every_key_in_the_pk_index() {
        let table = person_table();
        let txn = write_txn();
        let values = vec![
            (0..2_000i64).collect::<Vec<_>>().into_iter().map(Value::Int64).collect(),
            (0..2_000i64).map(|i| Value::Int64(i * 2)).collect(),
        ];
        let offsets = table.insert_batch(&txn, &values).unwrap();
        assert_eq!(offsets.len(), 2_000);
        for i in [0i64, 999, 1_999] {
            assert_eq!(table.lookup_offset(&PkValue::Int64(i)).unwrap(), i as u64);
        }
        assert_eq!(txn.undo_buffer().len(), 1);
    }

    #[test]
    fn update_records_previous_value_for_rollback() {
        let table = person_table();
        let txn = write_txn();
        let values = vec![vec![Value::Int64(1)], vec![Value::Int64(30)]];
        let offsets = table.insert(&txn, &values).unwrap();
        table.update(&txn, offsets[0], 1, Value::Int64(31)).unwrap();
        assert_eq!(
            table.get_value(0, txn.id(), offsets[0], 1).unwrap(),
            Some(Value::Int64(31))
        );
        table.replay_update(offsets[0], 1, Value::Int64(30)).unwrap();
        assert_eq!(
            table.get_value(0, txn.id(), offsets[0], 1).unwrap(),
            Some(Value::Int64(30))
        );
    }
}
