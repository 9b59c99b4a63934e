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

//! Columnar node-group storage. A `NodeGroup` covers `NODE_GROUP_SIZE` rows of one table and is
//! internally split into `ChunkedNodeGroup`s of `CHUNK_CAPACITY` rows each; new writes append to
//! the most recent chunked group until it's full, at which point a fresh one is appended to the
//! `GroupCollection`. Each chunked group owns one `ColumnChunk` per column plus the `VersionInfo`
//! that makes inserts/deletes MVCC-visible before they're checkpointed to the data file.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use kuzu_common::constants::{CHUNK_CAPACITY, NODE_GROUP_SIZE};
use kuzu_common::error::{StorageError, StorageResult};
use kuzu_common::types::{LogicalType, Value};

use crate::column_chunk::ColumnChunk;
use crate::vector::{SelectionVector, ValueVector};
use crate::version_info::VersionInfo;

/// One `CHUNK_CAPACITY`-row slab: one `ColumnChunk` per column plus the MVCC bookkeeping that
/// covers it. `row_idx_in_group` below is always relative to the start of this chunked group.
pub struct ChunkedNodeGroup {
    columns: Vec<ColumnChunk>,
    version_info: VersionInfo,
    num_rows: AtomicU64,
    capacity: u64,
}

impl ChunkedNodeGroup {
    pub fn new(data_types: &[LogicalType], capacity: u64) -> Self {
        ChunkedNodeGroup {
            columns: data_types
                .iter()
                .map(|&t| ColumnChunk::new(t, capacity as usize))
                .collect(),
            version_info: VersionInfo::new(),
            num_rows: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows.load(Ordering::Acquire)
    }

    pub fn num_rows_left(&self) -> u64 {
        self.capacity - self.num_rows()
    }

    pub fn is_full(&self) -> bool {
        self.num_rows() == self.capacity
    }

    pub fn get_column_chunk(&self, column_id: usize) -> &ColumnChunk {
        &self.columns[column_id]
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn version_info(&self) -> &VersionInfo {
        &self.version_info
    }

    /// Appends up to `num_rows_to_append` rows, reserving space with an atomic `fetch_add` so
    /// concurrent appenders never race for the same row range. Returns `(start_row, actual)`: the
    /// row this call's slice starts at and the number actually reserved, which may be less than
    /// requested if the group doesn't have enough room.
    pub fn append(
        &mut self,
        transaction_id: u64,
        values: &[Vec<Value>],
        num_rows_to_append: u64,
    ) -> StorageResult<(u64, u64)> {
        let start_row = self.num_rows.load(Ordering::Acquire);
        let actual = num_rows_to_append.min(self.capacity - start_row);
        if actual == 0 {
            return Ok((start_row, 0));
        }
        for (col_idx, column) in self.columns.iter_mut().enumerate() {
            for row in &values[col_idx][..actual as usize] {
                column.append_value(row.clone())?;
            }
        }
        self.version_info.append(transaction_id, start_row, actual);
        self.num_rows.fetch_add(actual, Ordering::AcqRel);
        Ok((start_row, actual))
    }

    pub fn update(
        &mut self,
        row_idx_in_group: u64,
        column_id: usize,
        value: Value,
    ) -> StorageResult<()> {
        self.columns[column_id].update(row_idx_in_group as usize, value)
    }

    pub fn delete(
        &mut self,
        transaction_id: u64,
        row_idx_in_group: u64,
    ) -> StorageResult<Option<(usize, usize)>> {
        self.version_info.delete(transaction_id, row_idx_in_group)
    }

    /// Translates `[start_row, start_row+num_rows)`'s insertion entries from `transaction_id` to
    /// `commit_ts`. See `VersionInfo::commit_insertions`.
    pub fn commit_insertions(&mut self, transaction_id: u64, commit_ts: u64, start_row: u64, num_rows: u64) {
        self.version_info.commit_insertions(transaction_id, commit_ts, start_row, num_rows);
    }

    pub fn commit_deletion(&mut self, transaction_id: u64, commit_ts: u64, row_idx_in_group: u64) {
        self.version_info.commit_deletion(transaction_id, commit_ts, row_idx_in_group);
    }

    pub fn rollback_insertions(&mut self, start_row: u64, num_rows: u64) {
        self.version_info.rollback_insertions_in_range(start_row, num_rows);
    }

    pub fn rollback_deletion(&mut self, row_idx_in_group: u64) {
        self.version_info.rollback_deletion(row_idx_in_group);
    }

    pub fn scan(
        &self,
        start_ts: u64,
        transaction_id: u64,
        column_ids: &[usize],
        start_row: u64,
        num_rows: u64,
        out: &mut [ValueVector],
    ) -> SelectionVector {
        let sel = self
            .version_info
            .get_sel_vector_to_scan(start_ts, transaction_id, start_row, num_rows);
        for (out_idx, &column_id) in column_ids.iter().enumerate() {
            self.columns[column_id].scan(&sel, start_row as usize, &mut out[out_idx]);
        }
        sel
    }
}

/// A vector of chunked groups guarded by a single lock, mirroring the teacher's convention of
/// centralizing concurrent mutation of a group list behind one coarse-grained lock rather than
/// per-element synchronization (the per-row hot path is inside each `ChunkedNodeGroup`, not here).
pub struct GroupCollection<T> {
    groups: RwLock<Vec<T>>,
}

impl<T> Default for GroupCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GroupCollection<T> {
    pub fn new() -> Self {
        GroupCollection {
            groups: RwLock::new(Vec::new()),
        }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.read().len()
    }

    pub fn append_group(&self, group: T) -> usize {
        let mut groups = self.groups.write();
        groups.push(group);
        groups.len() - 1
    }

    pub fn with_group<R>(&self, idx: usize, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.groups.read().get(idx).map(f)
    }

    pub fn with_group_mut<R>(&self, idx: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.groups.write().get_mut(idx).map(f)
    }

    pub fn with_last_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.groups.write().last_mut().map(f)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeGroupScanResult {
    pub start_row: u64,
    pub num_rows: u64,
}

impl NodeGroupScanResult {
    pub const EMPTY: NodeGroupScanResult = NodeGroupScanResult {
        start_row: u64::MAX,
        num_rows: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }
}

/// Per-scan cursor: which chunked group and which row within it to resume from. Kept across
/// repeated calls to `NodeGroup::scan` so a morsel-driven scan operator can pull one chunk worth
/// of rows at a time.
pub struct NodeGroupScanState {
    pub chunked_group_idx: usize,
    pub next_row_to_scan: u64,
}

impl NodeGroupScanState {
    pub fn new() -> Self {
        NodeGroupScanState {
            chunked_group_idx: 0,
            next_row_to_scan: 0,
        }
    }

    pub fn reset(&mut self) {
        self.chunked_group_idx = 0;
        self.next_row_to_scan = 0;
    }
}

impl Default for NodeGroupScanState {
    fn default() -> Self {
        Self::new()
    }
}

/// `NODE_GROUP_SIZE` rows of one table, split internally into `CHUNK_CAPACITY`-row
/// `ChunkedNodeGroup`s. `next_row_to_append` is reserved ahead of the actual per-column writes so
/// concurrent appenders can claim disjoint row ranges before touching any column buffer.
pub struct NodeGroup {
    node_group_idx: u64,
    data_types: Vec<LogicalType>,
    capacity: u64,
    num_rows: AtomicU64,
    next_row_to_append: AtomicU64,
    chunked_groups: GroupCollection<ChunkedNodeGroup>,
}

impl NodeGroup {
    pub fn new(node_group_idx: u64, data_types: Vec<LogicalType>) -> Self {
        NodeGroup {
            node_group_idx,
            data_types,
            capacity: NODE_GROUP_SIZE,
            num_rows: AtomicU64::new(0),
            next_row_to_append: AtomicU64::new(0),
            chunked_groups: GroupCollection::new(),
        }
    }

    pub fn node_group_idx(&self) -> u64 {
        self.node_group_idx
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.num_rows() == self.capacity
    }

    pub fn num_rows_left_to_append(&self) -> u64 {
        self.capacity - self.next_row_to_append.load(Ordering::Acquire)
    }

    /// Appends `values` (one `Vec<Value>` per column, all equal length) as new rows, creating a
    /// fresh `ChunkedNodeGroup` whenever the current tail is full. Returns the row index (within
    /// this node group) the new rows start at, plus the `(chunked_group_idx, start_row_in_chunk,
    /// num_rows)` of every chunked group segment actually touched — a single call can span more
    /// than one when it crosses a `CHUNK_CAPACITY` boundary, and the caller needs one undo-buffer
    /// entry per segment to be able to commit/roll back each independently.
    pub fn append(
        &self,
        transaction_id: u64,
        values: &[Vec<Value>],
        num_rows_to_append: u64,
    ) -> StorageResult<(u64, Vec<(usize, u64, u64)>)> {
        let start_row = self
            .next_row_to_append
            .fetch_add(num_rows_to_append, Ordering::AcqRel);
        if start_row + num_rows_to_append > self.capacity {
            return Err(StorageError::InvalidSchema(format!(
                "node group {} capacity exceeded",
                self.node_group_idx
            )));
        }
        let mut remaining = num_rows_to_append;
        let mut values_offset = 0u64;
        let mut touched = Vec::new();
        while remaining > 0 {
            if self.chunked_groups.num_groups() == 0
                || self
                    .chunked_groups
                    .with_last_mut(|g| g.is_full())
                    .unwrap_or(true)
            {
                self.chunked_groups.append_group(ChunkedNodeGroup::new(
                    &self.data_types,
                    CHUNK_CAPACITY,
                ));
            }
            let chunked_group_idx = self.chunked_groups.num_groups() - 1;
            let (chunk_start_row, appended) = self
                .chunked_groups
                .with_last_mut(|g| {
                    let slice: Vec<Vec<Value>> = values
                        .iter()
                        .map(|col| {
                            col[values_offset as usize..(values_offset + remaining) as usize]
                                .to_vec()
                        })
                        .collect();
                    g.append(transaction_id, &slice, remaining)
                })
                .unwrap()?;
            touched.push((chunked_group_idx, chunk_start_row, appended));
            remaining -= appended;
            values_offset += appended;
        }
        self.num_rows.fetch_add(num_rows_to_append, Ordering::AcqRel);
        Ok((start_row, touched))
    }

    fn locate(&self, row_idx: u64) -> (usize, u64) {
        ((row_idx / CHUNK_CAPACITY) as usize, row_idx % CHUNK_CAPACITY)
    }

    pub fn update(&self, row_idx: u64, column_id: usize, value: Value) -> StorageResult<()> {
        let (group_idx, row_in_group) = self.locate(row_idx);
        self.chunked_groups
            .with_group_mut(group_idx, |g| g.update(row_in_group, column_id, value))
            .ok_or_else(|| StorageError::InvalidSchema("row out of range".into()))?
    }

    pub fn delete(&self, transaction_id: u64, row_idx: u64) -> StorageResult<bool> {
        let (group_idx, row_in_group) = self.locate(row_idx);
        let result = self
            .chunked_groups
            .with_group_mut(group_idx, |g| g.delete(transaction_id, row_in_group))
            .ok_or_else(|| StorageError::InvalidSchema("row out of range".into()))??;
        Ok(result.is_some())
    }

    /// Translates one chunked-group segment's insertion entries from `transaction_id` to
    /// `commit_ts`, applied right after commit so the insert becomes visible to readers whose
    /// `start_ts` is a small commit counter. See `UndoEntry::Insert`.
    pub fn commit_insertions(
        &self,
        transaction_id: u64,
        commit_ts: u64,
        chunked_group_idx: usize,
        start_row: u64,
        num_rows: u64,
    ) {
        self.chunked_groups.with_group_mut(chunked_group_idx, |g| {
            g.commit_insertions(transaction_id, commit_ts, start_row, num_rows);
        });
    }

    pub fn commit_deletion(&self, transaction_id: u64, commit_ts: u64, row_idx: u64) {
        let (group_idx, row_in_group) = self.locate(row_idx);
        self.chunked_groups.with_group_mut(group_idx, |g| {
            g.commit_deletion(transaction_id, commit_ts, row_in_group);
        });
    }

    /// Undoes an `UndoEntry::Insert`: the appended values stay in the column chunk (there's no
    /// vacuum in this crate), but resetting the version entry to `INVALID_TRANSACTION` makes the
    /// row permanently invisible, the same as a row that was never inserted.
    pub fn rollback_insertions(&self, chunked_group_idx: usize, start_row: u64, num_rows: u64) {
        self.chunked_groups.with_group_mut(chunked_group_idx, |g| {
            g.rollback_insertions(start_row, num_rows);
        });
    }

    pub fn rollback_deletion(&self, row_idx: u64) {
        let (group_idx, row_in_group) = self.locate(row_idx);
        self.chunked_groups.with_group_mut(group_idx, |g| {
            g.rollback_deletion(row_in_group);
        });
    }

    pub fn scan(
        &self,
        start_ts: u64,
        transaction_id: u64,
        column_ids: &[usize],
        state: &mut NodeGroupScanState,
        out: &mut [ValueVector],
    ) -> NodeGroupScanResult {
        loop {
            if state.chunked_group_idx >= self.chunked_groups.num_groups() {
                return NodeGroupScanResult::EMPTY;
            }
            let chunk_num_rows = self
                .chunked_groups
                .with_group(state.chunked_group_idx, |g| g.num_rows())
                .unwrap_or(0);
            if state.next_row_to_scan >= chunk_num_rows {
                state.chunked_group_idx += 1;
                state.next_row_to_scan = 0;
                continue;
            }
            let num_rows = (chunk_num_rows - state.next_row_to_scan)
                .min(kuzu_common::constants::DEFAULT_VECTOR_CAPACITY as u64);
            let start_row = state.next_row_to_scan;
            let sel = self
                .chunked_groups
                .with_group(state.chunked_group_idx, |g| {
                    g.scan(start_ts, transaction_id, column_ids, start_row, num_rows, out)
                })
                .unwrap();
            state.next_row_to_scan += num_rows;
            if sel.is_empty() {
                continue;
            }
            return NodeGroupScanResult {
                start_row: state.chunked_group_idx as u64 * CHUNK_CAPACITY + start_row,
                num_rows: sel.len() as u64,
            };
        }
    }

    pub fn get_value(
        &self,
        start_ts: u64,
        transaction_id: u64,
        row_idx: u64,
        column_id: usize,
    ) -> StorageResult<Option<Value>> {
        let (group_idx, row_in_group) = self.locate(row_idx);
        self.chunked_groups
            .with_group(group_idx, |g| {
                if g.version_info().is_deleted(start_ts, transaction_id, row_in_group)
                    || !g
                        .version_info()
                        .is_inserted(start_ts, transaction_id, row_in_group)
                {
                    None
                } else {
                    Some(g.get_column_chunk(column_id).get(row_in_group as usize).clone())
                }
            })
            .ok_or_else(|| StorageError::InvalidSchema("row out of range".into()))
    }

    pub fn num_chunked_groups(&self) -> usize {
        self.chunked_groups.num_groups()
    }

    /// Clears every live version id across every chunked group once the database has no active
    /// write transactions: called by `TransactionManager::checkpoint`.
    pub fn finalize_versions_at_checkpoint(&self) {
        for idx in 0..self.chunked_groups.num_groups() {
            self.chunked_groups.with_group_mut(idx, |g| {
                g.version_info.finalize_status_from_versions();
            });
        }
    }

    pub fn has_uncheckpointed_changes(&self) -> bool {
        (0..self.chunked_groups.num_groups()).any(|idx| {
            self.chunked_groups
                .with_group(idx, |g| {
                    g.version_info().has_insertions() || g.version_info().has_deletions()
                })
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_group() -> NodeGroup {
        NodeGroup::new(0, vec![LogicalType::Int64])
    }

    #[test]
    fn append_then_scan_returns_all_visible_rows() {
        let group = int_group();
        let values = vec![(0..100).map(Value::Int64).collect::<Vec<_>>()];
        let txn = 1u64 << 63;
        group.append(txn, &values, 100).unwrap();
        let mut state = NodeGroupScanState::new();
        let mut out = vec![ValueVector::new(LogicalType::Int64)];
        let result = group.scan(0, txn, &[0], &mut state, &mut out);
        assert_eq!(result.num_rows, 100);
        assert_eq!(out[0].len(), 100);
    }

    #[test]
    fn append_across_chunk_boundary_creates_second_chunked_group() {
        let group = int_group();
        let values = vec![(0..(CHUNK_CAPACITY + 10))
            .map(|i| Value::Int64(i as i64))
            .collect::<Vec<_>>()];
        let txn = 1u64 << 63;
        group.append(txn, &values, CHUNK_CAPACITY + 10).unwrap();
        assert_eq!(group.num_chunked_groups(), 2);
    }

    #[test]
    fn delete_hides_row_from_later_readers() {
        let group = int_group();
        let values = vec![(0..10).map(Value::Int64).collect::<Vec<_>>()];
        let txn1 = 1u64 << 63;
        group.append(txn1, &values, 10).unwrap();
        group.finalize_versions_at_checkpoint();
        let txn2 = (1u64 << 63) + 1;
        group.delete(txn2, 3).unwrap();
        // A reader with a start_ts before the delete commits still sees the row.
        let value = group.get_value(5, (1u64 << 63) + 2, 3, 0).unwrap();
        assert_eq!(value, Some(Value::Int64(3)));
        group.commit_deletion(txn2, 5, 3);
        let value = group.get_value(5, (1u64 << 63) + 2, 3, 0).unwrap();
        assert!(value.is_none());
        let value = group.get_value(5, (1u64 << 63) + 2, 4, 0).unwrap();
        assert_eq!(value, Some(Value::Int64(4)));
    }
}
