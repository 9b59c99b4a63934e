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

//! Per-vector MVCC visibility tracking. `VersionInfo` lazily allocates one `VectorVersionInfo`
//! per `DEFAULT_VECTOR_CAPACITY`-row band inside a chunked node group; a band with no version
//! info at all is implicitly `ALWAYS_INSERTED` / `NO_DELETED` (checkpointed, never deleted).

use kuzu_common::constants::{DEFAULT_VECTOR_CAPACITY, INVALID_TRANSACTION};
use kuzu_common::error::{StorageError, StorageResult};

use crate::vector::SelectionVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionStatus {
    NoInserted,
    CheckVersion,
    AlwaysInserted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStatus {
    NoDeleted,
    CheckVersion,
}

/// MVCC record for one 2048-row band: two parallel transaction-id arrays plus a status enum each,
/// so common cases (no deletions at all, or every row checkpointed) never need to scan the array.
pub struct VectorVersionInfo {
    inserted_versions: Vec<u64>,
    deleted_versions: Vec<u64>,
    insertion_status: InsertionStatus,
    deletion_status: DeletionStatus,
}

impl VectorVersionInfo {
    pub fn new() -> Self {
        VectorVersionInfo {
            inserted_versions: vec![INVALID_TRANSACTION; DEFAULT_VECTOR_CAPACITY],
            deleted_versions: vec![INVALID_TRANSACTION; DEFAULT_VECTOR_CAPACITY],
            insertion_status: InsertionStatus::NoInserted,
            deletion_status: DeletionStatus::NoDeleted,
        }
    }

    pub fn append(&mut self, transaction_id: u64, start_row: usize, num_rows: usize) {
        self.insertion_status = InsertionStatus::CheckVersion;
        for i in start_row..start_row + num_rows {
            debug_assert_eq!(self.inserted_versions[i], INVALID_TRANSACTION);
            self.inserted_versions[i] = transaction_id;
        }
    }

    /// Returns `Ok(true)` if this call performed the delete, `Ok(false)` if it was already
    /// deleted by the same transaction (idempotent), or a write-write conflict error if a
    /// different live transaction holds the delete.
    pub fn delete(&mut self, transaction_id: u64, row_idx: usize) -> StorageResult<bool> {
        self.deletion_status = DeletionStatus::CheckVersion;
        if self.deleted_versions[row_idx] == transaction_id {
            return Ok(false);
        }
        if self.deleted_versions[row_idx] != INVALID_TRANSACTION {
            return Err(StorageError::WriteWriteConflict {
                row_idx: row_idx as u64,
                other_txn: self.deleted_versions[row_idx],
            });
        }
        self.deleted_versions[row_idx] = transaction_id;
        Ok(true)
    }

    pub fn is_inserted(&self, start_ts: u64, transaction_id: u64, row_idx: usize) -> bool {
        match self.insertion_status {
            InsertionStatus::AlwaysInserted => true,
            InsertionStatus::NoInserted => false,
            InsertionStatus::CheckVersion => {
                let insertion = self.inserted_versions[row_idx];
                insertion == transaction_id || insertion <= start_ts
            }
        }
    }

    pub fn is_deleted(&self, start_ts: u64, transaction_id: u64, row_idx: usize) -> bool {
        match self.deletion_status {
            DeletionStatus::NoDeleted => false,
            DeletionStatus::CheckVersion => {
                let deletion = self.deleted_versions[row_idx];
                deletion == transaction_id || deletion <= start_ts
            }
        }
    }

    pub fn get_num_deletions(
        &self,
        start_ts: u64,
        transaction_id: u64,
        start_row: usize,
        num_rows: usize,
    ) -> usize {
        if self.deletion_status == DeletionStatus::NoDeleted {
            return 0;
        }
        (start_row..start_row + num_rows)
            .filter(|&row| self.is_deleted(start_ts, transaction_id, row))
            .count()
    }

    /// Appends the rows in `[start_row, start_row+num_rows)` of this band that are visible to
    /// `(start_ts, transaction_id)` to `sel`, as positions offset by `start_output_pos`.
    pub fn get_sel_vector_for_scan(
        &self,
        start_ts: u64,
        transaction_id: u64,
        sel: &mut SelectionVector,
        start_row: usize,
        num_rows: usize,
        start_output_pos: u32,
    ) {
        if self.deletion_status == DeletionStatus::NoDeleted
            && self.insertion_status == InsertionStatus::AlwaysInserted
        {
            for i in 0..num_rows as u32 {
                sel.push(start_output_pos + i);
            }
        } else if self.insertion_status != InsertionStatus::NoInserted {
            for i in 0..num_rows {
                let row_idx = start_row + i;
                if self.is_inserted(start_ts, transaction_id, row_idx)
                    && !self.is_deleted(start_ts, transaction_id, row_idx)
                {
                    sel.push(start_output_pos + i as u32);
                }
            }
        }
    }

    pub fn rollback_insertions(&mut self, start_row: usize, num_rows: usize) {
        for row in start_row..start_row + num_rows {
            self.inserted_versions[row] = INVALID_TRANSACTION;
        }
        if !self
            .inserted_versions
            .iter()
            .any(|&v| v != INVALID_TRANSACTION)
        {
            self.insertion_status = InsertionStatus::NoInserted;
            self.deletion_status = DeletionStatus::NoDeleted;
        }
    }

    pub fn rollback_deletions(&mut self, start_row: usize, num_rows: usize) {
        for row in start_row..start_row + num_rows {
            self.deleted_versions[row] = INVALID_TRANSACTION;
        }
        if !self
            .deleted_versions
            .iter()
            .any(|&v| v != INVALID_TRANSACTION)
        {
            self.deletion_status = DeletionStatus::NoDeleted;
        }
    }

    /// Rewrites every entry still holding `transaction_id` to `commit_ts`, in `[start_row,
    /// start_row+num_rows)`. Called right after commit so a reader whose `start_ts` is a small
    /// commit counter (not a `START_TRANSACTION_ID`-scale in-flight id) can see what it just
    /// committed, per `is_inserted`'s `insertion <= start_ts` check.
    pub fn commit_insertions(&mut self, transaction_id: u64, commit_ts: u64, start_row: usize, num_rows: usize) {
        for v in &mut self.inserted_versions[start_row..start_row + num_rows] {
            if *v == transaction_id {
                *v = commit_ts;
            }
        }
    }

    /// Same translation as `commit_insertions`, for a single deleted row.
    pub fn commit_deletion(&mut self, transaction_id: u64, commit_ts: u64, row_idx: usize) {
        if self.deleted_versions[row_idx] == transaction_id {
            self.deleted_versions[row_idx] = commit_ts;
        }
    }

    /// Called at checkpoint time: any committed insertion/deletion timestamp is replaced by a
    /// uniform status once possible. Returns `false` if the band became fully trivial
    /// (`AlwaysInserted`/`NoDeleted`) and can be dropped entirely.
    pub fn finalize_status_from_versions(&mut self) -> bool {
        if self.insertion_status == InsertionStatus::NoInserted {
            debug_assert_eq!(self.deletion_status, DeletionStatus::NoDeleted);
            return true;
        }
        // Insertions have already had their bookkeeping cleared to `INVALID_TRANSACTION` by the
        // checkpoint caller before this is invoked; deletions have not; see
        // `clear_committed_insertions`.
        let has_any_deletions = self
            .deleted_versions
            .iter()
            .any(|&v| v != INVALID_TRANSACTION);
        if !has_any_deletions {
            self.deletion_status = DeletionStatus::NoDeleted;
        }
        let all_committed_or_invalid = self
            .inserted_versions
            .iter()
            .all(|&v| v == INVALID_TRANSACTION);
        self.insertion_status = if all_committed_or_invalid {
            InsertionStatus::AlwaysInserted
        } else {
            InsertionStatus::CheckVersion
        };
        !(self.insertion_status == InsertionStatus::AlwaysInserted
            && self.deletion_status == DeletionStatus::NoDeleted)
    }

    /// Marks every live (non-`INVALID_TRANSACTION`) insertion version as checkpointed, i.e. clears
    /// the transaction id to `INVALID_TRANSACTION` so `finalize_status_from_versions` can collapse
    /// the band once there's no live deletion left either. Called by the node-group checkpoint
    /// path once the owning chunked group's writes are durable.
    ///
    /// Deletions are deliberately left untouched: this crate has no vacuum pass that could
    /// physically remove a deleted row's bytes, so a checkpoint can't declare the deletion "done"
    /// the way it can an insertion — `deleted_versions` keeps the small commit timestamp forever,
    /// which is exactly what keeps the row excluded from every future scan.
    pub fn clear_committed_insertions(&mut self) {
        for v in self.inserted_versions.iter_mut() {
            if *v != INVALID_TRANSACTION {
                *v = INVALID_TRANSACTION;
            }
        }
    }

    pub fn insertion_status(&self) -> InsertionStatus {
        self.insertion_status
    }

    pub fn deletion_status(&self) -> DeletionStatus {
        self.deletion_status
    }

    pub fn set_always_inserted(&mut self) {
        self.insertion_status = InsertionStatus::AlwaysInserted;
    }
}

impl Default for VectorVersionInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// A sparse collection of `VectorVersionInfo`, one per 2048-row band. `None` means "no version
/// tracking needed": every row in that band is implicitly visible and undeleted.
#[derive(Default)]
pub struct VersionInfo {
    vectors_info: Vec<Option<VectorVersionInfo>>,
}

impl VersionInfo {
    pub fn new() -> Self {
        VersionInfo {
            vectors_info: Vec::new(),
        }
    }

    pub fn get_num_vectors(&self) -> usize {
        self.vectors_info.len()
    }

    fn get_or_create(&mut self, vector_idx: usize) -> &mut VectorVersionInfo {
        if self.vectors_info.len() <= vector_idx {
            self.vectors_info.resize_with(vector_idx + 1, || None);
        }
        self.vectors_info[vector_idx].get_or_insert_with(VectorVersionInfo::new)
    }

    pub fn get(&self, vector_idx: usize) -> Option<&VectorVersionInfo> {
        self.vectors_info.get(vector_idx).and_then(|v| v.as_ref())
    }

    /// Records that `[start_row, start_row+num_rows)` was inserted by `transaction_id`. Returns
    /// the list of `(vector_idx, start_row_in_vector, num_rows_in_vector)` touched, so the caller
    /// can push one undo-buffer entry per band.
    pub fn append(
        &mut self,
        transaction_id: u64,
        start_row: u64,
        num_rows: u64,
    ) -> Vec<(usize, usize, usize)> {
        let touched = bands_touched(start_row, num_rows);
        for &(vector_idx, start, num_rows_in_vector) in &touched {
            self.get_or_create(vector_idx)
                .append(transaction_id, start, num_rows_in_vector);
        }
        touched
    }

    /// Deletes a single row. Returns `Ok(Some((vector_idx, row_in_vector)))` if this call
    /// performed the delete (for the undo buffer), `Ok(None)` if idempotent, or a conflict error.
    pub fn delete(
        &mut self,
        transaction_id: u64,
        row_idx: u64,
    ) -> StorageResult<Option<(usize, usize)>> {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let vector_idx = (row_idx / cap) as usize;
        let row_in_vector = (row_idx % cap) as usize;
        let band = self.get_or_create(vector_idx);
        if band.insertion_status == InsertionStatus::NoInserted {
            // Newly created purely to track this deletion: every row in the band is a
            // checkpointed row, so mark insertion as always-visible to skip version checks.
            band.set_always_inserted();
        }
        let deleted = band.delete(transaction_id, row_in_vector)?;
        Ok(deleted.then_some((vector_idx, row_in_vector)))
    }

    pub fn get_sel_vector_to_scan(
        &self,
        start_ts: u64,
        transaction_id: u64,
        start_row: u64,
        num_rows: u64,
    ) -> SelectionVector {
        let mut sel = SelectionVector::empty();
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let (start_vector, start_in_vector) = (start_row / cap, start_row % cap);
        let last_row = start_row + num_rows - 1;
        let (end_vector, end_in_vector) = (last_row / cap, last_row % cap);
        let mut output_pos = 0u32;
        for vector_idx in start_vector..=end_vector {
            let start = if vector_idx == start_vector {
                start_in_vector
            } else {
                0
            };
            let end_idx = if vector_idx == end_vector {
                end_in_vector
            } else {
                cap - 1
            };
            let num_rows_in_vector = (end_idx - start + 1) as usize;
            match self.get(vector_idx as usize) {
                None => {
                    for i in 0..num_rows_in_vector as u32 {
                        sel.push(output_pos + i);
                    }
                }
                Some(band) => band.get_sel_vector_for_scan(
                    start_ts,
                    transaction_id,
                    &mut sel,
                    start as usize,
                    num_rows_in_vector,
                    output_pos,
                ),
            }
            output_pos += num_rows_in_vector as u32;
        }
        sel.set_to_filtered(sel.len());
        sel
    }

    pub fn is_inserted(&self, start_ts: u64, transaction_id: u64, row_idx: u64) -> bool {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        match self.get((row_idx / cap) as usize) {
            Some(band) => band.is_inserted(start_ts, transaction_id, (row_idx % cap) as usize),
            None => true,
        }
    }

    pub fn is_deleted(&self, start_ts: u64, transaction_id: u64, row_idx: u64) -> bool {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        match self.get((row_idx / cap) as usize) {
            Some(band) => band.is_deleted(start_ts, transaction_id, (row_idx % cap) as usize),
            None => false,
        }
    }

    pub fn has_deletions(&self) -> bool {
        self.vectors_info.iter().flatten().any(|b| {
            b.deletion_status == DeletionStatus::CheckVersion
        })
    }

    pub fn has_insertions(&self) -> bool {
        self.vectors_info.iter().flatten().any(|b| {
            b.insertion_status == InsertionStatus::CheckVersion
        })
    }

    pub fn rollback_insertions(&mut self, vector_idx: usize, start_row: usize, num_rows: usize) {
        if let Some(band) = self.vectors_info[vector_idx].as_mut() {
            band.rollback_insertions(start_row, num_rows);
        }
    }

    pub fn rollback_deletions(&mut self, vector_idx: usize, start_row: usize, num_rows: usize) {
        if let Some(band) = self.vectors_info[vector_idx].as_mut() {
            band.rollback_deletions(start_row, num_rows);
        }
    }

    /// `rollback_insertions` over a row-offset range rather than a single band, mirroring how
    /// `append` itself splits a range across bands. Used to undo an `Insert` undo-entry, which is
    /// recorded at chunk-row granularity rather than per-band.
    pub fn rollback_insertions_in_range(&mut self, start_row: u64, num_rows: u64) {
        for (vector_idx, start, num) in bands_touched(start_row, num_rows) {
            self.rollback_insertions(vector_idx, start, num);
        }
    }

    /// `rollback_deletions` for a single row, addressed the same way `delete` is.
    pub fn rollback_deletion(&mut self, row_idx: u64) {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let vector_idx = (row_idx / cap) as usize;
        let row_in_vector = (row_idx % cap) as usize;
        self.rollback_deletions(vector_idx, row_in_vector, 1);
    }

    /// Rewrites every entry in `[start_row, start_row+num_rows)` still holding `transaction_id` to
    /// `commit_ts`. The commit-time counterpart of `append`: translates the in-flight transaction
    /// id recorded at insert time into the small commit timestamp readers compare their `start_ts`
    /// against, so a reader that begins after this commit (but before any checkpoint) can see it.
    pub fn commit_insertions(&mut self, transaction_id: u64, commit_ts: u64, start_row: u64, num_rows: u64) {
        for (vector_idx, start, num) in bands_touched(start_row, num_rows) {
            if let Some(band) = self.vectors_info.get_mut(vector_idx).and_then(|o| o.as_mut()) {
                band.commit_insertions(transaction_id, commit_ts, start, num);
            }
        }
    }

    /// The commit-time counterpart of `delete`: translates a single deleted row's transaction id
    /// into its commit timestamp.
    pub fn commit_deletion(&mut self, transaction_id: u64, commit_ts: u64, row_idx: u64) {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let vector_idx = (row_idx / cap) as usize;
        let row_in_vector = (row_idx % cap) as usize;
        if let Some(band) = self.vectors_info.get_mut(vector_idx).and_then(|o| o.as_mut()) {
            band.commit_deletion(transaction_id, commit_ts, row_in_vector);
        }
    }

    /// Marks every still-live version in every band as checkpointed (i.e. committed and durable),
    /// then collapses bands that became fully trivial. Returns `false` if no band carries
    /// meaningful version info anymore, in which case the caller should drop this `VersionInfo`.
    pub fn finalize_status_from_versions(&mut self) -> bool {
        let mut any_remaining = false;
        for slot in self.vectors_info.iter_mut() {
            if let Some(band) = slot.as_mut() {
                band.clear_committed_insertions();
                if band.finalize_status_from_versions() {
                    any_remaining = true;
                } else {
                    *slot = None;
                }
            }
        }
        any_remaining
    }
}

/// Splits `[start_row, start_row+num_rows)` into the `(vector_idx, start_row_in_vector,
/// num_rows_in_vector)` bands it crosses. Shared by `append` (which also needs to create each
/// band) and the commit/rollback translation passes (which only need to touch existing ones).
fn bands_touched(start_row: u64, num_rows: u64) -> Vec<(usize, usize, usize)> {
    let cap = DEFAULT_VECTOR_CAPACITY as u64;
    let (start_vector, start_in_vector) = (start_row / cap, start_row % cap);
    let end = start_row + num_rows;
    let (end_vector, end_in_vector) = (end / cap, end % cap);
    let mut touched = Vec::new();
    for vector_idx in start_vector..=end_vector {
        let start = if vector_idx == start_vector { start_in_vector } else { 0 };
        let end_idx = if vector_idx == end_vector { end_in_vector } else { cap };
        if start == end_idx {
            continue;
        }
        touched.push((vector_idx as usize, start as usize, (end_idx - start) as usize));
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: u64 = 1 << 63;
    const T2: u64 = (1 << 63) + 1;

    #[test]
    fn append_then_scan_visible_only_to_inserting_txn_before_commit() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 10);
        // The inserting transaction sees its own rows even though they're uncommitted.
        let sel = vi.get_sel_vector_to_scan(0, T1, 0, 10);
        assert_eq!(sel.len(), 10);
        // A different transaction with an old startTS does not.
        let sel = vi.get_sel_vector_to_scan(0, T2, 0, 10);
        assert_eq!(sel.len(), 0);
    }

    #[test]
    fn delete_then_scan_excludes_deleted_rows() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 10);
        // Commit insertion: treat T1 as committed at ts=5.
        vi.finalize_status_from_versions();
        let sel = vi.get_sel_vector_to_scan(5, T2, 0, 10);
        assert_eq!(sel.len(), 10);
        vi.delete(T2, 3).unwrap();
        let sel = vi.get_sel_vector_to_scan(5, T2, 0, 10);
        assert_eq!(sel.len(), 9);
        assert!(!sel.positions().contains(&3));
    }

    #[test]
    fn double_delete_by_different_txn_conflicts() {
        let mut vi = VersionInfo::new();
        vi.delete(T1, 0).unwrap();
        let err = vi.delete(T2, 0).unwrap_err();
        assert!(matches!(err, StorageError::WriteWriteConflict { .. }));
    }

    #[test]
    fn double_delete_by_same_txn_is_idempotent() {
        let mut vi = VersionInfo::new();
        assert!(vi.delete(T1, 0).unwrap().is_some());
        assert!(vi.delete(T1, 0).unwrap().is_none());
    }

    #[test]
    fn finalize_drops_trivial_bands() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 2048);
        assert_eq!(vi.get_num_vectors(), 1);
        vi.finalize_status_from_versions();
        // All rows committed, no deletions: band becomes trivial and is dropped.
        assert!(vi.get(0).is_none());
    }

    #[test]
    fn finalize_keeps_bands_with_deletions() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 2048);
        vi.delete(T1, 5).unwrap();
        vi.finalize_status_from_versions();
        assert!(vi.get(0).is_some());
        assert!(vi.has_deletions());
    }

    #[test]
    fn rollback_insertions_restores_no_inserted() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 5);
        vi.rollback_insertions(0, 0, 5);
        assert_eq!(
            vi.get(0).unwrap().insertion_status(),
            InsertionStatus::NoInserted
        );
    }

    #[test]
    fn commit_insertions_makes_row_visible_to_a_small_start_ts() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 10);
        // A reader with a small start_ts (a real commit counter, not a START_TRANSACTION_ID-scale
        // in-flight id) can't see the rows until the insertion is translated to its commit_ts.
        assert_eq!(vi.get_sel_vector_to_scan(3, T2, 0, 10).len(), 0);
        vi.commit_insertions(T1, 3, 0, 10);
        assert_eq!(vi.get_sel_vector_to_scan(3, T2, 0, 10).len(), 10);
    }

    #[test]
    fn commit_deletion_keeps_row_hidden_after_checkpoint() {
        let mut vi = VersionInfo::new();
        vi.append(T1, 0, 10);
        vi.commit_insertions(T1, 1, 0, 10);
        vi.delete(T2, 3).unwrap();
        vi.commit_deletion(T2, 2, 3);
        vi.finalize_status_from_versions();
        // Deletions are never cleared by finalize: the row stays hidden from every later reader.
        let sel = vi.get_sel_vector_to_scan(100, (1 << 63) + 5, 0, 10);
        assert_eq!(sel.len(), 9);
        assert!(!sel.positions().contains(&3));
        assert!(vi.has_deletions());
    }
}
