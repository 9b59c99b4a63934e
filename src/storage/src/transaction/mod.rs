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

//! Transaction identity, the undo log each write transaction accumulates, and the manager that
//! serializes transaction lifecycle events (begin/commit/rollback/checkpoint) against each other.

mod transaction_manager;

pub use transaction_manager::TransactionManager;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use kuzu_common::constants::START_TRANSACTION_ID;
use kuzu_common::types::{TableId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ReadOnly,
    Write,
}

/// One undoable effect of a write transaction, recorded so `Transaction::rollback` can reverse
/// it without re-deriving what happened from the WAL. `StructuralUpdate` covers schema-changing
/// operations (add/drop column) that don't fit the per-row insert/delete/update shape.
#[derive(Debug, Clone)]
pub enum UndoEntry {
    Insert {
        table_id: TableId,
        node_group_idx: u64,
        chunked_group_idx: usize,
        start_row: u64,
        num_rows: u64,
    },
    Delete {
        table_id: TableId,
        node_group_idx: u64,
        row_idx: u64,
    },
    Update {
        table_id: TableId,
        node_group_idx: u64,
        row_idx: u64,
        column_id: usize,
        previous_value: Value,
    },
    StructuralUpdate {
        table_id: TableId,
        description: String,
    },
}

#[derive(Default, Debug)]
pub struct UndoBuffer {
    entries: Mutex<Vec<UndoEntry>>,
}

impl UndoBuffer {
    pub fn new() -> Self {
        UndoBuffer {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, entry: UndoEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands every entry to `apply` in reverse order (most recent first), matching the order a
    /// rollback must undo effects in when later entries can depend on earlier ones (e.g. an
    /// update to a row inserted earlier in the same transaction).
    pub fn rollback(&self, mut apply: impl FnMut(&UndoEntry)) {
        let entries = std::mem::take(&mut *self.entries.lock().unwrap());
        for entry in entries.iter().rev() {
            apply(entry);
        }
    }

    /// Drains every entry without applying them, for the commit-time translation pass: once a
    /// transaction has committed there's nothing left to ever roll back.
    pub fn take_all(&self) -> Vec<UndoEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }
}

/// A single transaction's identity and undo state. `id` is drawn from `START_TRANSACTION_ID..`
/// so in-flight transaction ids never collide with committed timestamps (which start at 0), and
/// `VersionInfo` can tell the two spaces apart with a single `<=` comparison.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    transaction_type: TransactionType,
    start_ts: u64,
    commit_ts: AtomicU64,
    undo_buffer: UndoBuffer,
}

const NO_COMMIT_TS: u64 = u64::MAX;

impl Transaction {
    pub(crate) fn new(id: u64, transaction_type: TransactionType, start_ts: u64) -> Self {
        debug_assert!(id >= START_TRANSACTION_ID);
        Transaction {
            id,
            transaction_type,
            start_ts,
            commit_ts: AtomicU64::new(NO_COMMIT_TS),
            undo_buffer: UndoBuffer::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    pub fn is_read_only(&self) -> bool {
        self.transaction_type == TransactionType::ReadOnly
    }

    pub fn is_write_transaction(&self) -> bool {
        self.transaction_type == TransactionType::Write
    }

    pub fn commit_ts(&self) -> Option<u64> {
        match self.commit_ts.load(Ordering::Acquire) {
            NO_COMMIT_TS => None,
            ts => Some(ts),
        }
    }

    pub(crate) fn set_commit_ts(&self, commit_ts: u64) {
        self.commit_ts.store(commit_ts, Ordering::Release);
    }

    pub fn undo_buffer(&self) -> &UndoBuffer {
        &self.undo_buffer
    }

    /// The timestamp writes made by this transaction should be checked against: its own id while
    /// uncommitted (so it sees its own writes), its commit timestamp once committed.
    pub fn visibility_id(&self) -> u64 {
        self.commit_ts().unwrap_or(self.id)
    }
}
