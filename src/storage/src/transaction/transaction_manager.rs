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

//! Serializes transaction begin/commit/rollback/checkpoint against each other. Checkpointing
//! needs exclusive access to the data file, so it first stops new transactions from starting and
//! spin-waits (bounded by `checkpoint_wait_timeout_micros`) for every active transaction to leave.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use kuzu_common::config::DBConfig;
use kuzu_common::constants::{START_TRANSACTION_ID, THREAD_SLEEP_TIME_WHEN_WAITING_MICROS};
use kuzu_common::error::{StorageError, StorageResult};

use super::{Transaction, TransactionType};
use crate::wal::{CheckpointMode, Checkpointer, PageManager, ShadowFile, Wal};

pub struct TransactionManager {
    last_transaction_id: AtomicU64,
    last_timestamp: AtomicU64,
    active_write_transactions: Mutex<HashSet<u64>>,
    active_read_transactions: Mutex<HashSet<u64>>,
    /// Held for the duration of `checkpoint_no_lock`'s drain-and-checkpoint window so no new
    /// transaction can start while a checkpoint is stopping the world.
    starting_new_transactions: Mutex<()>,
    enable_multi_writes: bool,
    checkpoint_wait_timeout_micros: u64,
    wal: Wal,
}

impl TransactionManager {
    pub fn new(config: &DBConfig, wal: Wal) -> Self {
        TransactionManager {
            last_transaction_id: AtomicU64::new(START_TRANSACTION_ID),
            last_timestamp: AtomicU64::new(0),
            active_write_transactions: Mutex::new(HashSet::new()),
            active_read_transactions: Mutex::new(HashSet::new()),
            starting_new_transactions: Mutex::new(()),
            enable_multi_writes: config.enable_multi_writes,
            checkpoint_wait_timeout_micros: config.checkpoint_wait_timeout_micros,
            wal,
        }
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    pub fn begin_transaction(&self, transaction_type: TransactionType) -> StorageResult<Transaction> {
        // Mirrors the upstream two-lock protocol: first bar new transactions from starting while
        // a checkpoint is draining the system, then serialize against other begin/commit calls.
        let _new_txn_guard = self.starting_new_transactions.lock().unwrap();
        if transaction_type == TransactionType::Write
            && !self.enable_multi_writes
            && !self.active_write_transactions.lock().unwrap().is_empty()
        {
            return Err(StorageError::TooManyWriteTransactions);
        }
        let id = self.last_transaction_id.fetch_add(1, Ordering::AcqRel) + 1;
        let start_ts = self.last_timestamp.load(Ordering::Acquire);
        let transaction = Transaction::new(id, transaction_type, start_ts);
        match transaction_type {
            TransactionType::Write => {
                self.active_write_transactions.lock().unwrap().insert(id);
            }
            TransactionType::ReadOnly => {
                self.active_read_transactions.lock().unwrap().insert(id);
            }
        }
        debug!(transaction_id = id, ?transaction_type, "began transaction");
        Ok(transaction)
    }

    /// Commits `transaction`: assigns it the next timestamp, writes its commit record to the
    /// WAL, flushes, then optionally checkpoints immediately (the common case for an
    /// auto-checkpointing single-writer database).
    pub fn commit(
        &self,
        transaction: &Transaction,
        page_manager: &mut PageManager,
        shadow: &ShadowFile,
        skip_checkpoint: bool,
    ) -> StorageResult<()> {
        if transaction.is_read_only() {
            self.active_read_transactions
                .lock()
                .unwrap()
                .remove(&transaction.id());
            return Ok(());
        }
        let commit_ts = self.last_timestamp.fetch_add(1, Ordering::AcqRel) + 1;
        transaction.set_commit_ts(commit_ts);
        self.wal.log_commit(transaction.id(), commit_ts)?;
        self.wal.flush_all_pages()?;
        self.active_write_transactions
            .lock()
            .unwrap()
            .remove(&transaction.id());
        info!(transaction_id = transaction.id(), commit_ts, "committed transaction");
        if !skip_checkpoint {
            self.checkpoint_no_lock(page_manager, shadow)?;
        }
        Ok(())
    }

    pub fn rollback(
        &self,
        transaction: &Transaction,
        page_manager: &mut PageManager,
        shadow: &ShadowFile,
    ) -> StorageResult<()> {
        if transaction.is_read_only() {
            self.active_read_transactions
                .lock()
                .unwrap()
                .remove(&transaction.id());
            return Ok(());
        }
        self.wal.log_rollback(transaction.id())?;
        self.wal.flush_all_pages()?;
        self.active_write_transactions
            .lock()
            .unwrap()
            .remove(&transaction.id());
        let mut checkpointer = Checkpointer::new(&self.wal, page_manager, shadow);
        checkpointer.run(CheckpointMode::Rollback)?;
        warn!(transaction_id = transaction.id(), "rolled back transaction");
        Ok(())
    }

    pub fn checkpoint(
        &self,
        page_manager: &mut PageManager,
        shadow: &ShadowFile,
    ) -> StorageResult<()> {
        self.checkpoint_no_lock(page_manager, shadow)
    }

    fn can_checkpoint_no_lock(&self) -> bool {
        self.active_write_transactions.lock().unwrap().is_empty()
            && self.active_read_transactions.lock().unwrap().is_empty()
    }

    /// Blocks new transactions from starting, then spin-waits for every active transaction to
    /// finish before running the checkpoint and releasing the start-transaction lock again.
    fn checkpoint_no_lock(
        &self,
        page_manager: &mut PageManager,
        shadow: &ShadowFile,
    ) -> StorageResult<()> {
        let guard = self.starting_new_transactions.lock().unwrap();
        let mut waited_micros = 0u64;
        while !self.can_checkpoint_no_lock() {
            if waited_micros > self.checkpoint_wait_timeout_micros {
                return Err(StorageError::CheckpointTimeout { waited_micros });
            }
            std::thread::sleep(Duration::from_micros(THREAD_SLEEP_TIME_WHEN_WAITING_MICROS));
            waited_micros += THREAD_SLEEP_TIME_WHEN_WAITING_MICROS;
        }
        let mut checkpointer = Checkpointer::new(&self.wal, page_manager, shadow);
        checkpointer.run(CheckpointMode::Commit)?;
        info!("checkpoint complete");
        drop(guard);
        Ok(())
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp.load(Ordering::Acquire)
    }

    /// Restores the commit-timestamp counter from a replayed WAL so a transaction begun right
    /// after recovery gets a `start_ts` past every commit that's already durable — without this a
    /// fresh reader's `start_ts` would reset to 0 on every reopen and see replayed deletions
    /// (whose version entries hold the *old* process's small commit timestamps) as not-yet-
    /// committed, undoing them. Called once, before replay applies any record.
    pub fn restore_last_timestamp(&self, commit_ts: u64) {
        self.last_timestamp.fetch_max(commit_ts, Ordering::AcqRel);
    }

    /// Restores the transaction-id counter the same way, so a newly begun transaction's id never
    /// collides with one a replayed (but possibly still-open in the WAL) transaction already used.
    pub fn restore_last_transaction_id(&self, transaction_id: u64) {
        self.last_transaction_id.fetch_max(transaction_id, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, TransactionManager) {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();
        let config = DBConfig::default();
        (dir, TransactionManager::new(&config, wal))
    }

    #[test]
    fn second_write_transaction_is_rejected_without_multi_writes() {
        let (_dir, manager) = manager();
        let _t1 = manager.begin_transaction(TransactionType::Write).unwrap();
        let err = manager
            .begin_transaction(TransactionType::Write)
            .unwrap_err();
        assert!(matches!(err, StorageError::TooManyWriteTransactions));
    }

    #[test]
    fn commit_assigns_increasing_timestamps() {
        let (dir, manager) = manager();
        let mut pm = PageManager::open(dir.path().join("data.kz")).unwrap();
        let shadow = ShadowFile::new();
        let t1 = manager.begin_transaction(TransactionType::Write).unwrap();
        manager.commit(&t1, &mut pm, &shadow, true).unwrap();
        assert_eq!(t1.commit_ts(), Some(1));
        let t2 = manager.begin_transaction(TransactionType::Write).unwrap();
        manager.commit(&t2, &mut pm, &shadow, true).unwrap();
        assert_eq!(t2.commit_ts(), Some(2));
        manager.checkpoint(&mut pm, &shadow).unwrap();
    }

    #[test]
    fn read_only_transactions_may_run_concurrently() {
        let (_dir, manager) = manager();
        let _r1 = manager
            .begin_transaction(TransactionType::ReadOnly)
            .unwrap();
        let _r2 = manager
            .begin_transaction(TransactionType::ReadOnly)
            .unwrap();
    }
}
