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

//! Replays the write-ahead log into the data file. `CheckpointMode::Commit` is run after every
//! committed write transaction's pages are durable in the WAL; `CheckpointMode::Rollback` is run
//! instead when a write transaction aborts, so the shadow file (not the WAL) supplies the
//! pre-images to restore.

use kuzu_common::constants::KUZU_PAGE_SIZE;
use kuzu_common::error::StorageResult;

use super::page_manager::PageManager;
use super::shadow_file::ShadowFile;
use super::{Wal, WalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Commit,
    Rollback,
}

pub struct Checkpointer<'a> {
    wal: &'a Wal,
    page_manager: &'a mut PageManager,
    shadow: &'a ShadowFile,
}

impl<'a> Checkpointer<'a> {
    pub fn new(wal: &'a Wal, page_manager: &'a mut PageManager, shadow: &'a ShadowFile) -> Self {
        Checkpointer {
            wal,
            page_manager,
            shadow,
        }
    }

    /// Applies every `PageUpdate` record in the WAL to the data file, then clears the WAL and
    /// the shadow file. Called with no active write transaction in the system (the transaction
    /// manager enforces this before calling in).
    pub fn run(&mut self, mode: CheckpointMode) -> StorageResult<()> {
        match mode {
            CheckpointMode::Commit => {
                for record in self.wal.read_all_records()? {
                    if let WalRecord::PageUpdate { page_idx, data } = record {
                        let mut page = [0u8; KUZU_PAGE_SIZE];
                        let len = data.len().min(KUZU_PAGE_SIZE);
                        page[..len].copy_from_slice(&data[..len]);
                        self.page_manager.write_page(page_idx, &page, self.shadow)?;
                    }
                }
                self.page_manager.sync()?;
            }
            CheckpointMode::Rollback => {
                self.page_manager.restore_from_shadow(self.shadow)?;
            }
        }
        self.shadow.clear();
        self.wal.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_checkpoint_applies_logged_pages() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();
        let mut pm = PageManager::open(dir.path().join("data.kz")).unwrap();
        pm.allocate_pages(1).unwrap();
        let shadow = ShadowFile::new();

        let mut page = [7u8; KUZU_PAGE_SIZE];
        page[0] = 1;
        wal.log_page_update(0, &page).unwrap();
        wal.flush_all_pages().unwrap();

        let mut checkpointer = Checkpointer::new(&wal, &mut pm, &shadow);
        checkpointer.run(CheckpointMode::Commit).unwrap();

        assert_eq!(pm.read_page(0).unwrap(), page);
        assert!(wal.read_all_records().unwrap().is_empty());
    }

    #[test]
    fn rollback_checkpoint_restores_pre_images() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path().join("wal.log")).unwrap();
        let mut pm = PageManager::open(dir.path().join("data.kz")).unwrap();
        pm.allocate_pages(1).unwrap();
        let shadow = ShadowFile::new();

        let mut page = [9u8; KUZU_PAGE_SIZE];
        pm.write_page(0, &page, &shadow).unwrap();
        page[0] = 0;

        let mut checkpointer = Checkpointer::new(&wal, &mut pm, &shadow);
        checkpointer.run(CheckpointMode::Rollback).unwrap();

        assert_eq!(pm.read_page(0).unwrap(), [0u8; KUZU_PAGE_SIZE]);
    }
}
