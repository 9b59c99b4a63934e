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

//! Fixed-size page access over the database's single data file, memory-mapped for read-mostly
//! scan workloads. Writes go through `write_page`, which takes a pre-image for the shadow file
//! before overwriting so a rollback or crash can restore the previous state.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use kuzu_common::constants::KUZU_PAGE_SIZE;
use kuzu_common::error::StorageResult;

use super::shadow_file::ShadowFile;

pub struct PageManager {
    path: PathBuf,
    file: std::fs::File,
    num_pages: u64,
}

impl PageManager {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(PageManager {
            path: path.as_ref().to_path_buf(),
            file,
            num_pages: len / KUZU_PAGE_SIZE as u64,
        })
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    /// Appends `count` zeroed pages and returns the index of the first new page.
    pub fn allocate_pages(&mut self, count: u64) -> StorageResult<u64> {
        let first = self.num_pages;
        self.file
            .set_len((self.num_pages + count) * KUZU_PAGE_SIZE as u64)?;
        self.num_pages += count;
        Ok(first)
    }

    pub fn read_page(&self, page_idx: u64) -> StorageResult<[u8; KUZU_PAGE_SIZE]> {
        // SAFETY: the data file is only concurrently modified by this process through
        // `PageManager`, which serializes writers at the transaction-manager layer.
        let mmap = unsafe { Mmap::map(&self.file)? };
        let mut page = [0u8; KUZU_PAGE_SIZE];
        let offset = page_idx as usize * KUZU_PAGE_SIZE;
        page.copy_from_slice(&mmap[offset..offset + KUZU_PAGE_SIZE]);
        Ok(page)
    }

    /// Overwrites `page_idx`, first preserving its pre-image in `shadow` if this is the first
    /// write to that page since the shadow was last cleared.
    pub fn write_page(
        &mut self,
        page_idx: u64,
        data: &[u8; KUZU_PAGE_SIZE],
        shadow: &ShadowFile,
    ) -> StorageResult<()> {
        let pre_image = self.read_page(page_idx)?;
        shadow.record_if_absent(page_idx, &pre_image);
        self.file
            .seek(SeekFrom::Start(page_idx * KUZU_PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Restores every page recorded in `shadow` to its pre-image, used on rollback.
    pub fn restore_from_shadow(&mut self, shadow: &ShadowFile) -> StorageResult<()> {
        for (page_idx, pre_image) in shadow.pre_images() {
            self.file
                .seek(SeekFrom::Start(page_idx * KUZU_PAGE_SIZE as u64))?;
            self.file.write_all(&pre_image)?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    pub fn mmap_read_only(&self) -> StorageResult<Mmap> {
        // SAFETY: see `read_page`.
        Ok(unsafe { Mmap::map(&self.file)? })
    }

    pub fn mmap_mut(&self) -> StorageResult<MmapMut> {
        // SAFETY: see `read_page`.
        Ok(unsafe { MmapMut::map_mut(&self.file)? })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_returns_the_same_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut pm = PageManager::open(dir.path().join("data.kz")).unwrap();
        pm.allocate_pages(1).unwrap();
        let shadow = ShadowFile::new();
        let mut page = [0u8; KUZU_PAGE_SIZE];
        page[0] = 42;
        pm.write_page(0, &page, &shadow).unwrap();
        assert_eq!(pm.read_page(0).unwrap()[0], 42);
    }

    #[test]
    fn restore_from_shadow_undoes_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut pm = PageManager::open(dir.path().join("data.kz")).unwrap();
        pm.allocate_pages(1).unwrap();
        let shadow = ShadowFile::new();
        let mut page = [0u8; KUZU_PAGE_SIZE];
        page[0] = 99;
        pm.write_page(0, &page, &shadow).unwrap();
        pm.restore_from_shadow(&shadow).unwrap();
        assert_eq!(pm.read_page(0).unwrap()[0], 0);
    }
}
