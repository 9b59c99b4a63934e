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

//! Before a page is overwritten in place, its pre-image is copied here. A rollback restores every
//! recorded page from its pre-image; a successful commit simply discards the shadow (the WAL
//! already has the post-images needed to redo the write on crash recovery).

use std::collections::BTreeMap;
use std::sync::Mutex;

use kuzu_common::constants::KUZU_PAGE_SIZE;

#[derive(Default)]
pub struct ShadowFile {
    /// page_idx -> pre-image, recorded the first time a page is touched by the active write
    /// transaction. Later writes to the same page don't overwrite the recorded pre-image.
    pre_images: Mutex<BTreeMap<u64, [u8; KUZU_PAGE_SIZE]>>,
}

impl ShadowFile {
    pub fn new() -> Self {
        ShadowFile {
            pre_images: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records `page`'s current contents if this is the first time it's been touched since the
    /// last `clear`. Returns `true` if this call did the recording.
    pub fn record_if_absent(&self, page_idx: u64, current_contents: &[u8; KUZU_PAGE_SIZE]) -> bool {
        let mut pre_images = self.pre_images.lock().unwrap();
        if pre_images.contains_key(&page_idx) {
            return false;
        }
        pre_images.insert(page_idx, *current_contents);
        true
    }

    pub fn pre_images(&self) -> Vec<(u64, [u8; KUZU_PAGE_SIZE])> {
        self.pre_images
            .lock()
            .unwrap()
            .iter()
            .map(|(&idx, bytes)| (idx, *bytes))
            .collect()
    }

    pub fn clear(&self) {
        self.pre_images.lock().unwrap().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pre_images.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_write_to_a_page_is_recorded() {
        let shadow = ShadowFile::new();
        let first = [1u8; KUZU_PAGE_SIZE];
        let second = [2u8; KUZU_PAGE_SIZE];
        assert!(shadow.record_if_absent(0, &first));
        assert!(!shadow.record_if_absent(0, &second));
        let pre_images = shadow.pre_images();
        assert_eq!(pre_images.len(), 1);
        assert_eq!(pre_images[0].1, first);
    }
}
