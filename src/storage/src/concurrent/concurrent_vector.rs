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

//! Grow-but-never-move container used for page-metadata arrays and BFS morsel queues.
//!
//! Structure: an initial contiguous block (size fixed at construction), then a linked list of
//! index pages, each pointing to `index_size` blocks of `block_size` elements. Access to elements
//! that existed when the vector was created costs one comparison and one pointer read; access to
//! new elements costs traversing the index chain, which only grows every
//! `block_size * index_size` elements.
//!
//! Any number of readers may run concurrently with a writer. Concurrent `push_back` callers each
//! reserve a unique index via `fetch_add` before writing, so no two callers ever write the same
//! slot; a reader is only guaranteed to observe a slot once it has observed (e.g. via `len()`)
//! that the corresponding `push_back` completed.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::locked_ptr::LockedPtr;

struct Block<T> {
    data: Box<[UnsafeCell<T>]>,
}

// SAFETY: slots are written at most once per index by the thread that won that index via
// `fetch_add`, and readers are documented to only observe already-completed writes.
unsafe impl<T: Send> Send for Block<T> {}
unsafe impl<T: Send> Sync for Block<T> {}

impl<T: Default> Block<T> {
    fn new(size: usize) -> Self {
        Block {
            data: (0..size).map(|_| UnsafeCell::new(T::default())).collect(),
        }
    }
}

struct BlockIndex<T> {
    next_index: LockedPtr<BlockIndex<T>>,
    blocks: Vec<LockedPtr<Block<T>>>,
    num_blocks: AtomicUsize,
}

impl<T> BlockIndex<T> {
    fn new(index_size: usize) -> Self {
        let mut blocks = Vec::with_capacity(index_size);
        blocks.resize_with(index_size, LockedPtr::new);
        BlockIndex {
            next_index: LockedPtr::new(),
            blocks,
            num_blocks: AtomicUsize::new(0),
        }
    }
}

pub struct ConcurrentVector<T> {
    num_elements: AtomicU64,
    initial_block: Box<[UnsafeCell<T>]>,
    initial_block_size: u64,
    first_index: LockedPtr<BlockIndex<T>>,
    block_size: u64,
    index_size: u64,
}

unsafe impl<T: Send> Send for ConcurrentVector<T> {}
unsafe impl<T: Send> Sync for ConcurrentVector<T> {}

impl<T: Default> ConcurrentVector<T> {
    pub fn new(initial_num_elements: u64, initial_block_size: u64) -> Self {
        Self::with_block_sizes(
            initial_num_elements,
            initial_block_size,
            initial_block_size.max(1),
            initial_block_size.max(1),
        )
    }

    pub fn with_block_sizes(
        initial_num_elements: u64,
        initial_block_size: u64,
        block_size: u64,
        index_size: u64,
    ) -> Self {
        let initial_block = (0..initial_block_size)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();
        let vector = ConcurrentVector {
            num_elements: AtomicU64::new(0),
            initial_block,
            initial_block_size,
            first_index: LockedPtr::new(),
            block_size,
            index_size,
        };
        vector.resize(initial_num_elements);
        vector
    }

    pub fn len(&self) -> u64 {
        self.num_elements.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates at least `new_size` elements. If another thread is resizing concurrently, the
    /// larger of the two sizes wins.
    pub fn resize(&self, new_size: u64) {
        let mut expected = self.num_elements.load(Ordering::Acquire);
        while expected < new_size {
            match self.num_elements.compare_exchange_weak(
                expected,
                new_size,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => expected = actual,
            }
        }
        self.allocate_blocks(new_size.max(expected));
    }

    /// Reserves the next index and writes `value` into it. Returns the reserved index.
    pub fn push_back(&self, value: T) -> u64 {
        let index = self.num_elements.fetch_add(1, Ordering::AcqRel);
        self.allocate_blocks(index + 1);
        // SAFETY: `index` was reserved uniquely by this call via `fetch_add`; no other caller
        // writes this slot.
        unsafe { *self.slot(index) = value };
        index
    }

    pub fn clear(&self) {
        self.num_elements.store(0, Ordering::Release);
    }

    /// Read access to a slot. The caller must ensure the writer that produced this index has
    /// already completed (e.g. by having observed `len() > index` through a synchronizing read).
    pub fn get(&self, index: u64) -> &T {
        // SAFETY: see module and function docs; slot is stable once allocated and written.
        unsafe { &*self.slot(index) }
    }

    fn slot(&self, elem_pos: u64) -> *mut T {
        if elem_pos < self.initial_block_size {
            return self.initial_block[elem_pos as usize].get();
        }
        let offset = elem_pos - self.initial_block_size;
        let block_num = offset / self.block_size;
        let pos_in_block = offset % self.block_size;
        let mut index_num = block_num / self.index_size;
        let mut index = self
            .first_index
            .get()
            .expect("block index must be allocated before slot() is called");
        while index_num > 0 {
            index = index
                .next_index
                .get()
                .expect("chained block index must be allocated before slot() is called");
            index_num -= 1;
        }
        let block = index.blocks[(block_num % self.index_size) as usize]
            .get()
            .expect("block must be allocated before slot() is called");
        block.data[pos_in_block as usize].get()
    }

    /// Ensures sufficient blocks exist for `new_size` elements. Never deallocates. Thread-safe;
    /// blocks may already have been allocated by a concurrent caller.
    fn allocate_blocks(&self, new_size: u64) {
        if new_size <= self.initial_block_size {
            return;
        }
        if self.first_index.get().is_none() {
            let index_size = self.index_size as usize;
            self.first_index
                .set(|| Box::new(BlockIndex::new(index_size)));
        }
        let mut index = self.first_index.get().unwrap();
        let mut previous_index_size = self.initial_block_size;
        while previous_index_size + index.num_blocks.load(Ordering::Acquire) as u64 * self.block_size
            < new_size
        {
            if (index.num_blocks.load(Ordering::Acquire) as u64) < self.index_size {
                while (index.num_blocks.load(Ordering::Acquire) as u64) < self.index_size
                    && previous_index_size
                        + index.num_blocks.load(Ordering::Acquire) as u64 * self.block_size
                        < new_size
                {
                    let new_block_position = index.num_blocks.load(Ordering::Acquire);
                    if (new_block_position as u64) < self.index_size {
                        let block_size = self.block_size as usize;
                        if index.blocks[new_block_position].set(|| Box::new(Block::new(block_size)))
                        {
                            index.num_blocks.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                }
            } else {
                previous_index_size += index.num_blocks.load(Ordering::Acquire) as u64 * self.block_size;
                if index.next_index.get().is_none() {
                    let index_size = self.index_size as usize;
                    index.next_index.set(|| Box::new(BlockIndex::new(index_size)));
                }
                index = index.next_index.get().unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn push_back_every_value_visible_exactly_once() {
        let vector = Arc::new(ConcurrentVector::<u64>::with_block_sizes(0, 4, 4, 4));
        let num_threads = 8u64;
        let per_thread = 500u64;
        let mut handles = Vec::new();
        for t in 0..num_threads {
            let vector = vector.clone();
            handles.push(std::thread::spawn(move || {
                let mut indices = Vec::with_capacity(per_thread as usize);
                for i in 0..per_thread {
                    indices.push(vector.push_back(t * per_thread + i));
                }
                indices
            }));
        }
        let mut all_indices = Vec::new();
        for h in handles {
            all_indices.extend(h.join().unwrap());
        }
        all_indices.sort_unstable();
        let expected: Vec<u64> = (0..num_threads * per_thread).collect();
        assert_eq!(all_indices, expected);
        assert_eq!(vector.len(), num_threads * per_thread);

        let mut seen_values: Vec<u64> = (0..vector.len()).map(|i| *vector.get(i)).collect();
        seen_values.sort_unstable();
        assert_eq!(seen_values, expected);
    }

    #[test]
    fn resize_allocates_blocks_spanning_index_pages() {
        let vector = ConcurrentVector::<u64>::with_block_sizes(0, 2, 2, 2);
        vector.resize(20);
        for i in 0..20u64 {
            assert_eq!(*vector.get(i), 0);
        }
        assert_eq!(vector.push_back(99), 20);
        assert_eq!(*vector.get(20), 99);
    }
}
