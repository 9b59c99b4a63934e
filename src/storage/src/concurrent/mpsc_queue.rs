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

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam::queue::SegQueue;

/// Unbounded multi-producer queue with an approximate size used as a back-pressure hint by the
/// primary-key index builder. Any number of producers may `push`; this crate only ever drains a
/// given partition's queue from one thread at a time (serialized by `try_lock` on that
/// partition's mutex, see `index::index_builder`), so a plain lock-free `SegQueue` suffices.
pub struct MpscQueue<T> {
    queue: SegQueue<T>,
    approx_size: AtomicI64,
}

impl<T> MpscQueue<T> {
    pub fn new() -> Self {
        MpscQueue {
            queue: SegQueue::new(),
            approx_size: AtomicI64::new(0),
        }
    }

    pub fn push(&self, value: T) {
        self.queue.push(value);
        self.approx_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop(&self) -> Option<T> {
        let value = self.queue.pop();
        if value.is_some() {
            self.approx_size.fetch_sub(1, Ordering::Relaxed);
        }
        value
    }

    /// An approximate size: racy by construction, intended only as a flush-threshold hint.
    pub fn approx_size(&self) -> usize {
        self.approx_size.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<T> Default for MpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_all_elements() {
        let queue = MpscQueue::new();
        for i in 0..100 {
            queue.push(i);
        }
        assert_eq!(queue.approx_size(), 100);
        let mut drained = Vec::new();
        while let Some(v) = queue.pop() {
            drained.push(v);
        }
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
        assert_eq!(queue.approx_size(), 0);
    }
}
