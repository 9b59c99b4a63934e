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

//! Parallel primary-key index build pipeline, used when a table is bulk-loaded (COPY) rather
//! than row-by-row inserted. Each producer thread scans a disjoint slice of a column and stages
//! keys into `IndexBuilderLocalBuffers`; once a per-shard buffer reaches
//! `INDEX_BUILDER_LOCAL_BUFFER_SIZE` it's pushed onto that shard's lock-free queue in
//! `IndexBuilderGlobalQueues`. A single consumer later drains every shard's queue into the real
//! `PrimaryKeyIndex`, so the expensive hash-map insert only ever happens on one thread per shard.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use kuzu_common::constants::{
    INDEX_BUILDER_LOCAL_BUFFER_SIZE, INDEX_BUILDER_SHOULD_FLUSH_QUEUE_SIZE, NUM_HASH_INDEXES,
};
use kuzu_common::error::StorageResult;
use kuzu_common::types::Offset;

use super::pk_index::{partition_for, PkValue, PrimaryKeyIndex};

type ShardBatch = Vec<(PkValue, Offset)>;

pub struct IndexBuilderGlobalQueues {
    queues: Vec<crate::concurrent::MpscQueue<ShardBatch>>,
    pk_index: Arc<PrimaryKeyIndex>,
}

impl IndexBuilderGlobalQueues {
    pub fn new(pk_index: Arc<PrimaryKeyIndex>) -> Self {
        IndexBuilderGlobalQueues {
            queues: (0..NUM_HASH_INDEXES)
                .map(|_| crate::concurrent::MpscQueue::new())
                .collect(),
            pk_index,
        }
    }

    pub fn push(&self, shard_idx: usize, batch: ShardBatch) {
        self.queues[shard_idx].push(batch);
        if self.queues[shard_idx].approx_size() >= INDEX_BUILDER_SHOULD_FLUSH_QUEUE_SIZE {
            self.maybe_consume_shard(shard_idx);
        }
    }

    fn maybe_consume_shard(&self, shard_idx: usize) {
        while let Some(batch) = self.queues[shard_idx].pop() {
            let shard = self.pk_index.shard_mut(shard_idx);
            for (key, offset) in batch {
                shard.insert(key, offset);
            }
        }
    }

    /// Drains every shard's queue into the index. Called by the single consumer once all
    /// producers have finished (or periodically, as a back-pressure release valve).
    pub fn consume(&self) {
        for shard_idx in 0..NUM_HASH_INDEXES {
            self.maybe_consume_shard(shard_idx);
        }
    }

    pub fn flush_to_disk(&self) {
        debug!(
            num_keys = self.pk_index.len(),
            "primary key index build flushed"
        );
    }
}

pub struct IndexBuilderLocalBuffers {
    global: Arc<IndexBuilderGlobalQueues>,
    buffers: Vec<ShardBatch>,
}

impl IndexBuilderLocalBuffers {
    pub fn new(global: Arc<IndexBuilderGlobalQueues>) -> Self {
        IndexBuilderLocalBuffers {
            global,
            buffers: (0..NUM_HASH_INDEXES)
                .map(|_| Vec::with_capacity(INDEX_BUILDER_LOCAL_BUFFER_SIZE))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: PkValue, offset: Offset) {
        let shard_idx = partition_for(&key);
        let buffer = &mut self.buffers[shard_idx];
        buffer.push((key, offset));
        if buffer.len() >= INDEX_BUILDER_LOCAL_BUFFER_SIZE {
            let batch = std::mem::replace(buffer, Vec::with_capacity(INDEX_BUILDER_LOCAL_BUFFER_SIZE));
            self.global.push(shard_idx, batch);
        }
    }

    /// Pushes every non-empty local buffer to the global queues, even if under threshold. Called
    /// when a producer is done so no key is stranded in a local buffer.
    pub fn flush(&mut self) {
        for shard_idx in 0..NUM_HASH_INDEXES {
            if !self.buffers[shard_idx].is_empty() {
                let batch = std::mem::take(&mut self.buffers[shard_idx]);
                self.global.push(shard_idx, batch);
            }
        }
    }
}

pub struct IndexBuilderSharedState {
    global_queues: Arc<IndexBuilderGlobalQueues>,
    producers: AtomicUsize,
    done: AtomicBool,
}

impl IndexBuilderSharedState {
    pub fn new(pk_index: Arc<PrimaryKeyIndex>) -> Arc<Self> {
        Arc::new(IndexBuilderSharedState {
            global_queues: Arc::new(IndexBuilderGlobalQueues::new(pk_index)),
            producers: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        })
    }

    fn add_producer(&self) {
        self.producers.fetch_add(1, Ordering::Relaxed);
    }

    fn quit_producer(&self) {
        if self.producers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.done.store(true, Ordering::Release);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    pub fn consume(&self) {
        self.global_queues.consume();
    }

    pub fn flush(&self) {
        self.global_queues.flush_to_disk();
    }
}

/// RAII producer-count token: constructing it registers a producer, dropping (or calling `quit`
/// explicitly) deregisters it. The last producer to quit flips `IndexBuilderSharedState::done`.
pub struct ProducerToken {
    shared_state: Option<Arc<IndexBuilderSharedState>>,
}

impl ProducerToken {
    fn new(shared_state: Arc<IndexBuilderSharedState>) -> Self {
        shared_state.add_producer();
        ProducerToken {
            shared_state: Some(shared_state),
        }
    }

    pub fn quit(mut self) {
        if let Some(state) = self.shared_state.take() {
            state.quit_producer();
        }
    }
}

impl Drop for ProducerToken {
    fn drop(&mut self) {
        if let Some(state) = self.shared_state.take() {
            state.quit_producer();
        }
    }
}

/// One producer's handle into the shared build pipeline: its own local buffers plus a reference
/// to the shared state for finalize/flush. `clone()` (mirroring the upstream pattern of handing
/// one `IndexBuilder` per scan-and-build task) gives a second producer its own local buffers over
/// the same shared state.
pub struct IndexBuilder {
    shared_state: Arc<IndexBuilderSharedState>,
    local_buffers: IndexBuilderLocalBuffers,
}

impl IndexBuilder {
    pub fn new(shared_state: Arc<IndexBuilderSharedState>) -> Self {
        let local_buffers = IndexBuilderLocalBuffers::new(shared_state.global_queues.clone());
        IndexBuilder {
            shared_state,
            local_buffers,
        }
    }

    pub fn clone_for_new_producer(&self) -> Self {
        IndexBuilder::new(self.shared_state.clone())
    }

    pub fn producer_token(&self) -> ProducerToken {
        ProducerToken::new(self.shared_state.clone())
    }

    pub fn insert(&mut self, key: PkValue, offset: Offset) {
        self.local_buffers.insert(key, offset);
    }

    pub fn finished_producing(&mut self) {
        self.local_buffers.flush();
    }

    pub fn finalize(&self) -> StorageResult<()> {
        self.shared_state.consume();
        self.shared_state.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_producers_land_every_key_in_the_index() {
        let pk_index = Arc::new(PrimaryKeyIndex::new());
        let shared_state = IndexBuilderSharedState::new(pk_index.clone());
        let num_producers = 4;
        let keys_per_producer = 2_000u64;
        let mut handles = Vec::new();
        for p in 0..num_producers {
            let mut builder = IndexBuilder::new(shared_state.clone());
            let token = builder.producer_token();
            handles.push(std::thread::spawn(move || {
                for i in 0..keys_per_producer {
                    let key = PkValue::Int64((p * keys_per_producer + i) as i64);
                    builder.insert(key, p * keys_per_producer + i);
                }
                builder.finished_producing();
                token.quit();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(shared_state.is_done());
        shared_state.consume();
        assert_eq!(pk_index.len(), (num_producers * keys_per_producer) as usize);
        assert_eq!(pk_index.lookup(&PkValue::Int64(0)), Some(0));
    }
}
