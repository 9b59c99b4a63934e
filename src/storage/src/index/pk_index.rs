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

//! The primary-key hash index: `PkValue -> Offset` within one table. Partitioned into
//! `NUM_HASH_INDEXES` independent shards by `xxh64(key) % NUM_HASH_INDEXES` so the parallel
//! index builder (see `index_builder`) can have many producer threads feed disjoint shards
//! without contention, and so a later point lookup only ever takes one shard's lock.

use dashmap::DashMap;
use xxhash_rust::xxh64::xxh64;

use kuzu_common::constants::NUM_HASH_INDEXES;
use kuzu_common::error::{StorageError, StorageResult};
use kuzu_common::types::Offset;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PkValue {
    Int64(i64),
    String(String),
}

impl PkValue {
    fn hash_bytes(&self) -> Vec<u8> {
        match self {
            PkValue::Int64(v) => v.to_le_bytes().to_vec(),
            PkValue::String(s) => s.as_bytes().to_vec(),
        }
    }
}

pub fn partition_for(key: &PkValue) -> usize {
    (xxh64(&key.hash_bytes(), 0) % NUM_HASH_INDEXES as u64) as usize
}

/// One table's primary-key index: `NUM_HASH_INDEXES` independently-locked shards, each a plain
/// hash map. Reads and point inserts go straight to the owning shard; a bulk load instead goes
/// through `index_builder::IndexBuilder`, which batches per-shard writes to amortize locking.
pub struct PrimaryKeyIndex {
    shards: Vec<DashMap<PkValue, Offset>>,
}

impl PrimaryKeyIndex {
    pub fn new() -> Self {
        PrimaryKeyIndex {
            shards: (0..NUM_HASH_INDEXES).map(|_| DashMap::new()).collect(),
        }
    }

    pub fn insert(&self, key: PkValue, offset: Offset) -> StorageResult<()> {
        let shard = &self.shards[partition_for(&key)];
        match shard.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StorageError::DuplicatePrimaryKey(
                format!("{key:?}"),
            )),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(offset);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, key: &PkValue) -> Option<Offset> {
        self.shards[partition_for(key)].get(key).map(|e| *e.value())
    }

    pub fn delete(&self, key: &PkValue) -> StorageResult<()> {
        self.shards[partition_for(key)]
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::PrimaryKeyNotFound(format!("{key:?}")))
    }

    pub fn contains(&self, key: &PkValue) -> bool {
        self.shards[partition_for(key)].contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn shard_mut(&self, shard_idx: usize) -> &DashMap<PkValue, Offset> {
        &self.shards[shard_idx]
    }
}

impl Default for PrimaryKeyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips() {
        let index = PrimaryKeyIndex::new();
        index.insert(PkValue::Int64(42), 7).unwrap();
        assert_eq!(index.lookup(&PkValue::Int64(42)), Some(7));
        assert_eq!(index.lookup(&PkValue::Int64(43)), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let index = PrimaryKeyIndex::new();
        index.insert(PkValue::String("a".into()), 1).unwrap();
        let err = index.insert(PkValue::String("a".into()), 2).unwrap_err();
        assert!(matches!(err, StorageError::DuplicatePrimaryKey(_)));
    }

    #[test]
    fn delete_then_lookup_misses() {
        let index = PrimaryKeyIndex::new();
        index.insert(PkValue::Int64(1), 1).unwrap();
        index.delete(&PkValue::Int64(1)).unwrap();
        assert_eq!(index.lookup(&PkValue::Int64(1)), None);
    }

    #[test]
    fn partition_is_stable_for_the_same_key() {
        let key = PkValue::String("repeat".into());
        assert_eq!(partition_for(&key), partition_for(&key));
    }
}
