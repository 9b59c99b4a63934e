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

/// Number of elements in one value vector / one MVCC tracking band.
pub const DEFAULT_VECTOR_CAPACITY: usize = 2048;

/// Number of rows in one chunked node group.
pub const CHUNK_CAPACITY: u64 = 2048 * 64;

/// Number of rows in one node group (a whole number of chunked groups).
pub const NODE_GROUP_SIZE: u64 = CHUNK_CAPACITY * 4;

/// Fixed page size used by the data file, shadow file and WAL.
pub const KUZU_PAGE_SIZE: usize = 4096;

/// Transaction/version ids below this value are committed timestamps; ids at or above it are
/// in-flight transaction ids, so the two spaces never collide when compared with `<=`.
pub const START_TRANSACTION_ID: u64 = 1 << 63;

/// Sentinel for "no transaction has touched this row".
pub const INVALID_TRANSACTION: u64 = u64::MAX;

/// Number of hash partitions used by the primary-key index builder.
pub const NUM_HASH_INDEXES: usize = 256;

/// Per-partition local staging buffer size before it is pushed to the global MPSC queue.
pub const INDEX_BUILDER_LOCAL_BUFFER_SIZE: usize = 1024;

/// Approximate queue depth (elements) at which a producer opportunistically drains a partition.
pub const INDEX_BUILDER_SHOULD_FLUSH_QUEUE_SIZE: usize = 32;

/// Sleep quantum used by `LockedPtr::set` losers and by the checkpoint barrier spin-wait.
pub const THREAD_SLEEP_TIME_WHEN_WAITING_MICROS: u64 = 100;

/// Size in bytes of one ALP float-exception record (8-byte value + 4-byte position).
pub const FLOAT_EXCEPTION_SIZE_BYTES: usize = 12;

pub const fn exception_bytes_per_page() -> usize {
    (KUZU_PAGE_SIZE / FLOAT_EXCEPTION_SIZE_BYTES) * FLOAT_EXCEPTION_SIZE_BYTES
}

pub const fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}

/// Split a row index into `(vector/chunk index, remainder within that band)`.
pub const fn quotient_remainder(value: u64, divisor: u64) -> (u64, u64) {
    (value / divisor, value % divisor)
}

/// Default number of frontier nodes (or destination offsets) handed to one worker in a single
/// call to `IfeMorsel::get_morsel`/`get_dst_write_morsel`.
pub const BFS_DEFAULT_MORSEL_SIZE: u64 = 512;

/// Disk-array headers packed into one catalog header page before chaining to the next page.
pub const NUM_HEADERS_PER_PAGE: usize = 64;
