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

//! Per-column-chunk compression. Every codec implements `CompressionCodec`; which one a segment
//! uses is recorded in its `CompressionMetadata` so `ColumnChunk` can dispatch without touching
//! the segment's bytes beyond what the codec needs.

mod bitpacking;
mod constant;
mod float_alp;
pub mod metadata;
mod uncompressed;

pub use bitpacking::IntegerBitpacking;
pub use constant::ConstantCompression;
pub use float_alp::FloatAlpCompression;
pub use metadata::{BitpackInfo, CompressionMetadata, CompressionType, FloatMetadata};
pub use uncompressed::Uncompressed;

use kuzu_common::error::StorageResult;

/// Common contract every integer-domain compression scheme implements. `FloatAlpCompression`
/// additionally exposes an exceptions-aware entry point (`compress_with_exceptions`) since it is
/// the only codec whose compressed representation can itself fail to round-trip a value.
pub trait CompressionCodec {
    fn num_values(&self, data_size: usize, metadata: &CompressionMetadata) -> u64;
    fn get_max_capacity(&self, num_pages: u64, metadata: &CompressionMetadata) -> u64;
    fn compress(
        &self,
        src: &[i64],
        dst: &mut [u8],
        metadata: &CompressionMetadata,
    ) -> StorageResult<()>;
    fn decompress(
        &self,
        src: &[u8],
        dst: &mut [i64],
        num_values: u64,
        metadata: &CompressionMetadata,
    ) -> StorageResult<()>;
    fn can_update_in_place(&self, value: i64, metadata: &CompressionMetadata) -> bool;
}

/// Picks a codec for a freshly-flushed integer segment: constant if every value is identical,
/// otherwise bit-packing sized to the segment's min/max range.
pub fn choose_integer_codec(values: &[i64]) -> (Box<dyn CompressionCodec>, CompressionMetadata) {
    if let Some(&first) = values.first() {
        if values.iter().all(|&v| v == first) {
            let metadata = CompressionMetadata::constant(kuzu_common::types::Value::Int64(first));
            return (Box::new(ConstantCompression), metadata);
        }
    }
    let metadata = IntegerBitpacking::analyze(values);
    (Box::new(IntegerBitpacking), metadata)
}
