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

//! Zero-byte encoding for a segment whose every value is identical: the value lives entirely in
//! `CompressionMetadata::min` and no page is allocated for it.

use kuzu_common::error::StorageResult;

use super::metadata::CompressionMetadata;
use super::CompressionCodec;

pub struct ConstantCompression;

impl CompressionCodec for ConstantCompression {
    fn num_values(&self, _data_size: usize, _metadata: &CompressionMetadata) -> u64 {
        u64::MAX
    }

    fn get_max_capacity(&self, _num_pages: u64, _metadata: &CompressionMetadata) -> u64 {
        u64::MAX
    }

    fn compress(
        &self,
        _src: &[i64],
        _dst: &mut [u8],
        _metadata: &CompressionMetadata,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn decompress(
        &self,
        _src: &[u8],
        dst: &mut [i64],
        num_values: u64,
        metadata: &CompressionMetadata,
    ) -> StorageResult<()> {
        let value = metadata.min.as_i64().unwrap_or(0);
        dst[..num_values as usize].fill(value);
        Ok(())
    }

    fn can_update_in_place(&self, value: i64, metadata: &CompressionMetadata) -> bool {
        metadata.min.as_i64() == Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuzu_common::types::Value;

    #[test]
    fn decompress_fills_constant_value() {
        let metadata = CompressionMetadata::constant(Value::Int64(42));
        let codec = ConstantCompression;
        let mut dst = vec![0i64; 5];
        codec.decompress(&[], &mut dst, 5, &metadata).unwrap();
        assert_eq!(dst, vec![42; 5]);
    }

    #[test]
    fn in_place_update_only_accepts_the_constant() {
        let metadata = CompressionMetadata::constant(Value::Int64(42));
        let codec = ConstantCompression;
        assert!(codec.can_update_in_place(42, &metadata));
        assert!(!codec.can_update_in_place(43, &metadata));
    }
}
