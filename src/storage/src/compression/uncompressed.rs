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

//! Fallback codec for columns that don't benefit from (or don't support) compression: strings,
//! and any integer segment whose values didn't analyze well under bit-packing.

use kuzu_common::error::StorageResult;

use super::metadata::CompressionMetadata;
use super::CompressionCodec;

pub struct Uncompressed;

impl CompressionCodec for Uncompressed {
    fn num_values(&self, data_size: usize, _metadata: &CompressionMetadata) -> u64 {
        (data_size / std::mem::size_of::<i64>()) as u64
    }

    fn get_max_capacity(&self, num_pages: u64, metadata: &CompressionMetadata) -> u64 {
        self.num_values(
            (num_pages as usize) * kuzu_common::constants::KUZU_PAGE_SIZE,
            metadata,
        )
    }

    fn compress(
        &self,
        src: &[i64],
        dst: &mut [u8],
        _metadata: &CompressionMetadata,
    ) -> StorageResult<()> {
        for (i, &v) in src.iter().enumerate() {
            dst[i * 8..(i + 1) * 8].copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    fn decompress(
        &self,
        src: &[u8],
        dst: &mut [i64],
        num_values: u64,
        _metadata: &CompressionMetadata,
    ) -> StorageResult<()> {
        for i in 0..num_values as usize {
            let bytes: [u8; 8] = src[i * 8..(i + 1) * 8].try_into().unwrap();
            dst[i] = i64::from_le_bytes(bytes);
        }
        Ok(())
    }

    fn can_update_in_place(&self, _value: i64, _metadata: &CompressionMetadata) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_values() {
        let codec = Uncompressed;
        let values = vec![i64::MIN, -1, 0, 1, i64::MAX];
        let metadata = CompressionMetadata::uncompressed();
        let mut buf = vec![0u8; values.len() * 8];
        codec.compress(&values, &mut buf, &metadata).unwrap();
        let mut out = vec![0i64; values.len()];
        codec
            .decompress(&buf, &mut out, values.len() as u64, &metadata)
            .unwrap();
        assert_eq!(values, out);
    }
}
