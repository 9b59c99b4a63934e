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

//! Integer bit-packing: every value is stored as `(value - offset)` using the minimum bit width
//! that covers the segment's range, packed contiguously (no byte alignment between values).

use kuzu_common::constants::KUZU_PAGE_SIZE;
use kuzu_common::error::{StorageError, StorageResult};

use super::metadata::{BitpackInfo, CompressionMetadata};
use super::CompressionCodec;

fn bit_width_for_range(min: i64, max: i64) -> u8 {
    if min == max {
        return 0;
    }
    let range = (max - min) as u64;
    (64 - range.leading_zeros()).max(1) as u8
}

pub struct IntegerBitpacking;

impl IntegerBitpacking {
    pub fn analyze(values: &[i64]) -> CompressionMetadata {
        let min = values.iter().copied().min().unwrap_or(0);
        let max = values.iter().copied().max().unwrap_or(0);
        let bit_width = bit_width_for_range(min, max);
        let info = BitpackInfo {
            bit_width,
            has_negative: min < 0,
            offset: min,
        };
        CompressionMetadata::bitpacked(min, max, info)
    }

    pub fn get_packing_info(metadata: &CompressionMetadata) -> BitpackInfo {
        metadata.bitpack
    }

    pub fn num_values(data_size: usize, metadata: &CompressionMetadata) -> u64 {
        let bit_width = metadata.bitpack.bit_width as u64;
        if bit_width == 0 {
            return u64::MAX;
        }
        (data_size as u64 * 8) / bit_width
    }

    pub fn get_min_pages(num_values: u64, metadata: &CompressionMetadata) -> u64 {
        let bit_width = metadata.bitpack.bit_width as u64;
        if bit_width == 0 {
            return 0;
        }
        let bits = num_values * bit_width;
        let bytes = bits.div_ceil(8);
        bytes.div_ceil(KUZU_PAGE_SIZE as u64)
    }

    pub fn get_max_capacity(num_pages: u64, metadata: &CompressionMetadata) -> u64 {
        Self::num_values((num_pages as usize) * KUZU_PAGE_SIZE, metadata)
    }

    fn mask(bit_width: u8) -> u64 {
        if bit_width >= 64 {
            u64::MAX
        } else {
            (1u64 << bit_width) - 1
        }
    }

    fn pack(value: i64, offset: i64, bit_width: u8) -> u64 {
        if bit_width == 0 {
            return 0;
        }
        (value - offset) as u64 & Self::mask(bit_width)
    }

    fn unpack(packed: u64, offset: i64) -> i64 {
        packed as i64 + offset
    }

    fn write_bits(dst: &mut [u8], bit_offset: u64, width: u8, value: u64) {
        for i in 0..width as u64 {
            let bit = (value >> i) & 1;
            let abs_bit = bit_offset + i;
            let byte = (abs_bit / 8) as usize;
            let shift = abs_bit % 8;
            if bit == 1 {
                dst[byte] |= 1 << shift;
            } else {
                dst[byte] &= !(1 << shift);
            }
        }
    }

    fn read_bits(src: &[u8], bit_offset: u64, width: u8) -> u64 {
        let mut value = 0u64;
        for i in 0..width as u64 {
            let abs_bit = bit_offset + i;
            let byte = (abs_bit / 8) as usize;
            let shift = abs_bit % 8;
            let bit = (src[byte] >> shift) & 1;
            value |= (bit as u64) << i;
        }
        value
    }

    pub fn compress_values(
        values: &[i64],
        dst: &mut [u8],
        metadata: &CompressionMetadata,
    ) {
        let info = metadata.bitpack;
        dst.fill(0);
        for (i, &v) in values.iter().enumerate() {
            let packed = Self::pack(v, info.offset, info.bit_width);
            Self::write_bits(dst, i as u64 * info.bit_width as u64, info.bit_width, packed);
        }
    }

    pub fn decompress_values(
        src: &[u8],
        dst: &mut [i64],
        num_values: u64,
        metadata: &CompressionMetadata,
    ) {
        let info = metadata.bitpack;
        if info.bit_width == 0 {
            dst[..num_values as usize].fill(info.offset);
            return;
        }
        for i in 0..num_values {
            let packed = Self::read_bits(src, i * info.bit_width as u64, info.bit_width);
            dst[i as usize] = Self::unpack(packed, info.offset);
        }
    }

    pub fn can_update_in_place(value: i64, metadata: &CompressionMetadata) -> bool {
        let info = metadata.bitpack;
        if info.bit_width == 0 {
            return value == info.offset;
        }
        let shifted = value - info.offset;
        shifted >= 0 && (shifted as u64) <= Self::mask(info.bit_width)
    }
}

impl CompressionCodec for IntegerBitpacking {
    fn num_values(&self, data_size: usize, metadata: &CompressionMetadata) -> u64 {
        Self::num_values(data_size, metadata)
    }

    fn get_max_capacity(&self, num_pages: u64, metadata: &CompressionMetadata) -> u64 {
        Self::get_max_capacity(num_pages, metadata)
    }

    fn compress(
        &self,
        src: &[i64],
        dst: &mut [u8],
        metadata: &CompressionMetadata,
    ) -> StorageResult<()> {
        if metadata.compression != super::metadata::CompressionType::IntegerBitpacking {
            return Err(StorageError::Compression(
                "IntegerBitpacking::compress called with mismatched metadata".into(),
            ));
        }
        Self::compress_values(src, dst, metadata);
        Ok(())
    }

    fn decompress(
        &self,
        src: &[u8],
        dst: &mut [i64],
        num_values: u64,
        metadata: &CompressionMetadata,
    ) -> StorageResult<()> {
        Self::decompress_values(src, dst, num_values, metadata);
        Ok(())
    }

    fn can_update_in_place(&self, value: i64, metadata: &CompressionMetadata) -> bool {
        Self::can_update_in_place(value, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_sign_values() {
        let values = vec![-100i64, 0, 5, 127, -128, 64];
        let metadata = IntegerBitpacking::analyze(&values);
        let num_bytes = (values.len() as u64 * metadata.bitpack.bit_width as u64).div_ceil(8);
        let mut packed = vec![0u8; num_bytes as usize];
        IntegerBitpacking::compress_values(&values, &mut packed, &metadata);
        let mut decompressed = vec![0i64; values.len()];
        IntegerBitpacking::decompress_values(
            &packed,
            &mut decompressed,
            values.len() as u64,
            &metadata,
        );
        assert_eq!(values, decompressed);
    }

    #[test]
    fn bit_width_zero_for_constant_range() {
        let values = vec![7i64; 10];
        let metadata = IntegerBitpacking::analyze(&values);
        assert_eq!(metadata.bitpack.bit_width, 0);
    }

    #[test]
    fn can_update_in_place_rejects_out_of_range() {
        let values = vec![0i64, 10, 20];
        let metadata = IntegerBitpacking::analyze(&values);
        assert!(IntegerBitpacking::can_update_in_place(15, &metadata));
        assert!(!IntegerBitpacking::can_update_in_place(1000, &metadata));
    }

    #[test]
    fn boundary_bit_width_exactly_fills_last_byte() {
        // 256 values spanning exactly 8 bits: regression check for the bitpacking/page boundary
        // edge case called out for node-group segment sizing.
        let values: Vec<i64> = (0..256).collect();
        let metadata = IntegerBitpacking::analyze(&values);
        assert_eq!(metadata.bitpack.bit_width, 8);
        let mut packed = vec![0u8; 256];
        IntegerBitpacking::compress_values(&values, &mut packed, &metadata);
        let mut decompressed = vec![0i64; 256];
        IntegerBitpacking::decompress_values(&packed, &mut decompressed, 256, &metadata);
        assert_eq!(values, decompressed);
    }
}
