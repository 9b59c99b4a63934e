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

//! ALP (Adaptive Lossless floating-Point) compression for `Double` columns: each value is
//! multiplied by a power-of-ten factor chosen so the result rounds to an integer, then that
//! integer is bit-packed. Values for which the chosen factor is lossy are recorded verbatim as
//! exceptions in a side array instead of being forced through the lossy path.
//!
//! Unlike the integer codecs this does not implement `CompressionCodec` (its unit is `f64`, not
//! `i64`); `ColumnChunk` dispatches to it directly for `Double` segments.

use kuzu_common::constants::{exception_bytes_per_page, FLOAT_EXCEPTION_SIZE_BYTES, KUZU_PAGE_SIZE};
use kuzu_common::error::{StorageError, StorageResult};

use super::bitpacking::IntegerBitpacking;
use super::metadata::{CompressionMetadata, CompressionType, FloatMetadata};

const MAX_EXPONENT: u8 = 15;

/// One value that didn't round-trip under the segment's chosen factor/exponent, recorded
/// verbatim alongside its position in the chunk so decompression can patch it back in.
#[derive(Debug, Clone, Copy)]
pub struct EncodeException {
    pub value: f64,
    pub pos_in_chunk: u32,
}

impl EncodeException {
    pub const SIZE_IN_BYTES: usize = FLOAT_EXCEPTION_SIZE_BYTES;

    pub fn num_pages_from_exceptions(exception_count: usize) -> u64 {
        ((exception_count * Self::SIZE_IN_BYTES) as u64).div_ceil(KUZU_PAGE_SIZE as u64)
    }

    pub fn exception_bytes_per_page() -> usize {
        exception_bytes_per_page()
    }
}

pub struct FloatAlpCompression;

impl FloatAlpCompression {
    pub fn encode_value(value: f64, fac: u8, exp: u8) -> i64 {
        let scaled = value * 10f64.powi(exp as i32) / 10f64.powi(fac as i32);
        scaled.round() as i64
    }

    pub fn decode_value(encoded: i64, fac: u8, exp: u8) -> f64 {
        encoded as f64 * 10f64.powi(fac as i32) / 10f64.powi(exp as i32)
    }

    /// Samples `values` to pick the `(fac, exp)` pair minimizing round-trip exceptions, then
    /// returns the chosen metadata with `exception_capacity` sized to the observed exception rate
    /// plus headroom for future in-place updates.
    pub fn analyze(values: &[f64]) -> CompressionMetadata {
        let mut best_exp = 0u8;
        let mut best_exceptions = usize::MAX;
        for exp in 0..=MAX_EXPONENT {
            let exceptions = values
                .iter()
                .filter(|&&v| {
                    let encoded = Self::encode_value(v, 0, exp);
                    Self::decode_value(encoded, 0, exp) != v
                })
                .count();
            if exceptions < best_exceptions {
                best_exceptions = exceptions;
                best_exp = exp;
                if exceptions == 0 {
                    break;
                }
            }
        }
        let integer_encoded: Vec<i64> = values
            .iter()
            .map(|&v| {
                let encoded = Self::encode_value(v, 0, best_exp);
                if Self::decode_value(encoded, 0, best_exp) != v {
                    // exceptional values are bit-packed as the segment's offset; the real value
                    // comes from the exception side array at decompress time.
                    0
                } else {
                    encoded
                }
            })
            .collect();
        let bitpack_metadata = IntegerBitpacking::analyze(&integer_encoded);
        let exception_capacity = (best_exceptions + best_exceptions / 2 + 1).max(1);
        CompressionMetadata::alp(
            bitpack_metadata.bitpack,
            FloatMetadata {
                fac: 0,
                exp: best_exp,
                exception_count: best_exceptions,
                exception_capacity,
            },
        )
    }

    pub fn compress_with_exceptions(
        values: &[f64],
        start_offset: u32,
        dst: &mut [u8],
        metadata: &CompressionMetadata,
    ) -> StorageResult<Vec<EncodeException>> {
        if metadata.compression != CompressionType::Alp {
            return Err(StorageError::Compression(
                "FloatAlpCompression::compress_with_exceptions called with non-ALP metadata"
                    .into(),
            ));
        }
        let fm = metadata.float_metadata();
        let mut integer_encoded = Vec::with_capacity(values.len());
        let mut exceptions = Vec::new();
        for (i, &v) in values.iter().enumerate() {
            let encoded = Self::encode_value(v, fm.fac, fm.exp);
            let decoded = Self::decode_value(encoded, fm.fac, fm.exp);
            if decoded != v {
                exceptions.push(EncodeException {
                    value: v,
                    pos_in_chunk: start_offset + i as u32,
                });
                integer_encoded.push(0);
            } else {
                integer_encoded.push(encoded);
            }
        }
        if exceptions.len() > fm.exception_capacity {
            return Err(StorageError::Compression(format!(
                "ALP exception count {} exceeds segment capacity {}",
                exceptions.len(),
                fm.exception_capacity
            )));
        }
        IntegerBitpacking::compress_values(&integer_encoded, dst, metadata);
        Ok(exceptions)
    }

    pub fn decompress(
        src: &[u8],
        num_values: u64,
        exceptions: &[EncodeException],
        chunk_start: u32,
        metadata: &CompressionMetadata,
    ) -> Vec<f64> {
        let fm = metadata.float_metadata();
        let mut integer_encoded = vec![0i64; num_values as usize];
        IntegerBitpacking::decompress_values(src, &mut integer_encoded, num_values, metadata);
        let mut out: Vec<f64> = integer_encoded
            .iter()
            .map(|&e| Self::decode_value(e, fm.fac, fm.exp))
            .collect();
        for exc in exceptions {
            let pos = (exc.pos_in_chunk - chunk_start) as usize;
            out[pos] = exc.value;
        }
        out
    }

    pub fn can_update_in_place(
        value: f64,
        current_exception_count: usize,
        metadata: &CompressionMetadata,
    ) -> bool {
        let fm = metadata.float_metadata();
        let encoded = Self::encode_value(value, fm.fac, fm.exp);
        let is_exception = Self::decode_value(encoded, fm.fac, fm.exp) != value;
        if is_exception {
            current_exception_count + 1 <= fm.exception_capacity
        } else {
            IntegerBitpacking::can_update_in_place(encoded, metadata)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_decimals_compress_without_exceptions() {
        let values: Vec<f64> = (0..500).map(|i| i as f64 * 0.5).collect();
        let metadata = FloatAlpCompression::analyze(&values);
        assert_eq!(metadata.float_metadata().exception_count, 0);
        let num_bytes = IntegerBitpacking::get_min_pages(values.len() as u64, &metadata)
            * KUZU_PAGE_SIZE as u64;
        let mut dst = vec![0u8; num_bytes.max(64) as usize];
        let exceptions =
            FloatAlpCompression::compress_with_exceptions(&values, 0, &mut dst, &metadata)
                .unwrap();
        assert!(exceptions.is_empty());
        let decompressed =
            FloatAlpCompression::decompress(&dst, values.len() as u64, &exceptions, 0, &metadata);
        assert_eq!(values, decompressed);
    }

    #[test]
    fn irrational_values_become_exceptions_and_still_round_trip() {
        let mut values: Vec<f64> = (0..200).map(|i| i as f64 * 0.25).collect();
        values[7] = std::f64::consts::PI;
        values[50] = std::f64::consts::E;
        let metadata = FloatAlpCompression::analyze(&values);
        assert!(metadata.float_metadata().exception_count >= 2);
        let num_bytes = IntegerBitpacking::get_min_pages(values.len() as u64, &metadata)
            * KUZU_PAGE_SIZE as u64;
        let mut dst = vec![0u8; num_bytes.max(64) as usize];
        let exceptions =
            FloatAlpCompression::compress_with_exceptions(&values, 0, &mut dst, &metadata)
                .unwrap();
        let decompressed =
            FloatAlpCompression::decompress(&dst, values.len() as u64, &exceptions, 0, &metadata);
        assert_eq!(values, decompressed);
    }

    #[test]
    fn exceeding_exception_capacity_is_rejected() {
        let values: Vec<f64> = (0..100).map(|i| i as f64 * 0.5).collect();
        let mut metadata = FloatAlpCompression::analyze(&values);
        metadata.float_metadata.as_mut().unwrap().exception_capacity = 0;
        let mut noisy = values.clone();
        noisy[0] = std::f64::consts::PI;
        let mut dst = vec![0u8; 4096];
        let result = FloatAlpCompression::compress_with_exceptions(&noisy, 0, &mut dst, &metadata);
        assert!(result.is_err());
    }
}
