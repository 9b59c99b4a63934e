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

//! Per-segment compression metadata: which codec was chosen and the parameters needed to decode
//! without rescanning the source values (bitpacking width/offset, the constant value, or the ALP
//! factor/exponent and exception budget).

use kuzu_common::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Uncompressed,
    IntegerBitpacking,
    Constant,
    Alp,
}

/// Bit-packing parameters: values are stored as `(raw - offset)` in `bit_width` bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitpackInfo {
    pub bit_width: u8,
    pub has_negative: bool,
    pub offset: i64,
}

/// ALP (Adaptive Lossless floating-Point) parameters: `fac`/`exp` are the factor/exponent that
/// make the fast path lossless for the sampled distribution; values that round-trip incorrectly
/// under them are recorded as exceptions instead of being bit-packed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatMetadata {
    pub fac: u8,
    pub exp: u8,
    pub exception_count: usize,
    pub exception_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct CompressionMetadata {
    pub compression: CompressionType,
    pub min: Value,
    pub max: Value,
    pub bitpack: BitpackInfo,
    pub float_metadata: Option<FloatMetadata>,
}

impl CompressionMetadata {
    pub fn uncompressed() -> Self {
        CompressionMetadata {
            compression: CompressionType::Uncompressed,
            min: Value::Null,
            max: Value::Null,
            bitpack: BitpackInfo::default(),
            float_metadata: None,
        }
    }

    pub fn constant(value: Value) -> Self {
        CompressionMetadata {
            compression: CompressionType::Constant,
            min: value.clone(),
            max: value,
            bitpack: BitpackInfo::default(),
            float_metadata: None,
        }
    }

    pub fn bitpacked(min: i64, max: i64, bitpack: BitpackInfo) -> Self {
        CompressionMetadata {
            compression: CompressionType::IntegerBitpacking,
            min: Value::Int64(min),
            max: Value::Int64(max),
            bitpack,
            float_metadata: None,
        }
    }

    pub fn alp(bitpack: BitpackInfo, float_metadata: FloatMetadata) -> Self {
        CompressionMetadata {
            compression: CompressionType::Alp,
            min: Value::Null,
            max: Value::Null,
            bitpack,
            float_metadata: Some(float_metadata),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.compression == CompressionType::Constant
    }

    pub fn float_metadata(&self) -> &FloatMetadata {
        self.float_metadata
            .as_ref()
            .expect("float_metadata only set on Alp-compressed segments")
    }
}
