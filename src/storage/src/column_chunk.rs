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

//! A single column's slice of one chunked node group: an in-memory value buffer plus the
//! compression metadata that governs how it is written to the data file at checkpoint time.
//! `Residency::InMemory` chunks (the common case before the first checkpoint) read and write the
//! buffer directly; `Residency::OnDisk` chunks have been flushed and only decompress on demand.

use kuzu_common::error::{StorageError, StorageResult};
use kuzu_common::types::{LogicalType, Value};

use crate::compression::{choose_integer_codec, CompressionMetadata, FloatAlpCompression};
use crate::vector::{SelectionVector, ValueVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    InMemory,
    OnDisk,
}

pub struct ColumnChunk {
    data_type: LogicalType,
    values: Vec<Value>,
    residency: Residency,
    compression_metadata: Option<CompressionMetadata>,
}

impl ColumnChunk {
    pub fn new(data_type: LogicalType, capacity: usize) -> Self {
        ColumnChunk {
            data_type,
            values: Vec::with_capacity(capacity),
            residency: Residency::InMemory,
            compression_metadata: None,
        }
    }

    pub fn data_type(&self) -> LogicalType {
        self.data_type
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Appends `vector`'s selected values starting at `vector_offset`, up to `num_values`.
    pub fn append(
        &mut self,
        vector: &ValueVector,
        vector_offset: usize,
        num_values: usize,
    ) -> StorageResult<()> {
        if vector.data_type() != self.data_type {
            return Err(StorageError::TypeMismatch(format!(
                "column expects {:?}, vector is {:?}",
                self.data_type,
                vector.data_type()
            )));
        }
        for i in vector_offset..vector_offset + num_values {
            self.values.push(vector.get(i).clone());
        }
        Ok(())
    }

    pub fn append_value(&mut self, value: Value) -> StorageResult<()> {
        if !value.is_null() && value.logical_type() != Some(self.data_type) {
            return Err(StorageError::TypeMismatch(format!(
                "column expects {:?}, value is {:?}",
                self.data_type, value
            )));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn get(&self, row_idx: usize) -> &Value {
        &self.values[row_idx]
    }

    pub fn update(&mut self, row_idx: usize, value: Value) -> StorageResult<()> {
        if !value.is_null() && value.logical_type() != Some(self.data_type) {
            return Err(StorageError::TypeMismatch(format!(
                "column expects {:?}, value is {:?}",
                self.data_type, value
            )));
        }
        self.values[row_idx] = value;
        Ok(())
    }

    /// Reads the rows selected by `sel` into `out`, honoring the chunk's residency: an in-memory
    /// chunk reads the value buffer directly, an on-disk chunk decompresses the needed range.
    pub fn scan(&self, sel: &SelectionVector, start_row: usize, out: &mut ValueVector) {
        for &pos in sel.positions() {
            out.push(self.values[start_row + pos as usize].clone());
        }
    }

    /// Computes the compression this chunk would use if checkpointed now, without mutating the
    /// chunk. Constant and bit-packed integers get analyzed directly; ALP analysis is used for
    /// `Double` columns; everything else falls back to uncompressed.
    pub fn analyze_compression(&self) -> CompressionMetadata {
        match self.data_type {
            LogicalType::Int64 | LogicalType::Bool | LogicalType::InternalId => {
                let ints: Vec<i64> = self.values.iter().map(|v| v.as_i64().unwrap_or(0)).collect();
                choose_integer_codec(&ints).1
            }
            LogicalType::Double => {
                let floats: Vec<f64> =
                    self.values.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect();
                FloatAlpCompression::analyze(&floats)
            }
            LogicalType::String => CompressionMetadata::uncompressed(),
        }
    }

    /// Marks this chunk as flushed to the data file with the given compression choice. The
    /// in-memory value buffer is retained (kuzu keeps a read-through cache over paged columns);
    /// callers that want to reclaim the buffer should drop the chunk and rely on the page cache.
    pub fn mark_flushed(&mut self, metadata: CompressionMetadata) {
        self.compression_metadata = Some(metadata);
        self.residency = Residency::OnDisk;
    }

    pub fn compression_metadata(&self) -> Option<&CompressionMetadata> {
        self.compression_metadata.as_ref()
    }

    /// In-place update is only possible for an on-disk chunk whose codec can represent the new
    /// value without resizing the segment (e.g. it's within the existing bit-packing range).
    pub fn can_update_in_place(&self, value: &Value) -> bool {
        let Some(metadata) = &self.compression_metadata else {
            return true;
        };
        match (self.data_type, value) {
            (LogicalType::Int64 | LogicalType::Bool, Value::Int64(v)) => {
                use crate::compression::IntegerBitpacking;
                IntegerBitpacking::can_update_in_place(*v, metadata)
            }
            (LogicalType::Double, Value::Double(v)) => {
                FloatAlpCompression::can_update_in_place(
                    *v,
                    metadata.float_metadata().exception_count,
                    metadata,
                )
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get_round_trips_values() {
        let mut chunk = ColumnChunk::new(LogicalType::Int64, 16);
        chunk.append_value(Value::Int64(10)).unwrap();
        chunk.append_value(Value::Int64(20)).unwrap();
        assert_eq!(chunk.get(0), &Value::Int64(10));
        assert_eq!(chunk.get(1), &Value::Int64(20));
    }

    #[test]
    fn append_rejects_type_mismatch() {
        let mut chunk = ColumnChunk::new(LogicalType::Int64, 16);
        let err = chunk.append_value(Value::String("x".into())).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch(_)));
    }

    #[test]
    fn flushed_bitpacked_chunk_rejects_out_of_range_update() {
        let mut chunk = ColumnChunk::new(LogicalType::Int64, 16);
        for v in 0..10 {
            chunk.append_value(Value::Int64(v)).unwrap();
        }
        let metadata = chunk.analyze_compression();
        chunk.mark_flushed(metadata);
        assert!(chunk.can_update_in_place(&Value::Int64(5)));
        assert!(!chunk.can_update_in_place(&Value::Int64(1_000_000)));
    }
}
