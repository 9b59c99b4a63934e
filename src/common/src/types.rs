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

//! The closed set of property types the columnar store understands.

use serde::{Deserialize, Serialize};

/// A node/relationship identity: the owning table plus a dense per-table row offset.
pub type TableId = u64;
pub type Offset = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalId {
    pub table_id: TableId,
    pub offset: Offset,
}

/// The logical type of one column. Drives both compression-codec selection and PK key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Bool,
    Int64,
    Double,
    String,
    InternalId,
}

impl LogicalType {
    pub fn is_integer(self) -> bool {
        matches!(self, LogicalType::Int64 | LogicalType::Bool)
    }

    pub fn is_float(self) -> bool {
        matches!(self, LogicalType::Double)
    }

    pub fn fixed_width_bytes(self) -> Option<usize> {
        match self {
            LogicalType::Bool => Some(1),
            LogicalType::Int64 => Some(8),
            LogicalType::Double => Some(8),
            LogicalType::InternalId => Some(16),
            LogicalType::String => None,
        }
    }
}

/// A single property value. Owned and boxed for strings; the columnar store never keeps `Value`
/// around in bulk (that is what `ValueVector` is for) but it is the unit exchanged with callers
/// at the per-row `append`/`update`/`lookup` boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    InternalId(InternalId),
}

impl Value {
    pub fn logical_type(&self) -> Option<LogicalType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(LogicalType::Bool),
            Value::Int64(_) => Some(LogicalType::Int64),
            Value::Double(_) => Some(LogicalType::Double),
            Value::String(_) => Some(LogicalType::String),
            Value::InternalId(_) => Some(LogicalType::InternalId),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }
}
