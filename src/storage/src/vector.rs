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

//! The value vector is the unit passed between operators: a fixed-capacity dense column of one
//! logical type plus a selection vector (filtered indices) and a null mask.

use kuzu_common::constants::DEFAULT_VECTOR_CAPACITY;
use kuzu_common::types::{LogicalType, Value};

/// A list of positions into a `ValueVector` that are actually live. `None` means "unfiltered":
/// all `len` positions from 0..len are selected, which is the common case and avoids allocating.
#[derive(Debug, Clone)]
pub struct SelectionVector {
    positions: Vec<u32>,
    filtered: bool,
}

impl SelectionVector {
    pub fn unfiltered(len: usize) -> Self {
        SelectionVector {
            positions: (0..len as u32).collect(),
            filtered: false,
        }
    }

    pub fn empty() -> Self {
        SelectionVector {
            positions: Vec::with_capacity(DEFAULT_VECTOR_CAPACITY),
            filtered: true,
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    pub fn push(&mut self, pos: u32) {
        self.positions.push(pos);
    }

    pub fn set_to_filtered(&mut self, new_len: usize) {
        self.positions.truncate(new_len);
        self.filtered = true;
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.filtered = true;
    }
}

/// A dense, fixed-capacity column of one logical type.
#[derive(Debug, Clone)]
pub struct ValueVector {
    data_type: LogicalType,
    values: Vec<Value>,
    sel: SelectionVector,
}

impl ValueVector {
    pub fn new(data_type: LogicalType) -> Self {
        ValueVector {
            data_type,
            values: Vec::with_capacity(DEFAULT_VECTOR_CAPACITY),
            sel: SelectionVector::unfiltered(0),
        }
    }

    pub fn from_values(data_type: LogicalType, values: Vec<Value>) -> Self {
        let len = values.len();
        ValueVector {
            data_type,
            values,
            sel: SelectionVector::unfiltered(len),
        }
    }

    pub fn data_type(&self) -> LogicalType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.sel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sel.is_empty()
    }

    pub fn selection(&self) -> &SelectionVector {
        &self.sel
    }

    pub fn set_selection(&mut self, sel: SelectionVector) {
        self.sel = sel;
    }

    /// Value at logical position `i` (i.e. honoring the selection vector).
    pub fn get(&self, i: usize) -> &Value {
        &self.values[self.sel.positions()[i] as usize]
    }

    pub fn raw_values(&self) -> &[Value] {
        &self.values
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
        if !self.sel.is_filtered() {
            self.sel = SelectionVector::unfiltered(self.values.len());
        }
    }
}
