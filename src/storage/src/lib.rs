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

//! The embedded storage and transaction core: columnar node-group storage with per-vector MVCC,
//! a write-ahead log with shadow-page checkpointing, a parallel primary-key hash index builder,
//! and a level-synchronous frontier scheduler for recursive-path BFS queries.

pub mod bfs;
pub mod catalog;
pub mod column_chunk;
pub mod compression;
pub mod concurrent;
pub mod database;
pub mod index;
pub mod node_group;
pub mod table;
pub mod transaction;
pub mod version_info;
pub mod vector;
pub mod wal;

pub use database::Database;
pub use table::{BoundInsert, BoundScan};
pub use vector::{SelectionVector, ValueVector};
