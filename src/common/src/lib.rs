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

//! Types, constants and cross-cutting infrastructure shared by every layer of the storage core:
//! the error taxonomy, the closed-set runtime configuration, the logical type system and the
//! physical constants (page size, vector capacity, node-group size) that size every other module.

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod types;

pub use config::DBConfig;
pub use error::{StorageError, StorageResult};
pub use types::LogicalType;
