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

//! Level-synchronous, morsel-driven BFS scheduling for bounded recursive-path queries.

mod frontier;
mod ife_morsel;
mod scheduler;

pub use frontier::Frontier;
pub use ife_morsel::{DstWriteMorsel, FrontierMorsel, IfeMorsel, VisitedState};
pub use scheduler::{AdjacencyList, BfsResult, BfsScheduler};
