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

//! Lock-free-leaning primitives shared by the index builder, the node-group metadata arrays and
//! the BFS scheduler.

mod concurrent_vector;
mod locked_ptr;
mod mpsc_queue;

pub use concurrent_vector::ConcurrentVector;
pub use locked_ptr::LockedPtr;
pub use mpsc_queue::MpscQueue;
