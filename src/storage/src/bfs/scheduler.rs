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

//! Level-synchronous parallel BFS over one node table's adjacency, used to evaluate bounded
//! recursive-path patterns (`(a)-[*lower..upper]->(b)`). Each level is a barrier: every worker
//! drains the current frontier via morsels before any of them is allowed to move on to the next
//! level, which keeps `IfeMorsel`'s per-level counters correct without a global lock.

use std::collections::HashMap;

use kuzu_common::constants::BFS_DEFAULT_MORSEL_SIZE;
use kuzu_common::types::Offset;

use super::ife_morsel::IfeMorsel;

/// Exposes forward adjacency for one relationship direction. Implemented by the node-group
/// layer (or a test double); the scheduler itself never touches columnar storage directly.
pub trait AdjacencyList: Sync {
    fn forward_neighbors(&self, offset: Offset) -> Vec<Offset>;
}

pub struct BfsResult {
    /// Destination offsets reachable from the source within `[lower_bound, upper_bound]` hops,
    /// mapped to their shortest path length.
    pub path_lengths: HashMap<Offset, u8>,
}

pub struct BfsScheduler<'a> {
    adjacency: &'a dyn AdjacencyList,
    num_threads: usize,
    morsel_size: u64,
}

impl<'a> BfsScheduler<'a> {
    pub fn new(adjacency: &'a dyn AdjacencyList, num_threads: usize) -> Self {
        BfsScheduler {
            adjacency,
            num_threads: num_threads.max(1),
            morsel_size: BFS_DEFAULT_MORSEL_SIZE,
        }
    }

    pub fn with_morsel_size(mut self, morsel_size: u64) -> Self {
        self.morsel_size = morsel_size;
        self
    }

    pub fn run(
        &self,
        src_offset: Offset,
        max_offset: Offset,
        lower_bound: u64,
        upper_bound: u64,
    ) -> BfsResult {
        let morsel = IfeMorsel::new(upper_bound, lower_bound, max_offset, src_offset);
        morsel.init();

        loop {
            std::thread::scope(|scope| {
                for _ in 0..self.num_threads {
                    scope.spawn(|| self.expand_one_level(&morsel));
                }
            });
            if morsel.is_bfs_complete_no_lock() {
                break;
            }
            morsel.initialize_next_frontier_no_lock();
        }

        let mut path_lengths = HashMap::new();
        for offset in 0..=max_offset {
            if let Some(len) = morsel.path_length(offset) {
                if (len as u64) >= lower_bound && (len as u64) <= upper_bound {
                    path_lengths.insert(offset, len);
                }
            }
        }
        BfsResult { path_lengths }
    }

    /// One worker's share of the current level: repeatedly pull a morsel of frontier nodes,
    /// expand their neighbors, and race to claim each newly-discovered node with `try_visit`.
    fn expand_one_level(&self, morsel: &IfeMorsel) {
        let mut newly_visited_local = 0u64;
        while let Some(work) = morsel.get_morsel(self.morsel_size) {
            for node in work.nodes {
                for neighbor in self.adjacency.forward_neighbors(node) {
                    if morsel.try_visit(neighbor) {
                        morsel.add_to_next_frontier(neighbor);
                        newly_visited_local += 1;
                    }
                }
            }
        }
        morsel.merge_results(newly_visited_local, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct TestGraph {
        edges: StdHashMap<Offset, Vec<Offset>>,
    }

    impl AdjacencyList for TestGraph {
        fn forward_neighbors(&self, offset: Offset) -> Vec<Offset> {
            self.edges.get(&offset).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn bounded_bfs_finds_only_nodes_within_hop_range() {
        // 0 -> 1 -> 2 -> 3 -> 4, a straight line.
        let mut edges = StdHashMap::new();
        edges.insert(0, vec![1]);
        edges.insert(1, vec![2]);
        edges.insert(2, vec![3]);
        edges.insert(3, vec![4]);
        let graph = TestGraph { edges };

        let scheduler = BfsScheduler::new(&graph, 2).with_morsel_size(2);
        let result = scheduler.run(0, 4, 2, 3);

        let mut found: Vec<_> = result.path_lengths.keys().copied().collect();
        found.sort();
        assert_eq!(found, vec![2, 3]);
        assert_eq!(result.path_lengths[&2], 2);
        assert_eq!(result.path_lengths[&3], 3);
    }

    #[test]
    fn disconnected_nodes_are_never_reached() {
        let mut edges = StdHashMap::new();
        edges.insert(0, vec![1]);
        let graph = TestGraph { edges };

        let scheduler = BfsScheduler::new(&graph, 1);
        let result = scheduler.run(0, 3, 1, 5);
        assert!(!result.path_lengths.contains_key(&2));
        assert!(!result.path_lengths.contains_key(&3));
    }
}
