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

//! Shared state for one iterative frontier expansion (IFE): the morsel-driven, level-synchronous
//! BFS used to answer recursive-path queries (`(a)-[*lower..upper]->(b)`). One `IfeMorsel` is
//! shared by every worker scanning a single source's traversal; workers pull disjoint slices of
//! the current frontier with `get_morsel`, expand them independently, and race to claim each
//! destination node exactly once via `try_visit`.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use kuzu_common::types::Offset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VisitedState {
    NotVisitedDst = 0,
    VisitedDst = 1,
    NotVisited = 2,
    Visited = 3,
}

impl VisitedState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => VisitedState::NotVisitedDst,
            1 => VisitedState::VisitedDst,
            2 => VisitedState::NotVisited,
            _ => VisitedState::Visited,
        }
    }

    fn is_visited(self) -> bool {
        matches!(self, VisitedState::Visited | VisitedState::VisitedDst)
    }

    fn visited_counterpart(self) -> VisitedState {
        match self {
            VisitedState::NotVisitedDst => VisitedState::VisitedDst,
            VisitedState::NotVisited => VisitedState::Visited,
            already_visited => already_visited,
        }
    }
}

/// A contiguous, disjoint slice of the current frontier handed to one worker.
pub struct FrontierMorsel {
    pub start_idx: u64,
    pub nodes: Vec<Offset>,
}

/// A contiguous, disjoint range of destination offsets handed to one worker during the
/// final output-writing pass (shortest-path length materialization).
pub struct DstWriteMorsel {
    pub start_offset: Offset,
    pub end_offset: Offset,
}

struct LevelState {
    initialized: bool,
    current_level: u8,
    current_frontier: Vec<Offset>,
    next_frontier: Vec<Offset>,
    path_length: Vec<u8>,
}

pub struct IfeMorsel {
    state: Mutex<LevelState>,
    next_scan_start_idx: AtomicU64,
    current_frontier_size: AtomicU64,
    next_frontier_size: AtomicU64,
    num_visited_dst_nodes: AtomicU64,
    next_dst_scan_start_idx: AtomicU64,
    visited_nodes: Vec<AtomicU8>,
    num_dst_nodes_to_visit: u64,
    max_offset: Offset,
    upper_bound: u64,
    lower_bound: u64,
    src_offset: Offset,
}

impl IfeMorsel {
    pub fn new(upper_bound: u64, lower_bound: u64, max_offset: Offset, src_offset: Offset) -> Self {
        let num_nodes = max_offset as usize + 1;
        IfeMorsel {
            state: Mutex::new(LevelState {
                initialized: false,
                current_level: 0,
                current_frontier: Vec::new(),
                next_frontier: Vec::new(),
                path_length: vec![u8::MAX; num_nodes],
            }),
            next_scan_start_idx: AtomicU64::new(0),
            current_frontier_size: AtomicU64::new(0),
            next_frontier_size: AtomicU64::new(0),
            num_visited_dst_nodes: AtomicU64::new(0),
            next_dst_scan_start_idx: AtomicU64::new(0),
            visited_nodes: (0..num_nodes).map(|_| AtomicU8::new(VisitedState::NotVisitedDst as u8)).collect(),
            num_dst_nodes_to_visit: max_offset + 1,
            max_offset,
            upper_bound,
            lower_bound,
            src_offset,
        }
    }

    /// Seeds the frontier with the source node. Must be called once, before any worker calls
    /// `get_morsel`.
    pub fn init(&self) {
        let mut state = self.state.lock().unwrap();
        if state.initialized {
            return;
        }
        self.visited_nodes[self.src_offset as usize]
            .store(VisitedState::Visited as u8, Ordering::Release);
        state.path_length[self.src_offset as usize] = 0;
        state.current_frontier.push(self.src_offset);
        state.initialized = true;
        drop(state);
        self.current_frontier_size.store(1, Ordering::Release);
    }

    pub fn visited_state(&self, offset: Offset) -> VisitedState {
        VisitedState::from_u8(self.visited_nodes[offset as usize].load(Ordering::Acquire))
    }

    pub fn path_length(&self, offset: Offset) -> Option<u8> {
        let state = self.state.lock().unwrap();
        match state.path_length[offset as usize] {
            u8::MAX => None,
            len => Some(len),
        }
    }

    /// Atomically claims `offset` as reached for the first time. Returns `true` exactly once
    /// across however many concurrent workers race to visit it; only the winner should push it
    /// into the next frontier.
    pub fn try_visit(&self, offset: Offset) -> bool {
        let cell = &self.visited_nodes[offset as usize];
        loop {
            let current = VisitedState::from_u8(cell.load(Ordering::Acquire));
            if current.is_visited() {
                return false;
            }
            let target = current.visited_counterpart();
            match cell.compare_exchange(
                current as u8,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Records `offset` as reached at the level about to be formed (current_level + 1) and
    /// queues it for the next frontier. Call only after `try_visit(offset)` returned `true`.
    pub fn add_to_next_frontier(&self, offset: Offset) {
        let mut state = self.state.lock().unwrap();
        let level = state.current_level;
        state.path_length[offset as usize] = level + 1;
        state.next_frontier.push(offset);
        drop(state);
        self.next_frontier_size.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get_morsel(&self, morsel_size: u64) -> Option<FrontierMorsel> {
        let total = self.current_frontier_size.load(Ordering::Acquire);
        let start = self.next_scan_start_idx.fetch_add(morsel_size, Ordering::AcqRel);
        if start >= total {
            return None;
        }
        let end = (start + morsel_size).min(total);
        let state = self.state.lock().unwrap();
        let nodes = state.current_frontier[start as usize..end as usize].to_vec();
        Some(FrontierMorsel { start_idx: start, nodes })
    }

    pub fn get_dst_write_morsel(&self, morsel_size: u64) -> Option<DstWriteMorsel> {
        let total = self.max_offset + 1;
        let start = self.next_dst_scan_start_idx.fetch_add(morsel_size, Ordering::AcqRel);
        if start >= total {
            return None;
        }
        let end = (start + morsel_size).min(total);
        Some(DstWriteMorsel { start_offset: start, end_offset: end })
    }

    pub fn merge_results(&self, num_dst_visited_local: u64, _num_non_dst_visited_local: u64) {
        self.num_visited_dst_nodes
            .fetch_add(num_dst_visited_local, Ordering::AcqRel);
    }

    pub fn is_bfs_complete_no_lock(&self) -> bool {
        let current_level = self.state.lock().unwrap().current_level;
        current_level as u64 + 1 > self.upper_bound
            || self.next_frontier_size.load(Ordering::Acquire) == 0
            || self.num_visited_dst_nodes.load(Ordering::Acquire) >= self.num_dst_nodes_to_visit
    }

    pub fn is_ife_morsel_complete_no_lock(&self) -> bool {
        self.next_scan_start_idx.load(Ordering::Acquire)
            >= self.current_frontier_size.load(Ordering::Acquire)
    }

    /// Advances to the next level: the accumulated `next_frontier` becomes `current_frontier`,
    /// and all the per-level counters reset. Must be called by exactly one thread, after every
    /// worker has observed `is_ife_morsel_complete_no_lock`.
    pub fn initialize_next_frontier_no_lock(&self) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.current_frontier.clear();
        std::mem::swap(&mut state.current_frontier, &mut state.next_frontier);
        state.current_level += 1;
        drop(guard);
        self.current_frontier_size.store(
            self.next_frontier_size.swap(0, Ordering::AcqRel),
            Ordering::Release,
        );
        self.next_scan_start_idx.store(0, Ordering::Release);
        self.next_dst_scan_start_idx.store(0, Ordering::Release);
    }

    pub fn current_level(&self) -> u8 {
        self.state.lock().unwrap().current_level
    }

    pub fn lower_bound(&self) -> u64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> u64 {
        self.upper_bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_seeds_frontier_with_source_only() {
        let morsel = IfeMorsel::new(3, 1, 9, 0);
        morsel.init();
        let got = morsel.get_morsel(8).unwrap();
        assert_eq!(got.nodes, vec![0]);
        assert_eq!(morsel.path_length(0), Some(0));
        assert!(morsel.get_morsel(8).is_none());
    }

    #[test]
    fn try_visit_only_lets_one_racer_win() {
        let morsel = IfeMorsel::new(3, 1, 9, 0);
        let wins: usize = (0..8)
            .map(|_| morsel.try_visit(5))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn level_transition_moves_next_frontier_into_current() {
        let morsel = IfeMorsel::new(3, 1, 9, 0);
        morsel.init();
        morsel.get_morsel(8);
        assert!(morsel.try_visit(1));
        morsel.add_to_next_frontier(1);
        assert!(morsel.try_visit(2));
        morsel.add_to_next_frontier(2);
        assert!(morsel.is_ife_morsel_complete_no_lock());
        morsel.initialize_next_frontier_no_lock();
        assert_eq!(morsel.current_level(), 1);
        let next = morsel.get_morsel(8).unwrap();
        let mut nodes = next.nodes;
        nodes.sort();
        assert_eq!(nodes, vec![1, 2]);
        assert_eq!(morsel.path_length(1), Some(1));
    }

    #[test]
    fn bfs_completes_once_upper_bound_reached() {
        let morsel = IfeMorsel::new(1, 1, 9, 0);
        morsel.init();
        morsel.get_morsel(8);
        morsel.try_visit(1);
        morsel.add_to_next_frontier(1);
        morsel.initialize_next_frontier_no_lock();
        assert!(morsel.is_bfs_complete_no_lock());
    }
}
