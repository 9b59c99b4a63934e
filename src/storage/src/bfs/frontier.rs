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

//! One level's worth of nodes reached during a recursive-path query, with the multiplicity
//! (number of distinct paths reaching that node at this level) needed to answer shortest-path
//! COUNT/ALL semantics without re-deriving it from the traversal.

use std::collections::HashMap;

use kuzu_common::types::InternalId;

#[derive(Default)]
pub struct Frontier {
    node_ids: Vec<InternalId>,
    node_id_to_multiplicity: HashMap<InternalId, u32>,
}

impl Frontier {
    pub fn new() -> Self {
        Frontier::default()
    }

    pub fn add_node(&mut self, node_id: InternalId, multiplicity: u32) {
        match self.node_id_to_multiplicity.get_mut(&node_id) {
            Some(existing) => *existing += multiplicity,
            None => {
                self.node_id_to_multiplicity.insert(node_id, multiplicity);
                self.node_ids.push(node_id);
            }
        }
    }

    pub fn sort(&mut self) {
        self.node_ids.sort_by_key(|id| (id.table_id, id.offset));
    }

    pub fn clear(&mut self) {
        self.node_ids.clear();
        self.node_id_to_multiplicity.clear();
    }

    pub fn node_ids(&self) -> &[InternalId] {
        &self.node_ids
    }

    pub fn multiplicity(&self, node_id: InternalId) -> u32 {
        *self
            .node_id_to_multiplicity
            .get(&node_id)
            .expect("multiplicity queried for a node not in this frontier")
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(offset: u64) -> InternalId {
        InternalId {
            table_id: 0,
            offset,
        }
    }

    #[test]
    fn repeated_add_accumulates_multiplicity_without_duplicating() {
        let mut frontier = Frontier::new();
        frontier.add_node(id(1), 2);
        frontier.add_node(id(1), 3);
        frontier.add_node(id(2), 1);
        assert_eq!(frontier.len(), 2);
        assert_eq!(frontier.multiplicity(id(1)), 5);
        assert_eq!(frontier.multiplicity(id(2)), 1);
    }

    #[test]
    fn sort_orders_by_table_then_offset() {
        let mut frontier = Frontier::new();
        frontier.add_node(id(5), 1);
        frontier.add_node(id(1), 1);
        frontier.sort();
        assert_eq!(frontier.node_ids(), &[id(1), id(5)]);
    }
}
