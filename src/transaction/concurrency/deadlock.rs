use std::collections::{BTreeMap, BTreeSet};

use crate::common::types::TxnId;

/// Wait-for graph: an edge `t1 -> t2` means transaction `t1` waits for a
/// lock that `t2` holds. Adjacency lists are kept sorted ascending so the
/// search is deterministic.
#[derive(Debug, Default)]
pub struct WaitsForGraph {
    edges: BTreeMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn add_edge(&mut self, from: TxnId, to: TxnId) {
        let neighbors = self.edges.entry(from).or_default();
        if let Err(pos) = neighbors.binary_search(&to) {
            neighbors.insert(pos, to);
        }
    }

    pub fn remove_edge(&mut self, from: TxnId, to: TxnId) {
        if let Some(neighbors) = self.edges.get_mut(&from) {
            if let Ok(pos) = neighbors.binary_search(&to) {
                neighbors.remove(pos);
            }
        }
    }

    /// Drop a transaction and every edge touching it
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        for neighbors in self.edges.values_mut() {
            if let Ok(pos) = neighbors.binary_search(&txn_id) {
                neighbors.remove(pos);
            }
        }
    }

    /// All edges as `(from, to)` pairs, ordered by source then target
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect()
    }

    /// Search for a cycle, exploring sources in ascending id order.
    /// When one is found the newest (largest-id) transaction on the cycle
    /// is reported as the victim.
    pub fn has_cycle(&self) -> Option<TxnId> {
        let mut visited = BTreeSet::new();
        let sources: Vec<TxnId> = self.edges.keys().copied().collect();
        for source in sources {
            if visited.contains(&source) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(victim) = self.dfs(source, &mut visited, &mut path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(node);
        path.push(node);

        if let Some(neighbors) = self.edges.get(&node) {
            for &next in neighbors {
                if let Some(start) = path.iter().position(|&n| n == next) {
                    // The tail of the path closes the cycle
                    return path[start..].iter().copied().max();
                }
                if !visited.contains(&next) {
                    if let Some(victim) = self.dfs(next, visited, path) {
                        return Some(victim);
                    }
                }
            }
        }

        path.pop();
        None
    }
}
