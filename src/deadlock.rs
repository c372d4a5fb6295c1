use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::{
    common::TransactionID,
    error::{Error, Result},
};

/// Who is waiting on whom. An edge `waiter -> blocker` exists while `waiter`
/// is blocked on a lock `blocker` holds.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TransactionID, HashSet<TransactionID>>,
}

impl WaitForGraph {
    /// Records that `waiter` is blocked on every transaction in `blockers`.
    ///
    /// A transaction waits on one lock request at a time, so its outgoing
    /// edges are replaced by the current blockers rather than accumulated.
    /// When the edge set grows the graph is checked for cycles; a cycle can
    /// only run through the new edges, so `waiter` is the one refused and its
    /// edges are dropped again.
    pub fn add_edges(&mut self, waiter: TransactionID, blockers: &[TransactionID]) -> Result<()> {
        let blockers = blockers
            .iter()
            .copied()
            .filter(|&blocker| blocker != waiter)
            .collect::<HashSet<_>>();
        let previous = self.edges.insert(waiter, blockers);
        let grew = match (&previous, self.edges.get(&waiter)) {
            (Some(previous), Some(current)) => !current.is_subset(previous),
            (None, Some(current)) => !current.is_empty(),
            _ => false,
        };
        if grew {
            if let Some(cycle) = self.find_cycle() {
                warn!(waiter = %waiter, ?cycle, "deadlock detected");
                self.edges.remove(&waiter);
                return Err(Error::DeadlockDetected(waiter));
            }
        }
        Ok(())
    }

    /// Drops every edge out of `txn_id`, called once it stops waiting.
    pub fn remove_waiter(&mut self, txn_id: TransactionID) {
        self.edges.remove(&txn_id);
    }

    /// Drops every edge touching `txn_id`, called once it has finished.
    pub fn remove_all(&mut self, txn_id: TransactionID) {
        self.edges.remove(&txn_id);
        for blockers in self.edges.values_mut() {
            blockers.remove(&txn_id);
        }
        self.edges.retain(|_, blockers| !blockers.is_empty());
    }

    pub fn blockers_of(&self, waiter: TransactionID) -> Vec<TransactionID> {
        let mut blockers = self
            .edges
            .get(&waiter)
            .map(|b| b.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        blockers.sort();
        blockers
    }

    pub fn is_empty(&self) -> bool {
        self.edges.values().all(|b| b.is_empty())
    }

    /// Depth-first search from every node not yet visited in this pass. A
    /// neighbor already on the current path closes a cycle; the path from that
    /// neighbor onwards is returned.
    pub fn find_cycle(&self) -> Option<Vec<TransactionID>> {
        let mut visited = HashSet::new();
        let mut roots = self.edges.keys().copied().collect::<Vec<_>>();
        roots.sort();
        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            let mut path = vec![];
            if let Some(cycle) = self.visit(root, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        node: TransactionID,
        visited: &mut HashSet<TransactionID>,
        path: &mut Vec<TransactionID>,
    ) -> Option<Vec<TransactionID>> {
        visited.insert(node);
        path.push(node);
        if let Some(blockers) = self.edges.get(&node) {
            for &next in blockers {
                if let Some(start) = path.iter().position(|&t| t == next) {
                    return Some(path[start..].to_vec());
                }
                if visited.contains(&next) {
                    continue;
                }
                if let Some(cycle) = self.visit(next, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    const T1: TransactionID = TransactionID(1);
    const T2: TransactionID = TransactionID(2);
    const T3: TransactionID = TransactionID(3);
    const T4: TransactionID = TransactionID(4);

    #[test]
    fn test_no_cycle() {
        let mut graph = WaitForGraph::default();
        assert!(graph.add_edges(T1, &[T2]).is_ok());
        assert!(graph.add_edges(T2, &[T3]).is_ok());
        assert!(graph.add_edges(T4, &[T2, T3]).is_ok());
        assert_eq!(graph.find_cycle(), None);
        assert_eq!(graph.blockers_of(T4), vec![T2, T3]);
    }

    #[test]
    fn test_two_node_cycle() {
        let mut graph = WaitForGraph::default();
        graph.add_edges(T1, &[T2]).unwrap();
        let result = graph.add_edges(T2, &[T1]);
        assert!(matches!(result, Err(Error::DeadlockDetected(T2))));
        // the refused waiter leaves no edges behind
        assert!(graph.blockers_of(T2).is_empty());
        assert_eq!(graph.blockers_of(T1), vec![T2]);
        assert_eq!(graph.find_cycle(), None);
    }

    #[test]
    fn test_three_node_cycle() {
        let mut graph = WaitForGraph::default();
        graph.add_edges(T1, &[T2]).unwrap();
        graph.add_edges(T2, &[T3]).unwrap();
        assert!(matches!(
            graph.add_edges(T3, &[T4, T1]),
            Err(Error::DeadlockDetected(T3))
        ));
    }

    #[test]
    fn test_find_cycle_reports_path() {
        let mut graph = WaitForGraph::default();
        graph.edges.insert(T1, [T2].into_iter().collect());
        graph.edges.insert(T2, [T3].into_iter().collect());
        graph.edges.insert(T3, [T2].into_iter().collect());
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.into_iter().sorted().collect_vec(), vec![T2, T3]);
    }

    #[test]
    fn test_self_edge_ignored() {
        let mut graph = WaitForGraph::default();
        assert!(graph.add_edges(T1, &[T1]).is_ok());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_replacing_edges_drops_stale_blockers() {
        let mut graph = WaitForGraph::default();
        graph.add_edges(T1, &[T2]).unwrap();
        // T1 now only waits on T3, so T2 waiting on T1 is no cycle
        graph.add_edges(T1, &[T3]).unwrap();
        assert!(graph.add_edges(T2, &[T1]).is_ok());
    }

    #[test]
    fn test_remove() {
        let mut graph = WaitForGraph::default();
        graph.add_edges(T1, &[T2]).unwrap();
        graph.add_edges(T3, &[T2, T1]).unwrap();
        graph.remove_waiter(T1);
        assert!(graph.blockers_of(T1).is_empty());
        graph.remove_all(T2);
        assert_eq!(graph.blockers_of(T3), vec![T1]);
        graph.remove_all(T1);
        assert!(graph.is_empty());
    }
}
