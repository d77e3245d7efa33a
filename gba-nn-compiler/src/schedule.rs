//! Deterministic topological ordering of the live nodes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{Error, Result};
use crate::ir::{Graph, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub order: Vec<NodeId>,
    positions: HashMap<NodeId, usize>,
}

impl Schedule {
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.positions.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Kahn's algorithm over producer -> consumer edges. Among ready nodes the
/// one declared first runs first, so equal graphs always yield equal orders.
///
/// Every live node is scheduled, including kinds without an exporter; they
/// still produce and consume tensors the allocator has to account for.
pub fn schedule(graph: &Graph) -> Result<Schedule> {
    let ids = graph.node_ids();
    let declared: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let producers = graph.producer_map();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut in_degree = vec![0usize; ids.len()];
    for (rank, &id) in ids.iter().enumerate() {
        let node = graph.node(id);
        for &input in &node.inputs {
            if graph.tensor(input).is_constant() {
                continue;
            }
            let Some(&producer) = producers.get(&input) else {
                continue;
            };
            let from = declared[&producer];
            if from == rank {
                continue;
            }
            successors[from].push(rank);
            in_degree[rank] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(rank, _)| Reverse(rank))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(rank)) = ready.pop() {
        order.push(ids[rank]);
        for &next in &successors[rank] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != ids.len() {
        let nodes = ids
            .iter()
            .enumerate()
            .filter(|(rank, _)| in_degree[*rank] > 0)
            .map(|(_, &id)| graph.node(id).display_name())
            .collect();
        return Err(Error::GraphCycle { nodes });
    }

    let positions = order.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
    log::debug!("scheduled {} nodes", order.len());
    Ok(Schedule { order, positions })
}
