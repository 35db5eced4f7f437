// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! All-pairs minimum delay between nodes.
//!
//! Built by running Dijkstra from every node, so the total cost is
//! `O(N (N + E) log N)`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use etree_engine::config_error;
use etree_engine::types::{ConfigError, NodeId};

pub use crate::graph::UNREACHABLE;
use crate::graph::Graph;

/// Distances and previous hops from one source node.
#[derive(Debug, Clone)]
pub struct ShortestPaths {
    pub dist: Vec<u64>,
    pub previous: Vec<Option<NodeId>>,
}

/// Single-source shortest paths over non-negative link delays.
///
/// `neighbours` returns the links leaving a node. Unreachable nodes keep a
/// distance of [`UNREACHABLE`] and no previous hop.
pub fn shortest_paths<F, I>(num_nodes: usize, source: NodeId, neighbours: F) -> ShortestPaths
where
    F: Fn(NodeId) -> I,
    I: Iterator<Item = (NodeId, u64)>,
{
    let mut dist = vec![UNREACHABLE; num_nodes];
    let mut previous = vec![None; num_nodes];
    let mut done = vec![false; num_nodes];
    let mut heap = BinaryHeap::new();

    dist[source] = 0;
    heap.push(Reverse((0u64, source)));
    while let Some(Reverse((d, node))) = heap.pop() {
        if done[node] {
            continue;
        }
        done[node] = true;
        for (next, delay) in neighbours(node) {
            let candidate = d.saturating_add(delay);
            if candidate < dist[next] {
                dist[next] = candidate;
                previous[next] = Some(node);
                heap.push(Reverse((candidate, next)));
            }
        }
    }
    ShortestPaths { dist, previous }
}

/// N×N matrix of minimum path delay.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayMatrix {
    num_nodes: usize,
    delays: Vec<u64>,
}

impl DelayMatrix {
    /// Run Dijkstra from every node of `graph`.
    #[must_use]
    pub fn build(graph: &Graph) -> Self {
        let num_nodes = graph.num_nodes();
        let mut delays = Vec::with_capacity(num_nodes * num_nodes);
        for source in 0..num_nodes {
            let paths = shortest_paths(num_nodes, source, |n| graph.neighbours(n));
            delays.extend(paths.dist);
        }
        Self { num_nodes, delays }
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    #[must_use]
    pub fn get(&self, from: NodeId, to: NodeId) -> u64 {
        self.delays[from * self.num_nodes + to]
    }

    #[must_use]
    pub fn row(&self, from: NodeId) -> &[u64] {
        &self.delays[from * self.num_nodes..(from + 1) * self.num_nodes]
    }

    #[must_use]
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        self.get(from, to) != UNREACHABLE
    }

    /// Sum of delays from `node` to each of `others`.
    #[must_use]
    pub fn total_delay(&self, node: NodeId, others: &[NodeId]) -> u64 {
        others
            .iter()
            .fold(0u64, |total, &other| total.saturating_add(self.get(node, other)))
    }

    /// Fail if any pair within `nodes` is unreachable or out of range.
    pub fn require_connected(&self, nodes: &[NodeId]) -> Result<(), ConfigError> {
        if let Some(&bad) = nodes.iter().find(|&&n| n >= self.num_nodes) {
            return config_error!(format!(
                "Node {bad} is outside a delay matrix of {} nodes",
                self.num_nodes
            ));
        }
        for &from in nodes {
            if let Some(&to) = nodes.iter().find(|&&to| !self.is_reachable(from, to)) {
                return config_error!(format!("Node {to} is unreachable from node {from}"));
            }
        }
        Ok(())
    }

    /// Copy of the matrix with the diagonal replaced by `self_delay`.
    ///
    /// Used where the matrix acts as a delivery delay so that nothing is
    /// delivered in zero time.
    #[must_use]
    pub fn with_self_delay(&self, self_delay: u64) -> Self {
        let mut matrix = self.clone();
        for i in 0..self.num_nodes {
            matrix.delays[i * self.num_nodes + i] = self_delay;
        }
        matrix
    }
}
