// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The physical network: an undirected graph with a delay on every link.
//!
//! Topology files contain one link per line in the form `from to delay_ms`
//! with node numbers starting at 1. Blank lines and lines starting with `#`
//! are ignored.

use std::path::Path;

use etree_engine::config_error;
use etree_engine::types::{ConfigError, NodeId};

/// Delay used for pairs of nodes that cannot reach each other.
pub const UNREACHABLE: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct Graph {
    adjacency: Vec<Vec<(NodeId, u64)>>,
}

impl Graph {
    /// Create a graph of `num_nodes` from zero-based `(from, to, delay)` links.
    pub fn from_edges(num_nodes: usize, edges: &[(NodeId, NodeId, u64)]) -> Result<Self, ConfigError> {
        let mut graph = Self {
            adjacency: vec![Vec::new(); num_nodes],
        };
        for &(from, to, delay) in edges {
            graph.add_edge(from, to, delay)?;
        }
        Ok(graph)
    }

    pub fn from_file(path: &Path, num_nodes: Option<usize>) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("Unable to read {}: {e}", path.display())))?;
        Self::from_string(&s, num_nodes)
    }

    /// Parse the one-based topology text format.
    ///
    /// Without `num_nodes` the graph is sized by the largest node number seen.
    pub fn from_string(s: &str, num_nodes: Option<usize>) -> Result<Self, ConfigError> {
        let mut edges = Vec::new();
        for (line_num, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [from, to, delay] = fields[..] else {
                return config_error!(format!(
                    "Line {}: expected 'from to delay', found '{line}'",
                    line_num + 1
                ));
            };
            let from = parse_node(from, line_num)?;
            let to = parse_node(to, line_num)?;
            let delay: u64 = delay.parse().map_err(|e| {
                ConfigError(format!("Line {}: bad delay '{delay}': {e}", line_num + 1))
            })?;
            edges.push((from - 1, to - 1, delay));
        }

        let max_seen = edges
            .iter()
            .map(|&(from, to, _)| from.max(to) + 1)
            .max()
            .unwrap_or(0);
        let num_nodes = num_nodes.unwrap_or(max_seen);
        if max_seen > num_nodes {
            return config_error!(format!(
                "Topology refers to node {max_seen} but only {num_nodes} nodes are configured"
            ));
        }
        Self::from_edges(num_nodes, &edges)
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, delay: u64) -> Result<(), ConfigError> {
        let num_nodes = self.num_nodes();
        if from >= num_nodes || to >= num_nodes {
            return config_error!(format!(
                "Link {from}-{to} is outside a graph of {num_nodes} nodes"
            ));
        }
        if from == to {
            if delay != 0 {
                return config_error!(format!("Self link on node {from} with delay {delay}"));
            }
            return Ok(());
        }
        if delay == UNREACHABLE {
            return config_error!(format!("Link {from}-{to} has an infinite delay"));
        }
        self.insert_directed(from, to, delay);
        self.insert_directed(to, from, delay);
        Ok(())
    }

    /// Duplicate links keep the smaller delay.
    fn insert_directed(&mut self, from: NodeId, to: NodeId, delay: u64) {
        let links = &mut self.adjacency[from];
        match links.iter_mut().find(|(n, _)| *n == to) {
            Some(link) => link.1 = link.1.min(delay),
            None => links.push((to, delay)),
        }
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// The direct links of `node` and their delays.
    pub fn neighbours(&self, node: NodeId) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.adjacency[node].iter().copied()
    }

    /// Direct link delay: 0 on the diagonal and [`UNREACHABLE`] without a
    /// link.
    #[must_use]
    pub fn delay(&self, from: NodeId, to: NodeId) -> u64 {
        if from == to {
            return 0;
        }
        self.adjacency[from]
            .iter()
            .find(|(n, _)| *n == to)
            .map_or(UNREACHABLE, |(_, delay)| *delay)
    }

    #[must_use]
    pub fn num_links(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }
}

fn parse_node(field: &str, line_num: usize) -> Result<NodeId, ConfigError> {
    let node: NodeId = field
        .parse()
        .map_err(|e| ConfigError(format!("Line {}: bad node '{field}': {e}", line_num + 1)))?;
    if node == 0 {
        return config_error!(format!(
            "Line {}: node numbers start at 1",
            line_num + 1
        ));
    }
    Ok(node)
}
