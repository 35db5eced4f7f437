// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Congestion-aware delays along the links the tree actually uses.
//!
//! For every layer the shortest paths from each child to its aggregator are
//! overlaid on the physical graph. A node that sends over more used links
//! than a link can carry at once pays extra transmission slots on each of
//! them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use etree_engine::types::{ConfigError, NodeId};
use itertools::Itertools;

use crate::delay::{DelayMatrix, shortest_paths};
use crate::graph::Graph;
use crate::tree::TreeLayers;

pub const DEFAULT_PROCESSING_DELAY_MS: u64 = 5;
pub const DEFAULT_TRANSMISSION_DELAY_MS: u64 = 100;
pub const DEFAULT_PROPAGATION_DELAY_MS: u64 = 1;
pub const DEFAULT_LINK_CAPACITY: u64 = 2;

/// Per-hop cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub processing_delay_ms: u64,
    pub transmission_delay_ms: u64,
    pub propagation_delay_ms: u64,

    /// Number of used links a node can serve without queueing.
    pub capacity: u64,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            processing_delay_ms: DEFAULT_PROCESSING_DELAY_MS,
            transmission_delay_ms: DEFAULT_TRANSMISSION_DELAY_MS,
            propagation_delay_ms: DEFAULT_PROPAGATION_DELAY_MS,
            capacity: DEFAULT_LINK_CAPACITY,
        }
    }
}

impl LinkParams {
    /// Delay of one hop sent by a node touching `load` used links.
    #[must_use]
    pub fn hop_delay(&self, load: u64) -> u64 {
        let capacity = self.capacity.max(1);
        let queued_slots = load.saturating_sub(capacity).div_ceil(capacity);
        self.processing_delay_ms
            + self.transmission_delay_ms
            + self.propagation_delay_ms
            + queued_slots * self.transmission_delay_ms
    }
}

/// Sparse delays between the aggregators of a layer and their children.
type LayerDelays = BTreeMap<(NodeId, NodeId), u64>;

pub struct RoutingDelayModel {
    num_nodes: usize,
    /// Index 0 is always empty since workers have no children.
    layers: Vec<LayerDelays>,
    /// Shortest paths with a self delay of 1.
    raw: DelayMatrix,
}

impl RoutingDelayModel {
    #[must_use]
    pub fn build(graph: &Graph, delays: &DelayMatrix, tree: &TreeLayers, params: LinkParams) -> Self {
        let num_nodes = graph.num_nodes();
        let mut layers = vec![LayerDelays::new()];
        for layer in 1..tree.num_layers() {
            layers.push(layer_delays(graph, tree, layer, params));
        }
        Self {
            num_nodes,
            layers,
            raw: delays.with_self_delay(1),
        }
    }

    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Delay of a message between `a` and `b` where one is the other's parent
    /// at `layer`.
    ///
    /// Local hand-over costs 1ms. Pairs that are not tree edges of the layer
    /// use the plain shortest path delay.
    #[must_use]
    pub fn hop_delay(&self, layer: usize, a: NodeId, b: NodeId) -> u64 {
        self.layers
            .get(layer)
            .and_then(|delays| delays.get(&(a, b)).or_else(|| delays.get(&(b, a))))
            .copied()
            .unwrap_or_else(|| self.raw.get(a, b))
    }

    /// Full N×N view of one layer: `[aggregator][child]` entries with zeros
    /// everywhere else.
    #[must_use]
    pub fn layer_matrix(&self, layer: usize) -> Vec<Vec<u64>> {
        let mut matrix = vec![vec![0; self.num_nodes]; self.num_nodes];
        if let Some(delays) = self.layers.get(layer) {
            for (&(aggregator, child), &delay) in delays {
                matrix[aggregator][child] = delay;
            }
        }
        matrix
    }

    /// One line per layer above the workers holding the layer's nonzero
    /// entries in row order.
    pub fn write_dump<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for layer in 1..self.num_layers() {
            let line = self
                .layer_matrix(layer)
                .iter()
                .flatten()
                .filter(|&&delay| delay != 0)
                .join(" ");
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    pub fn dump_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let to_error = |e: std::io::Error| {
            ConfigError(format!("Unable to write {}: {e}", path.display()))
        };
        let mut out = BufWriter::new(File::create(path).map_err(to_error)?);
        self.write_dump(&mut out).map_err(to_error)?;
        out.flush().map_err(to_error)
    }
}

/// Delays between the aggregators of `layer` and their children.
///
/// A used link is priced by the load of the node sending over it, towards
/// the aggregator. A relay therefore pays for its own fan-in on the link it
/// forwards on, while the leaves behind it only pay for theirs. A link used
/// in both directions takes the larger of the two prices.
fn layer_delays(graph: &Graph, tree: &TreeLayers, layer: usize, params: LinkParams) -> LayerDelays {
    let num_nodes = graph.num_nodes();

    // Links on the shortest path from each child towards its aggregator,
    // as (sender, receiver)
    let mut used = BTreeSet::new();
    for &aggregator in tree.layer(layer) {
        let paths = shortest_paths(num_nodes, aggregator, |n| graph.neighbours(n));
        for &child in tree.children_at(aggregator, layer) {
            let mut node = child;
            while let Some(next) = paths.previous[node] {
                used.insert((node, next));
                node = next;
            }
        }
    }

    let mut load = vec![0u64; num_nodes];
    for &(from, to) in &used {
        load[from] += 1;
        load[to] += 1;
    }

    let mut link_delay: BTreeMap<(NodeId, NodeId), u64> = BTreeMap::new();
    for &(from, to) in &used {
        let delay = params.hop_delay(load[from]);
        let entry = link_delay.entry((from.min(to), from.max(to))).or_insert(0);
        *entry = (*entry).max(delay);
    }
    let mut adjacency = vec![Vec::new(); num_nodes];
    for (&(a, b), &delay) in &link_delay {
        adjacency[a].push((b, delay));
        adjacency[b].push((a, delay));
    }

    let mut delays = LayerDelays::new();
    for &aggregator in tree.layer(layer) {
        let paths = shortest_paths(num_nodes, aggregator, |n| adjacency[n].iter().copied());
        for &child in tree.children_at(aggregator, layer) {
            delays.insert((aggregator, child), paths.dist[child]);
        }
    }
    delays
}
