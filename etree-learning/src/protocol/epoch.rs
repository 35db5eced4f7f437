// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Epoch bookkeeping that only depends on the tree and the configuration.

use etree_engine::types::{NodeId, SimTime};
use etree_topology::delay::DelayMatrix;
use etree_topology::tree::TreeLayers;

/// Highest layer that merges during `epoch` (counted from 1).
///
/// Layer 1 merges every epoch and layer `l + 1` merges whenever layer `l`'s
/// completion count reaches a multiple of `ratios[l - 1]`.
#[must_use]
pub fn max_active_layer(epoch: u64, top_layer: usize, ratios: &[usize]) -> usize {
    let mut layer = 1;
    let mut count = epoch;
    while layer < top_layer {
        let ratio = ratios[layer - 1] as u64;
        if count % ratio != 0 {
            break;
        }
        count /= ratio;
        layer += 1;
    }
    layer
}

/// Number of merges every aggregator of `layer` has performed once `epoch`
/// epochs are complete.
#[must_use]
pub fn expected_completions(epoch: u64, layer: usize, ratios: &[usize]) -> u64 {
    ratios[..layer.saturating_sub(1)]
        .iter()
        .fold(epoch, |count, &ratio| count / ratio as u64)
}

/// Longest delay for a model broadcast by `node` at `layer` to reach the
/// workers below it.
///
/// Self hops are free since the node already holds the model.
#[must_use]
pub fn critical_path(tree: &TreeLayers, delays: &DelayMatrix, node: NodeId, layer: usize) -> SimTime {
    if layer == 0 {
        return 0;
    }
    let via_self = critical_path(tree, delays, node, layer - 1);
    tree.children_at(node, layer)
        .iter()
        .map(|&child| {
            delays
                .get(node, child)
                .saturating_add(critical_path(tree, delays, child, layer - 1))
        })
        .fold(via_self, SimTime::max)
}
