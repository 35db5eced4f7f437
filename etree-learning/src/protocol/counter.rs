// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Communication cost of a run.

use etree_engine::types::NodeId;

/// Uploads put on the network, counted per sender and per receiver when
/// they are sent.
///
/// Local hand-over to a node's own aggregator role is not a message and is
/// not counted. Uploads later dropped at an epoch boundary still count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCounts {
    sent: Vec<u64>,
    received: Vec<u64>,
}

impl MessageCounts {
    #[must_use]
    pub fn new(num_nodes: usize) -> Self {
        Self {
            sent: vec![0; num_nodes],
            received: vec![0; num_nodes],
        }
    }

    pub fn record(&mut self, src: NodeId, dest: NodeId) {
        if let Some(count) = self.sent.get_mut(src) {
            *count += 1;
        }
        if let Some(count) = self.received.get_mut(dest) {
            *count += 1;
        }
    }

    /// Uploads sent by each node, indexed by node id.
    #[must_use]
    pub fn sent(&self) -> &[u64] {
        &self.sent
    }

    /// Uploads addressed to each node, indexed by node id.
    #[must_use]
    pub fn received(&self) -> &[u64] {
        &self.received
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.sent.iter().sum()
    }
}
