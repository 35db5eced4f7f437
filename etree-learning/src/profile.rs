// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Per-node profiles for the balancing clustering modes.

use etree_topology::cluster::NodeProfile;

use crate::dataset::Dataset;
use crate::model::Model;

/// Profile every node by pre-training a copy of `initial` on its local data.
///
/// Accuracy is measured on `eval`, or on the node's own data when no
/// evaluation set was given.
pub fn build_profiles<M: Model>(
    local_data: &[Dataset],
    eval: &Dataset,
    initial: &M,
    pretrain_rounds: usize,
) -> Vec<NodeProfile> {
    local_data
        .iter()
        .map(|local| {
            let mut model = initial.clone();
            for _ in 0..pretrain_rounds {
                model.train(local);
            }
            let target = if eval.is_empty() { local } else { eval };
            let (_, accuracy) = model.loss_and_accuracy(target);
            NodeProfile {
                accuracy,
                label_distribution: local.label_distribution(),
            }
        })
        .collect()
}
