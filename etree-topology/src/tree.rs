// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The layered aggregation tree.
//!
//! Layer 0 holds every worker. Each higher layer holds the medoids elected
//! while clustering the layer below it, so the last layer holds the roots.
//!
//! A medoid is recorded as its own parent at the layer it was elected from.
//! That keeps `parent_at` total over a layer's members while children lists
//! only ever hold other nodes.

use std::collections::BTreeSet;
use std::rc::Rc;

use etree_engine::config_error;
use etree_engine::types::{ConfigError, NodeId};
use etree_track::entity::Entity;
use etree_track::{debug, info};
use rand::rngs::StdRng;

use crate::cluster::{Cluster, Clusterer};
use crate::delay::DelayMatrix;

/// Tree relations of one node, indexed by layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTopology {
    /// `parents[l]` is set for every member of layer `l` below the top.
    parents: Vec<Option<NodeId>>,

    /// `children[l]` lists the other members of layer `l - 1` whose parent is
    /// this node.
    children: Vec<Vec<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct TreeLayers {
    layers: Vec<Vec<NodeId>>,
    clusters: Vec<Vec<Cluster>>,
    nodes: Vec<NodeTopology>,
}

impl TreeLayers {
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Index of the root layer.
    #[must_use]
    pub fn top_layer(&self) -> usize {
        self.layers.len() - 1
    }

    /// Members of `layer` in ascending id order.
    #[must_use]
    pub fn layer(&self, layer: usize) -> &[NodeId] {
        &self.layers[layer]
    }

    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        self.layer(self.top_layer())
    }

    /// Clusters formed while building layer `layer + 1` from `layer`.
    #[must_use]
    pub fn clusters(&self, layer: usize) -> &[Cluster] {
        &self.clusters[layer]
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn parent_at(&self, node: NodeId, layer: usize) -> Option<NodeId> {
        self.nodes
            .get(node)
            .and_then(|n| n.parents.get(layer).copied().flatten())
    }

    #[must_use]
    pub fn children_at(&self, node: NodeId, layer: usize) -> &[NodeId] {
        self.nodes
            .get(node)
            .and_then(|n| n.children.get(layer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn is_member(&self, node: NodeId, layer: usize) -> bool {
        self.layers
            .get(layer)
            .is_some_and(|members| members.binary_search(&node).is_ok())
    }

    /// The highest layer `node` belongs to.
    #[must_use]
    pub fn highest_layer(&self, node: NodeId) -> Option<usize> {
        (0..self.num_layers()).rev().find(|&l| self.is_member(node, l))
    }

    /// Every node reached when `node` disseminates from `layer` down to the
    /// workers, `node` included.
    #[must_use]
    pub fn subtree(&self, node: NodeId, layer: usize) -> BTreeSet<NodeId> {
        let mut reached = BTreeSet::new();
        self.collect_subtree(node, layer, &mut reached);
        reached
    }

    fn collect_subtree(&self, node: NodeId, layer: usize, reached: &mut BTreeSet<NodeId>) {
        reached.insert(node);
        if layer == 0 {
            return;
        }
        self.collect_subtree(node, layer - 1, reached);
        for &child in self.children_at(node, layer) {
            self.collect_subtree(child, layer - 1, reached);
        }
    }

    /// Check that children and parents agree in both directions.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        for layer in 1..self.num_layers() {
            for &child in self.layer(layer - 1) {
                match self.parent_at(child, layer - 1) {
                    Some(parent) if parent == child => {
                        if !self.is_member(child, layer) {
                            return false;
                        }
                    }
                    Some(parent) => {
                        if !self.children_at(parent, layer).contains(&child) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            for &parent in self.layer(layer) {
                for &child in self.children_at(parent, layer) {
                    if child == parent || self.parent_at(child, layer - 1) != Some(parent) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Builds the tree one layer at a time with a [`Clusterer`].
pub struct TreeTopologyBuilder<'a> {
    entity: Rc<Entity>,
    clusterer: &'a dyn Clusterer,
    delays: &'a DelayMatrix,
}

impl<'a> TreeTopologyBuilder<'a> {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, clusterer: &'a dyn Clusterer, delays: &'a DelayMatrix) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "tree")),
            clusterer,
            delays,
        }
    }

    /// Cluster `node_ids` into `groups[0]` clusters, their medoids into
    /// `groups[1]` clusters and so on.
    ///
    /// The result has `groups.len() + 1` layers.
    pub fn build(
        &self,
        node_ids: &[NodeId],
        groups: &[usize],
        rng: &mut StdRng,
    ) -> Result<TreeLayers, ConfigError> {
        if groups.is_empty() {
            return config_error!("At least one layer of groups is required");
        }
        if node_ids.is_empty() {
            return config_error!("Cannot build a tree without nodes");
        }
        self.delays.require_connected(node_ids)?;

        let num_layers = groups.len() + 1;
        let mut nodes = vec![
            NodeTopology {
                parents: vec![None; num_layers],
                children: vec![Vec::new(); num_layers],
            };
            self.delays.num_nodes()
        ];

        let mut frontier: Vec<NodeId> = node_ids.to_vec();
        frontier.sort_unstable();
        frontier.dedup();
        let mut layers = vec![frontier.clone()];
        let mut all_clusters = Vec::with_capacity(groups.len());

        for (layer, &k) in groups.iter().enumerate() {
            let clusters = self.clusterer.cluster(&frontier, k, self.delays, rng)?;
            debug!(self.entity ; "layer {layer}: {} clusters from {} nodes", clusters.len(), frontier.len());
            for cluster in &clusters {
                for &member in &cluster.members {
                    nodes[member].parents[layer] = Some(cluster.medoid);
                    if member != cluster.medoid {
                        nodes[cluster.medoid].children[layer + 1].push(member);
                    }
                }
            }
            frontier = clusters.iter().map(|c| c.medoid).collect();
            frontier.sort_unstable();
            layers.push(frontier.clone());
            all_clusters.push(clusters);
        }

        for node in &mut nodes {
            for children in &mut node.children {
                children.sort_unstable();
            }
        }

        info!(self.entity ; "built {num_layers} layers, roots {:?}", frontier);
        Ok(TreeLayers {
            layers,
            clusters: all_clusters,
            nodes,
        })
    }
}
