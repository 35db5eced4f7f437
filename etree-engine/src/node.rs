// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A central table owning per-node state.
//!
//! Nodes refer to each other only by [`NodeId`], which is the index into the
//! table.

use crate::sim_error;
use crate::types::{NodeId, SimError};

#[derive(Debug, Clone)]
pub struct NodeRegistry<T> {
    nodes: Vec<T>,
}

impl<T> NodeRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a node, returning its id.
    pub fn push(&mut self, node: T) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id)
    }

    /// As [`get`](Self::get) but a missing node is an error.
    pub fn node(&self, id: NodeId) -> Result<&T, SimError> {
        match self.nodes.get(id) {
            Some(node) => Ok(node),
            None => sim_error!(format!("No node {id} in a registry of {}", self.nodes.len())),
        }
    }

    /// As [`get_mut`](Self::get_mut) but a missing node is an error.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut T, SimError> {
        let count = self.nodes.len();
        match self.nodes.get_mut(id) {
            Some(node) => Ok(node),
            None => sim_error!(format!("No node {id} in a registry of {count}")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.nodes.iter().enumerate()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut T)> {
        self.nodes.iter_mut().enumerate()
    }
}

impl<T> Default for NodeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for NodeRegistry<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}
