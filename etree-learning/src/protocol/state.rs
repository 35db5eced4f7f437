// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Per-node aggregation state.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use etree_engine::types::NodeId;
use etree_track::entity::Entity;

use crate::dataset::Dataset;
use crate::model::Model;

/// What a node holds for one layer it aggregates.
#[derive(Debug, Clone)]
pub struct LayerState<M> {
    /// The node's own contribution for the current round.
    pub own: Option<M>,

    /// Models uploaded by selected children this round.
    pub buffer: BTreeMap<NodeId, M>,

    /// Children whose uploads are accepted this round.
    pub selected: BTreeSet<NodeId>,

    /// Number of merges performed.
    pub completed: u64,

    /// Set by a merge and consumed by the epoch barrier.
    pub finished: bool,
}

impl<M> Default for LayerState<M> {
    fn default() -> Self {
        Self {
            own: None,
            buffer: BTreeMap::new(),
            selected: BTreeSet::new(),
            completed: 0,
            finished: false,
        }
    }
}

impl<M: Model> LayerState<M> {
    /// A merge is due once the own contribution is in and every selected
    /// child has uploaded.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.own.is_some() && self.buffer.len() >= self.selected.len()
    }

    /// Drop any partial round.
    pub fn clear_round(&mut self) {
        self.own = None;
        self.buffer.clear();
    }
}

pub struct NodeState<M> {
    pub entity: Rc<Entity>,

    /// Private training data.
    pub local: Dataset,

    /// The model trained on each start stimulus and replaced by broadcasts.
    pub worker: M,

    /// Indexed by layer; index 0 is unused since workers do not aggregate.
    pub layers: Vec<LayerState<M>>,
}

impl<M: Model> NodeState<M> {
    #[must_use]
    pub fn new(entity: Rc<Entity>, local: Dataset, worker: M, num_layers: usize) -> Self {
        Self {
            entity,
            local,
            worker,
            layers: (0..num_layers).map(|_| LayerState::default()).collect(),
        }
    }
}
