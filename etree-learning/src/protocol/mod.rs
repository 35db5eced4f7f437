// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Hierarchical aggregation over the tree.
//!
//! Every worker trains on a start stimulus and uploads to its parent.
//! Aggregators merge once their own contribution and every selected child's
//! upload are in, hand the result to their whole subtree and, at the
//! configured cadence, upload it to the next layer. The roots evaluate
//! instead. An epoch ends when every aggregator of the highest layer active
//! in it has merged; the clock is then moved on by the slowest dissemination
//! path of the epoch and the workers are started again.
//!
//! All node state lives in one [`NodeRegistry`] owned by the protocol and
//! handlers only refer to other nodes by id.

pub mod counter;
pub mod epoch;
pub mod state;

use std::rc::Rc;

use etree_engine::engine::{Engine, EventContext, Protocol};
use etree_engine::node::NodeRegistry;
use etree_engine::types::{ConfigError, NodeId, ProtocolId, SimResult, SimTime};
use etree_engine::{config_error, sim_error};
use etree_topology::delay::DelayMatrix;
use etree_topology::routing::RoutingDelayModel;
use etree_topology::tree::TreeLayers;
use etree_track::entity::Entity;
use etree_track::{debug, info, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::dataset::Dataset;
use crate::model::Model;
use crate::protocol::counter::MessageCounts;
use crate::protocol::epoch::{critical_path, expected_completions, max_active_layer};
use crate::protocol::state::NodeState;

/// Tree shape and round parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EtreeParams {
    /// Clusters requested per layer; its length is the number of layers
    /// above the workers.
    pub groups: Vec<usize>,

    /// Promotion cadence of layers `1..layers`.
    pub ratios: Vec<usize>,

    /// Fraction of children selected each round, with a floor of one.
    pub recv_percent: f64,

    /// Stop after this many completed epochs.
    pub epochs: u64,

    /// Added to the delivery delay of every upload.
    pub compute_delay_ms: SimTime,

    /// Delay before the first start stimulus.
    pub start_delay_ms: SimTime,
}

pub const DEFAULT_EPOCHS: u64 = 10;

impl EtreeParams {
    pub fn new(
        layers: usize,
        groups: Vec<usize>,
        ratios: Vec<usize>,
        recv_percent: f64,
    ) -> Result<Self, ConfigError> {
        if layers == 0 {
            return config_error!("At least one layer is required");
        }
        if groups.len() != layers {
            return config_error!(format!(
                "{} groups given for {layers} layers",
                groups.len()
            ));
        }
        if ratios.len() != layers - 1 {
            return config_error!(format!(
                "{} ratios given for {layers} layers (expected {})",
                ratios.len(),
                layers - 1
            ));
        }
        if let Some(pos) = groups.iter().position(|&g| g == 0) {
            return config_error!(format!("Layer {pos} asks for 0 groups"));
        }
        if let Some(pos) = ratios.iter().position(|&r| r == 0) {
            return config_error!(format!("Layer {} has a ratio of 0", pos + 1));
        }
        if !(recv_percent > 0.0 && recv_percent <= 1.0) {
            return config_error!(format!("recvPercent {recv_percent} must be in (0, 1]"));
        }
        Ok(Self {
            groups,
            ratios,
            recv_percent,
            epochs: DEFAULT_EPOCHS,
            compute_delay_ms: 0,
            start_delay_ms: 0,
        })
    }

    #[must_use]
    pub fn with_epochs(mut self, epochs: u64) -> Self {
        self.epochs = epochs;
        self
    }

    #[must_use]
    pub fn with_compute_delay(mut self, compute_delay_ms: SimTime) -> Self {
        self.compute_delay_ms = compute_delay_ms;
        self
    }

    #[must_use]
    pub fn with_start_delay(mut self, start_delay_ms: SimTime) -> Self {
        self.start_delay_ms = start_delay_ms;
        self
    }

    /// Number of layers above the workers.
    #[must_use]
    pub fn layers(&self) -> usize {
        self.groups.len()
    }

    /// Number of children selected each round out of `num_children`.
    #[must_use]
    pub fn subset_size(&self, num_children: usize) -> usize {
        if num_children == 0 {
            return 0;
        }
        ((num_children as f64 * self.recv_percent).round() as usize).clamp(1, num_children)
    }
}

/// The precomputed network shared read-only by every node.
pub struct TopologyContext {
    pub tree: TreeLayers,
    pub delays: DelayMatrix,
    pub routing: RoutingDelayModel,

    /// Held-out set the roots evaluate on.
    pub eval: Dataset,
}

#[derive(Debug, Clone)]
pub enum EtreeMessage<M> {
    /// Train locally and upload.
    Start,

    /// A model sent up from `src` at `layer` to its parent at `layer + 1`.
    Upload { src: NodeId, layer: usize, model: M },
}

/// One root evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// Epoch the evaluation happened in, counted from 1.
    pub epoch: u64,
    pub time: SimTime,
    pub loss: f64,
    pub accuracy: f64,
}

pub struct EtreeProtocol<M: Model> {
    entity: Rc<Entity>,
    context: Rc<TopologyContext>,
    params: EtreeParams,
    nodes: NodeRegistry<NodeState<M>>,
    rng: StdRng,

    /// Completed epochs.
    epoch: u64,

    /// Slowest dissemination path seen in the current epoch.
    pending_advance: SimTime,

    time_advances: Vec<SimTime>,
    reports: Vec<EpochReport>,
    messages: MessageCounts,
    done: bool,
}

impl<M: Model> EtreeProtocol<M> {
    /// Create the per-node state.
    ///
    /// `local_data` is indexed by node id and every worker starts from a
    /// copy of `initial`.
    pub fn new(
        parent: &Rc<Entity>,
        context: Rc<TopologyContext>,
        params: EtreeParams,
        local_data: Vec<Dataset>,
        initial: &M,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        let tree = &context.tree;
        if tree.num_layers() != params.layers() + 1 {
            return config_error!(format!(
                "Tree has {} layers but {} were configured",
                tree.num_layers() - 1,
                params.layers()
            ));
        }
        if local_data.len() != tree.num_nodes() {
            return config_error!(format!(
                "{} local datasets given for {} nodes",
                local_data.len(),
                tree.num_nodes()
            ));
        }

        let messages = MessageCounts::new(tree.num_nodes());
        let entity = Rc::new(Entity::new(parent, "etree"));
        let mut nodes = NodeRegistry::new();
        for (id, local) in local_data.into_iter().enumerate() {
            let node_entity = Rc::new(Entity::new(&entity, &format!("node{id}")));
            nodes.push(NodeState::new(
                node_entity,
                local,
                initial.clone(),
                tree.num_layers(),
            ));
        }

        let mut protocol = Self {
            entity,
            context,
            params,
            nodes,
            rng,
            epoch: 0,
            pending_advance: 0,
            time_advances: Vec::new(),
            reports: Vec::new(),
            messages,
            done: false,
        };
        protocol.select_subsets();
        Ok(protocol)
    }

    /// Schedule the first start stimulus for every worker.
    pub fn start(&self, engine: &mut Engine<EtreeMessage<M>>, pid: ProtocolId) {
        for &worker in self.context.tree.layer(0) {
            engine.schedule_at(self.params.start_delay_ms, EtreeMessage::Start, worker, pid);
        }
    }

    #[must_use]
    pub fn epochs_completed(&self) -> u64 {
        self.epoch
    }

    /// Clock advance applied at the end of each completed epoch.
    #[must_use]
    pub fn time_advances(&self) -> &[SimTime] {
        &self.time_advances
    }

    #[must_use]
    pub fn reports(&self) -> &[EpochReport] {
        &self.reports
    }

    /// Uploads sent over the network so far.
    #[must_use]
    pub fn messages(&self) -> &MessageCounts {
        &self.messages
    }

    /// The worker model currently held by `node`.
    #[must_use]
    pub fn worker_model(&self, node: NodeId) -> Option<&M> {
        self.nodes.get(node).map(|state| &state.worker)
    }

    #[must_use]
    pub fn completions(&self, node: NodeId, layer: usize) -> u64 {
        self.nodes
            .get(node)
            .and_then(|state| state.layers.get(layer))
            .map_or(0, |layer| layer.completed)
    }

    #[must_use]
    pub fn selected_children(&self, node: NodeId, layer: usize) -> Vec<NodeId> {
        self.nodes
            .get(node)
            .and_then(|state| state.layers.get(layer))
            .map(|layer| layer.selected.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of uploads buffered by `node` at `layer` this round.
    #[must_use]
    pub fn buffered(&self, node: NodeId, layer: usize) -> usize {
        self.nodes
            .get(node)
            .and_then(|state| state.layers.get(layer))
            .map_or(0, |layer| layer.buffer.len())
    }

    /// Draw a fresh subset of children for every aggregator.
    fn select_subsets(&mut self) {
        let tree = &self.context.tree;
        for layer in 1..tree.num_layers() {
            for &node in tree.layer(layer) {
                let children = tree.children_at(node, layer);
                let size = self.params.subset_size(children.len());
                let selected = children.choose_multiple(&mut self.rng, size).copied().collect();
                if let Some(state) = self.nodes.get_mut(node) {
                    state.layers[layer].selected = selected;
                }
            }
        }
    }

    fn handle_start(&mut self, ctx: &mut EventContext<'_, EtreeMessage<M>>) -> SimResult {
        let node = ctx.node();
        let state = self.nodes.node_mut(node)?;
        state.worker.train(&state.local);
        trace!(state.entity ; "trained on {} samples, age {}", state.local.len(), state.worker.age());
        let model = state.worker.clone();
        self.send_up(ctx, node, 0, model)
    }

    /// Pass `model` from `node` at `layer` to its parent at `layer + 1`.
    fn send_up(
        &mut self,
        ctx: &mut EventContext<'_, EtreeMessage<M>>,
        node: NodeId,
        layer: usize,
        model: M,
    ) -> SimResult {
        let Some(parent) = self.context.tree.parent_at(node, layer) else {
            return sim_error!(format!("Node {node} has no parent at layer {layer}"));
        };
        if parent == node {
            return self.receive(ctx, node, node, layer + 1, model);
        }
        let delay = self.context.routing.hop_delay(layer + 1, node, parent)
            + self.params.compute_delay_ms;
        self.messages.record(node, parent);
        ctx.schedule_at(
            delay,
            EtreeMessage::Upload {
                src: node,
                layer,
                model,
            },
            parent,
        );
        Ok(())
    }

    /// Accept a contribution for `node` at `layer`.
    fn receive(
        &mut self,
        ctx: &mut EventContext<'_, EtreeMessage<M>>,
        node: NodeId,
        src: NodeId,
        layer: usize,
        model: M,
    ) -> SimResult {
        let state = self.nodes.node_mut(node)?;
        let Some(layer_state) = state.layers.get_mut(layer) else {
            return sim_error!(format!("Node {node} received an upload for layer {layer}"));
        };
        if src == node {
            layer_state.own = Some(model);
        } else if layer_state.selected.contains(&src) {
            layer_state.buffer.insert(src, model);
        } else {
            trace!(state.entity ; "dropped upload from unselected node {src} at layer {layer}");
            return Ok(());
        }

        if layer_state.ready() {
            self.merge(ctx, node, layer)?;
        }
        Ok(())
    }

    fn merge(
        &mut self,
        ctx: &mut EventContext<'_, EtreeMessage<M>>,
        node: NodeId,
        layer: usize,
    ) -> SimResult {
        let state = self.nodes.node_mut(node)?;
        let layer_state = &mut state.layers[layer];
        let Some(own) = layer_state.own.take() else {
            return sim_error!(format!("Node {node} merged layer {layer} without its own model"));
        };
        let buffered = std::mem::take(&mut layer_state.buffer);
        let others: Vec<&M> = buffered.values().collect();
        let merged = own.merge_equal_weight(&others);
        layer_state.completed += 1;
        layer_state.finished = true;
        let completed = layer_state.completed;
        debug!(state.entity ; "merged {} models at layer {layer} ({completed} merges)", others.len() + 1);

        self.broadcast(node, layer, &merged);

        let top = self.context.tree.top_layer();
        if layer == top {
            self.evaluate(ctx, &merged);
        } else if completed % self.params.ratios[layer - 1] as u64 == 0 {
            self.send_up(ctx, node, layer, merged)?;
        }

        if self.can_advance_epoch() {
            self.release_epoch(ctx);
        }
        Ok(())
    }

    /// Hand `model` to every node below `node` at `layer`.
    fn broadcast(&mut self, node: NodeId, layer: usize, model: &M) {
        let context = &self.context;
        for member in context.tree.subtree(node, layer) {
            if let Some(state) = self.nodes.get_mut(member) {
                state.worker = model.clone();
            }
        }
        let path = critical_path(&context.tree, &context.delays, node, layer);
        self.pending_advance = self.pending_advance.max(path);
    }

    fn evaluate(&mut self, ctx: &EventContext<'_, EtreeMessage<M>>, model: &M) {
        let (loss, accuracy) = model.loss_and_accuracy(&self.context.eval);
        info!(self.entity ; "Time: {}, ETree loss: {loss}, acc: {accuracy}", ctx.now());
        self.reports.push(EpochReport {
            epoch: self.epoch + 1,
            time: ctx.now(),
            loss,
            accuracy,
        });
    }

    /// Whether every aggregator of the highest layer active in the current
    /// epoch has merged since the last release.
    ///
    /// A `true` result consumes the finished flags, so an immediate second
    /// call returns `false`.
    pub fn can_advance_epoch(&mut self) -> bool {
        let tree = &self.context.tree;
        let active = max_active_layer(self.epoch + 1, tree.top_layer(), &self.params.ratios);
        let all_finished = tree.layer(active).iter().all(|&node| {
            self.nodes
                .get(node)
                .is_some_and(|state| state.layers[active].finished)
        });
        if !all_finished {
            return false;
        }
        for (_, state) in self.nodes.iter_mut() {
            for layer_state in state.layers.iter_mut().take(active + 1) {
                layer_state.finished = false;
            }
        }
        true
    }

    fn release_epoch(&mut self, ctx: &mut EventContext<'_, EtreeMessage<M>>) {
        let advance = std::mem::take(&mut self.pending_advance);
        self.time_advances.push(advance);
        self.epoch += 1;

        let cancelled = ctx.cancel_all_pending(ctx.pid());
        debug!(self.entity ; "epoch {} done at {}ms, advance {advance}ms, {cancelled} stale events dropped", self.epoch, ctx.now());

        // Aggregators cut off mid-round are credited with the round so that
        // every member of a layer promotes on the same epochs
        let tree = &self.context.tree;
        for layer in 1..tree.num_layers() {
            let expected = expected_completions(self.epoch, layer, &self.params.ratios);
            for &node in tree.layer(layer) {
                if let Some(state) = self.nodes.get_mut(node) {
                    let layer_state = &mut state.layers[layer];
                    layer_state.completed = layer_state.completed.max(expected);
                }
            }
        }
        for (_, state) in self.nodes.iter_mut() {
            for layer_state in &mut state.layers {
                layer_state.clear_round();
            }
        }

        if self.epoch >= self.params.epochs {
            info!(self.entity ; "finished {} epochs at {}ms, {} uploads sent", self.epoch, ctx.now(), self.messages.total());
            self.done = true;
            ctx.request_stop();
            return;
        }

        self.select_subsets();
        for &worker in self.context.tree.layer(0) {
            ctx.schedule_at(advance, EtreeMessage::Start, worker);
        }
    }
}

impl<M: Model> Protocol<EtreeMessage<M>> for EtreeProtocol<M> {
    fn process_event(
        &mut self,
        ctx: &mut EventContext<'_, EtreeMessage<M>>,
        payload: EtreeMessage<M>,
    ) -> SimResult {
        if self.done {
            return Ok(());
        }
        match payload {
            EtreeMessage::Start => self.handle_start(ctx),
            EtreeMessage::Upload { src, layer, model } => {
                let node = ctx.node();
                self.receive(ctx, node, src, layer + 1, model)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use etree_engine::queue::EventQueue;
    use etree_topology::cluster::{ClusterMode, ClusterParams, build_clusterer};
    use etree_topology::graph::Graph;
    use etree_topology::routing::LinkParams;
    use etree_topology::tree::TreeTopologyBuilder;
    use etree_track::entity::toplevel;
    use etree_track::tracker::dev_null_tracker;
    use rand::SeedableRng;

    use super::*;
    use crate::model::{LogisticRegression, ModelParams};

    type Star = EtreeProtocol<LogisticRegression>;

    fn model() -> LogisticRegression {
        LogisticRegression::from_params(&ModelParams {
            num_features: 1,
            ..ModelParams::default()
        })
        .unwrap()
    }

    /// Node 0 aggregates leaves 1 to 3.
    fn star(recv_percent: f64) -> Star {
        let graph = Graph::from_edges(4, &[(0, 1, 10), (0, 2, 10), (0, 3, 10)]).unwrap();
        single_layer(&graph, 1, recv_percent)
    }

    fn single_layer(graph: &Graph, groups: usize, recv_percent: f64) -> Star {
        let top = toplevel(&dev_null_tracker(), "top");
        let delays = DelayMatrix::build(graph);
        let clusterer = build_clusterer(ClusterMode::Delay, ClusterParams::default(), &[]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let nodes: Vec<NodeId> = (0..graph.num_nodes()).collect();
        let tree = TreeTopologyBuilder::new(&top, clusterer.as_ref(), &delays)
            .build(&nodes, &[groups], &mut rng)
            .unwrap();
        let routing = RoutingDelayModel::build(graph, &delays, &tree, LinkParams::default());
        let context = Rc::new(TopologyContext {
            tree,
            delays,
            routing,
            eval: Dataset::empty(1, 2),
        });
        let params = EtreeParams::new(1, vec![groups], vec![], recv_percent).unwrap();
        let local = vec![Dataset::empty(1, 2); graph.num_nodes()];
        EtreeProtocol::new(&top, context, params, local, &model(), rng).unwrap()
    }

    #[test]
    fn subset_size_has_a_floor() {
        let params = EtreeParams::new(1, vec![1], vec![], 0.1).unwrap();
        assert_eq!(params.subset_size(0), 0);
        assert_eq!(params.subset_size(1), 1);
        assert_eq!(params.subset_size(3), 1);
        assert_eq!(params.subset_size(20), 2);

        let all = EtreeParams::new(1, vec![1], vec![], 1.0).unwrap();
        assert_eq!(all.subset_size(3), 3);
    }

    #[test]
    fn invalid_params() {
        assert!(EtreeParams::new(2, vec![3], vec![1], 1.0).is_err());
        assert!(EtreeParams::new(2, vec![3, 1], vec![], 1.0).is_err());
        assert!(EtreeParams::new(2, vec![3, 0], vec![1], 1.0).is_err());
        assert!(EtreeParams::new(2, vec![3, 1], vec![0], 1.0).is_err());
        assert!(EtreeParams::new(1, vec![1], vec![], 0.0).is_err());
        assert!(EtreeParams::new(1, vec![1], vec![], 1.5).is_err());
        assert!(EtreeParams::new(0, vec![], vec![], 1.0).is_err());
    }

    #[test]
    fn leaf_subsets_are_drawn() {
        let protocol = star(0.34);
        let selected = protocol.selected_children(0, 1);
        assert_eq!(selected.len(), 1);
        assert!((1..4).contains(&selected[0]));
        assert!(protocol.selected_children(1, 1).is_empty());
    }

    #[test]
    fn unselected_and_duplicate_uploads() {
        let mut protocol = star(0.34);
        let chosen = protocol.selected_children(0, 1)[0];
        let other = (1..4).find(|&n| n != chosen).unwrap();

        let mut queue = EventQueue::new();
        let mut ctx = EventContext::new(0, ProtocolId(0), 0, &mut queue);

        protocol.receive(&mut ctx, 0, other, 1, model()).unwrap();
        assert_eq!(protocol.buffered(0, 1), 0);

        protocol.receive(&mut ctx, 0, chosen, 1, model()).unwrap();
        protocol.receive(&mut ctx, 0, chosen, 1, model()).unwrap();
        assert_eq!(protocol.buffered(0, 1), 1);
        assert_eq!(protocol.completions(0, 1), 0);

        // The aggregator's own contribution completes the round, which also
        // ends the epoch since this is the only aggregator
        protocol.receive(&mut ctx, 0, 0, 1, model()).unwrap();
        assert_eq!(protocol.completions(0, 1), 1);
        assert_eq!(protocol.epochs_completed(), 1);
        assert_eq!(protocol.reports().len(), 1);
        assert_eq!(protocol.time_advances(), &[10]);
        assert_eq!(protocol.buffered(0, 1), 0);
        drop(ctx);

        // One start stimulus per worker for the next epoch
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.peek_time(), Some(10));
    }

    #[test]
    fn barrier_is_idempotent() {
        let mut protocol = star(1.0);
        assert!(!protocol.can_advance_epoch());

        protocol.nodes.get_mut(0).unwrap().layers[1].finished = true;
        assert!(protocol.can_advance_epoch());
        assert!(!protocol.can_advance_epoch());
    }

    #[test]
    fn barrier_waits_for_every_root() {
        // Two clusters of two on a chain, each with its own root
        let graph = Graph::from_edges(4, &[(0, 1, 10), (1, 2, 30), (2, 3, 10)]).unwrap();
        let mut protocol = single_layer(&graph, 2, 1.0);
        let roots = protocol.context.tree.layer(1).to_vec();
        assert_eq!(roots.len(), 2);

        protocol.nodes.get_mut(roots[0]).unwrap().layers[1].finished = true;
        assert!(!protocol.can_advance_epoch());
        assert!(!protocol.can_advance_epoch());
        // A refused release leaves the flag in place
        assert!(protocol.nodes.get(roots[0]).unwrap().layers[1].finished);

        protocol.nodes.get_mut(roots[1]).unwrap().layers[1].finished = true;
        assert!(protocol.can_advance_epoch());
        for root in roots {
            assert!(!protocol.nodes.get(root).unwrap().layers[1].finished);
        }
    }

    #[test]
    fn uploads_are_counted_at_both_ends() {
        let mut protocol = star(1.0);
        let mut queue = EventQueue::new();
        let mut ctx = EventContext::new(1, ProtocolId(0), 0, &mut queue);
        protocol.send_up(&mut ctx, 1, 0, model()).unwrap();
        protocol.send_up(&mut ctx, 2, 0, model()).unwrap();
        // The aggregator's own model is handed over locally
        protocol.send_up(&mut ctx, 0, 0, model()).unwrap();
        drop(ctx);

        assert_eq!(queue.len(), 2);
        assert_eq!(protocol.messages().sent(), &[0, 1, 1, 0]);
        assert_eq!(protocol.messages().received(), &[2, 0, 0, 0]);
        assert_eq!(protocol.messages().total(), 2);
    }

    #[test]
    fn worker_without_parent_is_an_error() {
        let mut protocol = star(1.0);
        let mut queue = EventQueue::new();
        let mut ctx = EventContext::new(0, ProtocolId(0), 0, &mut queue);
        assert!(protocol.send_up(&mut ctx, 0, 1, model()).is_err());
    }
}
