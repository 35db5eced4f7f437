// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Build and run a complete ETree simulation from a [`Config`].
//!
//! The setup happens in a fixed order: the topology is read and turned into
//! a delay matrix, the data is loaded and split over the nodes, the balancing
//! clustering modes get per-node profiles, the tree is built layer by layer,
//! the routing model prices its links and finally the protocol is registered
//! with an engine and run to completion.
//!
//! The model type is chosen at run time from its name and everything after
//! that point is generic over it.

pub mod config;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use etree_engine::engine::Engine;
use etree_engine::types::{ConfigError, NodeId, SimError, SimTime};
use etree_learning::dataset::{Dataset, read_sample_counts};
use etree_learning::model::{LogisticRegression, Model, ModelKind, SoftmaxRegression};
use etree_learning::profile::build_profiles;
use etree_learning::protocol::counter::MessageCounts;
use etree_learning::protocol::{EpochReport, EtreeMessage, EtreeProtocol, TopologyContext};
use etree_topology::cluster::build_clusterer;
use etree_topology::delay::DelayMatrix;
use etree_topology::graph::Graph;
use etree_topology::routing::RoutingDelayModel;
use etree_topology::tree::TreeTopologyBuilder;
use etree_track::entity::Entity;
use etree_track::{Tracker, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub use crate::config::Config;

/// What a finished run leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reports: Vec<EpochReport>,
    pub time_advances: Vec<SimTime>,
    pub epochs_completed: u64,

    /// Simulated time when the engine stopped.
    pub end_time_ms: SimTime,

    /// Aggregators of each layer above the workers, lowest layer first.
    pub aggregators: Vec<Vec<NodeId>>,

    /// Uploads sent and received per node.
    pub messages: MessageCounts,
}

/// Training data split over the nodes plus the shared evaluation set.
struct Data {
    local: Vec<Dataset>,
    eval: Dataset,
}

/// Run the simulation described by `config`, logging through `tracker`.
pub fn run(config: &Config, tracker: &Tracker) -> Result<Outcome, SimError> {
    match config.model_kind()? {
        ModelKind::Logistic => run_model::<LogisticRegression>(config, tracker),
        ModelKind::Softmax => run_model::<SoftmaxRegression>(config, tracker),
    }
}

fn run_model<M: Model + 'static>(config: &Config, tracker: &Tracker) -> Result<Outcome, SimError> {
    let params = config.etree_params()?;
    let mode = config.cluster_mode()?;

    let mut engine: Engine<EtreeMessage<M>> = Engine::new(tracker);
    let sim = Rc::new(Entity::new(engine.top(), "sim"));

    let graph = Graph::from_file(config.topology_file()?, config.nodes)?;
    let num_nodes = graph.num_nodes();
    let delays = DelayMatrix::build(&graph);
    info!(sim ; "loaded {num_nodes} nodes and {} links", graph.num_links());

    let data = load_data(config, num_nodes)?;
    let num_features = data.eval.num_features().max(data.local.first().map_or(0, Dataset::num_features));
    let num_classes = data.eval.num_classes().max(data.local.first().map_or(2, Dataset::num_classes));
    let mut model_params = config.model_params()?;
    model_params.num_features = num_features;
    model_params.num_classes = num_classes;
    let initial = M::from_params(&model_params)?;

    let profiles = if mode.needs_profiles() {
        let rounds = config.pretrain_rounds.unwrap_or(1);
        build_profiles(&data.local, &data.eval, &initial, rounds)
    } else {
        Vec::new()
    };
    let clusterer = build_clusterer(mode, config.cluster_params()?, &profiles)?;

    let seed = config.seed.unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed);
    let nodes: Vec<NodeId> = (0..num_nodes).collect();
    let tree = TreeTopologyBuilder::new(&sim, clusterer.as_ref(), &delays).build(
        &nodes,
        &params.groups,
        &mut rng,
    )?;
    let aggregators: Vec<Vec<NodeId>> = (1..tree.num_layers())
        .map(|layer| tree.layer(layer).to_vec())
        .collect();
    info!(sim ; "clustering mode {mode}, aggregators per layer {aggregators:?}");

    let routing = RoutingDelayModel::build(&graph, &delays, &tree, config.link_params()?);
    if let Some(path) = &config.delay_dump_file {
        routing.dump_to_file(path)?;
        info!(sim ; "wrote routing delays to {}", path.display());
    }

    let context = Rc::new(TopologyContext {
        tree,
        delays,
        routing,
        eval: data.eval,
    });
    let protocol = Rc::new(RefCell::new(EtreeProtocol::new(
        engine.top(),
        context,
        params,
        data.local,
        &initial,
        rng,
    )?));
    let pid = engine.register(protocol.clone());
    protocol.borrow().start(&mut engine, pid);

    engine.run()?;

    let protocol = protocol.borrow();
    let messages = protocol.messages().clone();
    info!(sim ; "{} uploads sent, received per node {:?}", messages.total(), messages.received());
    Ok(Outcome {
        reports: protocol.reports().to_vec(),
        time_advances: protocol.time_advances().to_vec(),
        epochs_completed: protocol.epochs_completed(),
        end_time_ms: engine.time_now_ms(),
        aggregators,
        messages,
    })
}

fn load_data(config: &Config, num_nodes: usize) -> Result<Data, ConfigError> {
    let mut training = load_dataset(config.training_file.as_deref())?;
    let mut eval = load_dataset(config.eval_file.as_deref())?;
    let num_features = training.num_features().max(eval.num_features());
    let num_classes = training.num_classes().max(eval.num_classes());
    training.widen(num_features, num_classes);
    eval.widen(num_features, num_classes);

    let counts = match &config.samples_file {
        Some(path) if !path.as_os_str().is_empty() => read_sample_counts(path)?,
        _ => vec![training.len() / num_nodes.max(1); num_nodes],
    };
    let local = training.partition(&counts, num_nodes)?;
    Ok(Data { local, eval })
}

fn load_dataset(path: Option<&Path>) -> Result<Dataset, ConfigError> {
    match path {
        Some(path) if !path.as_os_str().is_empty() => Dataset::from_file(path),
        _ => Ok(Dataset::empty(0, 2)),
    }
}
