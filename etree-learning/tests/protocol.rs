// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use etree_engine::engine::Engine;
use etree_engine::run_simulation;
use etree_engine::test_helpers::start_test;
use etree_engine::types::NodeId;
use etree_learning::dataset::{Dataset, Instance};
use etree_learning::model::{LogisticRegression, Model, ModelParams};
use etree_learning::protocol::{EtreeMessage, EtreeParams, EtreeProtocol, TopologyContext};
use etree_topology::cluster::{ClusterMode, ClusterParams, build_clusterer};
use etree_topology::delay::DelayMatrix;
use etree_topology::graph::Graph;
use etree_topology::routing::{LinkParams, RoutingDelayModel};
use etree_topology::tree::TreeTopologyBuilder;
use rand::SeedableRng;
use rand::rngs::StdRng;

type Sim = Engine<EtreeMessage<LogisticRegression>>;
type EtreeRef = Rc<RefCell<EtreeProtocol<LogisticRegression>>>;

/// Three triangles joined in a line through nodes 1, 4 and 7.
fn nine_nodes() -> Graph {
    let mut edges = Vec::new();
    for base in [0, 3, 6] {
        edges.push((base, base + 1, 1));
        edges.push((base + 1, base + 2, 1));
        edges.push((base, base + 2, 3));
    }
    edges.push((1, 4, 50));
    edges.push((4, 7, 50));
    Graph::from_edges(9, &edges).unwrap()
}

fn chain_of_four() -> Graph {
    Graph::from_edges(4, &[(0, 1, 10), (1, 2, 10), (2, 3, 10)]).unwrap()
}

fn one_sample_per_class() -> Dataset {
    [
        Instance {
            features: vec![1.0],
            label: 0,
        },
        Instance {
            features: vec![-1.0],
            label: 1,
        },
    ]
    .into_iter()
    .collect()
}

fn zero_model() -> LogisticRegression {
    LogisticRegression::from_params(&ModelParams {
        num_features: 1,
        ..ModelParams::default()
    })
    .unwrap()
}

fn build_etree(
    engine: &mut Sim,
    graph: &Graph,
    params: EtreeParams,
    local: Vec<Dataset>,
    eval: Dataset,
) -> EtreeRef {
    let delays = DelayMatrix::build(graph);
    let cluster_params = ClusterParams {
        restarts: 50,
        ..ClusterParams::default()
    };
    let clusterer = build_clusterer(ClusterMode::Delay, cluster_params, &[]).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let nodes: Vec<NodeId> = (0..graph.num_nodes()).collect();
    let tree = TreeTopologyBuilder::new(engine.top(), clusterer.as_ref(), &delays)
        .build(&nodes, &params.groups, &mut rng)
        .unwrap();
    let routing = RoutingDelayModel::build(graph, &delays, &tree, LinkParams::default());
    let context = Rc::new(TopologyContext {
        tree,
        delays,
        routing,
        eval,
    });
    let protocol = Rc::new(RefCell::new(
        EtreeProtocol::new(engine.top(), context, params, local, &zero_model(), rng).unwrap(),
    ));
    let pid = engine.register(protocol.clone());
    protocol.borrow().start(engine, pid);
    protocol
}

#[test]
fn untrained_workers_evaluate_to_ln2() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![3, 1], vec![1], 1.0)
        .unwrap()
        .with_epochs(3);
    let local = vec![Dataset::empty(1, 2); 9];
    let etree = build_etree(&mut engine, &nine_nodes(), params, local, one_sample_per_class());
    run_simulation!(engine);

    let etree = etree.borrow();
    assert_eq!(etree.epochs_completed(), 3);
    let reports = etree.reports();
    assert_eq!(reports.len(), 3);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.epoch, i as u64 + 1);
        assert_relative_eq!(report.loss, std::f64::consts::LN_2);
        assert_relative_eq!(report.accuracy, 0.5);
    }
    for node in 0..9 {
        assert_eq!(etree.worker_model(node), Some(&zero_model()));
    }
}

#[test]
fn time_advance_is_the_broadcast_critical_path() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![2, 1], vec![1], 1.0)
        .unwrap()
        .with_epochs(1);
    let local = vec![Dataset::empty(1, 2); 4];
    let etree = build_etree(&mut engine, &chain_of_four(), params, local, Dataset::empty(1, 2));
    run_simulation!(engine);

    // Root 0 reaches aggregator 2 in 20ms and 2 reaches worker 3 in 10ms
    assert_eq!(etree.borrow().time_advances(), &[30]);
}

#[test]
fn every_epoch_starts_after_the_previous_advance() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![2, 1], vec![1], 1.0)
        .unwrap()
        .with_epochs(3)
        .with_start_delay(5);
    let local = vec![Dataset::empty(1, 2); 4];
    let etree = build_etree(&mut engine, &chain_of_four(), params, local, Dataset::empty(1, 2));
    run_simulation!(engine);

    let etree = etree.borrow();
    assert_eq!(etree.time_advances(), &[30, 30, 30]);
    let times: Vec<u64> = etree.reports().iter().map(|r| r.time).collect();
    assert_eq!(times.len(), 3);
    assert!(times[0] >= 5);
    assert!(times[1] >= times[0] + 30);
    assert!(times[2] >= times[1] + 30);
}

#[test]
fn small_recv_percent_still_progresses() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![3, 1], vec![1], 0.1)
        .unwrap()
        .with_epochs(3);
    let local = vec![Dataset::empty(1, 2); 9];
    let etree = build_etree(&mut engine, &nine_nodes(), params, local, one_sample_per_class());
    run_simulation!(engine);

    let etree = etree.borrow();
    assert_eq!(etree.epochs_completed(), 3);
    assert_eq!(etree.reports().len(), 3);
    for aggregator in [1, 4, 7] {
        assert_eq!(etree.selected_children(aggregator, 1).len(), 1);
    }
    assert_eq!(etree.selected_children(4, 2).len(), 1);
}

#[test]
fn root_merges_at_the_ratio() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![3, 1], vec![2], 1.0)
        .unwrap()
        .with_epochs(4);
    let local = vec![Dataset::empty(1, 2); 9];
    let etree = build_etree(&mut engine, &nine_nodes(), params, local, one_sample_per_class());
    run_simulation!(engine);

    let etree = etree.borrow();
    assert_eq!(etree.epochs_completed(), 4);
    let epochs: Vec<u64> = etree.reports().iter().map(|r| r.epoch).collect();
    assert_eq!(epochs, vec![2, 4]);
    assert_eq!(etree.completions(4, 1), 4);
    assert_eq!(etree.completions(4, 2), 2);
}

#[test]
fn training_improves_the_root_model() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![3, 1], vec![1], 1.0)
        .unwrap()
        .with_epochs(5);
    let local: Vec<Dataset> = (0..9)
        .map(|node| {
            (0..10)
                .map(|i| {
                    let label = (node + i) % 2;
                    Instance {
                        features: vec![if label == 0 { 1.0 } else { -1.0 }],
                        label,
                    }
                })
                .collect()
        })
        .collect();
    let etree = build_etree(&mut engine, &nine_nodes(), params, local, one_sample_per_class());
    run_simulation!(engine);

    let etree = etree.borrow();
    let reports = etree.reports();
    assert_eq!(reports.len(), 5);
    assert!(reports[4].loss < reports[0].loss);
    assert!(reports[0].loss < std::f64::consts::LN_2);
    assert_relative_eq!(reports[4].accuracy, 1.0);
}

#[test]
fn uploads_follow_the_promotion_cadence() {
    let mut engine = start_test(file!());
    let params = EtreeParams::new(2, vec![3, 1], vec![2], 1.0)
        .unwrap()
        .with_epochs(4);
    let local = vec![Dataset::empty(1, 2); 9];
    let etree = build_etree(&mut engine, &nine_nodes(), params, local, one_sample_per_class());
    run_simulation!(engine);

    let etree = etree.borrow();
    let messages = etree.messages();
    // Plain workers upload every epoch, aggregators 1 and 7 on every second
    // merge and aggregators hand their own models over locally
    assert_eq!(messages.sent(), &[4, 2, 4, 4, 0, 4, 4, 2, 4]);
    assert_eq!(messages.received(), &[0, 8, 0, 0, 12, 0, 0, 8, 0]);
    assert_eq!(messages.total(), 28);
}
