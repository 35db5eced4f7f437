// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Learning on top of the aggregation tree.
//!
//! Nodes hold private [datasets](crate::dataset) and train a
//! [model](crate::model) on them. The [protocol](crate::protocol) moves
//! models up the tree built by `etree_topology`, averages them at each
//! aggregator and sends the result back down to the workers.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use etree_engine::engine::Engine;
//! use etree_engine::run_simulation;
//! use etree_learning::dataset::Dataset;
//! use etree_learning::model::{LogisticRegression, Model, ModelParams};
//! use etree_learning::protocol::{EtreeParams, EtreeProtocol, TopologyContext};
//! use etree_topology::cluster::{ClusterMode, ClusterParams, build_clusterer};
//! use etree_topology::delay::DelayMatrix;
//! use etree_topology::graph::Graph;
//! use etree_topology::routing::{LinkParams, RoutingDelayModel};
//! use etree_topology::tree::TreeTopologyBuilder;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let graph = Graph::from_edges(3, &[(0, 1, 10), (1, 2, 10)]).unwrap();
//! let delays = DelayMatrix::build(&graph);
//! let clusterer = build_clusterer(ClusterMode::Delay, ClusterParams::default(), &[]).unwrap();
//!
//! let mut engine = Engine::default();
//! let mut rng = StdRng::seed_from_u64(1);
//! let tree = TreeTopologyBuilder::new(engine.top(), clusterer.as_ref(), &delays)
//!     .build(&[0, 1, 2], &[1], &mut rng)
//!     .unwrap();
//! let routing = RoutingDelayModel::build(&graph, &delays, &tree, LinkParams::default());
//! let context = Rc::new(TopologyContext {
//!     tree,
//!     delays,
//!     routing,
//!     eval: Dataset::empty(1, 2),
//! });
//!
//! let params = EtreeParams::new(1, vec![1], vec![], 1.0).unwrap().with_epochs(2);
//! let initial = LogisticRegression::from_params(&ModelParams {
//!     num_features: 1,
//!     ..ModelParams::default()
//! })
//! .unwrap();
//! let local = vec![Dataset::empty(1, 2); 3];
//! let protocol = Rc::new(RefCell::new(
//!     EtreeProtocol::new(engine.top(), context, params, local, &initial, rng).unwrap(),
//! ));
//! let pid = engine.register(protocol.clone());
//! protocol.borrow().start(&mut engine, pid);
//! run_simulation!(engine);
//!
//! assert_eq!(protocol.borrow().epochs_completed(), 2);
//! assert_eq!(protocol.borrow().reports().len(), 2);
//! ```

pub mod dataset;
pub mod model;
pub mod profile;
pub mod protocol;
