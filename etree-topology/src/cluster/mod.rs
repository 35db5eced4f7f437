// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Delay-aware clustering of nodes.
//!
//! Every strategy shares the same k-medoid skeleton (see [`kmedoids`]): many
//! random restarts, alternating assignment and medoid update, and a score
//! based on the slowest intra-cluster delays. The strategies only differ in
//! how nodes are assigned to medoids (see [`assignment`]).

pub mod assignment;
pub mod kmedoids;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use etree_engine::config_error;
use etree_engine::types::{ConfigError, NodeId};
use rand::rngs::StdRng;

use crate::cluster::assignment::{
    AccuracyBalanced, ClassBalanced, NearestMedoid, UniformSize,
};
use crate::cluster::kmedoids::KMedoids;
use crate::delay::DelayMatrix;

/// Members of one cluster and the member elected to aggregate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Members in the order of the clustered input, medoid included.
    pub members: Vec<NodeId>,
    pub medoid: NodeId,
}

/// Selects the assignment rule used by the clusterer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClusterMode {
    /// Nearest medoid by delay.
    #[default]
    Delay,
    /// Keep each cluster's mean estimated accuracy close to the global mean.
    Accuracy,
    /// Keep clusters the same size.
    UniformSize,
    /// Keep each cluster's label distribution close to the global one.
    ClassDistribution,
    /// Class distribution balancing under the uniform size cap.
    ClassDistributionUniformSize,
}

impl ClusterMode {
    /// Whether the mode needs a [`NodeProfile`] for every node.
    #[must_use]
    pub fn needs_profiles(self) -> bool {
        matches!(
            self,
            ClusterMode::Accuracy
                | ClusterMode::ClassDistribution
                | ClusterMode::ClassDistributionUniformSize
        )
    }
}

impl TryFrom<u8> for ClusterMode {
    type Error = ConfigError;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            0 => Ok(ClusterMode::Delay),
            1 => Ok(ClusterMode::Accuracy),
            2 => Ok(ClusterMode::UniformSize),
            3 => Ok(ClusterMode::ClassDistribution),
            4 => Ok(ClusterMode::ClassDistributionUniformSize),
            _ => config_error!(format!("Unknown clustering mode {mode} (expected 0-4)")),
        }
    }
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterMode::Delay => write!(f, "delay"),
            ClusterMode::Accuracy => write!(f, "accuracy"),
            ClusterMode::UniformSize => write!(f, "uniform-size"),
            ClusterMode::ClassDistribution => write!(f, "class-distribution"),
            ClusterMode::ClassDistributionUniformSize => {
                write!(f, "class-distribution-uniform-size")
            }
        }
    }
}

/// Tuning knobs shared by all strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// Number of random restarts.
    pub restarts: usize,

    /// Cap on assignment/update iterations per restart.
    pub max_iterations: usize,

    /// Fraction of a cluster expected to respond; sets the scoring percentile.
    pub recv_percent: f64,

    /// Tolerance around the global mean for the balancing strategies.
    pub delta: f64,

    /// Fraction of the medoids, nearest first, a balancing strategy may pick
    /// from.
    pub check_nearest_ratio: f64,
}

pub const DEFAULT_RESTARTS: usize = 1000;
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_DELTA: f64 = 0.05;
pub const DEFAULT_CHECK_NEAREST_RATIO: f64 = 0.5;

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            restarts: DEFAULT_RESTARTS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            recv_percent: 1.0,
            delta: DEFAULT_DELTA,
            check_nearest_ratio: DEFAULT_CHECK_NEAREST_RATIO,
        }
    }
}

/// Per-node scalars used by the balancing strategies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeProfile {
    /// Accuracy of a locally pre-trained model.
    pub accuracy: f64,

    /// Fraction of local samples with each label.
    pub label_distribution: Vec<f64>,
}

pub trait Clusterer {
    /// Partition `node_ids` into exactly `k` non-empty clusters.
    ///
    /// Asking for more clusters than nodes is rejected before any work is
    /// done.
    fn cluster(
        &self,
        node_ids: &[NodeId],
        k: usize,
        delays: &DelayMatrix,
        rng: &mut StdRng,
    ) -> Result<Vec<Cluster>, ConfigError>;
}

/// Build the clusterer for `mode`.
///
/// `profiles` is indexed by node id and only consulted by the balancing
/// modes.
pub fn build_clusterer(
    mode: ClusterMode,
    params: ClusterParams,
    profiles: &[NodeProfile],
) -> Result<Box<dyn Clusterer>, ConfigError> {
    if mode.needs_profiles() && profiles.is_empty() {
        return config_error!(format!("Clustering mode {mode} needs node profiles"));
    }
    let delta = params.delta;
    let ratio = params.check_nearest_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return config_error!(format!(
            "check nearest ratio {ratio} must be in (0, 1]"
        ));
    }
    let clusterer: Box<dyn Clusterer> = match mode {
        ClusterMode::Delay => Box::new(KMedoids::new(params, NearestMedoid)),
        ClusterMode::Accuracy => Box::new(KMedoids::new(
            params,
            AccuracyBalanced::new(profiles, delta, ratio),
        )),
        ClusterMode::UniformSize => Box::new(KMedoids::new(params, UniformSize)),
        ClusterMode::ClassDistribution => Box::new(KMedoids::new(
            params,
            ClassBalanced::new(profiles, delta, ratio, false),
        )),
        ClusterMode::ClassDistributionUniformSize => Box::new(KMedoids::new(
            params,
            ClassBalanced::new(profiles, delta, ratio, true),
        )),
    };
    Ok(clusterer)
}

pub(crate) fn validate(node_ids: &[NodeId], k: usize, delays: &DelayMatrix) -> Result<(), ConfigError> {
    if k == 0 {
        return config_error!("Cannot form 0 clusters");
    }
    if k > node_ids.len() {
        return config_error!(format!(
            "Cannot form {k} clusters from {} nodes",
            node_ids.len()
        ));
    }
    if let Some(&bad) = node_ids.iter().find(|&&n| n >= delays.num_nodes()) {
        return config_error!(format!(
            "Node {bad} is outside a delay matrix of {} nodes",
            delays.num_nodes()
        ));
    }
    Ok(())
}

/// The member with the smallest total delay to the rest; the first such
/// member wins ties.
pub(crate) fn medoid_of(members: &[NodeId], delays: &DelayMatrix) -> Option<NodeId> {
    let mut best: Option<(u64, NodeId)> = None;
    for &candidate in members {
        let total = delays.total_delay(candidate, members);
        if best.is_none_or(|(best_total, _)| total < best_total) {
            best = Some((total, candidate));
        }
    }
    best.map(|(_, medoid)| medoid)
}

/// The whole set as one cluster, found by a direct scan.
pub(crate) fn single_cluster(node_ids: &[NodeId], delays: &DelayMatrix) -> Vec<Cluster> {
    match medoid_of(node_ids, delays) {
        Some(medoid) => vec![Cluster {
            members: node_ids.to_vec(),
            medoid,
        }],
        None => Vec::new(),
    }
}

/// How many of the slowest delays are tolerated when `recv_percent` of the
/// nodes are expected to respond.
#[must_use]
pub fn percentile_rank(num_nodes: usize, recv_percent: f64) -> usize {
    (num_nodes as f64 * (1.0 - recv_percent)).round() as usize + 1
}

/// The `n`-th largest delay between ordered pairs of distinct members (the
/// smallest of them if there are fewer pairs, 0 for a single member).
#[must_use]
pub fn cluster_percentile_delay(members: &[NodeId], delays: &DelayMatrix, n: usize) -> u64 {
    let mut largest = BinaryHeap::with_capacity(n + 1);
    for &a in members {
        for &b in members {
            if a == b {
                continue;
            }
            largest.push(Reverse(delays.get(a, b)));
            if largest.len() > n {
                largest.pop();
            }
        }
    }
    largest.peek().map_or(0, |Reverse(delay)| *delay)
}

/// Score of a partition: the worst cluster's percentile delay. Lower is
/// better.
#[must_use]
pub fn partition_score(clusters: &[Cluster], delays: &DelayMatrix, n: usize) -> u64 {
    clusters
        .iter()
        .map(|cluster| cluster_percentile_delay(&cluster.members, delays, n))
        .max()
        .unwrap_or(0)
}
