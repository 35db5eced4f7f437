// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Rules that assign nodes to a fixed set of medoids.
//!
//! Every rule places each medoid in its own cluster first and then visits the
//! remaining nodes in input order.

use etree_engine::types::NodeId;
use itertools::Itertools;

use crate::cluster::NodeProfile;
use crate::delay::DelayMatrix;

/// Maps every input node to the index of the medoid it joins.
pub trait Assignment {
    fn assign(&self, node_ids: &[NodeId], medoids: &[NodeId], delays: &DelayMatrix) -> Vec<usize>;
}

/// Index of the nearest medoid; the first medoid wins ties.
fn nearest(node: NodeId, medoids: &[NodeId], delays: &DelayMatrix) -> usize {
    medoids
        .iter()
        .position_min_by_key(|&&medoid| delays.get(node, medoid))
        .unwrap_or(0)
}

/// Medoid indices ordered by delay from `node`, nearest first.
fn by_distance(node: NodeId, medoids: &[NodeId], delays: &DelayMatrix) -> Vec<usize> {
    (0..medoids.len())
        .sorted_by_key(|&i| delays.get(node, medoids[i]))
        .collect()
}

/// Label for each input node with the medoids already placed.
///
/// Non-medoid nodes are handed to `choose` in input order along with the
/// labels fixed so far.
fn assign_with<F>(node_ids: &[NodeId], medoids: &[NodeId], mut choose: F) -> Vec<usize>
where
    F: FnMut(NodeId, &[Option<usize>]) -> usize,
{
    let mut labels: Vec<Option<usize>> = node_ids
        .iter()
        .map(|node| medoids.iter().position(|m| m == node))
        .collect();
    for (pos, &node) in node_ids.iter().enumerate() {
        if labels[pos].is_none() {
            let label = choose(node, &labels);
            labels[pos] = Some(label);
        }
    }
    labels.into_iter().map(|label| label.unwrap_or(0)).collect()
}

fn cluster_sizes(labels: &[Option<usize>], k: usize) -> Vec<usize> {
    let mut sizes = vec![0; k];
    for label in labels.iter().flatten() {
        sizes[*label] += 1;
    }
    sizes
}

fn size_cap(num_nodes: usize, k: usize) -> usize {
    num_nodes.div_ceil(k)
}

/// Join the nearest medoid.
pub struct NearestMedoid;

impl Assignment for NearestMedoid {
    fn assign(&self, node_ids: &[NodeId], medoids: &[NodeId], delays: &DelayMatrix) -> Vec<usize> {
        assign_with(node_ids, medoids, |node, _| nearest(node, medoids, delays))
    }
}

/// Join the nearest medoid whose cluster still has room under
/// `ceil(|nodes| / k)`.
pub struct UniformSize;

impl Assignment for UniformSize {
    fn assign(&self, node_ids: &[NodeId], medoids: &[NodeId], delays: &DelayMatrix) -> Vec<usize> {
        let cap = size_cap(node_ids.len(), medoids.len());
        assign_with(node_ids, medoids, |node, labels| {
            let sizes = cluster_sizes(labels, medoids.len());
            by_distance(node, medoids, delays)
                .into_iter()
                .find(|&i| sizes[i] < cap)
                .unwrap_or_else(|| nearest(node, medoids, delays))
        })
    }
}

/// Number of nearest medoids a balancing rule may choose between.
fn num_candidates(k: usize, check_nearest_ratio: f64) -> usize {
    ((k as f64 * check_nearest_ratio).ceil() as usize).clamp(1, k)
}

/// The candidate with the smallest `cost`, if any is within `delta`.
fn best_within_delta<C>(candidates: &[usize], delta: f64, cost: C) -> Option<usize>
where
    C: Fn(usize) -> f64,
{
    candidates
        .iter()
        .map(|&i| (i, cost(i)))
        .filter(|&(_, c)| c <= delta)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Keep each cluster's mean accuracy close to the global mean.
pub struct AccuracyBalanced {
    accuracy: Vec<f64>,
    delta: f64,
    check_nearest_ratio: f64,
}

impl AccuracyBalanced {
    #[must_use]
    pub fn new(profiles: &[NodeProfile], delta: f64, check_nearest_ratio: f64) -> Self {
        Self {
            accuracy: profiles.iter().map(|p| p.accuracy).collect(),
            delta,
            check_nearest_ratio,
        }
    }

    fn accuracy_of(&self, node: NodeId) -> f64 {
        self.accuracy.get(node).copied().unwrap_or(0.0)
    }
}

impl Assignment for AccuracyBalanced {
    fn assign(&self, node_ids: &[NodeId], medoids: &[NodeId], delays: &DelayMatrix) -> Vec<usize> {
        let k = medoids.len();
        let global_mean = node_ids.iter().map(|&n| self.accuracy_of(n)).sum::<f64>()
            / node_ids.len() as f64;
        let window = num_candidates(k, self.check_nearest_ratio);

        let mut sums: Vec<f64> = medoids.iter().map(|&m| self.accuracy_of(m)).collect();
        let mut counts = vec![1usize; k];
        assign_with(node_ids, medoids, |node, _| {
            let acc = self.accuracy_of(node);
            let ordered = by_distance(node, medoids, delays);
            let label = best_within_delta(&ordered[..window], self.delta, |i| {
                ((sums[i] + acc) / (counts[i] + 1) as f64 - global_mean).abs()
            })
            .unwrap_or_else(|| nearest(node, medoids, delays));
            sums[label] += acc;
            counts[label] += 1;
            label
        })
    }
}

/// Keep each cluster's label distribution close to the global one,
/// optionally under the uniform size cap.
pub struct ClassBalanced {
    distributions: Vec<Vec<f64>>,
    delta: f64,
    check_nearest_ratio: f64,
    uniform_size: bool,
}

impl ClassBalanced {
    #[must_use]
    pub fn new(
        profiles: &[NodeProfile],
        delta: f64,
        check_nearest_ratio: f64,
        uniform_size: bool,
    ) -> Self {
        Self {
            distributions: profiles
                .iter()
                .map(|p| p.label_distribution.clone())
                .collect(),
            delta,
            check_nearest_ratio,
            uniform_size,
        }
    }

    fn num_labels(&self) -> usize {
        self.distributions.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn add_into(&self, totals: &mut [f64], node: NodeId) {
        if let Some(distribution) = self.distributions.get(node) {
            for (total, p) in totals.iter_mut().zip(distribution) {
                *total += p;
            }
        }
    }
}

fn l1_distance(totals: &[f64], count: usize, target: &[f64]) -> f64 {
    totals
        .iter()
        .zip(target)
        .map(|(total, t)| (total / count as f64 - t).abs())
        .sum()
}

impl Assignment for ClassBalanced {
    fn assign(&self, node_ids: &[NodeId], medoids: &[NodeId], delays: &DelayMatrix) -> Vec<usize> {
        let k = medoids.len();
        let num_labels = self.num_labels();
        let mut global = vec![0.0; num_labels];
        for &node in node_ids {
            self.add_into(&mut global, node);
        }
        for g in &mut global {
            *g /= node_ids.len() as f64;
        }

        let window = num_candidates(k, self.check_nearest_ratio);
        let cap = if self.uniform_size {
            size_cap(node_ids.len(), k)
        } else {
            usize::MAX
        };
        let mut totals: Vec<Vec<f64>> = medoids
            .iter()
            .map(|&m| {
                let mut t = vec![0.0; num_labels];
                self.add_into(&mut t, m);
                t
            })
            .collect();
        let mut counts = vec![1usize; k];

        assign_with(node_ids, medoids, |node, _| {
            let ordered = by_distance(node, medoids, delays);
            let with_room: Vec<usize> = ordered
                .iter()
                .copied()
                .filter(|&i| counts[i] < cap)
                .collect();
            let candidates = &with_room[..window.min(with_room.len())];
            let label = best_within_delta(candidates, self.delta, |i| {
                let mut joined = totals[i].clone();
                self.add_into(&mut joined, node);
                l1_distance(&joined, counts[i] + 1, &global)
            })
            .or_else(|| with_room.first().copied())
            .unwrap_or(ordered[0]);
            self.add_into(&mut totals[label], node);
            counts[label] += 1;
            label
        })
    }
}
