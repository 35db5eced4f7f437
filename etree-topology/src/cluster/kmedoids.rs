// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Restarted k-medoid clustering over a delay matrix.

use etree_engine::types::{ConfigError, NodeId};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::cluster::assignment::Assignment;
use crate::cluster::{
    Cluster, ClusterParams, Clusterer, medoid_of, partition_score, percentile_rank,
    single_cluster, validate,
};
use crate::delay::DelayMatrix;

pub struct KMedoids<A: Assignment> {
    params: ClusterParams,
    assignment: A,
}

impl<A: Assignment> KMedoids<A> {
    #[must_use]
    pub fn new(params: ClusterParams, assignment: A) -> Self {
        Self { params, assignment }
    }

    /// Alternate assignment and medoid update from the given medoids until
    /// they settle or the iteration cap is reached.
    fn converge(&self, node_ids: &[NodeId], mut medoids: Vec<NodeId>, delays: &DelayMatrix) -> Vec<Cluster> {
        for _ in 0..self.params.max_iterations {
            let members = self.group(node_ids, &medoids, delays);
            let updated: Vec<NodeId> = members
                .iter()
                .zip(&medoids)
                .map(|(members, &medoid)| medoid_of(members, delays).unwrap_or(medoid))
                .collect();
            if updated == medoids {
                break;
            }
            medoids = updated;
        }

        self.group(node_ids, &medoids, delays)
            .into_iter()
            .zip(medoids)
            .map(|(members, medoid)| Cluster { members, medoid })
            .collect()
    }

    /// Members of each medoid's cluster in input order.
    fn group(&self, node_ids: &[NodeId], medoids: &[NodeId], delays: &DelayMatrix) -> Vec<Vec<NodeId>> {
        let labels = self.assignment.assign(node_ids, medoids, delays);
        let mut members = vec![Vec::new(); medoids.len()];
        for (&node, label) in node_ids.iter().zip(labels) {
            members[label].push(node);
        }
        members
    }
}

impl<A: Assignment> Clusterer for KMedoids<A> {
    fn cluster(
        &self,
        node_ids: &[NodeId],
        k: usize,
        delays: &DelayMatrix,
        rng: &mut StdRng,
    ) -> Result<Vec<Cluster>, ConfigError> {
        validate(node_ids, k, delays)?;
        if k == 1 {
            return Ok(single_cluster(node_ids, delays));
        }

        let rank = percentile_rank(node_ids.len(), self.params.recv_percent);
        let mut best: Option<(u64, Vec<Cluster>)> = None;
        for restart in 0..self.params.restarts.max(1) {
            let initial: Vec<NodeId> = node_ids.choose_multiple(rng, k).copied().collect();
            let clusters = self.converge(node_ids, initial, delays);
            let score = partition_score(&clusters, delays, rank);
            if best.as_ref().is_none_or(|(best_score, _)| score < *best_score) {
                debug!("restart {restart}: score {score}");
                best = Some((score, clusters));
            }
        }
        Ok(best.map(|(_, clusters)| clusters).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::cluster::assignment::NearestMedoid;
    use crate::graph::Graph;

    fn two_groups() -> DelayMatrix {
        // Two triangles joined by a slow link
        let graph = Graph::from_edges(
            6,
            &[
                (0, 1, 1),
                (1, 2, 1),
                (0, 2, 1),
                (3, 4, 1),
                (4, 5, 1),
                (3, 5, 1),
                (2, 3, 100),
            ],
        )
        .unwrap();
        DelayMatrix::build(&graph)
    }

    fn params(restarts: usize) -> ClusterParams {
        ClusterParams {
            restarts,
            ..ClusterParams::default()
        }
    }

    #[test]
    fn finds_the_natural_split() {
        let delays = two_groups();
        let clusterer = KMedoids::new(params(50), NearestMedoid);
        let mut rng = StdRng::seed_from_u64(1);
        let mut clusters = clusterer
            .cluster(&[0, 1, 2, 3, 4, 5], 2, &delays, &mut rng)
            .unwrap();
        clusters.sort_by_key(|c| c.members[0]);
        assert_eq!(clusters[0].members, vec![0, 1, 2]);
        assert_eq!(clusters[1].members, vec![3, 4, 5]);
        assert!(clusters[0].members.contains(&clusters[0].medoid));
        assert!(clusters[1].members.contains(&clusters[1].medoid));
    }

    #[test]
    fn one_cluster_per_node() {
        let delays = two_groups();
        let clusterer = KMedoids::new(params(3), NearestMedoid);
        let mut rng = StdRng::seed_from_u64(2);
        let clusters = clusterer.cluster(&[5, 0, 3], 3, &delays, &mut rng).unwrap();
        assert_eq!(clusters.len(), 3);
        for cluster in clusters {
            assert_eq!(cluster.members, vec![cluster.medoid]);
        }
    }

    #[test]
    fn single_cluster_scan() {
        let delays = two_groups();
        let clusterer = KMedoids::new(params(0), NearestMedoid);
        let mut rng = StdRng::seed_from_u64(3);
        let clusters = clusterer.cluster(&[0, 1, 2, 3], 1, &delays, &mut rng).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1, 2, 3]);
        // Node 2 is 1 from 0 and 1 and 100 from 3
        assert_eq!(clusters[0].medoid, 2);
    }

    #[test]
    fn too_many_clusters() {
        let delays = two_groups();
        let clusterer = KMedoids::new(params(10), NearestMedoid);
        let mut rng = StdRng::seed_from_u64(4);
        let err = clusterer.cluster(&[0, 1], 3, &delays, &mut rng).unwrap_err();
        assert_eq!(err.0, "Cannot form 3 clusters from 2 nodes");
    }
}
