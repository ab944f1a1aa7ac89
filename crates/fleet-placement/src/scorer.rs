//! Cluster scoring for placement decisions.
//!
//! A cluster is a candidate only if it is ready, schedulable, matches the
//! requested provider and region (and multi-AZ when asked for), advertises
//! the instance type, and has `used < limit` for it. Candidates are ranked
//! least-utilized first, ties broken by cluster id.

use std::cmp::Ordering;

use fleet_state::InstanceType;

/// Placement-relevant view of one data-plane cluster for one instance type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClusterCandidate {
    pub cluster_id: String,
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    pub ready: bool,
    pub schedulable: bool,
    pub supports_instance_type: bool,
    /// Capacity for the requested instance type.
    pub limit: u32,
    /// Non-deleted centrals of that type already bound to the cluster.
    pub used: u32,
}

impl ClusterCandidate {
    pub fn free(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// What the central asks for.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PlacementRequest {
    pub cloud_provider: String,
    pub region: String,
    pub instance_type: InstanceType,
    pub multi_az: bool,
}

/// Scored result for a single cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterScore {
    pub cluster_id: String,
    pub used: u32,
    pub limit: u32,
    /// `used / limit`, in `0.0..1.0` for any accepted candidate.
    pub utilization: f64,
}

/// Score a single cluster, or `None` when it cannot take the central.
pub fn score_cluster(candidate: &ClusterCandidate, req: &PlacementRequest) -> Option<ClusterScore> {
    if !candidate.ready || !candidate.schedulable {
        return None;
    }
    if candidate.cloud_provider != req.cloud_provider || candidate.region != req.region {
        return None;
    }
    if req.multi_az && !candidate.multi_az {
        return None;
    }
    if !candidate.supports_instance_type || candidate.free() == 0 {
        return None;
    }

    Some(ClusterScore {
        cluster_id: candidate.cluster_id.clone(),
        used: candidate.used,
        limit: candidate.limit,
        utilization: candidate.used as f64 / candidate.limit as f64,
    })
}

/// Score all clusters and return the accepted ones, best first.
pub fn rank_clusters(candidates: &[ClusterCandidate], req: &PlacementRequest) -> Vec<ClusterScore> {
    let mut scores: Vec<ClusterScore> = candidates
        .iter()
        .filter_map(|c| score_cluster(c, req))
        .collect();

    scores.sort_by(|a, b| {
        a.utilization
            .partial_cmp(&b.utilization)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
    scores
}
