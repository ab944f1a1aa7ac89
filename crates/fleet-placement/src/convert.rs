//! Type conversions between state store types and placement types.
//!
//! Bridges `fleet_state::{DataPlaneCluster, Central}` to the placement
//! engine's `ClusterCandidate` and `PlacementRequest`.

use std::collections::BTreeMap;

use fleet_state::{Central, ClusterStatus, DataPlaneCluster, InstanceType};

use crate::scorer::{ClusterCandidate, PlacementRequest};

/// Convert a [`DataPlaneCluster`] to a [`ClusterCandidate`] for one instance type.
///
/// `usage` is the per-type count of non-deleted centrals bound to the
/// cluster, as returned by `StateStore::usage_by_cluster`.
pub fn cluster_to_candidate(
    cluster: &DataPlaneCluster,
    usage: Option<&BTreeMap<InstanceType, u32>>,
    instance_type: InstanceType,
) -> ClusterCandidate {
    let used = usage
        .and_then(|u| u.get(&instance_type))
        .copied()
        .unwrap_or(0);
    ClusterCandidate {
        cluster_id: cluster.cluster_id.clone(),
        cloud_provider: cluster.cloud_provider.clone(),
        region: cluster.region.clone(),
        multi_az: cluster.multi_az,
        ready: cluster.status == ClusterStatus::Ready,
        schedulable: cluster.schedulable,
        supports_instance_type: cluster.supports(instance_type),
        limit: cluster.limit_for(instance_type),
        used,
    }
}

/// Convert a [`Central`] to the [`PlacementRequest`] it represents.
pub fn central_to_request(central: &Central) -> PlacementRequest {
    PlacementRequest {
        cloud_provider: central.cloud_provider.clone(),
        region: central.region.clone(),
        instance_type: central.instance_type,
        multi_az: central.multi_az,
    }
}
