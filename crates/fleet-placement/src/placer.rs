//! Placement strategy: chooses the data-plane cluster for a central.
//!
//! The strategy reads clusters and live usage from the store on every call,
//! so capacity accounting self-heals as centrals come and go.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use fleet_state::{Central, ClusterStatus, DataPlaneCluster, InstanceType, StateStore};

use crate::convert::{central_to_request, cluster_to_candidate};
use crate::error::PlacementResult;
use crate::scorer::rank_clusters;

/// Selects a cluster for an unplaced central. `Ok(None)` means no cluster
/// can take it right now, which is not an error.
pub trait PlacementStrategy: Send + Sync {
    fn find_cluster(&self, central: &Central) -> PlacementResult<Option<DataPlaneCluster>>;
}

/// Store-backed strategy: least-utilized eligible cluster wins.
#[derive(Clone)]
pub struct CapacityStrategy {
    store: StateStore,
}

impl CapacityStrategy {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl PlacementStrategy for CapacityStrategy {
    fn find_cluster(&self, central: &Central) -> PlacementResult<Option<DataPlaneCluster>> {
        let clusters = self.store.list_clusters()?;
        let usage = self.store.usage_by_cluster()?;
        let req = central_to_request(central);

        let candidates: Vec<_> = clusters
            .iter()
            .map(|c| cluster_to_candidate(c, usage.get(&c.cluster_id), req.instance_type))
            .collect();
        let ranked = rank_clusters(&candidates, &req);

        let Some(best) = ranked.first() else {
            debug!(central = %central.id, region = %req.region, "no cluster available");
            return Ok(None);
        };
        debug!(
            central = %central.id,
            cluster = %best.cluster_id,
            used = best.used,
            limit = best.limit,
            "cluster selected"
        );
        Ok(clusters.into_iter().find(|c| c.cluster_id == best.cluster_id))
    }
}

/// A region offered to tenants for one cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegionCapacity {
    pub region: String,
    pub supported_instance_types: Vec<InstanceType>,
    /// True when no ready cluster in the region has room for any of them.
    pub capacity_reached: bool,
}

/// Regions offered by ready clusters of `cloud_provider`, sorted by name.
/// With `instance_type` set, only regions with a cluster advertising it.
pub fn offered_regions(
    clusters: &[DataPlaneCluster],
    usage: &HashMap<String, BTreeMap<InstanceType, u32>>,
    cloud_provider: &str,
    instance_type: Option<InstanceType>,
) -> Vec<RegionCapacity> {
    let mut regions: BTreeMap<String, RegionCapacity> = BTreeMap::new();

    for cluster in clusters {
        if cluster.status != ClusterStatus::Ready || cluster.cloud_provider != cloud_provider {
            continue;
        }
        if let Some(ty) = instance_type
            && !cluster.supports(ty)
        {
            continue;
        }

        let entry = regions
            .entry(cluster.region.clone())
            .or_insert_with(|| RegionCapacity {
                region: cluster.region.clone(),
                supported_instance_types: Vec::new(),
                capacity_reached: true,
            });
        for ty in &cluster.supported_instance_types {
            if !entry.supported_instance_types.contains(ty) {
                entry.supported_instance_types.push(*ty);
            }
        }
        entry.supported_instance_types.sort();

        let types: Vec<InstanceType> = match instance_type {
            Some(ty) => vec![ty],
            None => cluster.supported_instance_types.clone(),
        };
        let has_room = cluster.schedulable
            && types.into_iter().any(|ty| {
                cluster_to_candidate(cluster, usage.get(&cluster.cluster_id), ty).free() > 0
            });
        if has_room {
            entry.capacity_reached = false;
        }
    }

    regions.into_values().collect()
}

/// True when no ready, schedulable cluster has room for any instance type.
pub fn max_capacity_reached(
    clusters: &[DataPlaneCluster],
    usage: &HashMap<String, BTreeMap<InstanceType, u32>>,
) -> bool {
    !clusters.iter().any(|cluster| {
        cluster.status == ClusterStatus::Ready
            && cluster.schedulable
            && cluster.supported_instance_types.iter().any(|ty| {
                cluster_to_candidate(cluster, usage.get(&cluster.cluster_id), *ty).free() > 0
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_state::CentralStatus;

    fn make_cluster(id: &str, region: &str, limit: u32) -> DataPlaneCluster {
        DataPlaneCluster {
            cluster_id: id.to_string(),
            cloud_provider: "aws".to_string(),
            region: region.to_string(),
            multi_az: true,
            status: ClusterStatus::Ready,
            schedulable: true,
            supported_instance_types: vec![InstanceType::Standard],
            capacity: BTreeMap::from([(InstanceType::Standard, limit)]),
            cluster_dns: String::new(),
            operators: vec![],
            updated_at: Utc::now(),
        }
    }

    fn bind(store: &StateStore, id: &str, cluster: &str) {
        let central = Central::new_request(id, id, "alice", "org", Utc::now());
        store.insert_central(&central).unwrap();
        store
            .transition(id, CentralStatus::Accepted, CentralStatus::Preparing, Utc::now(), |c| {
                c.cluster_id = cluster.to_string();
            })
            .unwrap();
    }

    #[test]
    fn strategy_picks_least_used_cluster() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&make_cluster("c1", "us-east-1", 10)).unwrap();
        store.put_cluster(&make_cluster("c2", "us-east-1", 10)).unwrap();
        bind(&store, "a", "c1");

        let strategy = CapacityStrategy::new(store);
        let central = Central::new_request("new", "new", "bob", "org", Utc::now());
        let chosen = strategy.find_cluster(&central).unwrap().unwrap();
        assert_eq!(chosen.cluster_id, "c2");
    }

    #[test]
    fn strategy_returns_none_when_full() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&make_cluster("c1", "us-east-1", 1)).unwrap();
        bind(&store, "a", "c1");

        let strategy = CapacityStrategy::new(store);
        let central = Central::new_request("new", "new", "bob", "org", Utc::now());
        assert!(strategy.find_cluster(&central).unwrap().is_none());
    }

    #[test]
    fn offered_regions_reports_capacity() {
        let clusters = vec![
            make_cluster("c1", "us-east-1", 1),
            make_cluster("c2", "eu-west-1", 5),
        ];
        let usage = HashMap::from([(
            "c1".to_string(),
            BTreeMap::from([(InstanceType::Standard, 1)]),
        )]);

        let regions = offered_regions(&clusters, &usage, "aws", Some(InstanceType::Standard));
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].region, "eu-west-1");
        assert!(!regions[0].capacity_reached);
        assert_eq!(regions[1].region, "us-east-1");
        assert!(regions[1].capacity_reached);

        assert!(offered_regions(&clusters, &usage, "gcp", None).is_empty());
        assert!(offered_regions(&clusters, &usage, "aws", Some(InstanceType::Eval)).is_empty());
    }

    #[test]
    fn max_capacity_reached_when_every_cluster_full() {
        let clusters = vec![make_cluster("c1", "us-east-1", 1)];
        let mut usage = HashMap::new();
        assert!(!max_capacity_reached(&clusters, &usage));

        usage.insert("c1".to_string(), BTreeMap::from([(InstanceType::Standard, 1)]));
        assert!(max_capacity_reached(&clusters, &usage));
        assert!(max_capacity_reached(&[], &usage));
    }
}
