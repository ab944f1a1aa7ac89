//! `fleetd dataplane sync`: register data-plane clusters from a TOML file.
//!
//! ```toml
//! [[clusters]]
//! cluster_id = "c1"
//! cloud_provider = "aws"
//! region = "us-east-1"
//! cluster_dns = "apps.c1.example.com"
//! supported_instance_types = ["standard", "eval"]
//!
//! [clusters.capacity]
//! standard = 10
//! eval = 50
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use fleet_state::{ClusterStatus, DataPlaneCluster, InstanceType, StateStore};

#[derive(Debug, Deserialize)]
pub struct DataplaneFile {
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

/// One cluster as written by an operator. Capacity keys are instance type
/// names so the table reads naturally in TOML.
#[derive(Debug, Deserialize)]
pub struct ClusterEntry {
    pub cluster_id: String,
    pub cloud_provider: String,
    pub region: String,
    #[serde(default)]
    pub multi_az: bool,
    #[serde(default = "default_status")]
    pub status: ClusterStatus,
    #[serde(default = "default_schedulable")]
    pub schedulable: bool,
    #[serde(default)]
    pub supported_instance_types: Vec<InstanceType>,
    #[serde(default)]
    pub capacity: BTreeMap<String, u32>,
    #[serde(default)]
    pub cluster_dns: String,
}

fn default_status() -> ClusterStatus {
    ClusterStatus::Ready
}

fn default_schedulable() -> bool {
    true
}

pub fn load_file(path: &Path) -> anyhow::Result<Vec<ClusterEntry>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&content)
}

pub fn parse(content: &str) -> anyhow::Result<Vec<ClusterEntry>> {
    let file: DataplaneFile = toml::from_str(content)?;
    Ok(file.clusters)
}

impl ClusterEntry {
    /// Merge into the stored record, keeping what agents reported
    /// (operator versions) for clusters that already exist.
    fn to_cluster(&self, existing: Option<DataPlaneCluster>, now: DateTime<Utc>) -> anyhow::Result<DataPlaneCluster> {
        let mut capacity = BTreeMap::new();
        for (name, limit) in &self.capacity {
            let ty: InstanceType = name
                .parse()
                .with_context(|| format!("cluster {}: capacity key {name:?}", self.cluster_id))?;
            capacity.insert(ty, *limit);
        }
        Ok(DataPlaneCluster {
            cluster_id: self.cluster_id.clone(),
            cloud_provider: self.cloud_provider.clone(),
            region: self.region.clone(),
            multi_az: self.multi_az,
            status: self.status,
            schedulable: self.schedulable,
            supported_instance_types: self.supported_instance_types.clone(),
            capacity,
            cluster_dns: self.cluster_dns.clone(),
            operators: existing.map(|c| c.operators).unwrap_or_default(),
            updated_at: now,
        })
    }
}

/// Upsert every entry. Clusters missing from the file are left alone.
pub fn sync(store: &StateStore, entries: &[ClusterEntry], now: DateTime<Utc>) -> anyhow::Result<usize> {
    for entry in entries {
        let existing = store.get_cluster(&entry.cluster_id)?;
        let created = existing.is_none();
        let cluster = entry.to_cluster(existing, now)?;
        store.put_cluster(&cluster)?;
        if created {
            info!(cluster_id = %cluster.cluster_id, region = %cluster.region, "data-plane cluster registered");
        } else {
            debug!(cluster_id = %cluster.cluster_id, "data-plane cluster updated");
        }
    }
    Ok(entries.len())
}
