//! Operator and central version selection on a chosen cluster.

use fleet_state::DataPlaneCluster;

/// Versions a newly placed central is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredVersions {
    pub operator_version: String,
    pub central_version: String,
}

/// Pick the highest ready operator on `cluster`, and the highest ready
/// central version that operator ships. Versions compare lexicographically.
pub fn desired_versions(cluster: &DataPlaneCluster) -> Option<DesiredVersions> {
    let operator = cluster
        .operators
        .iter()
        .filter(|o| o.ready)
        .max_by(|a, b| a.version.cmp(&b.version))?;

    let central = operator
        .central_versions
        .iter()
        .filter(|c| c.ready)
        .max_by(|a, b| a.version.cmp(&b.version))?;

    Some(DesiredVersions {
        operator_version: operator.version.clone(),
        central_version: central.version.clone(),
    })
}
