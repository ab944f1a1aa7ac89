//! Agent-facing sync surface under `/agent-clusters/{cid}`.
//!
//! Agents pull desired state for their cluster and push back what they
//! observed. The agent report is authoritative for the provisioning → ready
//! and failure edges and for confirming teardown.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleet_reconcile::fail;
use fleet_state::{Central, CentralPatch, CentralStatus, ClusterStatus, OperatorVersion, StateError, StateStore};

use crate::ApiState;
use crate::auth::AgentCluster;
use crate::error::{ApiError, ApiResult};
use crate::presenters::*;

/// What the agent says a central is doing, from its `Ready` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedPhase {
    /// No `Ready` condition: the central is not in the agent's world.
    Absent,
    Installing,
    Ready,
    Deleted,
    Failed(String),
}

pub fn observed_phase(conditions: &[DataPlaneCondition]) -> ObservedPhase {
    let Some(ready) = conditions.iter().find(|c| c.kind == "Ready") else {
        return ObservedPhase::Absent;
    };
    if ready.status.eq_ignore_ascii_case("true") {
        return ObservedPhase::Ready;
    }
    match ready.reason.as_str() {
        "Deleted" => ObservedPhase::Deleted,
        "Error" => {
            let cause = if ready.message.is_empty() {
                "central reported an installation error".to_string()
            } else {
                ready.message.clone()
            };
            ObservedPhase::Failed(cause)
        }
        _ => ObservedPhase::Installing,
    }
}

fn ignore_conflict<T>(result: Result<T, StateError>) -> Result<Option<T>, StateError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_benign_conflict() => {
            debug!(error = %e, "status report raced another writer");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Merge one observed-state report and apply the transition it implies.
/// Returns `None` when the report was skipped.
pub fn apply_status_report(
    store: &StateStore,
    cluster_id: &str,
    central_id: &str,
    report: &CentralStatusReport,
    now: DateTime<Utc>,
) -> ApiResult<Option<Central>> {
    let Some(central) = store.get_central(central_id)? else {
        debug!(%central_id, "status for unknown central skipped");
        return Ok(None);
    };
    if central.cluster_id != cluster_id {
        debug!(%central_id, %cluster_id, owner_cluster = %central.cluster_id, "status from foreign cluster skipped");
        return Ok(None);
    }

    store.merge_central_secrets(central_id, &report.secrets)?;
    let patch = CentralPatch {
        installed_version: report.installed_version.clone(),
        routes: report.routes.clone(),
        secrets_stored: report.secrets_stored.clone(),
        ..Default::default()
    };
    let central = if patch.is_empty() {
        central
    } else {
        store.update_ignore_nils(central_id, &patch, now)?
    };

    let moved = match (central.status, observed_phase(&report.conditions)) {
        (CentralStatus::Provisioning, ObservedPhase::Ready) => ignore_conflict(store.transition(
            central_id,
            CentralStatus::Provisioning,
            CentralStatus::Ready,
            now,
            |_| {},
        ))?,
        (CentralStatus::Provisioning | CentralStatus::Ready, ObservedPhase::Failed(cause)) => {
            ignore_conflict(fail(store, &central, &cause, now))?
        }
        (CentralStatus::Deprovision, ObservedPhase::Deleted | ObservedPhase::Absent) => ignore_conflict(store.transition(
            central_id,
            CentralStatus::Deprovision,
            CentralStatus::Deleting,
            now,
            |_| {},
        ))?,
        _ => None,
    };
    if let Some(moved) = &moved {
        info!(id = %moved.id, status = %moved.status, %cluster_id, "agent report applied");
    }
    Ok(Some(moved.unwrap_or(central)))
}

/// GET /agent-clusters/{cid}
pub async fn get_cluster(
    State(state): State<ApiState>,
    Extension(caller): Extension<AgentCluster>,
    Path(cid): Path<String>,
) -> ApiResult<Json<AgentClusterConfig>> {
    caller.authorize(&cid)?;
    let cluster = state
        .store
        .get_cluster(&cid)?
        .ok_or_else(|| ApiError::not_found(format!("agent cluster {cid}")))?;
    Ok(Json(agent_cluster_config(&cluster)))
}

/// Cluster health report pushed by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStatusReport {
    pub conditions: Vec<DataPlaneCondition>,
    pub operators: Option<Vec<OperatorVersion>>,
}

/// PUT /agent-clusters/{cid}/status
pub async fn put_cluster_status(
    State(state): State<ApiState>,
    Extension(caller): Extension<AgentCluster>,
    Path(cid): Path<String>,
    Json(report): Json<ClusterStatusReport>,
) -> ApiResult<StatusCode> {
    caller.authorize(&cid)?;
    let mut cluster = state
        .store
        .get_cluster(&cid)?
        .ok_or_else(|| ApiError::not_found(format!("agent cluster {cid}")))?;

    if let Some(ready) = report.conditions.iter().find(|c| c.kind == "Ready") {
        cluster.status = if ready.status.eq_ignore_ascii_case("true") {
            ClusterStatus::Ready
        } else {
            ClusterStatus::Failed
        };
    }
    if let Some(operators) = report.operators {
        cluster.operators = operators;
    }
    cluster.updated_at = state.clock.now();
    state.store.put_cluster(&cluster)?;
    debug!(%cid, status = ?cluster.status, "cluster status updated");
    Ok(StatusCode::OK)
}

/// GET /agent-clusters/{cid}/centrals
pub async fn list_centrals(
    State(state): State<ApiState>,
    Extension(caller): Extension<AgentCluster>,
    Path(cid): Path<String>,
) -> ApiResult<Json<ManagedCentralList>> {
    caller.authorize(&cid)?;
    let items = state
        .store
        .list_centrals_for_cluster(&cid)?
        .iter()
        .map(|c| managed_central(c, &state.config))
        .collect();
    Ok(Json(ManagedCentralList::new(items)))
}

/// GET /agent-clusters/{cid}/centrals/{id}
pub async fn get_central(
    State(state): State<ApiState>,
    Extension(caller): Extension<AgentCluster>,
    Path((cid, id)): Path<(String, String)>,
) -> ApiResult<Json<ManagedCentral>> {
    caller.authorize(&cid)?;
    let central = state
        .store
        .get_central(&id)?
        .filter(|c| c.cluster_id == cid)
        .ok_or_else(|| ApiError::not_found(format!("central {id}")))?;
    let secrets = state.store.get_central_secrets(&id)?;
    Ok(Json(managed_central_with_secrets(&central, secrets, &state.config)))
}

/// PUT /agent-clusters/{cid}/centrals/status
pub async fn put_central_status(
    State(state): State<ApiState>,
    Extension(caller): Extension<AgentCluster>,
    Path(cid): Path<String>,
    Json(reports): Json<BTreeMap<String, CentralStatusReport>>,
) -> ApiResult<StatusCode> {
    caller.authorize(&cid)?;
    let now = state.clock.now();
    for (id, report) in &reports {
        apply_status_report(&state.store, &cid, id, report, now)?;
    }
    Ok(StatusCode::OK)
}
