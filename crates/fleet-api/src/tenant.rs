//! Tenant-facing handlers: central requests, cloud providers, service
//! status, and the admin restore.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use fleet_placement::{max_capacity_reached, offered_regions};
use fleet_providers::with_deadline;
use fleet_reconcile::{request_deprovision, restore_failed};
use fleet_state::{Central, CentralStatus, InstanceType};

use crate::ApiState;
use crate::auth::{AdminCaller, Caller};
use crate::error::{ApiError, ApiResult};
use crate::presenters::*;

pub const MAX_NAME_LENGTH: usize = 32;

const NAME_PATTERN: &str = "^[a-z]([-a-z0-9]*[a-z0-9])?$";

pub fn validate_name(name: &str) -> ApiResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::MalformedName(format!(
            "central name must be between 1 and {MAX_NAME_LENGTH} characters"
        )));
    }
    let pattern = Regex::new(NAME_PATTERN).map_err(|e| ApiError::Internal(e.to_string()))?;
    if !pattern.is_match(name) {
        return Err(ApiError::MalformedName(format!(
            "central name {name:?} must consist of lower-case alphanumeric characters or '-', \
             start with a letter, and end with an alphanumeric character"
        )));
    }
    Ok(())
}

/// 20 lowercase hex characters from a v4 uuid.
pub fn new_central_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(20).collect()
}

#[derive(Debug, Default, Deserialize)]
pub struct AsyncQuery {
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

fn visible_to(central: &Central, caller: &Caller) -> bool {
    caller.admin || central.organisation_id == caller.org
}

/// POST /centrals?async=true
pub async fn create_central(
    State(state): State<ApiState>,
    caller: Caller,
    Query(query): Query<AsyncQuery>,
    Json(payload): Json<CentralRequestPayload>,
) -> ApiResult<(StatusCode, Json<CentralRequest>)> {
    if !query.is_async {
        return Err(ApiError::SyncNotSupported);
    }
    validate_name(&payload.name)?;
    let instance_type = payload.instance_type.unwrap_or(InstanceType::Standard);

    let clusters = state.store.list_clusters()?;
    let usage = state.store.usage_by_cluster()?;
    let regions = offered_regions(&clusters, &usage, &payload.cloud_provider, None);
    if regions.is_empty() {
        return Err(ApiError::ProviderNotSupported(payload.cloud_provider));
    }
    if !regions
        .iter()
        .any(|r| r.region == payload.region && r.supported_instance_types.contains(&instance_type))
    {
        return Err(ApiError::RegionNotSupported(payload.region));
    }

    let max = state.config.central.max_allowed_instances;
    let owned = state.store.list_centrals_for_owner(&caller.user)?.len();
    if owned >= max as usize {
        return Err(ApiError::MaxAllowedInstances(max));
    }

    let entitled = with_deadline(
        state.config.workers.driver_timeout.as_duration(),
        "quota entitlement",
        state
            .quota
            .has_entitlement(&caller.org, &payload.cloud_account_id, instance_type),
    )
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !entitled {
        return Err(ApiError::Forbidden(format!(
            "organisation {} is not entitled to {instance_type} centrals",
            caller.org
        )));
    }

    let mut central = Central::new_request(
        new_central_id(),
        payload.name,
        caller.user,
        caller.org,
        state.clock.now(),
    );
    central.cloud_provider = payload.cloud_provider;
    central.region = payload.region;
    central.multi_az = payload.multi_az;
    central.instance_type = instance_type;
    central.cloud_account_id = payload.cloud_account_id;
    central.internal = state
        .config
        .central
        .internal_organisations
        .contains(&central.organisation_id);

    let stored = state.store.insert_central(&central)?;
    Ok((StatusCode::ACCEPTED, Json(central_request(&stored))))
}

/// GET /centrals
pub async fn list_centrals(
    State(state): State<ApiState>,
    caller: Caller,
) -> ApiResult<Json<ItemList<CentralRequest>>> {
    let items = state
        .store
        .list_centrals()?
        .iter()
        .filter(|c| visible_to(c, &caller))
        .map(central_request)
        .collect();
    Ok(Json(ItemList::new("CentralRequestList", items)))
}

fn find_visible(state: &ApiState, id: &str, caller: &Caller) -> ApiResult<Central> {
    state
        .store
        .get_central(id)?
        .filter(|c| visible_to(c, caller))
        .ok_or_else(|| ApiError::not_found(format!("central {id}")))
}

/// GET /centrals/{id}
pub async fn get_central(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<CentralRequest>> {
    let central = find_visible(&state, &id, &caller)?;
    Ok(Json(central_request(&central)))
}

/// DELETE /centrals/{id}?async=true
pub async fn delete_central(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<AsyncQuery>,
) -> ApiResult<(StatusCode, Json<CentralRequest>)> {
    if !query.is_async {
        return Err(ApiError::SyncNotSupported);
    }
    let central = find_visible(&state, &id, &caller)?;
    if central.owner != caller.user && !caller.admin {
        return Err(ApiError::Forbidden(format!(
            "user {} is not allowed to delete central {id}",
            caller.user
        )));
    }
    let central = request_deprovision(&state.store, &id, state.clock.now())?;
    info!(%id, user = %caller.user, "central deletion requested");
    Ok((StatusCode::ACCEPTED, Json(central_request(&central))))
}

/// GET /cloud_providers
pub async fn list_cloud_providers(State(state): State<ApiState>) -> ApiResult<Json<ItemList<CloudProvider>>> {
    let providers = state.providers.get_or_refresh(&state.store)?;
    Ok(Json(ItemList::new("CloudProviderList", providers)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RegionsQuery {
    pub instance_type: Option<InstanceType>,
}

/// GET /cloud_providers/{id}/regions
pub async fn list_regions(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
    Query(query): Query<RegionsQuery>,
) -> ApiResult<Json<ItemList<CloudRegion>>> {
    let providers = state.providers.get_or_refresh(&state.store)?;
    if !providers.iter().any(|p| p.id == provider) {
        return Err(ApiError::not_found(format!("cloud provider {provider}")));
    }
    let clusters = state.store.list_clusters()?;
    let usage = state.store.usage_by_cluster()?;
    let items = offered_regions(&clusters, &usage, &provider, query.instance_type)
        .into_iter()
        .map(|r| CloudRegion {
            kind: "CloudRegion".to_string(),
            display_name: r.region.clone(),
            id: r.region,
            enabled: true,
            supported_instance_types: r.supported_instance_types,
            capacity_reached: r.capacity_reached,
        })
        .collect();
    Ok(Json(ItemList::new("CloudRegionList", items)))
}

/// GET /status
pub async fn service_status(State(state): State<ApiState>) -> ApiResult<Json<ServiceStatus>> {
    let clusters = state.store.list_clusters()?;
    let usage = state.store.usage_by_cluster()?;
    Ok(Json(ServiceStatus {
        centrals: CentralsStatus {
            max_capacity_reached: max_capacity_reached(&clusters, &usage),
        },
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RestoreQuery {
    /// `accepted` (the default) to place again, or `ready`.
    pub to: Option<CentralStatus>,
}

/// POST /admin/centrals/{id}/restore[?to=ready]
pub async fn restore_central(
    State(state): State<ApiState>,
    AdminCaller(admin): AdminCaller,
    Path(id): Path<String>,
    Query(query): Query<RestoreQuery>,
) -> ApiResult<Json<CentralRequest>> {
    let to = query.to.unwrap_or(CentralStatus::Accepted);
    let central = restore_failed(&state.store, &id, to, state.clock.now())?;
    info!(%id, %to, admin = %admin.user, "central restored");
    Ok(Json(central_request(&central)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_dns_label_rules() {
        let longest = "a".repeat(32);
        let too_long = "a".repeat(33);
        for ok in ["a", "prod", "my-central-1", longest.as_str()] {
            assert!(validate_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "1abc", "Prod", "ends-", "under_score", too_long.as_str()] {
            assert!(matches!(validate_name(bad), Err(ApiError::MalformedName(_))), "{bad}");
        }
    }

    #[test]
    fn ids_are_twenty_hex_chars() {
        let id = new_central_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_central_id());
    }
}
