//! JSON documents served by the API. Presenters derive them from store
//! records on every request; nothing here is read back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::FleetConfig;
use fleet_state::{Central, CentralSecrets, CentralStatus, ClientOrigin, DataPlaneCluster, InstanceType, RouteInfo};

pub const CENTRALS_HREF: &str = "/api/rhacs/v1/centrals";

// ── Agent documents ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedCentralMetadata {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCentralAuth {
    pub client_id: String,
    pub client_origin: ClientOrigin,
    pub issuer: String,
    pub owner_org_id: String,
    pub owner_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCentralSpec {
    pub ui_host: String,
    pub data_host: String,
    pub version: String,
    pub central_version: String,
    pub auth: ManagedCentralAuth,
    pub owners: Vec<String>,
    pub tenant_id: String,
    pub instance_type: InstanceType,
    pub revision: u64,
}

/// Desired state of one central, as pulled by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedCentral {
    pub id: String,
    pub metadata: ManagedCentralMetadata,
    pub spec: ManagedCentralSpec,
    /// Present only on single-central reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<BTreeMap<String, String>>,
}

pub const CLIENT_SECRET_KEY: &str = "central-oidc-client-secret";

pub fn managed_central(central: &Central, config: &FleetConfig) -> ManagedCentral {
    let mut annotations = BTreeMap::new();
    annotations.insert("fleet/org-id".to_string(), central.organisation_id.clone());
    annotations.insert("fleet/status".to_string(), central.status.to_string());
    if let Some(expired_at) = central.expired_at {
        annotations.insert("fleet/expired-at".to_string(), expired_at.to_rfc3339());
    }

    ManagedCentral {
        id: central.id.clone(),
        metadata: ManagedCentralMetadata {
            name: central.name.clone(),
            namespace: central.namespace.clone(),
            annotations,
        },
        spec: ManagedCentralSpec {
            ui_host: central.host.clone(),
            data_host: central.data_host.clone(),
            version: central.operator_version.clone(),
            central_version: central.central_version.clone(),
            auth: ManagedCentralAuth {
                client_id: central.client_id.clone(),
                client_origin: central.client_origin,
                issuer: config.idp.issuer.clone(),
                owner_org_id: central.organisation_id.clone(),
                owner_user_id: central.owner.clone(),
            },
            owners: vec![central.owner.clone()],
            tenant_id: central.id.clone(),
            instance_type: central.instance_type,
            revision: central.revision,
        },
        secrets: None,
    }
}

/// The single-read form: backed-up secrets plus the OIDC client secret.
pub fn managed_central_with_secrets(
    central: &Central,
    stored: Option<CentralSecrets>,
    config: &FleetConfig,
) -> ManagedCentral {
    let mut doc = managed_central(central, config);
    let mut secrets = stored.map(|s| s.secrets).unwrap_or_default();
    if !central.client_secret.is_empty() {
        secrets.insert(CLIENT_SECRET_KEY.to_string(), central.client_secret.clone());
    }
    doc.secrets = Some(secrets);
    doc
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedCentralList {
    pub kind: String,
    pub items: Vec<ManagedCentral>,
}

impl ManagedCentralList {
    pub fn new(items: Vec<ManagedCentral>) -> Self {
        Self {
            kind: "ManagedCentralList".to_string(),
            items,
        }
    }
}

/// A condition reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPlaneCondition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Observed state of one central, as pushed by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CentralStatusReport {
    pub installed_version: Option<String>,
    pub routes: Option<Vec<RouteInfo>>,
    pub conditions: Vec<DataPlaneCondition>,
    pub secrets_stored: Option<Vec<String>>,
    /// Secret material to back up, keyed by secret name.
    pub secrets: BTreeMap<String, String>,
}

/// Cluster configuration handed to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentClusterConfig {
    pub kind: String,
    pub id: String,
    pub cloud_provider: String,
    pub region: String,
    pub cluster_dns: String,
    pub schedulable: bool,
    pub supported_instance_types: Vec<InstanceType>,
}

pub fn agent_cluster_config(cluster: &DataPlaneCluster) -> AgentClusterConfig {
    AgentClusterConfig {
        kind: "AgentClusterConfig".to_string(),
        id: cluster.cluster_id.clone(),
        cloud_provider: cluster.cloud_provider.clone(),
        region: cluster.region.clone(),
        cluster_dns: cluster.cluster_dns.clone(),
        schedulable: cluster.schedulable,
        supported_instance_types: cluster.supported_instance_types.clone(),
    }
}

// ── Tenant documents ──────────────────────────────────────────────

/// Body of `POST /centrals`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CentralRequestPayload {
    pub name: String,
    pub cloud_provider: String,
    pub region: String,
    #[serde(default = "default_multi_az")]
    pub multi_az: bool,
    #[serde(default)]
    pub instance_type: Option<InstanceType>,
    #[serde(default)]
    pub cloud_account_id: String,
}

fn default_multi_az() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralRequest {
    pub id: String,
    pub kind: String,
    pub href: String,
    pub status: CentralStatus,
    pub cloud_provider: String,
    pub multi_az: bool,
    pub region: String,
    pub owner: String,
    pub name: String,
    pub organisation_id: String,
    pub instance_type: InstanceType,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub failed_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expired_at: Option<DateTime<Utc>>,
}

pub fn central_request(central: &Central) -> CentralRequest {
    CentralRequest {
        id: central.id.clone(),
        kind: "CentralRequest".to_string(),
        href: format!("{CENTRALS_HREF}/{}", central.id),
        status: central.status,
        cloud_provider: central.cloud_provider.clone(),
        multi_az: central.multi_az,
        region: central.region.clone(),
        owner: central.owner.clone(),
        name: central.name.clone(),
        organisation_id: central.organisation_id.clone(),
        instance_type: central.instance_type,
        host: central.host.clone(),
        failed_reason: central.failed_reason.clone(),
        created_at: central.created_at,
        updated_at: central.updated_at,
        expired_at: central.expired_at,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudProvider {
    pub kind: String,
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
}

pub fn cloud_provider(id: &str) -> CloudProvider {
    let display_name = match id {
        "aws" => "Amazon Web Services",
        "gcp" => "Google Cloud Platform",
        "azure" => "Microsoft Azure",
        other => other,
    };
    CloudProvider {
        kind: "CloudProvider".to_string(),
        id: id.to_string(),
        name: id.to_string(),
        display_name: display_name.to_string(),
        enabled: true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRegion {
    pub kind: String,
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    pub supported_instance_types: Vec<InstanceType>,
    pub capacity_reached: bool,
}

/// Paged list envelope used by the tenant API. Everything fits one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemList<T> {
    pub kind: String,
    pub page: u32,
    pub size: usize,
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> ItemList<T> {
    pub fn new(kind: &str, items: Vec<T>) -> Self {
        Self {
            kind: kind.to_string(),
            page: 1,
            size: items.len(),
            total: items.len(),
            items,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub centrals: CentralsStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralsStatus {
    pub max_capacity_reached: bool,
}
