//! Domain types for the fleet state store.
//!
//! These types represent the persisted state of central instances, data-plane
//! clusters, agent-pushed secrets, and leader leases. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Unique identifier for a central instance.
pub type CentralId = String;

/// Unique identifier for a data-plane cluster.
pub type ClusterId = String;

// ── Central status ────────────────────────────────────────────────

/// Lifecycle status of a central instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentralStatus {
    Accepted,
    Preparing,
    Provisioning,
    Ready,
    Deprovision,
    Deleting,
    Deleted,
    Failed,
}

impl CentralStatus {
    pub const ALL: [CentralStatus; 8] = [
        CentralStatus::Accepted,
        CentralStatus::Preparing,
        CentralStatus::Provisioning,
        CentralStatus::Ready,
        CentralStatus::Deprovision,
        CentralStatus::Deleting,
        CentralStatus::Deleted,
        CentralStatus::Failed,
    ];

    /// Stable wire and storage value.
    pub fn as_str(&self) -> &'static str {
        match self {
            CentralStatus::Accepted => "accepted",
            CentralStatus::Preparing => "preparing",
            CentralStatus::Provisioning => "provisioning",
            CentralStatus::Ready => "ready",
            CentralStatus::Deprovision => "deprovision",
            CentralStatus::Deleting => "deleting",
            CentralStatus::Deleted => "deleted",
            CentralStatus::Failed => "failed",
        }
    }

    /// Whether `self → next` is an edge of the lifecycle state machine.
    pub fn can_transition_to(self, next: CentralStatus) -> bool {
        use CentralStatus::*;
        match self {
            Accepted => matches!(next, Preparing | Failed | Deprovision),
            Preparing => matches!(next, Provisioning | Failed | Deprovision),
            Provisioning => matches!(next, Ready | Failed | Deprovision),
            Ready => matches!(next, Deprovision | Failed),
            Failed => matches!(next, Deprovision | Ready | Accepted),
            Deprovision => matches!(next, Deleting),
            Deleting => matches!(next, Deleted),
            Deleted => false,
        }
    }

    /// States in which the central is on its way out.
    pub fn is_deletion(self) -> bool {
        matches!(
            self,
            CentralStatus::Deprovision | CentralStatus::Deleting | CentralStatus::Deleted
        )
    }
}

impl fmt::Display for CentralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CentralStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CentralStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StateError::Deserialize(format!("unknown central status: {s:?}")))
    }
}

/// Size class of a central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    Standard,
    Eval,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Standard => "standard",
            InstanceType::Eval => "eval",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(InstanceType::Standard),
            "eval" => Ok(InstanceType::Eval),
            other => Err(StateError::Deserialize(format!(
                "unknown instance type: {other:?}"
            ))),
        }
    }
}

/// Where the central's OIDC client came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientOrigin {
    #[default]
    Static,
    Dynamic,
}

// ── Central ───────────────────────────────────────────────────────

/// A route the agent reports for a realized central.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub host: String,
    #[serde(default)]
    pub router: String,
}

/// The central instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Central {
    pub id: CentralId,
    pub name: String,
    pub owner: String,
    pub organisation_id: String,
    #[serde(default)]
    pub cloud_account_id: String,

    pub cluster_id: ClusterId,
    pub cloud_provider: String,
    pub region: String,
    pub instance_type: InstanceType,
    pub multi_az: bool,

    #[serde(default)]
    pub operator_version: String,
    #[serde(default)]
    pub central_version: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub billing_model: String,

    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub client_origin: ClientOrigin,
    #[serde(default)]
    pub routes_creation_id: String,
    #[serde(default)]
    pub routes_created: bool,
    /// UI host; empty until the preparing pipeline computes it.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub data_host: String,

    #[serde(default)]
    pub installed_version: String,
    #[serde(default)]
    pub routes: Vec<RouteInfo>,
    #[serde(default)]
    pub secrets_stored: Vec<String>,

    pub status: CentralStatus,
    #[serde(default)]
    pub failed_reason: String,
    /// Exempt from expiration.
    #[serde(default)]
    pub internal: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub entered_provisioning_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Bumped by the store on every observable change.
    pub revision: u64,
}

impl Central {
    /// Build a freshly accepted central.
    pub fn new_request(
        id: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        organisation_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: owner.into(),
            organisation_id: organisation_id.into(),
            cloud_account_id: String::new(),
            cluster_id: String::new(),
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            instance_type: InstanceType::Standard,
            multi_az: true,
            operator_version: String::new(),
            central_version: String::new(),
            namespace: String::new(),
            billing_model: "standard".to_string(),
            subscription_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            client_origin: ClientOrigin::Static,
            routes_creation_id: String::new(),
            routes_created: false,
            host: String::new(),
            data_host: String::new(),
            installed_version: String::new(),
            routes: Vec::new(),
            secrets_stored: Vec::new(),
            status: CentralStatus::Accepted,
            failed_reason: String::new(),
            internal: false,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
            entered_provisioning_at: None,
            expired_at: None,
            deleted_at: None,
            revision: 0,
        }
    }

    /// Key of the (owner, name) uniqueness index.
    pub fn name_key(&self) -> String {
        name_key(&self.owner, &self.name)
    }

    /// Whether the central was ever realized on a data-plane cluster.
    pub fn is_realized(&self) -> bool {
        !self.host.is_empty()
    }
}

pub(crate) fn name_key(owner: &str, name: &str) -> String {
    format!("{owner}/{name}")
}

/// Partial update applied by [`crate::StateStore::update_ignore_nils`].
///
/// `None` leaves the stored field untouched. For nullable timestamps the
/// inner option is the new value, so `Some(None)` clears the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CentralPatch {
    pub subscription_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_origin: Option<ClientOrigin>,
    pub routes_creation_id: Option<String>,
    pub routes_created: Option<bool>,
    pub host: Option<String>,
    pub data_host: Option<String>,
    pub installed_version: Option<String>,
    pub routes: Option<Vec<RouteInfo>>,
    pub secrets_stored: Option<Vec<String>>,
    pub expired_at: Option<Option<DateTime<Utc>>>,
}

impl CentralPatch {
    pub fn is_empty(&self) -> bool {
        self == &CentralPatch::default()
    }

    /// Apply to `central`, returning whether any field changed.
    pub fn apply(&self, central: &mut Central) -> bool {
        let mut changed = false;

        fn set<T: PartialEq + Clone>(slot: &mut T, value: &Option<T>, changed: &mut bool) {
            if let Some(v) = value
                && slot != v
            {
                *slot = v.clone();
                *changed = true;
            }
        }

        set(&mut central.subscription_id, &self.subscription_id, &mut changed);
        set(&mut central.client_id, &self.client_id, &mut changed);
        set(&mut central.client_secret, &self.client_secret, &mut changed);
        set(&mut central.client_origin, &self.client_origin, &mut changed);
        set(&mut central.routes_creation_id, &self.routes_creation_id, &mut changed);
        set(&mut central.routes_created, &self.routes_created, &mut changed);
        set(&mut central.host, &self.host, &mut changed);
        set(&mut central.data_host, &self.data_host, &mut changed);
        set(&mut central.installed_version, &self.installed_version, &mut changed);
        set(&mut central.routes, &self.routes, &mut changed);
        set(&mut central.secrets_stored, &self.secrets_stored, &mut changed);
        set(&mut central.expired_at, &self.expired_at, &mut changed);

        changed
    }
}

// ── Data-plane cluster ────────────────────────────────────────────

/// Lifecycle status of a data-plane cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Accepted,
    Ready,
    Failed,
    Deprovisioning,
}

/// A central version the operator can deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralVersion {
    pub version: String,
    pub ready: bool,
}

/// An operator release installed on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorVersion {
    pub version: String,
    pub ready: bool,
    #[serde(default)]
    pub central_versions: Vec<CentralVersion>,
}

/// A data-plane cluster that hosts centrals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPlaneCluster {
    pub cluster_id: ClusterId,
    pub cloud_provider: String,
    pub region: String,
    #[serde(default)]
    pub multi_az: bool,
    pub status: ClusterStatus,
    #[serde(default = "default_true")]
    pub schedulable: bool,
    #[serde(default)]
    pub supported_instance_types: Vec<InstanceType>,
    /// Maximum centrals per instance type.
    #[serde(default)]
    pub capacity: BTreeMap<InstanceType, u32>,
    /// Base domain of the cluster's ingress router.
    #[serde(default)]
    pub cluster_dns: String,
    #[serde(default)]
    pub operators: Vec<OperatorVersion>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl DataPlaneCluster {
    pub fn limit_for(&self, instance_type: InstanceType) -> u32 {
        self.capacity.get(&instance_type).copied().unwrap_or(0)
    }

    pub fn supports(&self, instance_type: InstanceType) -> bool {
        self.supported_instance_types.contains(&instance_type)
    }
}

// ── Secrets ───────────────────────────────────────────────────────

/// Secret material the agent backed up for a central, keyed by secret name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralSecrets {
    pub central_id: CentralId,
    pub secrets: BTreeMap<String, String>,
}

// ── Leases ────────────────────────────────────────────────────────

/// A leader-election lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Lease {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.renewed_at + chrono::Duration::milliseconds(self.duration_ms as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

// ── Derived counts ────────────────────────────────────────────────

/// Number of non-deleted centrals per status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: CentralStatus,
    pub count: u64,
}

/// Number of non-deleted centrals per (cluster, region, instance type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCount {
    pub cluster_id: ClusterId,
    pub region: String,
    pub instance_type: InstanceType,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_values_are_stable() {
        let wire: Vec<&str> = CentralStatus::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            wire,
            [
                "accepted",
                "preparing",
                "provisioning",
                "ready",
                "deprovision",
                "deleting",
                "deleted",
                "failed"
            ]
        );
        for status in CentralStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<CentralStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_a_hard_error() {
        assert!("pending".parse::<CentralStatus>().is_err());
        assert!(serde_json::from_str::<CentralStatus>("\"pending\"").is_err());
    }

    #[test]
    fn transition_table_edges() {
        use CentralStatus::*;
        assert!(Accepted.can_transition_to(Preparing));
        assert!(Accepted.can_transition_to(Failed));
        assert!(!Accepted.can_transition_to(Ready));
        assert!(Preparing.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Deprovision));
        assert!(!Ready.can_transition_to(Deleting));
        assert!(Deprovision.can_transition_to(Deleting));
        assert!(Deleting.can_transition_to(Deleted));
        assert!(Failed.can_transition_to(Accepted));
        for next in CentralStatus::ALL {
            assert!(!Deleted.can_transition_to(next), "deleted is terminal");
        }
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let now = Utc::now();
        let mut central = Central::new_request("c-1", "prod", "alice", "org", now);
        central.host = "kept.example.com".to_string();

        let patch = CentralPatch {
            routes_created: Some(true),
            routes_creation_id: Some("change-1".to_string()),
            ..Default::default()
        };
        assert!(patch.apply(&mut central));
        assert!(central.routes_created);
        assert_eq!(central.host, "kept.example.com");

        // Same values again: no change.
        assert!(!patch.apply(&mut central));
    }

    #[test]
    fn patch_can_clear_expired_at() {
        let now = Utc::now();
        let mut central = Central::new_request("c-1", "prod", "alice", "org", now);
        central.expired_at = Some(now);

        let patch = CentralPatch {
            expired_at: Some(None),
            ..Default::default()
        };
        assert!(patch.apply(&mut central));
        assert!(central.expired_at.is_none());
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease {
            name: "leader".to_string(),
            holder: "a".to_string(),
            acquired_at: now,
            renewed_at: now,
            duration_ms: 15_000,
        };
        assert!(!lease.is_expired(now + chrono::Duration::seconds(10)));
        assert!(lease.is_expired(now + chrono::Duration::seconds(15)));
    }
}
