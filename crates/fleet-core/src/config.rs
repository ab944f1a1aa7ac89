//! fleet.toml configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! runnable development configuration.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::duration::ConfigDuration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub central: CentralConfig,
    pub deny_list: DenyListConfig,
    pub workers: WorkerConfig,
    pub leader: LeaderConfig,
    pub quota: QuotaConfig,
    pub idp: IdpConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/fleet"),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("fleet.redb")
    }
}

/// Lifecycle knobs for central instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Maximum time a central may spend in `provisioning`.
    pub provisioning_timeout: ConfigDuration,
    /// How long an `accepted` central is retried before it fails.
    pub accepted_max_retry: ConfigDuration,
    /// How long server-class errors are retried in `preparing`.
    pub max_prov_err_window: ConfigDuration,
    /// Grace period between losing entitlement and deprovisioning.
    pub expiration_grace: ConfigDuration,
    /// Per-owner cap on non-deleted centrals.
    pub max_allowed_instances: u32,
    pub enable_external_domain: bool,
    /// Base domain for central hostnames.
    pub domain: String,
    /// Issue a dedicated OIDC client per central.
    pub enable_dynamic_auth: bool,
    /// Client id bound to centrals when dynamic auth is off.
    pub static_client_id: String,
    pub static_client_secret: String,
    /// Organisations whose centrals never expire.
    pub internal_organisations: BTreeSet<String>,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            provisioning_timeout: ConfigDuration::from_secs(60 * 60),
            accepted_max_retry: ConfigDuration::from_secs(15 * 60),
            max_prov_err_window: ConfigDuration::from_secs(5 * 60),
            expiration_grace: ConfigDuration::from_secs(48 * 3600),
            max_allowed_instances: 1,
            enable_external_domain: false,
            domain: "acs.example.com".to_string(),
            enable_dynamic_auth: false,
            static_client_id: String::new(),
            static_client_secret: String::new(),
            internal_organisations: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DenyListConfig {
    pub enabled: bool,
    pub owners: BTreeSet<String>,
}

impl DenyListConfig {
    /// The owners to tear down, or an empty set when the deny list is off.
    pub fn active_owners(&self) -> BTreeSet<String> {
        if self.enabled {
            self.owners.clone()
        } else {
            BTreeSet::new()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub default_period: ConfigDuration,
    pub fast_period: ConfigDuration,
    /// Deadline applied to every outbound driver call.
    pub driver_timeout: ConfigDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_period: ConfigDuration::from_secs(30),
            fast_period: ConfigDuration::from_secs(3),
            driver_timeout: ConfigDuration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    pub enabled: bool,
    /// Elector identity; empty means use `$HOSTNAME`.
    pub identity: String,
    pub lease_name: String,
    pub lease_duration: ConfigDuration,
    pub renew_deadline: ConfigDuration,
    pub retry_period: ConfigDuration,
    pub label_base_delay: ConfigDuration,
    pub label_max_delay: ConfigDuration,
    pub label_max_attempts: u32,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            identity: String::new(),
            lease_name: "fleet-manager-leader".to_string(),
            lease_duration: ConfigDuration::from_secs(15),
            renew_deadline: ConfigDuration::from_secs(10),
            retry_period: ConfigDuration::from_secs(2),
            label_base_delay: ConfigDuration::from_millis(10),
            label_max_delay: ConfigDuration::from_secs(1),
            label_max_attempts: 10,
        }
    }
}

impl LeaderConfig {
    pub fn resolved_identity(&self) -> String {
        if !self.identity.is_empty() {
            return self.identity.clone();
        }
        identity_from_host(std::env::var("HOSTNAME").ok())
    }
}

/// The hostname, or `fleet-manager-<uuid>` when it is unset.
fn identity_from_host(hostname: Option<String>) -> String {
    hostname
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| format!("fleet-manager-{}", uuid::Uuid::new_v4().simple()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaKind {
    #[default]
    QuotaList,
    Unlimited,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub kind: QuotaKind,
    pub organisations: Vec<OrganisationQuota>,
    pub registered_users: Vec<UserQuota>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganisationQuota {
    pub id: String,
    #[serde(default = "default_org_instances")]
    pub max_allowed_instances: u32,
    /// Users of the organisation allowed to create centrals; empty allows all.
    #[serde(default)]
    pub allowed_users: BTreeSet<String>,
}

fn default_org_instances() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub username: String,
    #[serde(default = "default_org_instances")]
    pub max_allowed_instances: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    pub issuer: String,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer: "https://sso.example.com/auth/realms/fleet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Organisations allowed to use the tenant API; empty allows all.
    pub allowed_org_ids: BTreeSet<String>,
    pub admin_users: BTreeSet<String>,
    pub agent_clusters: Vec<AgentClusterAuth>,
}

/// Credential binding an agent token to the cluster it may act for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentClusterAuth {
    pub cluster_id: String,
    /// Hex-encoded SHA-256 of the agent's bearer token.
    pub token_sha256: String,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the control plane at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("central.provisioning_timeout", self.central.provisioning_timeout),
            ("central.accepted_max_retry", self.central.accepted_max_retry),
            ("central.max_prov_err_window", self.central.max_prov_err_window),
            ("workers.default_period", self.workers.default_period),
            ("workers.fast_period", self.workers.fast_period),
            ("workers.driver_timeout", self.workers.driver_timeout),
            ("leader.lease_duration", self.leader.lease_duration),
            ("leader.renew_deadline", self.leader.renew_deadline),
            ("leader.retry_period", self.leader.retry_period),
            ("leader.label_base_delay", self.leader.label_base_delay),
            ("leader.label_max_delay", self.leader.label_max_delay),
        ];
        for (name, value) in required {
            if value.as_duration().is_zero() {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.leader.renew_deadline >= self.leader.lease_duration {
            anyhow::bail!(
                "leader.renew_deadline ({}) must be shorter than leader.lease_duration ({})",
                self.leader.renew_deadline,
                self.leader.lease_duration
            );
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_file_yields_defaults() {
        let config: FleetConfig = toml::from_str("").unwrap();
        assert_eq!(
            config.central.expiration_grace.as_duration(),
            Duration::from_secs(48 * 3600)
        );
        assert_eq!(config.workers.default_period.as_duration(), Duration::from_secs(30));
        assert_eq!(config.workers.fast_period.as_duration(), Duration::from_secs(3));
        assert_eq!(config.leader.label_base_delay.as_duration(), Duration::from_millis(10));
        assert_eq!(config.quota.kind, QuotaKind::QuotaList);
    }

    #[test]
    fn parse_full_sections() {
        let toml_str = r#"
[central]
provisioning_timeout = "30m"
accepted_max_retry = "2m"
max_allowed_instances = 3
internal_organisations = ["internal-org"]

[deny_list]
enabled = true
owners = ["bob"]

[quota]
kind = "unlimited"

[[quota.organisations]]
id = "13640203"
max_allowed_instances = 5

[[auth.agent_clusters]]
cluster_id = "c1"
token_sha256 = "abc"
"#;
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.central.provisioning_timeout.as_duration(),
            Duration::from_secs(1800)
        );
        assert_eq!(config.central.max_allowed_instances, 3);
        assert!(config.central.internal_organisations.contains("internal-org"));
        assert!(config.deny_list.active_owners().contains("bob"));
        assert_eq!(config.quota.kind, QuotaKind::Unlimited);
        assert_eq!(config.quota.organisations[0].max_allowed_instances, 5);
        assert_eq!(config.auth.agent_clusters[0].cluster_id, "c1");
    }

    #[test]
    fn disabled_deny_list_has_no_active_owners() {
        let mut config = DenyListConfig::default();
        config.owners.insert("bob".to_string());
        assert!(config.active_owners().is_empty());
    }

    #[test]
    fn defaults_are_valid() {
        FleetConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_periods_are_rejected() {
        for section in [
            "[workers]\nfast_period = \"0s\"",
            "[workers]\ndefault_period = \"0\"",
            "[leader]\nretry_period = \"0ms\"",
        ] {
            let config: FleetConfig = toml::from_str(section).unwrap();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("greater than zero"), "{section}: {err}");
        }
    }

    #[test]
    fn renew_deadline_must_fit_in_lease() {
        let config: FleetConfig =
            toml::from_str("[leader]\nlease_duration = \"10s\"\nrenew_deadline = \"10s\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, "[workers]\nfast_period = \"0s\"\n").unwrap();
        assert!(FleetConfig::from_file(&path).is_err());
    }

    #[test]
    fn identity_prefers_configured_value() {
        let leader = LeaderConfig {
            identity: "replica-a".to_string(),
            ..Default::default()
        };
        assert_eq!(leader.resolved_identity(), "replica-a");
    }

    #[test]
    fn missing_hostname_yields_distinct_identities() {
        assert_eq!(identity_from_host(Some("pod-0".to_string())), "pod-0");

        let a = identity_from_host(None);
        let b = identity_from_host(Some(String::new()));
        assert!(a.starts_with("fleet-manager-"));
        assert!(b.starts_with("fleet-manager-"));
        assert_ne!(a, b);
    }

    #[test]
    fn from_file_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        let config = FleetConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = FleetConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.bind, config.server.bind);
        assert_eq!(loaded.leader.lease_name, "fleet-manager-leader");
    }
}
