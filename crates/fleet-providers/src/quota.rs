//! Quota and entitlement.
//!
//! One trait, two backends: a configured allow-list of organisations and
//! registered users (`quota-list`), and an unlimited backend for
//! development clusters.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use fleet_core::{QuotaConfig, QuotaKind};
use fleet_state::{Central, CentralStatus, InstanceType, StateStore};

use crate::error::{ProviderError, ProviderResult};

#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Whether the (organisation, cloud account) is still entitled to run an
    /// instance of `instance_type`.
    async fn has_entitlement(
        &self,
        organisation_id: &str,
        cloud_account_id: &str,
        instance_type: InstanceType,
    ) -> ProviderResult<bool>;

    /// Reserve a subscription for `central`, returning its id.
    async fn reserve(&self, central: &Central) -> ProviderResult<String>;

    /// Release a subscription. Releasing an id twice succeeds.
    async fn delete_quota(&self, subscription_id: &str) -> ProviderResult<()>;
}

/// Build the configured backend.
pub fn quota_service_from_config(config: &QuotaConfig, store: StateStore) -> Arc<dyn QuotaService> {
    match config.kind {
        QuotaKind::QuotaList => Arc::new(QuotaListService::new(config.clone(), store)),
        QuotaKind::Unlimited => Arc::new(UnlimitedQuotaService::default()),
    }
}

/// Subscription ids handed out by an in-process backend.
#[derive(Debug, Default)]
struct Subscriptions {
    reserved: Mutex<BTreeSet<String>>,
}

impl Subscriptions {
    fn reserve(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone());
        id
    }

    fn release(&self, subscription_id: &str) {
        let removed = self
            .reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(subscription_id);
        if removed {
            debug!(%subscription_id, "quota released");
        } else {
            debug!(%subscription_id, "quota already released");
        }
    }
}

/// Allow-list backend driven by `[quota]` in fleet.toml.
pub struct QuotaListService {
    config: QuotaConfig,
    store: StateStore,
    subscriptions: Subscriptions,
}

impl QuotaListService {
    pub fn new(config: QuotaConfig, store: StateStore) -> Self {
        Self {
            config,
            store,
            subscriptions: Subscriptions::default(),
        }
    }

    /// Instance allowance for `central`'s organisation or owner, if listed.
    fn allowance(&self, central: &Central) -> Option<u32> {
        if let Some(org) = self
            .config
            .organisations
            .iter()
            .find(|o| o.id == central.organisation_id)
        {
            if org.allowed_users.is_empty() || org.allowed_users.contains(&central.owner) {
                return Some(org.max_allowed_instances);
            }
            return None;
        }
        self.config
            .registered_users
            .iter()
            .find(|u| u.username == central.owner)
            .map(|u| u.max_allowed_instances)
    }
}

#[async_trait]
impl QuotaService for QuotaListService {
    async fn has_entitlement(
        &self,
        organisation_id: &str,
        _cloud_account_id: &str,
        instance_type: InstanceType,
    ) -> ProviderResult<bool> {
        // Eval instances are free for everyone.
        if instance_type == InstanceType::Eval {
            return Ok(true);
        }
        Ok(self
            .config
            .organisations
            .iter()
            .any(|o| o.id == organisation_id && o.max_allowed_instances > 0))
    }

    async fn reserve(&self, central: &Central) -> ProviderResult<String> {
        let Some(allowance) = self.allowance(central) else {
            return Err(ProviderError::Client(format!(
                "organisation {} is not entitled to create centrals",
                central.organisation_id
            )));
        };

        let in_use = self
            .store
            .list_centrals()
            .map_err(|e| ProviderError::Transient(e.to_string()))?
            .into_iter()
            .filter(|c| {
                c.organisation_id == central.organisation_id
                    && c.id != central.id
                    && !c.subscription_id.is_empty()
                    && c.status != CentralStatus::Failed
            })
            .count() as u32;
        if in_use >= allowance {
            return Err(ProviderError::Client(format!(
                "organisation {} has reached its quota of {allowance} centrals",
                central.organisation_id
            )));
        }

        let id = self.subscriptions.reserve();
        info!(central = %central.id, subscription = %id, "quota reserved");
        Ok(id)
    }

    async fn delete_quota(&self, subscription_id: &str) -> ProviderResult<()> {
        self.subscriptions.release(subscription_id);
        Ok(())
    }
}

/// Backend that grants everything.
#[derive(Default)]
pub struct UnlimitedQuotaService {
    subscriptions: Subscriptions,
}

#[async_trait]
impl QuotaService for UnlimitedQuotaService {
    async fn has_entitlement(
        &self,
        _organisation_id: &str,
        _cloud_account_id: &str,
        _instance_type: InstanceType,
    ) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn reserve(&self, central: &Central) -> ProviderResult<String> {
        let id = self.subscriptions.reserve();
        debug!(central = %central.id, subscription = %id, "unlimited quota reserved");
        Ok(id)
    }

    async fn delete_quota(&self, subscription_id: &str) -> ProviderResult<()> {
        self.subscriptions.release(subscription_id);
        Ok(())
    }
}

/// Per-tick memo of entitlement answers keyed by (organisation, cloud account,
/// instance type). Owned by a single reconciler tick.
#[derive(Debug, Default)]
pub struct EntitlementCache {
    answers: HashMap<(String, String, InstanceType), bool>,
}

impl EntitlementCache {
    pub async fn has_entitlement(
        &mut self,
        quota: &dyn QuotaService,
        central: &Central,
    ) -> ProviderResult<bool> {
        let key = (
            central.organisation_id.clone(),
            central.cloud_account_id.clone(),
            central.instance_type,
        );
        if let Some(answer) = self.answers.get(&key) {
            return Ok(*answer);
        }
        let answer = quota
            .has_entitlement(&key.0, &key.1, key.2)
            .await?;
        self.answers.insert(key, answer);
        Ok(answer)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_core::{OrganisationQuota, UserQuota};

    fn quota_config() -> QuotaConfig {
        QuotaConfig {
            kind: QuotaKind::QuotaList,
            organisations: vec![OrganisationQuota {
                id: "13640203".to_string(),
                max_allowed_instances: 1,
                allowed_users: BTreeSet::new(),
            }],
            registered_users: vec![UserQuota {
                username: "carol".to_string(),
                max_allowed_instances: 2,
            }],
        }
    }

    fn central(id: &str, owner: &str, org: &str) -> Central {
        Central::new_request(id, id, owner, org, Utc::now())
    }

    #[tokio::test]
    async fn listed_org_is_entitled() {
        let service = QuotaListService::new(quota_config(), StateStore::open_in_memory().unwrap());

        assert!(service.has_entitlement("13640203", "", InstanceType::Standard).await.unwrap());
        assert!(!service.has_entitlement("X", "", InstanceType::Standard).await.unwrap());
        assert!(service.has_entitlement("X", "", InstanceType::Eval).await.unwrap());
    }

    #[tokio::test]
    async fn reserve_enforces_org_allowance() {
        let store = StateStore::open_in_memory().unwrap();
        let service = QuotaListService::new(quota_config(), store.clone());

        let mut first = central("c-1", "alice", "13640203");
        first.subscription_id = service.reserve(&first).await.unwrap();
        store.insert_central(&first).unwrap();

        let second = central("c-2", "alice", "13640203");
        let err = service.reserve(&second).await.unwrap_err();
        assert!(err.is_client());
    }

    #[tokio::test]
    async fn registered_user_outside_listed_orgs() {
        let service = QuotaListService::new(quota_config(), StateStore::open_in_memory().unwrap());

        assert!(service.reserve(&central("c-1", "carol", "other")).await.is_ok());
        assert!(service.reserve(&central("c-2", "dave", "other")).await.unwrap_err().is_client());
    }

    #[tokio::test]
    async fn delete_quota_twice_succeeds() {
        let unlimited = UnlimitedQuotaService::default();
        let id = unlimited.reserve(&central("c-1", "alice", "org")).await.unwrap();
        unlimited.delete_quota(&id).await.unwrap();
        unlimited.delete_quota(&id).await.unwrap();

        let listed = QuotaListService::new(quota_config(), StateStore::open_in_memory().unwrap());
        let id = listed.reserve(&central("c-2", "alice", "13640203")).await.unwrap();
        listed.delete_quota(&id).await.unwrap();
        listed.delete_quota(&id).await.unwrap();
    }

    #[tokio::test]
    async fn entitlement_cache_asks_once_per_key() {
        let service = QuotaListService::new(quota_config(), StateStore::open_in_memory().unwrap());
        let mut cache = EntitlementCache::default();

        let a = central("c-1", "alice", "13640203");
        let b = central("c-2", "bob", "13640203");
        assert!(cache.has_entitlement(&service, &a).await.unwrap());
        assert!(cache.has_entitlement(&service, &b).await.unwrap());
        assert_eq!(cache.len(), 1);
    }
}
