//! Shared fixtures for reconciler tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use fleet_core::{Clock, FleetConfig, ManualClock, OrganisationQuota};
use fleet_metrics::FleetMetrics;
use fleet_placement::CapacityStrategy;
use fleet_providers::{InMemoryDns, InMemoryIdp, quota_service_from_config};
use fleet_state::*;

use crate::context::ReconcileContext;

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub(crate) fn test_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.quota.organisations.push(OrganisationQuota {
        id: "13640203".to_string(),
        max_allowed_instances: 5,
        allowed_users: Default::default(),
    });
    config
}

pub(crate) struct Harness {
    pub ctx: ReconcileContext,
    pub clock: ManualClock,
    pub dns: InMemoryDns,
    pub idp: InMemoryIdp,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: FleetConfig) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let clock = ManualClock::new(t0());
        let dns = InMemoryDns::new();
        let idp = InMemoryIdp::new();
        let ctx = ReconcileContext {
            quota: quota_service_from_config(&config.quota, store.clone()),
            placement: Arc::new(CapacityStrategy::new(store.clone())),
            store,
            clock: Arc::new(clock.clone()),
            config: Arc::new(config),
            dns: Arc::new(dns.clone()),
            idp: Arc::new(idp.clone()),
            metrics: FleetMetrics::new(),
        };
        Self { ctx, clock, dns, idp }
    }

    pub fn store(&self) -> &StateStore {
        &self.ctx.store
    }

    pub fn add_cluster(&self, id: &str, limit: u32) {
        self.store()
            .put_cluster(&DataPlaneCluster {
                cluster_id: id.to_string(),
                cloud_provider: "aws".to_string(),
                region: "us-east-1".to_string(),
                multi_az: true,
                status: ClusterStatus::Ready,
                schedulable: true,
                supported_instance_types: vec![InstanceType::Standard, InstanceType::Eval],
                capacity: BTreeMap::from([(InstanceType::Standard, limit), (InstanceType::Eval, limit)]),
                cluster_dns: format!("apps.{id}.example.com"),
                operators: vec![OperatorVersion {
                    version: "4.5.0".to_string(),
                    ready: true,
                    central_versions: vec![CentralVersion {
                        version: "4.5.0".to_string(),
                        ready: true,
                    }],
                }],
                updated_at: t0(),
            })
            .unwrap();
    }

    pub fn add_central(&self, id: &str, owner: &str, org: &str) -> Central {
        let central = Central::new_request(id, id, owner, org, self.clock.now());
        self.store().insert_central(&central).unwrap()
    }

    /// Drive a central straight to `status` along valid edges.
    pub fn force_status(&self, id: &str, status: CentralStatus) -> Central {
        let store = self.store();
        let now = self.clock.now();
        let path: &[CentralStatus] = match status {
            CentralStatus::Accepted => &[],
            CentralStatus::Preparing => &[CentralStatus::Preparing],
            CentralStatus::Provisioning => &[CentralStatus::Preparing, CentralStatus::Provisioning],
            CentralStatus::Ready => &[
                CentralStatus::Preparing,
                CentralStatus::Provisioning,
                CentralStatus::Ready,
            ],
            other => panic!("force_status does not support {other}"),
        };
        let mut current = store.get_central(id).unwrap().unwrap();
        for next in path {
            current = store
                .transition(id, current.status, *next, now, |c| {
                    if c.cluster_id.is_empty() {
                        c.cluster_id = "c1".to_string();
                    }
                    if *next == CentralStatus::Provisioning {
                        c.host = format!("acs-{}.acs.example.com", c.id);
                    }
                })
                .unwrap();
        }
        current
    }

    pub fn status_of(&self, id: &str) -> CentralStatus {
        self.store().get_central_admin(id).unwrap().unwrap().status
    }
}
