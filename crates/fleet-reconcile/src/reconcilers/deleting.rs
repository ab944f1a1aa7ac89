//! Deleting reconciler: releases external dependencies and soft-deletes.
//!
//! Also picks up `deprovision` centrals that were never realized on a
//! cluster (empty host): no agent will ever confirm their teardown.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleet_providers::{ProviderResult, with_deadline};
use fleet_state::{Central, CentralStatus, ClientOrigin};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::lifecycle::benign;
use crate::reconciler::Reconciler;
use crate::reconcilers::routes::record_batch;

/// Treat "already gone" as success on delete paths.
fn gone_ok(result: ProviderResult<impl Sized>) -> ProviderResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

pub struct DeletingReconciler {
    ctx: ReconcileContext,
}

impl DeletingReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    /// Centrals to delete this tick, moving unrealized ones to `deleting`.
    fn collect(&self) -> ReconcileResult<(Vec<Central>, Vec<ReconcileError>)> {
        let mut errors = Vec::new();
        let mut work = Vec::new();
        let now = self.ctx.now();
        for central in self
            .ctx
            .store
            .list_centrals_by_status(&[CentralStatus::Deprovision, CentralStatus::Deleting])?
        {
            if central.status == CentralStatus::Deleting {
                work.push(central);
                continue;
            }
            if central.is_realized() {
                continue;
            }
            match benign(self.ctx.store.transition(
                &central.id,
                CentralStatus::Deprovision,
                CentralStatus::Deleting,
                now,
                |_| {},
            )) {
                Ok(Some(moved)) => {
                    debug!(id = %moved.id, "unrealized central folded into deleting");
                    work.push(moved);
                }
                Ok(None) => {}
                Err(e) => errors.push(e.into()),
            }
        }
        Ok((work, errors))
    }

    async fn delete_one(&self, central: &Central) -> ReconcileResult<()> {
        self.ctx.observe_age(central);
        let deadline = self.ctx.driver_timeout();
        let to_provider = |e| ReconcileError::provider(&central.id, e);

        if !central.subscription_id.is_empty() {
            gone_ok(
                with_deadline(deadline, "quota delete", self.ctx.quota.delete_quota(&central.subscription_id))
                    .await,
            )
            .map_err(to_provider)?;
        }

        if central.routes_created
            && self.ctx.config.central.enable_external_domain
            && !central.routes.is_empty()
        {
            gone_ok(
                with_deadline(deadline, "dns delete", self.ctx.dns.delete_records(&record_batch(central)))
                    .await,
            )
            .map_err(to_provider)?;
        }

        if central.client_origin == ClientOrigin::Dynamic && !central.client_id.is_empty() {
            gone_ok(
                with_deadline(deadline, "idp delete client", self.ctx.idp.delete_client(&central.client_id))
                    .await,
            )
            .map_err(to_provider)?;
        }

        if benign(self.ctx.store.soft_delete(&central.id, self.ctx.now()))?.is_some() {
            info!(id = %central.id, owner = %central.owner, "central deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DeletingReconciler {
    fn name(&self) -> &'static str {
        "deleting"
    }

    fn fast(&self) -> bool {
        true
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let (work, mut errors) = match self.collect() {
            Ok(collected) => collected,
            Err(e) => return vec![e],
        };
        for central in &work {
            if let Err(e) = self.delete_one(central).await {
                warn!(id = %central.id, error = %e, "delete failed, will retry");
                errors.push(e);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::request_deprovision;
    use crate::testing::{Harness, test_config};
    use crate::reconcilers::PreparingReconciler;
    use fleet_core::Clock;
    use fleet_providers::DnsDriver;
    use fleet_state::{CentralPatch, RouteInfo};

    #[tokio::test]
    async fn unrealized_central_is_deleted_directly() {
        let h = Harness::new();
        h.add_central("c-1", "alice", "13640203");
        let patch = CentralPatch {
            subscription_id: Some("never-reserved".to_string()),
            ..Default::default()
        };
        h.store().update_ignore_nils("c-1", &patch, h.clock.now()).unwrap();
        request_deprovision(h.store(), "c-1", h.clock.now()).unwrap();

        // Quota answers NotFound for the unknown subscription; that is fine.
        let errors = DeletingReconciler::new(h.ctx.clone()).reconcile().await;
        assert!(errors.is_empty(), "{errors:?}");

        let central = h.store().get_central_admin("c-1").unwrap().unwrap();
        assert_eq!(central.status, CentralStatus::Deleted);
        assert_eq!(central.deleted_at, Some(h.clock.now()));
        assert!(h.store().get_central("c-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn realized_deprovision_waits_for_agent() {
        let h = Harness::new();
        h.add_central("c-1", "alice", "13640203");
        h.force_status("c-1", CentralStatus::Ready);
        request_deprovision(h.store(), "c-1", h.clock.now()).unwrap();

        DeletingReconciler::new(h.ctx.clone()).reconcile().await;
        assert_eq!(h.status_of("c-1"), CentralStatus::Deprovision);
    }

    #[tokio::test]
    async fn releases_dynamic_client_and_dns() {
        let mut config = test_config();
        config.central.enable_dynamic_auth = true;
        config.central.enable_external_domain = true;
        let h = Harness::with_config(config);
        h.add_central("c-1", "alice", "13640203");
        h.force_status("c-1", CentralStatus::Preparing);
        PreparingReconciler::new(h.ctx.clone()).reconcile().await;
        assert_eq!(h.idp.client_count(), 1);

        let routes = vec![RouteInfo {
            host: "acs-c-1.acs.example.com".to_string(),
            router: "router.c1".to_string(),
        }];
        h.ctx
            .dns
            .upsert_records(&fleet_providers::RecordBatch {
                central_id: "c-1".to_string(),
                records: vec![fleet_providers::RouteRecord {
                    host: routes[0].host.clone(),
                    target: routes[0].router.clone(),
                }],
            })
            .await
            .unwrap();
        let patch = CentralPatch {
            routes: Some(routes),
            routes_created: Some(true),
            ..Default::default()
        };
        h.store().update_ignore_nils("c-1", &patch, h.clock.now()).unwrap();

        let now = h.clock.now();
        h.store()
            .transition("c-1", CentralStatus::Provisioning, CentralStatus::Deprovision, now, |_| {})
            .unwrap();
        h.store()
            .transition("c-1", CentralStatus::Deprovision, CentralStatus::Deleting, now, |_| {})
            .unwrap();

        assert!(DeletingReconciler::new(h.ctx.clone()).reconcile().await.is_empty());
        assert_eq!(h.idp.client_count(), 0);
        assert!(h.dns.record("acs-c-1.acs.example.com").is_none());
        assert_eq!(h.status_of("c-1"), CentralStatus::Deleted);
    }
}
