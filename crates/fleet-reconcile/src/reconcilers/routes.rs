//! Routes reconciler: drives a central's DNS records until in sync.
//!
//! Runs across lifecycle states: any non-deleted central whose routes are
//! not yet created. Centrals being torn down are left to the deleting path.

use async_trait::async_trait;
use tracing::{debug, info};

use fleet_providers::{ChangeStatus, RecordBatch, RouteRecord, with_deadline};
use fleet_state::{Central, CentralPatch};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::reconciler::Reconciler;

/// The CNAME batch for a central's reported routes.
pub fn record_batch(central: &Central) -> RecordBatch {
    RecordBatch {
        central_id: central.id.clone(),
        records: central
            .routes
            .iter()
            .map(|r| RouteRecord {
                host: r.host.clone(),
                target: r.router.clone(),
            })
            .collect(),
    }
}

pub struct RoutesReconciler {
    ctx: ReconcileContext,
}

impl RoutesReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    async fn reconcile_one(&self, central: &Central) -> ReconcileResult<()> {
        if !self.ctx.config.central.enable_external_domain {
            let patch = CentralPatch {
                routes_created: Some(true),
                ..Default::default()
            };
            self.ctx
                .store
                .update_ignore_nils(&central.id, &patch, self.ctx.now())?;
            debug!(id = %central.id, "external domain disabled, routes marked created");
            return Ok(());
        }

        if central.routes.is_empty() {
            debug!(id = %central.id, "no routes reported yet");
            return Ok(());
        }

        let deadline = self.ctx.driver_timeout();
        let to_provider = |e| ReconcileError::provider(&central.id, e);
        let change_id = if central.routes_creation_id.is_empty() {
            let change_id = with_deadline(
                deadline,
                "dns upsert",
                self.ctx.dns.upsert_records(&record_batch(central)),
            )
            .await
            .map_err(to_provider)?;
            // Saved before polling so a failed poll never resubmits the batch.
            let patch = CentralPatch {
                routes_creation_id: Some(change_id.clone()),
                ..Default::default()
            };
            self.ctx
                .store
                .update_ignore_nils(&central.id, &patch, self.ctx.now())?;
            debug!(id = %central.id, %change_id, "dns change submitted");
            change_id
        } else {
            central.routes_creation_id.clone()
        };
        let status = with_deadline(deadline, "dns change status", self.ctx.dns.change_status(&change_id))
            .await
            .map_err(to_provider)?;

        let created = status == ChangeStatus::Insync;
        let patch = CentralPatch {
            routes_creation_id: Some(change_id),
            routes_created: Some(created),
            ..Default::default()
        };
        self.ctx
            .store
            .update_ignore_nils(&central.id, &patch, self.ctx.now())?;
        if created {
            info!(id = %central.id, "routes in sync");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RoutesReconciler {
    fn name(&self) -> &'static str {
        "routes"
    }

    fn fast(&self) -> bool {
        true
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let centrals = match self.ctx.store.list_centrals_needing_routes() {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };

        let mut errors = Vec::new();
        for central in centrals.iter().filter(|c| !c.status.is_deletion()) {
            if let Err(e) = self.reconcile_one(central).await {
                debug!(id = %central.id, error = %e, "routes reconcile failed");
                errors.push(e);
            }
        }
        errors
    }
}
