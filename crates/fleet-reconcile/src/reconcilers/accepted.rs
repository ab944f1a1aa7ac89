//! Accepted reconciler: binds new centrals to a cluster and version.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleet_placement::desired_versions;
use fleet_state::{Central, CentralStatus};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::lifecycle::{benign, fail};
use crate::reconciler::Reconciler;

pub struct AcceptedReconciler {
    ctx: ReconcileContext,
}

impl AcceptedReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    /// Leave the central for the next tick, or fail it once the retry
    /// window since creation has passed.
    fn retry_or_fail(&self, central: &Central, reason: String) -> ReconcileResult<()> {
        let now = self.ctx.now();
        let window = self.ctx.config.central.accepted_max_retry.as_chrono();
        if now - central.created_at > window {
            benign(fail(&self.ctx.store, central, &reason, now))?;
        } else {
            debug!(id = %central.id, %reason, "central stays accepted");
        }
        Ok(())
    }

    fn reconcile_one(&self, central: &Central) -> ReconcileResult<()> {
        self.ctx.observe_age(central);

        let Some(cluster) = self.ctx.placement.find_cluster(central)? else {
            return self.retry_or_fail(
                central,
                format!(
                    "no cluster available for central {} in {}/{}",
                    central.id, central.cloud_provider, central.region
                ),
            );
        };
        let Some(versions) = desired_versions(&cluster) else {
            return self.retry_or_fail(
                central,
                format!(
                    "failed to get desired central operator version on cluster {}",
                    cluster.cluster_id
                ),
            );
        };

        let placed = benign(self.ctx.store.transition(
            &central.id,
            CentralStatus::Accepted,
            CentralStatus::Preparing,
            self.ctx.now(),
            |c| {
                c.cluster_id = cluster.cluster_id.clone();
                c.operator_version = versions.operator_version.clone();
                c.central_version = versions.central_version.clone();
                c.namespace = format!("rhacs-{}", c.id);
            },
        ))?;
        if placed.is_some() {
            info!(
                id = %central.id,
                cluster = %cluster.cluster_id,
                operator = %versions.operator_version,
                "central placed"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for AcceptedReconciler {
    fn name(&self) -> &'static str {
        "accepted"
    }

    fn fast(&self) -> bool {
        true
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let centrals = match self.ctx.store.list_centrals_by_status(&[CentralStatus::Accepted]) {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };

        let mut errors = Vec::new();
        for central in &centrals {
            if let Err(e) = self.reconcile_one(central) {
                warn!(id = %central.id, error = %e, "accepted reconcile failed");
                errors.push(e);
            }
        }
        errors
    }
}
