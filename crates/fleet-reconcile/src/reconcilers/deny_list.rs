//! Deny-list reconciler: tears down every central owned by a denied principal.

use async_trait::async_trait;
use tracing::info;

use fleet_state::CentralStatus;

use crate::context::ReconcileContext;
use crate::error::ReconcileError;
use crate::lifecycle::benign;
use crate::reconciler::Reconciler;

pub struct DenyListReconciler {
    ctx: ReconcileContext,
}

impl DenyListReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for DenyListReconciler {
    fn name(&self) -> &'static str {
        "deny_list"
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let denied = self.ctx.config.deny_list.active_owners();
        if denied.is_empty() {
            return Vec::new();
        }
        let centrals = match self.ctx.store.list_centrals() {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };

        let now = self.ctx.now();
        let mut errors = Vec::new();
        for central in centrals.iter().filter(|c| denied.contains(&c.owner)) {
            if !central.status.can_transition_to(CentralStatus::Deprovision) {
                continue;
            }
            match benign(self.ctx.store.transition(
                &central.id,
                central.status,
                CentralStatus::Deprovision,
                now,
                |_| {},
            )) {
                Ok(Some(_)) => info!(id = %central.id, owner = %central.owner, "denied owner's central deprovisioned"),
                Ok(None) => {}
                Err(e) => errors.push(e.into()),
            }
        }
        errors
    }
}
