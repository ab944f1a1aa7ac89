//! Provisioning reconciler: enforces the provisioning timeout.
//!
//! The move to `ready` comes from agent status reports, not from here.

use async_trait::async_trait;
use tracing::warn;

use fleet_state::{Central, CentralStatus};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::lifecycle::{benign, fail};
use crate::reconciler::Reconciler;

pub const TIMEOUT_REASON: &str =
    "Creation time went over the timeout. Interrupting central initialization.";

pub struct ProvisioningReconciler {
    ctx: ReconcileContext,
}

impl ProvisioningReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    fn reconcile_one(&self, central: &Central) -> ReconcileResult<()> {
        self.ctx.observe_age(central);

        let now = self.ctx.now();
        let started = central.entered_provisioning_at.unwrap_or(central.created_at);
        let timeout = self.ctx.config.central.provisioning_timeout.as_chrono();
        if now - started > timeout {
            warn!(id = %central.id, %started, "provisioning timed out");
            benign(fail(&self.ctx.store, central, TIMEOUT_REASON, now))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ProvisioningReconciler {
    fn name(&self) -> &'static str {
        "provisioning"
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let centrals = match self
            .ctx
            .store
            .list_centrals_by_status(&[CentralStatus::Provisioning])
        {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };
        centrals
            .iter()
            .filter_map(|c| self.reconcile_one(c).err())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn times_out_after_provisioning_timeout() {
        let h = Harness::new();
        h.add_central("c-1", "alice", "13640203");
        h.force_status("c-1", CentralStatus::Provisioning);
        let reconciler = ProvisioningReconciler::new(h.ctx.clone());

        let timeout = h.ctx.config.central.provisioning_timeout.as_chrono();
        h.clock.advance(timeout);
        reconciler.reconcile().await;
        assert_eq!(h.status_of("c-1"), CentralStatus::Provisioning);

        h.clock.advance(chrono::Duration::seconds(1));
        reconciler.reconcile().await;

        let central = h.store().get_central("c-1").unwrap().unwrap();
        assert_eq!(central.status, CentralStatus::Failed);
        assert_eq!(central.failed_reason, TIMEOUT_REASON);
    }
}
