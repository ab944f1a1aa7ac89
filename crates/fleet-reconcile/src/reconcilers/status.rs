//! Status reconciler: refreshes the per-status and capacity gauges.

use async_trait::async_trait;
use tracing::debug;

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::reconciler::Reconciler;

pub struct StatusReconciler {
    ctx: ReconcileContext,
}

impl StatusReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    fn refresh(&self) -> ReconcileResult<()> {
        let by_status = self.ctx.store.count_by_status()?;
        let by_region = self.ctx.store.count_by_region()?;
        debug!(regions = by_region.len(), "refreshing status gauges");
        self.ctx.metrics.set_status_counts(&by_status);
        self.ctx.metrics.set_capacity_used(&by_region);
        Ok(())
    }
}

#[async_trait]
impl Reconciler for StatusReconciler {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        match self.refresh() {
            Ok(()) => Vec::new(),
            Err(e) => vec![e],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use fleet_state::CentralStatus;

    #[tokio::test]
    async fn gauges_follow_the_store() {
        let h = Harness::new();
        h.add_cluster("c1", 10);
        h.add_central("a", "alice", "13640203");
        h.add_central("b", "alice", "13640203");
        h.force_status("b", CentralStatus::Ready);

        let reconciler = StatusReconciler::new(h.ctx.clone());
        assert!(reconciler.reconcile().await.is_empty());

        let snap = h.ctx.metrics.snapshot();
        assert_eq!(snap.status_counts[&CentralStatus::Accepted], 1);
        assert_eq!(snap.status_counts[&CentralStatus::Ready], 1);
        assert_eq!(snap.status_counts[&CentralStatus::Failed], 0);
        assert!(!snap.status_counts.contains_key(&CentralStatus::Deleted));
        assert_eq!(
            snap.capacity_used[&("c1".to_string(), "us-east-1".to_string(), "standard".to_string())],
            1
        );
    }
}
