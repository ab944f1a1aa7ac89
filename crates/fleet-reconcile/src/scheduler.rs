//! Work scheduler: runs the reconcilers only on the leader replica.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use fleet_metrics::FleetMetrics;

use crate::context::ReconcileContext;
use crate::labeler::{Backoff, PodLabeler, label_with_backoff};
use crate::leader::{LeaderElector, LeadershipCallbacks};
use crate::reconciler::Reconciler;
use crate::reconcilers::*;
use crate::worker::Worker;

/// Every reconciler the control plane runs, in start order.
pub fn build_reconcilers(ctx: &ReconcileContext) -> Vec<Arc<dyn Reconciler>> {
    vec![
        Arc::new(AcceptedReconciler::new(ctx.clone())),
        Arc::new(PreparingReconciler::new(ctx.clone())),
        Arc::new(ProvisioningReconciler::new(ctx.clone())),
        Arc::new(ReadyReconciler::new(ctx.clone())),
        Arc::new(RoutesReconciler::new(ctx.clone())),
        Arc::new(ExpirationReconciler::new(ctx.clone())),
        Arc::new(DenyListReconciler::new(ctx.clone())),
        Arc::new(DeletingReconciler::new(ctx.clone())),
        Arc::new(StatusReconciler::new(ctx.clone())),
    ]
}

pub struct WorkScheduler {
    workers: Mutex<Vec<Worker>>,
    labeler: Arc<dyn PodLabeler>,
    backoff: Backoff,
    metrics: FleetMetrics,
}

impl WorkScheduler {
    pub fn new(workers: Vec<Worker>, labeler: Arc<dyn PodLabeler>, backoff: Backoff, metrics: FleetMetrics) -> Self {
        for worker in &workers {
            metrics.set_leader_worker(worker.name(), false);
        }
        Self {
            workers: Mutex::new(workers),
            labeler,
            backoff,
            metrics,
        }
    }

    /// One worker per reconciler; fast reconcilers get the short period.
    pub fn from_context(ctx: &ReconcileContext, labeler: Arc<dyn PodLabeler>) -> Self {
        let fast: Duration = ctx.config.workers.fast_period.as_duration();
        let default: Duration = ctx.config.workers.default_period.as_duration();
        let workers = build_reconcilers(ctx)
            .into_iter()
            .map(|r| {
                let period = if r.fast() { fast } else { default };
                Worker::new(r, period, ctx.metrics.clone())
            })
            .collect();
        Self::new(
            workers,
            labeler,
            Backoff::from_config(&ctx.config.leader),
            ctx.metrics.clone(),
        )
    }

    pub async fn start_all(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            worker.start();
            self.metrics.set_leader_worker(worker.name(), true);
        }
        info!(workers = workers.len(), "all workers started");
    }

    pub async fn stop_all(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            worker.stop().await;
            self.metrics.set_leader_worker(worker.name(), false);
        }
        info!(workers = workers.len(), "all workers stopped");
    }

    /// Whether any worker is running.
    pub async fn is_running(&self) -> bool {
        self.workers.lock().await.iter().any(Worker::is_running)
    }

    pub async fn running_workers(&self) -> Vec<&'static str> {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|w| w.is_running())
            .map(Worker::name)
            .collect()
    }

    async fn label(&self, active: bool) {
        if let Err(e) = label_with_backoff(self.labeler.as_ref(), active, &self.backoff).await {
            warn!(active, error = %e, "could not update pod label");
        }
    }

    /// Run until `shutdown` fires. With an elector the workers follow
    /// leadership; without one they start immediately.
    pub async fn run(self: Arc<Self>, elector: Option<LeaderElector>, mut shutdown: watch::Receiver<bool>) {
        match elector {
            Some(elector) => {
                let callbacks: Arc<dyn LeadershipCallbacks> = self.clone();
                elector.run(callbacks, shutdown).await;
            }
            None => {
                info!("leader election disabled, starting workers");
                self.on_started_leading().await;
                let _ = shutdown.changed().await;
                self.on_stopped_leading().await;
            }
        }
    }
}

#[async_trait]
impl LeadershipCallbacks for WorkScheduler {
    async fn on_started_leading(&self) {
        self.start_all().await;
        self.label(true).await;
    }

    async fn on_stopped_leading(&self) {
        self.stop_all().await;
        self.label(false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labeler::InMemoryLabeler;
    use crate::testing::Harness;

    fn scheduler(h: &Harness, labeler: &InMemoryLabeler) -> Arc<WorkScheduler> {
        Arc::new(WorkScheduler::from_context(&h.ctx, Arc::new(labeler.clone())))
    }

    #[tokio::test]
    async fn registers_every_reconciler() {
        let h = Harness::new();
        let names: Vec<_> = build_reconcilers(&h.ctx).iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "accepted",
                "preparing",
                "provisioning",
                "ready",
                "routes",
                "expiration",
                "deny_list",
                "deleting",
                "status"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn leadership_callbacks_toggle_workers_and_label() {
        let h = Harness::new();
        let labeler = InMemoryLabeler::new();
        let scheduler = scheduler(&h, &labeler);
        assert!(!scheduler.is_running().await);

        scheduler.on_started_leading().await;
        assert_eq!(scheduler.running_workers().await.len(), 9);
        assert_eq!(labeler.current(), Some(true));
        assert!(h.ctx.metrics.snapshot().leader_workers["accepted"]);

        scheduler.on_stopped_leading().await;
        assert!(!scheduler.is_running().await);
        assert_eq!(labeler.history(), vec![true, false]);
        assert!(!h.ctx.metrics.snapshot().leader_workers["accepted"]);
    }

    #[tokio::test(start_paused = true)]
    async fn label_failures_do_not_block_workers() {
        let h = Harness::new();
        let labeler = InMemoryLabeler::new();
        labeler.fail_next(1_000);
        let scheduler = scheduler(&h, &labeler);

        scheduler.on_started_leading().await;
        assert!(scheduler.is_running().await);
        assert!(labeler.current().is_none());
        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn without_election_runs_until_shutdown() {
        let h = Harness::new();
        let labeler = InMemoryLabeler::new();
        let scheduler = scheduler(&h, &labeler);
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(scheduler.clone().run(None, rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_running().await);

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(!scheduler.is_running().await);
        assert_eq!(labeler.history(), vec![true, false]);
    }
}
