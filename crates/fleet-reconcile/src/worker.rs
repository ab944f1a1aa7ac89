//! Periodic reconciler workers.
//!
//! A worker runs its reconciler once immediately, then on a fixed period.
//! Ticks run inline in the worker task, so they never overlap, and a stop
//! request is only observed between ticks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use fleet_metrics::FleetMetrics;

use crate::reconciler::Reconciler;

/// Run one reconcile pass and record its outcome. Returns the error count.
pub async fn run_tick(reconciler: &dyn Reconciler, metrics: &FleetMetrics) -> usize {
    let started = Instant::now();
    let errors = reconciler.reconcile().await;
    let elapsed = started.elapsed();

    for error in &errors {
        warn!(worker = reconciler.name(), error = %error, "reconcile error");
    }
    metrics.record_reconcile(reconciler.name(), errors.len(), elapsed);
    debug!(
        worker = reconciler.name(),
        errors = errors.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "reconcile tick finished"
    );
    errors.len()
}

/// Floor for tick periods; `tokio::time::interval` rejects zero.
pub(crate) const MIN_PERIOD: Duration = Duration::from_millis(1);

pub(crate) fn clamp_period(name: &str, period: Duration) -> Duration {
    if period < MIN_PERIOD {
        warn!(%name, period_ms = period.as_millis() as u64, "period below floor, clamped");
        return MIN_PERIOD;
    }
    period
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Worker {
    reconciler: Arc<dyn Reconciler>,
    period: Duration,
    metrics: FleetMetrics,
    running: Option<Running>,
}

impl Worker {
    pub fn new(reconciler: Arc<dyn Reconciler>, period: Duration, metrics: FleetMetrics) -> Self {
        let period = clamp_period(reconciler.name(), period);
        Self {
            reconciler,
            period,
            metrics,
            running: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the worker loop. Starting a running worker is a no-op.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let (shutdown, mut rx) = watch::channel(false);
        let reconciler = Arc::clone(&self.reconciler);
        let metrics = self.metrics.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            info!(worker = reconciler.name(), period_ms = period.as_millis() as u64, "worker started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = rx.changed() => break,
                    _ = ticker.tick() => {
                        run_tick(reconciler.as_ref(), &metrics).await;
                    }
                }
            }
            info!(worker = reconciler.name(), "worker stopped");
        });
        self.running = Some(Running { shutdown, handle });
    }

    /// Signal the loop and wait for any in-flight tick to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            warn!(worker = self.name(), error = %e, "worker task did not exit cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        finished: AtomicUsize,
        work: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Reconciler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn reconcile(&self) -> Vec<ReconcileError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                vec![ReconcileError::Lease("boom".to_string())]
            } else {
                Vec::new()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_on_period() {
        let reconciler = Arc::new(Counting::default());
        let metrics = FleetMetrics::new();
        let mut worker = Worker::new(reconciler.clone(), Duration::from_secs(3), metrics.clone());

        worker.start();
        tokio::time::sleep(Duration::from_millis(7_500)).await;
        worker.stop().await;

        // t = 0s, 3s, 6s
        assert_eq!(reconciler.finished.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().workers["counting"], (3, 0, 0));
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_tick() {
        let reconciler = Arc::new(Counting {
            work: Duration::from_secs(1),
            ..Default::default()
        });
        let mut worker = Worker::new(reconciler.clone(), Duration::from_secs(30), FleetMetrics::new());

        worker.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reconciler.started.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.finished.load(Ordering::SeqCst), 0);

        worker.stop().await;
        assert_eq!(reconciler.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_tick_counts_errors() {
        let reconciler = Counting {
            fail: true,
            ..Default::default()
        };
        let metrics = FleetMetrics::new();
        assert_eq!(run_tick(&reconciler, &metrics).await, 1);
        assert_eq!(metrics.snapshot().workers["counting"], (0, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped_and_still_ticks() {
        let reconciler = Arc::new(Counting::default());
        let mut worker = Worker::new(reconciler.clone(), Duration::ZERO, FleetMetrics::new());
        assert_eq!(worker.period(), MIN_PERIOD);

        worker.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await;
        assert!(reconciler.finished.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let reconciler = Arc::new(Counting::default());
        let mut worker = Worker::new(reconciler, Duration::from_secs(30), FleetMetrics::new());
        worker.start();
        worker.start();
        assert!(worker.is_running());
        worker.stop().await;
        worker.stop().await;
    }
}
