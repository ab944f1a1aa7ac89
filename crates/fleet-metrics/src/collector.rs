//! Metrics registry shared across the control plane.
//!
//! Counters are atomics; gauges and histograms sit behind short-lived
//! mutexes. Status and capacity gauges are replaced wholesale on every
//! status tick so stale series disappear.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use fleet_state::{CentralStatus, RegionCount, StatusCount};

use crate::histogram::Histogram;

/// Per-worker outcome counters.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub success: AtomicU64,
    pub failure: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Default)]
struct Registry {
    workers: BTreeMap<String, Arc<WorkerCounters>>,
    durations: BTreeMap<String, Histogram>,
    age_in_state: BTreeMap<CentralStatus, Histogram>,
    leader_workers: BTreeMap<String, bool>,
    status_counts: BTreeMap<CentralStatus, u64>,
    /// (cluster, region, instance type) → count.
    capacity_used: BTreeMap<(String, String, String), u64>,
}

/// Cheap-to-clone handle on the process-wide metrics.
#[derive(Debug, Clone, Default)]
pub struct FleetMetrics {
    inner: Arc<Mutex<Registry>>,
}

/// Point-in-time copy used for exposition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// worker → (success, failure, errors)
    pub workers: BTreeMap<String, (u64, u64, u64)>,
    pub durations: BTreeMap<String, Histogram>,
    pub age_in_state: BTreeMap<CentralStatus, Histogram>,
    pub leader_workers: BTreeMap<String, bool>,
    pub status_counts: BTreeMap<CentralStatus, u64>,
    pub capacity_used: BTreeMap<(String, String, String), u64>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn counters(&self, worker: &str) -> Arc<WorkerCounters> {
        self.registry()
            .workers
            .entry(worker.to_string())
            .or_default()
            .clone()
    }

    /// Record one finished reconcile tick.
    pub fn record_reconcile(&self, worker: &str, error_count: usize, elapsed: Duration) {
        let counters = self.counters(worker);
        if error_count == 0 {
            counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failure.fetch_add(1, Ordering::Relaxed);
            counters.errors.fetch_add(error_count as u64, Ordering::Relaxed);
        }
        self.registry()
            .durations
            .entry(worker.to_string())
            .or_default()
            .observe(elapsed.as_secs_f64());
    }

    /// Record how long a central has been in `status`.
    pub fn observe_age_in_state(&self, status: CentralStatus, age: Duration) {
        self.registry()
            .age_in_state
            .entry(status)
            .or_default()
            .observe(age.as_secs_f64());
    }

    pub fn set_leader_worker(&self, worker: &str, running: bool) {
        self.registry()
            .leader_workers
            .insert(worker.to_string(), running);
    }

    /// Replace the per-status gauges.
    pub fn set_status_counts(&self, counts: &[StatusCount]) {
        let mut registry = self.registry();
        registry.status_counts = counts.iter().map(|c| (c.status, c.count)).collect();
        debug!(series = registry.status_counts.len(), "status counts updated");
    }

    /// Replace the per-cluster capacity gauges.
    pub fn set_capacity_used(&self, counts: &[RegionCount]) {
        let mut registry = self.registry();
        registry.capacity_used = counts
            .iter()
            .map(|c| {
                (
                    (
                        c.cluster_id.clone(),
                        c.region.clone(),
                        c.instance_type.to_string(),
                    ),
                    c.count,
                )
            })
            .collect();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let registry = self.registry();
        MetricsSnapshot {
            workers: registry
                .workers
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        (
                            c.success.load(Ordering::Relaxed),
                            c.failure.load(Ordering::Relaxed),
                            c.errors.load(Ordering::Relaxed),
                        ),
                    )
                })
                .collect(),
            durations: registry.durations.clone(),
            age_in_state: registry.age_in_state.clone(),
            leader_workers: registry.leader_workers.clone(),
            status_counts: registry.status_counts.clone(),
            capacity_used: registry.capacity_used.clone(),
        }
    }
}
