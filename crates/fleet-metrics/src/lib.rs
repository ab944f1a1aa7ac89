//! fleet-metrics: observability for the fleet control plane.
//!
//! Tracks reconciler outcomes and durations, per-status central counts,
//! per-cluster capacity used, time spent in each lifecycle state, and which
//! workers are running on this replica.
//!
//! # Architecture
//!
//! ```text
//! FleetMetrics (Clone, shared by scheduler, reconcilers, HTTP)
//!   ├── record_reconcile()      ← every worker tick
//!   ├── observe_age_in_state()  ← every reconciled central
//!   ├── set_status_counts() / set_capacity_used() ← status worker
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod histogram;
pub mod prometheus;

pub use collector::{FleetMetrics, MetricsSnapshot, WorkerCounters};
pub use histogram::Histogram;
pub use prometheus::render_prometheus;
