//! fleet-reconcile: lifecycle reconcilers and the leader-gated scheduler.
//!
//! # Architecture
//!
//! ```text
//! LeaderElector ── LeaseLock (store-backed lease row)
//!   └── LeadershipCallbacks = WorkScheduler
//!         ├── on_started_leading → start every Worker, label active=true
//!         └── on_stopped_leading → stop every Worker, label active=false
//!
//! Worker (one tokio task per reconciler, 3s fast / 30s default)
//!   └── Reconciler::reconcile() → Vec<ReconcileError>
//!         accepted → preparing → provisioning → ready
//!         routes, expiration, deny_list, deleting, status
//! ```

pub mod context;
pub mod error;
pub mod labeler;
pub mod leader;
pub mod lifecycle;
pub mod reconciler;
pub mod reconcilers;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod testing;

pub use context::ReconcileContext;
pub use error::{ReconcileError, ReconcileResult};
pub use labeler::{Backoff, InMemoryLabeler, LogLabeler, PodLabeler, label_with_backoff};
pub use leader::{LeaderElector, LeadershipCallbacks, LeaseLock, StoreLeaseLock};
pub use lifecycle::{fail, request_deprovision, restore_failed};
pub use reconciler::Reconciler;
pub use scheduler::{WorkScheduler, build_reconcilers};
pub use worker::{Worker, run_tick};
