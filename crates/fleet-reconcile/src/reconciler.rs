//! The reconciler contract.

use async_trait::async_trait;

use crate::error::ReconcileError;

/// A periodic pass over the store that advances centrals it owns.
///
/// `reconcile` never fails as a whole: per-central problems are collected
/// and returned so the tick can continue with the next central.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Stable worker name, used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Fast reconcilers run on the short period.
    fn fast(&self) -> bool {
        false
    }

    async fn reconcile(&self) -> Vec<ReconcileError>;
}
