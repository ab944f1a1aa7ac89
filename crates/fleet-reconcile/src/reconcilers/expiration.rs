//! Expiration reconciler: tears down centrals whose owners lost entitlement.
//!
//! Entitlement is checked for every ready central once per tick (answers
//! are memoized per organisation and cloud account). Losing it starts a
//! grace period; regaining it cancels the countdown. A sweep then moves
//! every central past its expiry to `deprovision`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use fleet_providers::{EntitlementCache, with_deadline};
use fleet_state::{Central, CentralPatch, CentralStatus};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::lifecycle::benign;
use crate::reconciler::Reconciler;

pub struct ExpirationReconciler {
    ctx: ReconcileContext,
}

impl ExpirationReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    async fn check_entitlement(
        &self,
        cache: &mut EntitlementCache,
        central: &Central,
    ) -> ReconcileResult<()> {
        let entitled = with_deadline(
            self.ctx.driver_timeout(),
            "quota entitlement",
            cache.has_entitlement(self.ctx.quota.as_ref(), central),
        )
        .await
        .map_err(|e| ReconcileError::provider(&central.id, e))?;

        let now = self.ctx.now();
        let expired_at = match (entitled, central.expired_at) {
            (true, Some(_)) => Some(None),
            (false, None) => Some(Some(
                now.checked_add_signed(self.ctx.config.central.expiration_grace.as_chrono())
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            )),
            _ => None,
        };
        let Some(expired_at) = expired_at else {
            return Ok(());
        };

        let patch = CentralPatch {
            expired_at: Some(expired_at),
            ..Default::default()
        };
        self.ctx.store.update_ignore_nils(&central.id, &patch, now)?;
        match expired_at {
            Some(at) => info!(id = %central.id, expires = %at, "central lost entitlement"),
            None => info!(id = %central.id, "central entitlement restored"),
        }
        Ok(())
    }

    fn sweep(&self) -> ReconcileResult<Vec<ReconcileError>> {
        let now = self.ctx.now();
        let mut errors = Vec::new();
        for central in self.ctx.store.list_centrals()? {
            let Some(expired_at) = central.expired_at else {
                continue;
            };
            if expired_at >= now
                || self.ctx.is_internal(&central)
                || !central.status.can_transition_to(CentralStatus::Deprovision)
            {
                continue;
            }
            match benign(self.ctx.store.transition(
                &central.id,
                central.status,
                CentralStatus::Deprovision,
                now,
                |_| {},
            )) {
                Ok(Some(_)) => info!(id = %central.id, %expired_at, "expired central deprovisioned"),
                Ok(None) => {}
                Err(e) => errors.push(e.into()),
            }
        }
        Ok(errors)
    }
}

#[async_trait]
impl Reconciler for ExpirationReconciler {
    fn name(&self) -> &'static str {
        "expiration"
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let centrals = match self.ctx.store.list_centrals_by_status(&[CentralStatus::Ready]) {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };

        let mut errors = Vec::new();
        let mut cache = EntitlementCache::default();
        for central in centrals.iter().filter(|c| !self.ctx.is_internal(c)) {
            if let Err(e) = self.check_entitlement(&mut cache, central).await {
                warn!(id = %central.id, error = %e, "entitlement check failed");
                errors.push(e);
            }
        }
        debug!(keys = cache.len(), "entitlement checks done");

        match self.sweep() {
            Ok(sweep_errors) => errors.extend(sweep_errors),
            Err(e) => errors.push(e),
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, test_config};
    use fleet_core::Clock;

    #[tokio::test]
    async fn unentitled_central_expires_after_grace() {
        let h = Harness::new();
        h.add_central("c-1", "alice", "X");
        h.force_status("c-1", CentralStatus::Ready);
        let reconciler = ExpirationReconciler::new(h.ctx.clone());
        let grace = h.ctx.config.central.expiration_grace.as_chrono();

        reconciler.reconcile().await;
        let central = h.store().get_central("c-1").unwrap().unwrap();
        assert_eq!(central.expired_at, Some(h.clock.now() + grace));
        assert_eq!(central.status, CentralStatus::Ready);

        // A second tick leaves the countdown alone.
        h.clock.advance(chrono::Duration::hours(1));
        reconciler.reconcile().await;
        let again = h.store().get_central("c-1").unwrap().unwrap();
        assert_eq!(again.expired_at, central.expired_at);

        h.clock.advance(grace);
        reconciler.reconcile().await;
        assert_eq!(h.status_of("c-1"), CentralStatus::Deprovision);
    }

    #[tokio::test]
    async fn regained_entitlement_clears_expiry() {
        let h = Harness::new();
        h.add_central("c-1", "alice", "13640203");
        h.force_status("c-1", CentralStatus::Ready);
        let patch = CentralPatch {
            expired_at: Some(Some(h.clock.now())),
            ..Default::default()
        };
        h.store().update_ignore_nils("c-1", &patch, h.clock.now()).unwrap();

        ExpirationReconciler::new(h.ctx.clone()).reconcile().await;

        let central = h.store().get_central("c-1").unwrap().unwrap();
        assert!(central.expired_at.is_none());
        assert_eq!(central.status, CentralStatus::Ready);
    }

    #[tokio::test]
    async fn internal_organisations_never_expire() {
        let mut config = test_config();
        config.central.internal_organisations.insert("X".to_string());
        let h = Harness::with_config(config);
        h.add_central("c-1", "alice", "X");
        h.force_status("c-1", CentralStatus::Ready);

        ExpirationReconciler::new(h.ctx.clone()).reconcile().await;
        assert!(h.store().get_central("c-1").unwrap().unwrap().expired_at.is_none());
    }
}
