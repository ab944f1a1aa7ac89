//! Ready reconciler: keeps running centrals' auth binding intact.
//!
//! A ready central with no OIDC client (for example one restored by an
//! admin after its client was removed) gets one re-issued.

use async_trait::async_trait;
use tracing::{info, warn};

use fleet_providers::with_deadline;
use fleet_state::{Central, CentralPatch, CentralStatus, ClientOrigin};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::reconciler::Reconciler;

pub struct ReadyReconciler {
    ctx: ReconcileContext,
}

impl ReadyReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    async fn reconcile_one(&self, central: &Central) -> ReconcileResult<()> {
        self.ctx.observe_age(central);

        let cfg = &self.ctx.config.central;
        if !central.client_id.is_empty() {
            return Ok(());
        }
        let patch = if cfg.enable_dynamic_auth {
            let redirect = format!("acs-{}.{}", central.id, cfg.domain);
            let client = with_deadline(
                self.ctx.driver_timeout(),
                "idp create client",
                self.ctx.idp.create_client(&central.id, &redirect),
            )
            .await
            .map_err(|e| ReconcileError::provider(&central.id, e))?;
            CentralPatch {
                client_id: Some(client.client_id),
                client_secret: Some(client.secret),
                client_origin: Some(ClientOrigin::Dynamic),
                ..Default::default()
            }
        } else if !cfg.static_client_id.is_empty() {
            CentralPatch {
                client_id: Some(cfg.static_client_id.clone()),
                client_secret: Some(cfg.static_client_secret.clone()),
                client_origin: Some(ClientOrigin::Static),
                ..Default::default()
            }
        } else {
            return Ok(());
        };

        self.ctx
            .store
            .update_ignore_nils(&central.id, &patch, self.ctx.now())?;
        info!(id = %central.id, "auth client re-bound for ready central");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ReadyReconciler {
    fn name(&self) -> &'static str {
        "ready"
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let centrals = match self.ctx.store.list_centrals_by_status(&[CentralStatus::Ready]) {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };

        let mut errors = Vec::new();
        for central in &centrals {
            if let Err(e) = self.reconcile_one(central).await {
                warn!(id = %central.id, error = %e, "ready reconcile failed");
                errors.push(e);
            }
        }
        errors
    }
}
