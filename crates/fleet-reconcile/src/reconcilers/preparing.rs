//! Preparing reconciler: provisions a central's external dependencies.
//!
//! The pipeline persists every completed step with a partial update, so a
//! tick that fails halfway resumes where it left off instead of issuing a
//! second OIDC client or subscription.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleet_providers::{ProviderError, with_deadline};
use fleet_state::{Central, CentralPatch, CentralStatus, ClientOrigin};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::lifecycle::{benign, fail};
use crate::reconciler::Reconciler;

/// Outcome of one pipeline run.
enum Step {
    Done(Central),
    Failed(ProviderError),
}

pub struct PreparingReconciler {
    ctx: ReconcileContext,
}

impl PreparingReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    fn patch(&self, central: &Central, patch: CentralPatch) -> ReconcileResult<Central> {
        Ok(self
            .ctx
            .store
            .update_ignore_nils(&central.id, &patch, self.ctx.now())?)
    }

    /// Bind an OIDC client: a dynamic one per central, or the shared static one.
    async fn ensure_auth(&self, central: Central) -> ReconcileResult<Step> {
        if !central.client_id.is_empty() {
            return Ok(Step::Done(central));
        }
        let cfg = &self.ctx.config.central;
        let patch = if cfg.enable_dynamic_auth {
            let redirect = format!("acs-{}.{}", central.id, cfg.domain);
            let created = with_deadline(
                self.ctx.driver_timeout(),
                "idp create client",
                self.ctx.idp.create_client(&central.id, &redirect),
            )
            .await;
            let client = match created {
                Ok(client) => client,
                Err(e) => return Ok(Step::Failed(e)),
            };
            CentralPatch {
                client_id: Some(client.client_id),
                client_secret: Some(client.secret),
                client_origin: Some(ClientOrigin::Dynamic),
                ..Default::default()
            }
        } else {
            CentralPatch {
                client_id: Some(cfg.static_client_id.clone()),
                client_secret: Some(cfg.static_client_secret.clone()),
                client_origin: Some(ClientOrigin::Static),
                ..Default::default()
            }
        };
        Ok(Step::Done(self.patch(&central, patch)?))
    }

    async fn ensure_subscription(&self, central: Central) -> ReconcileResult<Step> {
        if !central.subscription_id.is_empty() {
            return Ok(Step::Done(central));
        }
        let reserved = with_deadline(
            self.ctx.driver_timeout(),
            "quota reserve",
            self.ctx.quota.reserve(&central),
        )
        .await;
        match reserved {
            Ok(subscription_id) => {
                let patch = CentralPatch {
                    subscription_id: Some(subscription_id),
                    ..Default::default()
                };
                Ok(Step::Done(self.patch(&central, patch)?))
            }
            Err(e) => Ok(Step::Failed(e)),
        }
    }

    fn ensure_hosts(&self, central: Central) -> ReconcileResult<Central> {
        if !central.host.is_empty() {
            return Ok(central);
        }
        let domain = &self.ctx.config.central.domain;
        let patch = CentralPatch {
            host: Some(format!("acs-{}.{domain}", central.id)),
            data_host: Some(format!("acs-data-{}.{domain}", central.id)),
            ..Default::default()
        };
        self.patch(&central, patch)
    }

    async fn prepare(&self, central: Central) -> ReconcileResult<Step> {
        let central = match self.ensure_auth(central).await? {
            Step::Done(c) => c,
            failed => return Ok(failed),
        };
        let central = match self.ensure_subscription(central).await? {
            Step::Done(c) => c,
            failed => return Ok(failed),
        };
        Ok(Step::Done(self.ensure_hosts(central)?))
    }

    /// Client errors fail at once; anything else is retried until the
    /// central has been preparing for longer than the error window.
    fn handle_failure(&self, central: &Central, error: ProviderError) -> ReconcileResult<()> {
        let now = self.ctx.now();
        let window = self.ctx.config.central.max_prov_err_window.as_chrono();
        let out_of_time = now - central.status_changed_at > window;

        if error.is_client() || out_of_time {
            benign(fail(&self.ctx.store, central, &error.to_string(), now))?;
            return Ok(());
        }
        warn!(id = %central.id, error = %error, "preparing step failed, will retry");
        Err(ReconcileError::provider(&central.id, error))
    }

    async fn reconcile_one(&self, central: Central) -> ReconcileResult<()> {
        self.ctx.observe_age(&central);
        let original = central.clone();

        match self.prepare(central).await? {
            Step::Done(prepared) => {
                let moved = benign(self.ctx.store.transition(
                    &prepared.id,
                    CentralStatus::Preparing,
                    CentralStatus::Provisioning,
                    self.ctx.now(),
                    |_| {},
                ))?;
                match moved {
                    Some(c) => info!(id = %c.id, host = %c.host, "central provisioning"),
                    None => debug!(id = %prepared.id, "central left preparing concurrently"),
                }
                Ok(())
            }
            Step::Failed(error) => self.handle_failure(&original, error),
        }
    }
}

#[async_trait]
impl Reconciler for PreparingReconciler {
    fn name(&self) -> &'static str {
        "preparing"
    }

    fn fast(&self) -> bool {
        true
    }

    async fn reconcile(&self) -> Vec<ReconcileError> {
        let centrals = match self.ctx.store.list_centrals_by_status(&[CentralStatus::Preparing]) {
            Ok(centrals) => centrals,
            Err(e) => return vec![e.into()],
        };

        let mut errors = Vec::new();
        for central in centrals {
            let id = central.id.clone();
            if let Err(e) = self.reconcile_one(central).await {
                debug!(%id, error = %e, "preparing reconcile failed");
                errors.push(e);
            }
        }
        errors
    }
}
