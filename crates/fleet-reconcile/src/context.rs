//! Shared dependencies handed to every reconciler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fleet_core::{Clock, FleetConfig};
use fleet_metrics::FleetMetrics;
use fleet_placement::PlacementStrategy;
use fleet_providers::{DnsDriver, IdpDriver, QuotaService};
use fleet_state::{Central, StateStore};

/// Everything a reconciler reads from or writes to. Cloning is cheap.
#[derive(Clone)]
pub struct ReconcileContext {
    pub store: StateStore,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<FleetConfig>,
    pub quota: Arc<dyn QuotaService>,
    pub dns: Arc<dyn DnsDriver>,
    pub idp: Arc<dyn IdpDriver>,
    pub placement: Arc<dyn PlacementStrategy>,
    pub metrics: FleetMetrics,
}

impl ReconcileContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn driver_timeout(&self) -> Duration {
        self.config.workers.driver_timeout.as_duration()
    }

    /// Whether `central` never expires.
    pub fn is_internal(&self, central: &Central) -> bool {
        central.internal
            || self
                .config
                .central
                .internal_organisations
                .contains(&central.organisation_id)
    }

    /// Record the central's time in its current status.
    pub fn observe_age(&self, central: &Central) {
        let age = (self.now() - central.status_changed_at)
            .to_std()
            .unwrap_or_default();
        self.metrics.observe_age_in_state(central.status, age);
    }
}
