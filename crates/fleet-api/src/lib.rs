//! fleet-api: HTTP surface of the fleet control plane.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/rhacs/v1/agent-clusters/{cid}` | Cluster config for the agent |
//! | PUT | `/api/rhacs/v1/agent-clusters/{cid}/status` | Cluster health report |
//! | GET | `/api/rhacs/v1/agent-clusters/{cid}/centrals` | Desired centrals for the cluster |
//! | GET | `/api/rhacs/v1/agent-clusters/{cid}/centrals/{id}` | One central, with secrets |
//! | PUT | `/api/rhacs/v1/agent-clusters/{cid}/centrals/status` | Observed-state push |
//! | POST | `/api/rhacs/v1/centrals?async=true` | Request a central |
//! | GET | `/api/rhacs/v1/centrals` | List the caller's organisation's centrals |
//! | GET | `/api/rhacs/v1/centrals/{id}` | Get a central |
//! | DELETE | `/api/rhacs/v1/centrals/{id}?async=true` | Request deletion |
//! | GET | `/api/rhacs/v1/cloud_providers` | Offered cloud providers |
//! | GET | `/api/rhacs/v1/cloud_providers/{id}/regions` | Offered regions |
//! | GET | `/api/rhacs/v1/status` | Service capacity status |
//! | POST | `/api/rhacs/v1/admin/centrals/{id}/restore` | Restore a failed central |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod agent;
pub mod auth;
pub mod cache;
pub mod error;
pub mod ops;
pub mod presenters;
pub mod tenant;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};

use fleet_core::{Clock, FleetConfig};
use fleet_metrics::FleetMetrics;
use fleet_providers::QuotaService;
use fleet_reconcile::ReconcileContext;
use fleet_state::StateStore;

pub use cache::ProviderCache;
pub use error::{ApiError, ApiResult, ErrorEnvelope};

pub const API_PREFIX: &str = "/api/rhacs/v1";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub config: Arc<FleetConfig>,
    pub clock: Arc<dyn Clock>,
    pub quota: Arc<dyn QuotaService>,
    pub metrics: FleetMetrics,
    pub providers: ProviderCache,
}

impl ApiState {
    /// Share the reconcilers' store, drivers, and metrics.
    pub fn from_context(ctx: &ReconcileContext) -> Self {
        Self {
            store: ctx.store.clone(),
            config: Arc::clone(&ctx.config),
            clock: Arc::clone(&ctx.clock),
            quota: Arc::clone(&ctx.quota),
            metrics: ctx.metrics.clone(),
            providers: ProviderCache::default(),
        }
    }
}

/// Build the complete router (agent + tenant + ops).
pub fn build_router(state: ApiState) -> Router {
    let agent_routes = Router::new()
        .route("/agent-clusters/{cid}", get(agent::get_cluster))
        .route("/agent-clusters/{cid}/status", put(agent::put_cluster_status))
        .route("/agent-clusters/{cid}/centrals", get(agent::list_centrals))
        .route("/agent-clusters/{cid}/centrals/status", put(agent::put_central_status))
        .route("/agent-clusters/{cid}/centrals/{id}", get(agent::get_central))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::agent_auth));

    let tenant_routes = Router::new()
        .route("/centrals", get(tenant::list_centrals).post(tenant::create_central))
        .route("/centrals/{id}", get(tenant::get_central).delete(tenant::delete_central))
        .route("/cloud_providers", get(tenant::list_cloud_providers))
        .route("/cloud_providers/{id}/regions", get(tenant::list_regions))
        .route("/status", get(tenant::service_status))
        .route("/admin/centrals/{id}/restore", post(tenant::restore_central));

    Router::new()
        .nest(API_PREFIX, agent_routes.merge(tenant_routes))
        .route("/metrics", get(ops::prometheus_metrics))
        .route("/healthz", get(ops::healthz))
        .with_state(state)
}
