//! fleet-providers: the external collaborators a central depends on.
//!
//! Each driver is an `async` trait so a real backend (OCM, Route 53, an SSO
//! admin API) can be plugged in behind it. The in-process implementations
//! shipped here keep `fleetd` runnable stand-alone and tests hermetic.
//!
//! # Components
//!
//! - **`quota`**: entitlement checks and subscription reservation
//! - **`dns`**: CNAME batch upsert/delete and change-status polling
//! - **`idp`**: dynamic OIDC client registration
//! - **`deadline`**: per-call timeout wrapper for driver calls

pub mod deadline;
pub mod dns;
pub mod error;
pub mod idp;
pub mod quota;

pub use deadline::with_deadline;
pub use dns::{ChangeStatus, DnsDriver, InMemoryDns, RecordBatch, RouteRecord};
pub use error::{ProviderError, ProviderResult};
pub use idp::{DynamicClient, IdpDriver, InMemoryIdp};
pub use quota::{
    EntitlementCache, QuotaListService, QuotaService, UnlimitedQuotaService, quota_service_from_config,
};
