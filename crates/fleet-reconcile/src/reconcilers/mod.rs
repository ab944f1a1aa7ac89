//! The concrete reconcilers, one per lifecycle concern.

mod accepted;
mod deleting;
mod deny_list;
mod expiration;
mod preparing;
mod provisioning;
mod ready;
mod routes;
mod status;

pub use accepted::AcceptedReconciler;
pub use deleting::DeletingReconciler;
pub use deny_list::DenyListReconciler;
pub use expiration::ExpirationReconciler;
pub use preparing::PreparingReconciler;
pub use provisioning::{ProvisioningReconciler, TIMEOUT_REASON};
pub use ready::ReadyReconciler;
pub use routes::{RoutesReconciler, record_batch};
pub use status::StatusReconciler;
