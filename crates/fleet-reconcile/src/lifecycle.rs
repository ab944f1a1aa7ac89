//! Lifecycle moves shared by reconcilers and request handlers.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use fleet_state::{Central, CentralStatus, StateError, StateStore};

use crate::error::{ReconcileError, ReconcileResult};

/// Mark a central for teardown.
///
/// Centrals already on their way out are returned unchanged, so repeated
/// requests are harmless.
pub fn request_deprovision(
    store: &StateStore,
    id: &str,
    now: DateTime<Utc>,
) -> ReconcileResult<Central> {
    let central = store
        .get_central(id)?
        .ok_or_else(|| StateError::NotFound(format!("central {id}")))?;

    if central.status.is_deletion() {
        debug!(%id, status = %central.status, "central already being deleted");
        return Ok(central);
    }
    if !central.status.can_transition_to(CentralStatus::Deprovision) {
        return Err(ReconcileError::NotAllowed {
            id: id.to_string(),
            from: central.status,
            to: CentralStatus::Deprovision,
        });
    }
    let central = store.transition(id, central.status, CentralStatus::Deprovision, now, |_| {})?;
    Ok(central)
}

/// Move `central` to `failed`, recording `reason`.
pub fn fail(
    store: &StateStore,
    central: &Central,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Central, StateError> {
    let failed = store.transition(&central.id, central.status, CentralStatus::Failed, now, |c| {
        c.failed_reason = reason.to_string();
    })?;
    info!(id = %central.id, from = %central.status, %reason, "central failed");
    Ok(failed)
}

/// Admin restore of a failed central, either back to `accepted` (placement
/// starts over) or straight to `ready`.
pub fn restore_failed(
    store: &StateStore,
    id: &str,
    to: CentralStatus,
    now: DateTime<Utc>,
) -> ReconcileResult<Central> {
    if !matches!(to, CentralStatus::Accepted | CentralStatus::Ready) {
        return Err(ReconcileError::NotAllowed {
            id: id.to_string(),
            from: CentralStatus::Failed,
            to,
        });
    }
    let central = store.transition(id, CentralStatus::Failed, to, now, |c| {
        c.failed_reason.clear();
        if to == CentralStatus::Accepted {
            c.cluster_id.clear();
            c.operator_version.clear();
            c.central_version.clear();
            c.entered_provisioning_at = None;
        }
    })?;
    info!(%id, %to, "failed central restored");
    Ok(central)
}

/// Swallow concurrent-writer outcomes; anything else is reported.
pub(crate) fn benign<T>(result: Result<T, StateError>) -> Result<Option<T>, StateError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_benign_conflict() => {
            debug!(error = %e, "lost race with another writer");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(id: &str) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_central(&Central::new_request(id, "prod", "alice", "org", Utc::now()))
            .unwrap();
        store
    }

    #[test]
    fn deprovision_is_idempotent() {
        let store = store_with("c-1");
        let first = request_deprovision(&store, "c-1", Utc::now()).unwrap();
        assert_eq!(first.status, CentralStatus::Deprovision);

        let second = request_deprovision(&store, "c-1", Utc::now()).unwrap();
        assert_eq!(second.revision, first.revision);
    }

    #[test]
    fn deprovision_unknown_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = request_deprovision(&store, "nope", Utc::now()).unwrap_err();
        assert!(matches!(err, ReconcileError::State(e) if e.is_not_found()));
    }

    #[test]
    fn restore_to_accepted_clears_binding() {
        let store = store_with("c-1");
        let now = Utc::now();
        store
            .transition("c-1", CentralStatus::Accepted, CentralStatus::Preparing, now, |c| {
                c.cluster_id = "c1".to_string();
            })
            .unwrap();
        let central = store.get_central("c-1").unwrap().unwrap();
        fail(&store, &central, "boom", now).unwrap();

        let restored = restore_failed(&store, "c-1", CentralStatus::Accepted, now).unwrap();
        assert_eq!(restored.status, CentralStatus::Accepted);
        assert!(restored.cluster_id.is_empty());
        assert!(restored.failed_reason.is_empty());
    }

    #[test]
    fn restore_only_from_failed() {
        let store = store_with("c-1");
        let err = restore_failed(&store, "c-1", CentralStatus::Ready, Utc::now()).unwrap_err();
        assert!(matches!(err, ReconcileError::State(StateError::StatusMismatch { .. })));

        let err = restore_failed(&store, "c-1", CentralStatus::Deleting, Utc::now()).unwrap_err();
        assert!(matches!(err, ReconcileError::NotAllowed { .. }));
    }
}
