//! Cloud DNS driver.
//!
//! Centrals get CNAME records pointing their hosts at the cluster router.
//! Changes are submitted as batches; the backend returns a change id that is
//! polled until it reports `INSYNC`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// A single `host → router` CNAME.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub host: String,
    pub target: String,
}

/// Records submitted together for one central.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub central_id: String,
    pub records: Vec<RouteRecord>,
}

/// Propagation state of a submitted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    Pending,
    Insync,
}

#[async_trait]
pub trait DnsDriver: Send + Sync {
    /// Create or replace the batch's records. Returns the change id.
    async fn upsert_records(&self, batch: &RecordBatch) -> ProviderResult<String>;

    /// Delete the batch's records. Missing records are `NotFound`.
    async fn delete_records(&self, batch: &RecordBatch) -> ProviderResult<String>;

    async fn change_status(&self, change_id: &str) -> ProviderResult<ChangeStatus>;
}

#[derive(Debug, Default)]
struct DnsState {
    records: BTreeMap<String, String>,
    changes: HashMap<String, ChangeStatus>,
    next_change: u64,
}

/// In-process zone. Changes report `INSYNC` immediately unless
/// [`InMemoryDns::hold_changes`] is set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDns {
    state: Arc<Mutex<DnsState>>,
    hold: Arc<Mutex<bool>>,
}

impl InMemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave new changes `PENDING` until [`InMemoryDns::release_changes`].
    pub fn hold_changes(&self) {
        *self.hold.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    /// Mark every pending change `INSYNC` and stop holding new ones.
    pub fn release_changes(&self) {
        *self.hold.lock().unwrap_or_else(|e| e.into_inner()) = false;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for status in state.changes.values_mut() {
            *status = ChangeStatus::Insync;
        }
    }

    /// Current CNAME target for `host`.
    pub fn record(&self, host: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.get(host).cloned()
    }

    fn new_change(&self, state: &mut DnsState) -> String {
        state.next_change += 1;
        let id = format!("change-{}", state.next_change);
        let held = *self.hold.lock().unwrap_or_else(|e| e.into_inner());
        let status = if held {
            ChangeStatus::Pending
        } else {
            ChangeStatus::Insync
        };
        state.changes.insert(id.clone(), status);
        id
    }
}

#[async_trait]
impl DnsDriver for InMemoryDns {
    async fn upsert_records(&self, batch: &RecordBatch) -> ProviderResult<String> {
        if batch.records.is_empty() {
            return Err(ProviderError::Client(format!(
                "empty record batch for central {}",
                batch.central_id
            )));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for record in &batch.records {
            state.records.insert(record.host.clone(), record.target.clone());
        }
        let change = self.new_change(&mut state);
        debug!(central = %batch.central_id, %change, records = batch.records.len(), "dns upsert");
        Ok(change)
    }

    async fn delete_records(&self, batch: &RecordBatch) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for record in &batch.records {
            if state.records.remove(&record.host).is_some() {
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(ProviderError::NotFound(format!(
                "no records for central {}",
                batch.central_id
            )));
        }
        let change = self.new_change(&mut state);
        debug!(central = %batch.central_id, %change, removed, "dns delete");
        Ok(change)
    }

    async fn change_status(&self, change_id: &str) -> ProviderResult<ChangeStatus> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .changes
            .get(change_id)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("change {change_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RecordBatch {
        RecordBatch {
            central_id: "c-1".to_string(),
            records: vec![RouteRecord {
                host: "acs-c-1.example.com".to_string(),
                target: "router.c1.example.com".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn upsert_is_insync_by_default() {
        let dns = InMemoryDns::new();
        let change = dns.upsert_records(&batch()).await.unwrap();

        assert_eq!(dns.change_status(&change).await.unwrap(), ChangeStatus::Insync);
        assert_eq!(
            dns.record("acs-c-1.example.com").as_deref(),
            Some("router.c1.example.com")
        );
    }

    #[tokio::test]
    async fn held_changes_stay_pending_until_released() {
        let dns = InMemoryDns::new();
        dns.hold_changes();
        let change = dns.upsert_records(&batch()).await.unwrap();
        assert_eq!(dns.change_status(&change).await.unwrap(), ChangeStatus::Pending);

        dns.release_changes();
        assert_eq!(dns.change_status(&change).await.unwrap(), ChangeStatus::Insync);
    }

    #[tokio::test]
    async fn upsert_same_content_twice_stays_insync() {
        let dns = InMemoryDns::new();
        dns.upsert_records(&batch()).await.unwrap();
        let again = dns.upsert_records(&batch()).await.unwrap();
        assert_eq!(dns.change_status(&again).await.unwrap(), ChangeStatus::Insync);
    }

    #[tokio::test]
    async fn delete_missing_records_is_not_found() {
        let dns = InMemoryDns::new();
        dns.upsert_records(&batch()).await.unwrap();
        dns.delete_records(&batch()).await.unwrap();

        assert!(dns.delete_records(&batch()).await.unwrap_err().is_not_found());
        assert!(dns.record("acs-c-1.example.com").is_none());
    }

    #[test]
    fn change_status_wire_form() {
        assert_eq!(serde_json::to_string(&ChangeStatus::Insync).unwrap(), "\"INSYNC\"");
    }
}
