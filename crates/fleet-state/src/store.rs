//! StateStore: redb-backed persistence for the fleet control plane.
//!
//! Provides typed operations over centrals, data-plane clusters, agent
//! secrets, and leases. All values are JSON-serialized into redb's `&[u8]`
//! value columns. Every central mutation runs in a single write transaction
//! that re-reads the row, so compare-and-set checks and revision bumps are
//! atomic with the write.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::migrations;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn read_central(table: &Table<'_, &'static str, &'static [u8]>, id: &str) -> StateResult<Option<Central>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn write_central(table: &mut Table<'_, &'static str, &'static [u8]>, central: &Central) -> StateResult<()> {
    let value = encode(central)?;
    table
        .insert(central.id.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// The schema is not migrated here; run [`StateStore::migrate`] (or
    /// `fleetd migrate`) first and check [`StateStore::ensure_schema_current`].
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "state store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Create an ephemeral, fully migrated in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.migrate()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    // ── Schema ─────────────────────────────────────────────────────

    /// Apply pending migrations. Returns the versions applied.
    pub fn migrate(&self) -> StateResult<Vec<u64>> {
        migrations::migrate_up(&self.db)
    }

    /// Roll back the latest migration.
    pub fn rollback_last(&self) -> StateResult<Option<u64>> {
        migrations::migrate_down(&self.db)
    }

    pub fn schema_version(&self) -> StateResult<u64> {
        migrations::current_version(&self.db)
    }

    /// Fail unless every migration has been applied.
    pub fn ensure_schema_current(&self) -> StateResult<()> {
        let current = self.schema_version()?;
        let latest = migrations::latest_version();
        if current != latest {
            return Err(StateError::Schema(format!(
                "store is at schema version {current}, expected {latest}; run `fleetd migrate`"
            )));
        }
        Ok(())
    }

    // ── Centrals: reads ────────────────────────────────────────────

    /// Scan every central row, including soft-deleted ones.
    fn scan_centrals(&self, mut keep: impl FnMut(&Central) -> bool) -> StateResult<Vec<Central>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CENTRALS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let central: Central = decode(value.value())?;
            if keep(&central) {
                results.push(central);
            }
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    /// Get a central by id, including soft-deleted rows (admin view).
    pub fn get_central_admin(&self, id: &str) -> StateResult<Option<Central>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CENTRALS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get a non-deleted central by id.
    pub fn get_central(&self, id: &str) -> StateResult<Option<Central>> {
        Ok(self
            .get_central_admin(id)?
            .filter(|c| c.status != CentralStatus::Deleted))
    }

    /// All non-deleted centrals, oldest first.
    pub fn list_centrals(&self) -> StateResult<Vec<Central>> {
        self.scan_centrals(|c| c.status != CentralStatus::Deleted)
    }

    /// Non-deleted centrals in any of the given statuses, oldest first.
    pub fn list_centrals_by_status(&self, statuses: &[CentralStatus]) -> StateResult<Vec<Central>> {
        self.scan_centrals(|c| c.status != CentralStatus::Deleted && statuses.contains(&c.status))
    }

    /// Non-deleted centrals assigned to a data-plane cluster, oldest first.
    pub fn list_centrals_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<Central>> {
        self.scan_centrals(|c| c.status != CentralStatus::Deleted && c.cluster_id == cluster_id)
    }

    /// Non-deleted centrals owned by a principal, oldest first.
    pub fn list_centrals_for_owner(&self, owner: &str) -> StateResult<Vec<Central>> {
        self.scan_centrals(|c| c.status != CentralStatus::Deleted && c.owner == owner)
    }

    /// Non-deleted centrals whose DNS routes are not yet in sync.
    pub fn list_centrals_needing_routes(&self) -> StateResult<Vec<Central>> {
        self.scan_centrals(|c| c.status != CentralStatus::Deleted && !c.routes_created)
    }

    /// Per-status counts of non-deleted centrals. Every status except
    /// `deleted` is reported, zeros included.
    pub fn count_by_status(&self) -> StateResult<Vec<StatusCount>> {
        let mut counts: BTreeMap<CentralStatus, u64> = CentralStatus::ALL
            .into_iter()
            .filter(|s| *s != CentralStatus::Deleted)
            .map(|s| (s, 0))
            .collect();
        for central in self.list_centrals()? {
            *counts.entry(central.status).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    /// Per-(cluster, region, instance type) counts of placed, non-deleted centrals.
    pub fn count_by_region(&self) -> StateResult<Vec<RegionCount>> {
        let mut counts: BTreeMap<(String, String, InstanceType), u64> = BTreeMap::new();
        for central in self.list_centrals()? {
            if central.cluster_id.is_empty() {
                continue;
            }
            *counts
                .entry((central.cluster_id, central.region, central.instance_type))
                .or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((cluster_id, region, instance_type), count)| RegionCount {
                cluster_id,
                region,
                instance_type,
                count,
            })
            .collect())
    }

    /// Capacity used per cluster and instance type.
    pub fn usage_by_cluster(&self) -> StateResult<HashMap<ClusterId, BTreeMap<InstanceType, u32>>> {
        let mut usage: HashMap<ClusterId, BTreeMap<InstanceType, u32>> = HashMap::new();
        for count in self.count_by_region()? {
            *usage
                .entry(count.cluster_id)
                .or_default()
                .entry(count.instance_type)
                .or_insert(0) += count.count as u32;
        }
        Ok(usage)
    }

    // ── Centrals: writes ───────────────────────────────────────────

    /// Insert a new central. Fails with `Conflict` when the id exists or a
    /// non-deleted central with the same (owner, name) exists.
    pub fn insert_central(&self, central: &Central) -> StateResult<Central> {
        let mut stored = central.clone();
        stored.revision = 1;
        let name_key = stored.name_key();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut names = txn.open_table(CENTRAL_NAMES).map_err(map_err!(Table))?;
            if names.get(name_key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!(
                    "central named {:?} already exists for owner {:?}",
                    stored.name, stored.owner
                )));
            }
            let mut table = txn.open_table(CENTRALS).map_err(map_err!(Table))?;
            if table.get(stored.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("central {} already exists", stored.id)));
            }
            write_central(&mut table, &stored)?;
            names
                .insert(name_key.as_str(), stored.id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(id = %stored.id, name = %stored.name, owner = %stored.owner, "central accepted");
        Ok(stored)
    }

    /// Overwrite a non-deleted central wholesale. The status must not change
    /// through this path; use [`StateStore::transition`] for that.
    pub fn update_central(&self, central: &Central, now: DateTime<Utc>) -> StateResult<Central> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored = {
            let mut table = txn.open_table(CENTRALS).map_err(map_err!(Table))?;
            let current = read_central(&table, &central.id)?
                .filter(|c| c.status != CentralStatus::Deleted)
                .ok_or_else(|| StateError::NotFound(format!("central {}", central.id)))?;
            if current.status != central.status {
                return Err(StateError::StatusMismatch {
                    id: central.id.clone(),
                    expected: central.status,
                    actual: current.status,
                });
            }
            let mut next = central.clone();
            next.revision = current.revision + 1;
            next.updated_at = now;
            write_central(&mut table, &next)?;
            next
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored)
    }

    /// Apply a partial update, leaving unset fields alone. The revision is
    /// bumped only when a field actually changed.
    pub fn update_ignore_nils(
        &self,
        id: &str,
        patch: &CentralPatch,
        now: DateTime<Utc>,
    ) -> StateResult<Central> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (stored, changed) = {
            let mut table = txn.open_table(CENTRALS).map_err(map_err!(Table))?;
            let mut central = read_central(&table, id)?
                .filter(|c| c.status != CentralStatus::Deleted)
                .ok_or_else(|| StateError::NotFound(format!("central {id}")))?;
            let changed = patch.apply(&mut central);
            if changed {
                central.revision += 1;
                central.updated_at = now;
                write_central(&mut table, &central)?;
            }
            (central, changed)
        };
        if changed {
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(%id, revision = stored.revision, "central patched");
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(stored)
    }

    /// Move a central from `from` to `to`, applying `mutate` in the same
    /// write.
    ///
    /// Fails with `StatusMismatch` when the stored status is not `from` and
    /// with `InvalidTransition` when `from → to` is not a lifecycle edge.
    /// Stamps `status_changed_at`, the first `entered_provisioning_at`, and
    /// on `deleted` the soft-delete time, releasing the owner/name index and
    /// purging stored secrets.
    pub fn transition(
        &self,
        id: &str,
        from: CentralStatus,
        to: CentralStatus,
        now: DateTime<Utc>,
        mutate: impl FnOnce(&mut Central),
    ) -> StateResult<Central> {
        if !from.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored = {
            let mut table = txn.open_table(CENTRALS).map_err(map_err!(Table))?;
            let mut central = read_central(&table, id)?
                .ok_or_else(|| StateError::NotFound(format!("central {id}")))?;
            if central.status != from {
                return Err(StateError::StatusMismatch {
                    id: id.to_string(),
                    expected: from,
                    actual: central.status,
                });
            }

            mutate(&mut central);
            central.id = id.to_string();
            central.status = to;
            central.status_changed_at = now;
            central.updated_at = now;
            central.revision += 1;

            match to {
                CentralStatus::Provisioning if central.entered_provisioning_at.is_none() => {
                    central.entered_provisioning_at = Some(now);
                }
                CentralStatus::Deleted => {
                    central.deleted_at = Some(now);
                    let mut names = txn.open_table(CENTRAL_NAMES).map_err(map_err!(Table))?;
                    names
                        .remove(central.name_key().as_str())
                        .map_err(map_err!(Write))?;
                    let mut secrets = txn.open_table(CENTRAL_SECRETS).map_err(map_err!(Table))?;
                    secrets.remove(id).map_err(map_err!(Write))?;
                }
                _ => {}
            }

            write_central(&mut table, &central)?;
            central
        };
        txn.commit().map_err(map_err!(Transaction))?;
        info!(%id, %from, %to, revision = stored.revision, "central transitioned");
        Ok(stored)
    }

    /// Soft-delete a central in `deleting`.
    pub fn soft_delete(&self, id: &str, now: DateTime<Utc>) -> StateResult<Central> {
        self.transition(id, CentralStatus::Deleting, CentralStatus::Deleted, now, |_| {})
    }

    // ── Secrets ────────────────────────────────────────────────────

    /// Merge agent-pushed secrets into the stored bundle. Returns true when
    /// anything changed.
    pub fn merge_central_secrets(
        &self,
        central_id: &str,
        secrets: &BTreeMap<String, String>,
    ) -> StateResult<bool> {
        if secrets.is_empty() {
            return Ok(false);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let changed = {
            let mut table = txn.open_table(CENTRAL_SECRETS).map_err(map_err!(Table))?;
            let mut bundle: CentralSecrets = match table.get(central_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => CentralSecrets {
                    central_id: central_id.to_string(),
                    secrets: BTreeMap::new(),
                },
            };
            let mut changed = false;
            for (name, data) in secrets {
                if bundle.secrets.get(name) != Some(data) {
                    bundle.secrets.insert(name.clone(), data.clone());
                    changed = true;
                }
            }
            if changed {
                let value = encode(&bundle)?;
                table
                    .insert(central_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            changed
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(changed)
    }

    pub fn get_central_secrets(&self, central_id: &str) -> StateResult<Option<CentralSecrets>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CENTRAL_SECRETS).map_err(map_err!(Table))?;
        match table.get(central_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    // ── Data-plane clusters ────────────────────────────────────────

    /// Insert or update a data-plane cluster.
    pub fn put_cluster(&self, cluster: &DataPlaneCluster) -> StateResult<()> {
        let value = encode(cluster)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table
                .insert(cluster.cluster_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %cluster.cluster_id, "cluster stored");
        Ok(())
    }

    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<DataPlaneCluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(cluster_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all clusters, ordered by id.
    pub fn list_clusters(&self) -> StateResult<Vec<DataPlaneCluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete a cluster by id. Returns true if it existed.
    pub fn delete_cluster(&self, cluster_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            existed = table.remove(cluster_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cluster_id, existed, "cluster deleted");
        Ok(existed)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Acquire or renew `name` for `holder`. Returns false when another
    /// holder owns an unexpired lease.
    pub fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        duration: std::time::Duration,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let acquired = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<Lease> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let acquired_at = match &current {
                Some(lease) if lease.holder == holder => Some(lease.acquired_at),
                Some(lease) if !lease.is_expired(now) => None,
                _ => Some(now),
            };
            match acquired_at {
                Some(acquired_at) => {
                    let lease = Lease {
                        name: name.to_string(),
                        holder: holder.to_string(),
                        acquired_at,
                        renewed_at: now,
                        duration_ms: duration.as_millis() as u64,
                    };
                    let value = encode(&lease)?;
                    table.insert(name, value.as_slice()).map_err(map_err!(Write))?;
                    true
                }
                None => false,
            }
        };
        if acquired {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(acquired)
    }

    /// Release `name` if `holder` owns it. Returns true if released.
    pub fn release_lease(&self, name: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<Lease> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match current {
                Some(lease) if lease.holder == holder => {
                    table.remove(name).map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(released)
    }

    pub fn get_lease(&self, name: &str) -> StateResult<Option<Lease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }
}
