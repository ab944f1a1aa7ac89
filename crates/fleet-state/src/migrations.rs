//! Versioned, reversible schema migrations.
//!
//! The schema version lives in the `meta` table. `fleetd migrate` applies
//! every pending step; `fleetd migrate down` rolls back the latest one.

use redb::{Database, ReadableDatabase, ReadableTable, TableError, WriteTransaction};
use tracing::info;

use crate::error::{StateError, StateResult};
use crate::tables::*;

macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Step = fn(&WriteTransaction) -> StateResult<()>;

/// A single schema step.
pub struct Migration {
    pub version: u64,
    pub description: &'static str,
    up: Step,
    down: Step,
}

/// All migrations, in order. Versions are contiguous from 1.
pub fn migrations() -> &'static [Migration] {
    const MIGRATIONS: &[Migration] = &[
        Migration {
            version: 1,
            description: "create centrals and owner/name index",
            up: create_centrals,
            down: drop_centrals,
        },
        Migration {
            version: 2,
            description: "create data-plane clusters",
            up: create_clusters,
            down: drop_clusters,
        },
        Migration {
            version: 3,
            description: "create central secrets and leader leases",
            up: create_secrets_and_leases,
            down: drop_secrets_and_leases,
        },
    ];
    MIGRATIONS
}

fn create_centrals(txn: &WriteTransaction) -> StateResult<()> {
    txn.open_table(CENTRALS).map_err(map_err!(Table))?;
    txn.open_table(CENTRAL_NAMES).map_err(map_err!(Table))?;
    Ok(())
}

fn drop_centrals(txn: &WriteTransaction) -> StateResult<()> {
    txn.delete_table(CENTRAL_NAMES).map_err(map_err!(Table))?;
    txn.delete_table(CENTRALS).map_err(map_err!(Table))?;
    Ok(())
}

fn create_clusters(txn: &WriteTransaction) -> StateResult<()> {
    txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
    Ok(())
}

fn drop_clusters(txn: &WriteTransaction) -> StateResult<()> {
    txn.delete_table(CLUSTERS).map_err(map_err!(Table))?;
    Ok(())
}

fn create_secrets_and_leases(txn: &WriteTransaction) -> StateResult<()> {
    txn.open_table(CENTRAL_SECRETS).map_err(map_err!(Table))?;
    txn.open_table(LEASES).map_err(map_err!(Table))?;
    Ok(())
}

fn drop_secrets_and_leases(txn: &WriteTransaction) -> StateResult<()> {
    txn.delete_table(LEASES).map_err(map_err!(Table))?;
    txn.delete_table(CENTRAL_SECRETS).map_err(map_err!(Table))?;
    Ok(())
}

/// The version a fully migrated store reports.
pub fn latest_version() -> u64 {
    migrations().last().map(|m| m.version).unwrap_or(0)
}

/// Current schema version; 0 for a fresh database.
pub fn current_version(db: &Database) -> StateResult<u64> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = match txn.open_table(META) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(0),
        Err(e) => return Err(StateError::Table(e.to_string())),
    };
    let version = table
        .get(SCHEMA_VERSION_KEY)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    Ok(version)
}

/// Apply every pending migration. Returns the versions applied.
pub fn migrate_up(db: &Database) -> StateResult<Vec<u64>> {
    let current = current_version(db)?;
    let mut applied = Vec::new();

    for migration in migrations().iter().filter(|m| m.version > current) {
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        (migration.up)(&txn)?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            meta.insert(SCHEMA_VERSION_KEY, migration.version)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(
            version = migration.version,
            description = migration.description,
            "migration applied"
        );
        applied.push(migration.version);
    }

    Ok(applied)
}

/// Roll back the most recent migration. Returns the version rolled back.
pub fn migrate_down(db: &Database) -> StateResult<Option<u64>> {
    let current = current_version(db)?;
    let Some(migration) = migrations().iter().find(|m| m.version == current) else {
        return Ok(None);
    };

    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    (migration.down)(&txn)?;
    {
        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        meta.insert(SCHEMA_VERSION_KEY, migration.version - 1)
            .map_err(map_err!(Write))?;
    }
    txn.commit().map_err(map_err!(Transaction))?;
    info!(
        version = migration.version,
        description = migration.description,
        "migration rolled back"
    );
    Ok(Some(migration.version))
}
