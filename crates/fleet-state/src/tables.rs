//! redb table definitions for the fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the schema metadata table.

use redb::TableDefinition;

/// Schema metadata (`schema_version` → u64).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Central records keyed by central id. Soft-deleted rows stay here.
pub const CENTRALS: TableDefinition<&str, &[u8]> = TableDefinition::new("centrals");

/// Uniqueness index `{owner}/{name}` → central id, non-deleted rows only.
pub const CENTRAL_NAMES: TableDefinition<&str, &str> = TableDefinition::new("central_names");

/// Agent-pushed secret bundles keyed by central id.
pub const CENTRAL_SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("central_secrets");

/// Data-plane clusters keyed by cluster id.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("data_plane_clusters");

/// Leader-election leases keyed by lease name.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
