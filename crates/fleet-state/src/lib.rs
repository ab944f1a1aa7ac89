//! fleet-state: embedded state store for the fleet control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for central instances, data-plane clusters, agent-pushed secrets,
//! and leader-election leases.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! A secondary `{owner}/{name}` index enforces name uniqueness among
//! non-deleted centrals. Central rows are never removed; `deleted` is a soft
//! delete that hides the row from every non-admin query.
//!
//! Status changes go through [`StateStore::transition`], which checks the
//! lifecycle edge table and the caller's expected status inside the write
//! transaction. The store bumps `revision` on every observable change.

pub mod error;
pub mod migrations;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
