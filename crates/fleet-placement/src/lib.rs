//! fleet-placement: binds unplaced centrals to data-plane clusters.
//!
//! This crate decides *which* cluster hosts a central. It does not place
//! workloads inside a cluster (the shard agent does that).
//!
//! # Components
//!
//! - **`scorer`**: Cluster filtering and least-utilized ranking
//! - **`placer`**: `PlacementStrategy` trait and the store-backed strategy
//! - **`versions`**: Operator / central version selection on a cluster
//! - **`convert`**: Type conversions from state store types

pub mod convert;
pub mod error;
pub mod placer;
pub mod scorer;
pub mod versions;

pub use convert::{central_to_request, cluster_to_candidate};
pub use error::{PlacementError, PlacementResult};
pub use placer::{CapacityStrategy, PlacementStrategy, RegionCapacity, max_capacity_reached, offered_regions};
pub use scorer::{ClusterCandidate, ClusterScore, PlacementRequest, rank_clusters, score_cluster};
pub use versions::{DesiredVersions, desired_versions};
