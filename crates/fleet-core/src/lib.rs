//! fleet-core: configuration, duration parsing, and clock for the fleet
//! control plane.
//!
//! Every component takes an explicit slice of [`FleetConfig`]; nothing reads
//! the environment after startup. Time flows through the [`Clock`] trait so
//! reconcilers can be driven deterministically in tests.

pub mod clock;
pub mod config;
pub mod duration;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use duration::{ConfigDuration, parse_duration};
