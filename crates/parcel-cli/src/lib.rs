//! Parcel CLI - command line tools around the logistics core.
//!
//! The `parcel` binary exposes distance, radius, quote and route planning
//! one-shots, plus an offline courier simulation driven through the
//! tracking station.

pub mod sim;

pub use sim::{run_simulation, Scenario, SimOptions, SimReport};
