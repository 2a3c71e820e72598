//! Courier movement simulation.

pub mod paths;
pub mod runner;
pub mod scenarios;

pub use paths::{CourierPath, RoutePath};
pub use runner::{run_simulation, DeliveryOutcome, SimOptions, SimReport};
pub use scenarios::{create_corridor_scenario, create_random_scenario, DeliveryPlan, Scenario};
