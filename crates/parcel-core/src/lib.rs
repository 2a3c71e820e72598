pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod pricing;
pub mod provider;
pub mod route_planner;
pub mod tracking;

pub use config::{LogisticsConfig, PricingConfig, RoutingConfig, TrackingConfig};
pub use error::{LogisticsError, Result};
pub use geo::{distance, within_radius};
pub use models::{
    Coordinate, DeliveryTransition, DurationSource, LocationSample, ParcelSize, PricingQuote,
    Route, Stop, StopKind,
};
pub use pricing::quote;
pub use provider::{DirectionsProvider, LegEstimate, ProviderError};
pub use route_planner::{plan_route, plan_route_with_progress, remaining_distance_km, time_route};
pub use tracking::{
    EtaContext, RouteProgress, SampleOutcome, SpeedSource, TrackingPhase, TrackingState,
    MAX_ETA_MINUTES,
};
