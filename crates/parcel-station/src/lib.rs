//! Tracking station for in-transit parcel deliveries.
//!
//! Wraps the pure planning and tracking functions of `parcel-core` in a
//! concurrent store partitioned per delivery, and emits notification events.

pub mod cache;
pub mod config;
pub mod events;
pub mod state;

pub use cache::CachingProvider;
pub use config::Config;
pub use events::{CoreEvent, EventKind, EventPayload};
pub use state::{IngestReport, TrackingSnapshot, TrackingStation};
