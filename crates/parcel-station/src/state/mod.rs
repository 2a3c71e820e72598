pub mod store;

pub use store::{IngestReport, TrackingSnapshot, TrackingStation};
