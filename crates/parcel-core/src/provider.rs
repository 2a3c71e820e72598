//! Contract for an optional directions provider.
//!
//! The core never talks to a mapping service itself. Callers hand in an
//! implementation of [`DirectionsProvider`]; any failure it reports is
//! absorbed by the geometric fallback.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Coordinate;

/// Travel estimate for one leg as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegEstimate {
    pub distance_km: f64,
    pub duration_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polyline: Option<String>,
}

impl LegEstimate {
    pub fn is_usable(&self) -> bool {
        self.duration_minutes.is_finite()
            && self.duration_minutes >= 0.0
            && self.distance_km.is_finite()
            && self.distance_km >= 0.0
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("no route between {from} and {to}")]
    NoRoute { from: Coordinate, to: Coordinate },
    #[error("provider returned an unusable estimate: {0}")]
    InvalidResponse(String),
}

/// Source of real travel distance/duration between two coordinates.
///
/// Implementations may block on I/O; callers must not hold per-delivery
/// locks while invoking them.
pub trait DirectionsProvider: Send + Sync {
    fn leg(&self, from: &Coordinate, to: &Coordinate) -> Result<LegEstimate, ProviderError>;
}
