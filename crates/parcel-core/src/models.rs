//! Core data models for the logistics core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LogisticsError;

/// A validated latitude/longitude pair in decimal degrees.
///
/// Construction rejects non-finite and out-of-range values, so every
/// `Coordinate` in circulation is usable by the geo functions as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = LogisticsError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LogisticsError> {
        let invalid = |reason: &str| LogisticsError::InvalidCoordinate {
            lat: latitude,
            lon: longitude,
            reason: reason.to_string(),
        };
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(invalid("non-finite component"));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(invalid("latitude outside [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid("longitude outside [-180, 180]"));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    Pickup,
    Dropoff,
}

/// One leg of a delivery. A pickup and its dropoff share `package_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub kind: StopKind,
    pub location: Coordinate,
    pub package_id: String,
    #[serde(default)]
    pub earliest_departure: Option<DateTime<Utc>>,
}

impl Stop {
    pub fn pickup(stop_id: impl Into<String>, package_id: impl Into<String>, location: Coordinate) -> Self {
        Self {
            stop_id: stop_id.into(),
            kind: StopKind::Pickup,
            location,
            package_id: package_id.into(),
            earliest_departure: None,
        }
    }

    pub fn dropoff(stop_id: impl Into<String>, package_id: impl Into<String>, location: Coordinate) -> Self {
        Self {
            stop_id: stop_id.into(),
            kind: StopKind::Dropoff,
            location,
            package_id: package_id.into(),
            earliest_departure: None,
        }
    }

    pub fn with_earliest_departure(mut self, at: DateTime<Utc>) -> Self {
        self.earliest_departure = Some(at);
        self
    }
}

/// Where a route's duration estimate came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSource {
    /// Distance divided by the configured average speed
    #[default]
    Geometric,
    /// Real segment durations from a directions provider
    Provider,
    /// Provider was consulted but at least one leg fell back to geometry
    Degraded,
}

/// An ordered sequence of stops assigned to one courier.
///
/// Routes are replaced wholesale whenever the stop set changes; holders of
/// an older route keep a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub start: Coordinate,
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
    #[serde(default)]
    pub duration_source: DurationSource,
}

impl Route {
    /// Position of a stop in the visiting order.
    pub fn position_of(&self, stop_id: &str) -> Option<usize> {
        self.stops.iter().position(|s| s.stop_id == stop_id)
    }

    /// Index of the dropoff for a package, if the package is on this route.
    pub fn dropoff_index(&self, package_id: &str) -> Option<usize> {
        self.stops
            .iter()
            .position(|s| s.kind == StopKind::Dropoff && s.package_id == package_id)
    }

    /// Consecutive (from, to) pairs, starting at the route's start location.
    pub fn legs(&self) -> impl Iterator<Item = (Coordinate, Coordinate)> + '_ {
        std::iter::once(self.start)
            .chain(self.stops.iter().map(|s| s.location))
            .zip(self.stops.iter().map(|s| s.location))
    }
}

/// Parcel size class, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl ParcelSize {
    pub const ALL: [ParcelSize; 4] = [
        ParcelSize::Small,
        ParcelSize::Medium,
        ParcelSize::Large,
        ParcelSize::ExtraLarge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelSize::Small => "small",
            ParcelSize::Medium => "medium",
            ParcelSize::Large => "large",
            ParcelSize::ExtraLarge => "extra_large",
        }
    }
}

impl FromStr for ParcelSize {
    type Err = LogisticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(ParcelSize::Small),
            "medium" => Ok(ParcelSize::Medium),
            "large" => Ok(ParcelSize::Large),
            "extra_large" | "extra-large" => Ok(ParcelSize::ExtraLarge),
            other => Err(LogisticsError::InvalidQuoteInput(format!(
                "unknown size class '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ParcelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computed fee snapshot. Regenerated on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingQuote {
    pub distance_km: f64,
    pub base_rate: f64,
    pub size_multiplier: f64,
    pub surcharge: f64,
    pub fee_total: f64,
    pub currency: String,
}

/// Position report from a courier device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub delivery_id: String,
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
}

impl LocationSample {
    pub fn new(delivery_id: impl Into<String>, coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            coordinate,
            timestamp,
            speed_kmh: None,
            heading_deg: None,
        }
    }

    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = Some(speed_kmh);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    /// Reported speed when it is usable for ETA.
    pub fn usable_speed_kmh(&self) -> Option<f64> {
        self.speed_kmh.filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Lifecycle transitions published by the delivery-status collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryTransition {
    Assigned {
        courier_id: String,
        package_id: String,
    },
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryTransition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryTransition::Delivered | DeliveryTransition::Cancelled)
    }
}
