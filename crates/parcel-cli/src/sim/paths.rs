//! Courier movement along planned routes.

use parcel_core::geo::{bearing_deg, distance, offset_by_bearing};
use parcel_core::{Coordinate, Route};

/// Trait for courier path implementations.
pub trait CourierPath: Send + Sync {
    /// Position at `t` seconds after departure.
    fn position_at(&self, t: f64) -> Coordinate;

    /// Approximate heading at time t (degrees, 0 = North).
    fn heading_at(&self, t: f64) -> f64 {
        let here = self.position_at(t);
        let ahead = self.position_at(t + 1.0);
        if here == ahead {
            return 0.0;
        }
        bearing_deg(&here, &ahead)
    }

    fn speed_kmh(&self) -> f64;

    /// Seconds from departure until the courier stops moving.
    fn duration_secs(&self) -> f64;
}

#[derive(Debug, Clone)]
struct Leg {
    from: Coordinate,
    to: Coordinate,
    length_km: f64,
    bearing: f64,
    departs_at: f64,
    secs: f64,
}

/// Constant-speed drive from the route start through every stop in order.
#[derive(Debug, Clone)]
pub struct RoutePath {
    start: Coordinate,
    end: Coordinate,
    legs: Vec<Leg>,
    speed_kmh: f64,
    duration: f64,
    arrivals: Vec<(String, f64)>,
}

impl RoutePath {
    /// A non-positive speed leaves the courier parked at the start.
    pub fn new(route: &Route, speed_kmh: f64) -> Self {
        let moving = speed_kmh.is_finite() && speed_kmh > 0.0;
        let mut path = Self {
            start: route.start,
            end: route.start,
            legs: Vec::with_capacity(route.stops.len()),
            speed_kmh: if moving { speed_kmh } else { 0.0 },
            duration: 0.0,
            arrivals: Vec::with_capacity(route.stops.len()),
        };
        if !moving {
            return path;
        }

        let mut clock = 0.0;
        for ((from, to), stop) in route.legs().zip(route.stops.iter()) {
            let length_km = distance(&from, &to);
            let secs = length_km / speed_kmh * 3600.0;
            path.legs.push(Leg {
                from,
                to,
                length_km,
                bearing: bearing_deg(&from, &to),
                departs_at: clock,
                secs,
            });
            clock += secs;
            path.arrivals.push((stop.stop_id.clone(), clock));
            path.end = to;
        }
        path.duration = clock;
        path
    }

    /// Arrival time at each stop, in route order.
    pub fn arrivals(&self) -> &[(String, f64)] {
        &self.arrivals
    }
}

impl CourierPath for RoutePath {
    fn position_at(&self, t: f64) -> Coordinate {
        if t <= 0.0 || self.legs.is_empty() {
            return self.start;
        }
        let Some(leg) = self.legs.iter().find(|leg| t < leg.departs_at + leg.secs) else {
            return self.end;
        };
        if leg.secs <= 0.0 {
            return leg.to;
        }

        let progress = ((t - leg.departs_at) / leg.secs).clamp(0.0, 1.0);
        offset_by_bearing(&leg.from, leg.length_km * progress, leg.bearing).unwrap_or(leg.to)
    }

    fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    fn duration_secs(&self) -> f64 {
        self.duration
    }
}
