//! Geodesic math for distances and radius checks.

use crate::error::Result;
use crate::models::Coordinate;

/// Mean Earth radius used by the spherical model.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres, unrounded.
///
/// Standard haversine formula on a sphere of radius [`EARTH_RADIUS_KM`].
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.latitude().to_radians();
    let phi2 = b.latitude().to_radians();
    let dphi = (b.latitude() - a.latitude()).to_radians();
    let dlambda = (b.longitude() - a.longitude()).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Great-circle distance in kilometres, rounded to two decimal places.
///
/// Symmetric, zero for identical points. Every distance the planner and
/// the tracking station reason about comes from here.
pub fn distance(a: &Coordinate, b: &Coordinate) -> f64 {
    round_km(haversine_km(a, b))
}

/// Distance between raw degree values, validating both points first.
pub fn distance_between(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<f64> {
    let a = Coordinate::new(lat1, lon1)?;
    let b = Coordinate::new(lat2, lon2)?;
    Ok(distance(&a, &b))
}

/// True iff `point` lies within `radius_km` of `center`.
pub fn within_radius(center: &Coordinate, point: &Coordinate, radius_km: f64) -> bool {
    distance(center, point) <= radius_km
}

/// Sum of consecutive leg distances along a path of points.
pub fn path_distance_km(points: &[Coordinate]) -> f64 {
    points
        .windows(2)
        .map(|pair| distance(&pair[0], &pair[1]))
        .sum()
}

/// Initial bearing from `a` to `b` in degrees, 0 = north, clockwise, [0, 360).
pub fn bearing_deg(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.latitude().to_radians();
    let phi2 = b.latitude().to_radians();
    let delta_lambda = (b.longitude() - a.longitude()).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y).to_degrees().rem_euclid(360.0)
}

/// Destination point after travelling `distance_km` on `bearing_deg`.
pub fn offset_by_bearing(origin: &Coordinate, distance_km: f64, bearing_deg: f64) -> Result<Coordinate> {
    if distance_km.abs() <= f64::EPSILON {
        return Ok(*origin);
    }

    let lat1 = origin.latitude().to_radians();
    let lon1 = origin.longitude().to_radians();
    let bearing_rad = bearing_deg.to_radians();
    let angular_distance = distance_km / EARTH_RADIUS_KM;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let lon2 = (lon1 + y.atan2(x) + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI)
        - std::f64::consts::PI;

    Coordinate::new(lat2.to_degrees(), lon2.to_degrees())
}

fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}
