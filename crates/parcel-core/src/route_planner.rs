//! Multi-stop route planning for one courier.
//!
//! Pickup-and-delivery ordering: every dropoff must follow its pickup.
//! Planning runs in two phases:
//!
//! 1. Nearest-neighbour construction from the courier's start position,
//!    only considering stops whose precedence is already satisfied.
//! 2. Bounded local search with segment reversals (2-opt) and pairwise
//!    position swaps, keeping only moves that shorten the route and keep
//!    every pickup ahead of its dropoff.
//!
//! Both phases are deterministic: ties resolve by earliest departure and
//! then by input order, and no randomness is involved.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::config::RoutingConfig;
use crate::error::{LogisticsError, Result};
use crate::geo::distance;
use crate::models::{Coordinate, DurationSource, Route, Stop, StopKind};
use crate::provider::DirectionsProvider;

/// Minimum gain (km) for a local-search move to count as an improvement.
const IMPROVEMENT_EPS_KM: f64 = 1e-9;

/// Plan a visiting order for a batch of stops starting at `start`.
pub fn plan_route(stops: &[Stop], start: Coordinate, config: &RoutingConfig) -> Result<Route> {
    plan_route_with_progress(stops, start, &HashSet::new(), config)
}

/// Plan a route where some packages are already on board.
///
/// Dropoffs for packages in `picked_up` have no pickup in the stop set and
/// are eligible from the start. Used when re-sequencing a route in progress.
pub fn plan_route_with_progress(
    stops: &[Stop],
    start: Coordinate,
    picked_up: &HashSet<String>,
    config: &RoutingConfig,
) -> Result<Route> {
    let problem = Problem::new(stops, start, picked_up)?;

    let constructed = problem.construct()?;
    let constructed_km = problem.cost(&constructed);

    let cap = config.iteration_cap(stops.len());
    let (order, moves) = problem.improve(constructed, cap);

    let route = build_route(
        start,
        order.iter().map(|&i| stops[i].clone()).collect(),
        config.average_speed_kmh,
    );

    tracing::debug!(
        stops = stops.len(),
        constructed_km,
        improved_km = route.total_distance_km,
        moves,
        "planned route"
    );

    Ok(route)
}

/// Assemble a route with geometric totals for an already ordered stop list.
pub fn build_route(start: Coordinate, stops: Vec<Stop>, average_speed_kmh: f64) -> Route {
    let mut route = Route {
        start,
        stops,
        total_distance_km: 0.0,
        total_duration_minutes: 0.0,
        duration_source: DurationSource::Geometric,
    };
    route.total_distance_km = legs_total_km(&route);
    route.total_duration_minutes = travel_minutes(route.total_distance_km, average_speed_kmh);
    route
}

/// Sum of consecutive leg distances, start included.
pub fn legs_total_km(route: &Route) -> f64 {
    route.legs().map(|(from, to)| distance(&from, &to)).sum()
}

/// Minutes needed to cover `distance_km` at `speed_kmh`. Zero for a
/// non-positive speed rather than infinity.
pub fn travel_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 || !speed_kmh.is_finite() {
        return 0.0;
    }
    (distance_km / speed_kmh * 60.0).max(0.0)
}

/// Distance still to travel from `position` through the stops
/// `next_index..=target_index` of `route`.
///
/// Returns zero once `next_index` has passed the target.
pub fn remaining_distance_km(
    route: &Route,
    position: &Coordinate,
    next_index: usize,
    target_index: usize,
) -> f64 {
    if next_index > target_index || next_index >= route.stops.len() {
        return 0.0;
    }
    let target_index = target_index.min(route.stops.len() - 1);

    let first = distance(position, &route.stops[next_index].location);
    let rest: f64 = route.stops[next_index..=target_index]
        .windows(2)
        .map(|pair| distance(&pair[0].location, &pair[1].location))
        .sum();
    first + rest
}

/// Re-time a route with provider leg durations.
///
/// Legs the provider cannot answer use the geometric estimate instead; in
/// that case the returned route is marked [`DurationSource::Degraded`] and a
/// [`LogisticsError::ProviderDegraded`] warning comes back alongside it.
/// Stop order and distances are left untouched.
pub fn time_route(
    route: &Route,
    provider: &dyn DirectionsProvider,
    average_speed_kmh: f64,
) -> (Route, Option<LogisticsError>) {
    let mut minutes = 0.0;
    let mut failures = 0usize;
    let mut first_failure: Option<String> = None;
    let mut legs = 0usize;

    for (from, to) in route.legs() {
        legs += 1;
        match provider.leg(&from, &to) {
            Ok(estimate) if estimate.is_usable() => minutes += estimate.duration_minutes,
            Ok(estimate) => {
                failures += 1;
                first_failure.get_or_insert_with(|| {
                    format!("unusable estimate {estimate:?} for {from} -> {to}")
                });
                minutes += travel_minutes(distance(&from, &to), average_speed_kmh);
            }
            Err(err) => {
                failures += 1;
                first_failure.get_or_insert_with(|| err.to_string());
                minutes += travel_minutes(distance(&from, &to), average_speed_kmh);
            }
        }
    }

    let mut timed = route.clone();
    timed.total_duration_minutes = minutes;

    if failures == 0 {
        timed.duration_source = DurationSource::Provider;
        return (timed, None);
    }

    timed.duration_source = DurationSource::Degraded;
    let reason = format!(
        "{failures} of {legs} legs used the geometric estimate ({})",
        first_failure.unwrap_or_default()
    );
    tracing::warn!("Directions provider degraded: {}", reason);
    (timed, Some(LogisticsError::ProviderDegraded(reason)))
}

struct Problem<'a> {
    stops: &'a [Stop],
    /// (n + 1) x (n + 1) distance matrix; index 0 is the start position,
    /// index i + 1 is `stops[i]`.
    dist: Vec<Vec<f64>>,
    /// For each stop, the stop that must be visited before it.
    predecessor: Vec<Option<usize>>,
}

impl<'a> Problem<'a> {
    fn new(stops: &'a [Stop], start: Coordinate, picked_up: &HashSet<String>) -> Result<Self> {
        if stops.is_empty() {
            return Err(LogisticsError::EmptyRoute);
        }

        let mut seen_ids = HashSet::with_capacity(stops.len());
        let mut pickups: HashMap<&str, usize> = HashMap::new();
        let mut dropoffs: HashMap<&str, usize> = HashMap::new();

        for (idx, stop) in stops.iter().enumerate() {
            if !seen_ids.insert(stop.stop_id.as_str()) {
                return Err(LogisticsError::ConstraintViolation(format!(
                    "stop id {} appears more than once",
                    stop.stop_id
                )));
            }
            let slot = match stop.kind {
                StopKind::Pickup => &mut pickups,
                StopKind::Dropoff => &mut dropoffs,
            };
            if slot.insert(stop.package_id.as_str(), idx).is_some() {
                return Err(LogisticsError::ConstraintViolation(format!(
                    "package {} has more than one {:?} stop",
                    stop.package_id, stop.kind
                )));
            }
            if stop.kind == StopKind::Pickup && picked_up.contains(&stop.package_id) {
                return Err(LogisticsError::ConstraintViolation(format!(
                    "package {} is already picked up but has a pickup stop",
                    stop.package_id
                )));
            }
        }

        let mut predecessor = vec![None; stops.len()];
        for (drop_idx, stop) in stops.iter().enumerate() {
            if stop.kind != StopKind::Dropoff {
                continue;
            }
            match pickups.get(stop.package_id.as_str()) {
                Some(&pick_idx) => predecessor[drop_idx] = Some(pick_idx),
                None if picked_up.contains(&stop.package_id) => {}
                None => {
                    return Err(LogisticsError::UnmatchedStop {
                        stop_id: stop.stop_id.clone(),
                        package_id: stop.package_id.clone(),
                    })
                }
            }
        }

        let points: Vec<Coordinate> = std::iter::once(start)
            .chain(stops.iter().map(|s| s.location))
            .collect();
        let dist = points
            .iter()
            .map(|a| points.iter().map(|b| distance(a, b)).collect())
            .collect();

        Ok(Self {
            stops,
            dist,
            predecessor,
        })
    }

    fn len(&self) -> usize {
        self.stops.len()
    }

    /// Greedy nearest-neighbour order respecting precedence.
    fn construct(&self) -> Result<Vec<usize>> {
        let n = self.len();
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut current = 0usize; // matrix index

        while order.len() < n {
            let next = (0..n)
                .filter(|&i| !visited[i])
                .filter(|&i| self.predecessor[i].map_or(true, |p| visited[p]))
                .min_by(|&a, &b| {
                    self.dist[current][a + 1]
                        .total_cmp(&self.dist[current][b + 1])
                        .then_with(|| {
                            departure_order(
                                self.stops[a].earliest_departure,
                                self.stops[b].earliest_departure,
                            )
                        })
                        .then_with(|| a.cmp(&b))
                });

            let Some(next) = next else {
                return Err(LogisticsError::ConstraintViolation(
                    "no stop is eligible; pickup/dropoff pairing is cyclic".into(),
                ));
            };
            visited[next] = true;
            order.push(next);
            current = next + 1;
        }

        Ok(order)
    }

    /// First-improvement local search. Returns the order and the number of
    /// accepted moves, which never exceeds `cap`.
    fn improve(&self, mut order: Vec<usize>, cap: usize) -> (Vec<usize>, usize) {
        let n = order.len();
        let mut cost = self.cost(&order);
        let mut accepted = 0usize;

        while accepted < cap {
            let mut improved = false;

            for i in 0..n.saturating_sub(1) {
                for j in (i + 1)..n {
                    for mv in [Move::Reverse, Move::Swap] {
                        // Adjacent reversal and swap are the same move.
                        if mv == Move::Swap && j == i + 1 {
                            continue;
                        }
                        mv.apply(&mut order, i, j);
                        if self.is_feasible(&order) {
                            let candidate = self.cost(&order);
                            if candidate + IMPROVEMENT_EPS_KM < cost {
                                cost = candidate;
                                accepted += 1;
                                improved = true;
                                if accepted >= cap {
                                    return (order, accepted);
                                }
                                continue;
                            }
                        }
                        mv.apply(&mut order, i, j);
                    }
                }
            }

            if !improved {
                break;
            }
        }

        (order, accepted)
    }

    fn cost(&self, order: &[usize]) -> f64 {
        let mut total = 0.0;
        let mut prev = 0usize;
        for &stop in order {
            total += self.dist[prev][stop + 1];
            prev = stop + 1;
        }
        total
    }

    fn is_feasible(&self, order: &[usize]) -> bool {
        let mut position = vec![0usize; order.len()];
        for (pos, &stop) in order.iter().enumerate() {
            position[stop] = pos;
        }
        self.predecessor
            .iter()
            .enumerate()
            .all(|(stop, pred)| pred.map_or(true, |p| position[p] < position[stop]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    /// Reverse the segment `i..=j`.
    Reverse,
    /// Exchange positions `i` and `j`.
    Swap,
}

impl Move {
    /// Both moves are their own inverse.
    fn apply(self, order: &mut [usize], i: usize, j: usize) {
        match self {
            Move::Reverse => order[i..=j].reverse(),
            Move::Swap => order.swap(i, j),
        }
    }
}

/// Earlier departure first; stops without one sort last.
fn departure_order(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LegEstimate, ProviderError};
    use chrono::TimeZone;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    /// Point on the equator `x` hundredths of a degree east of the origin.
    fn x(hundredths: f64) -> Coordinate {
        c(0.0, hundredths / 100.0)
    }

    fn order_ids(route: &Route) -> Vec<&str> {
        route.stops.iter().map(|s| s.stop_id.as_str()).collect()
    }

    fn assert_precedence(route: &Route) {
        for (idx, stop) in route.stops.iter().enumerate() {
            if stop.kind == StopKind::Dropoff {
                let pickup = route
                    .stops
                    .iter()
                    .position(|s| s.kind == StopKind::Pickup && s.package_id == stop.package_id);
                if let Some(pickup) = pickup {
                    assert!(pickup < idx, "dropoff {} before its pickup", stop.stop_id);
                }
            }
        }
    }

    fn two_package_batch() -> Vec<Stop> {
        vec![
            Stop::pickup("pa", "A", x(1.0)),
            Stop::dropoff("da", "A", x(3.0)),
            Stop::pickup("pb", "B", x(2.0)),
            Stop::dropoff("db", "B", x(4.0)),
        ]
    }

    #[test]
    fn empty_stop_set_is_rejected() {
        let err = plan_route(&[], x(0.0), &RoutingConfig::default()).unwrap_err();
        assert_eq!(err, LogisticsError::EmptyRoute);
    }

    #[test]
    fn dropoff_without_pickup_is_unmatched() {
        let stops = vec![
            Stop::pickup("pa", "A", x(1.0)),
            Stop::dropoff("da", "A", x(2.0)),
            Stop::dropoff("db", "B", x(3.0)),
        ];
        let err = plan_route(&stops, x(0.0), &RoutingConfig::default()).unwrap_err();
        assert!(matches!(err, LogisticsError::UnmatchedStop { ref package_id, .. } if package_id == "B"));
    }

    #[test]
    fn malformed_pairing_is_a_constraint_violation() {
        let duplicate_pickup = vec![
            Stop::pickup("p1", "A", x(1.0)),
            Stop::pickup("p2", "A", x(2.0)),
            Stop::dropoff("d1", "A", x(3.0)),
        ];
        assert!(matches!(
            plan_route(&duplicate_pickup, x(0.0), &RoutingConfig::default()),
            Err(LogisticsError::ConstraintViolation(_))
        ));

        let duplicate_id = vec![
            Stop::pickup("s", "A", x(1.0)),
            Stop::dropoff("s", "A", x(3.0)),
        ];
        assert!(matches!(
            plan_route(&duplicate_id, x(0.0), &RoutingConfig::default()),
            Err(LogisticsError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn nearest_neighbour_interleaves_pairs() {
        let route = plan_route(&two_package_batch(), x(0.0), &RoutingConfig::default()).unwrap();
        assert_eq!(order_ids(&route), vec!["pa", "pb", "da", "db"]);
        assert_precedence(&route);
    }

    #[test]
    fn improvement_never_lengthens_construction() {
        let stops = vec![
            Stop::pickup("pa", "A", c(-8.80, 13.20)),
            Stop::dropoff("da", "A", c(-8.92, 13.18)),
            Stop::pickup("pb", "B", c(-8.83, 13.26)),
            Stop::dropoff("db", "B", c(-8.79, 13.31)),
            Stop::pickup("pc", "C", c(-8.90, 13.25)),
            Stop::dropoff("dc", "C", c(-8.81, 13.22)),
        ];
        let start = c(-8.84, 13.23);
        let problem = Problem::new(&stops, start, &HashSet::new()).unwrap();
        let constructed = problem.construct().unwrap();
        let constructed_km = problem.cost(&constructed);

        let route = plan_route(&stops, start, &RoutingConfig::default()).unwrap();
        assert!(route.total_distance_km <= constructed_km + 1e-9);
        assert_precedence(&route);
    }

    #[test]
    fn local_search_fixes_a_bad_order() {
        let stops = vec![
            Stop::pickup("p1", "A", x(1.0)),
            Stop::pickup("p2", "B", x(2.0)),
            Stop::pickup("p3", "C", x(3.0)),
        ];
        let problem = Problem::new(&stops, x(0.0), &HashSet::new()).unwrap();
        let bad = vec![1, 0, 2];
        let (order, moves) = problem.improve(bad.clone(), 9);
        assert_eq!(order, vec![0, 1, 2]);
        assert!(moves >= 1);
        assert!(problem.cost(&order) < problem.cost(&bad));
    }

    #[test]
    fn local_search_respects_precedence() {
        // Dropoff sits at the start; moving it first would be shorter but
        // would deliver before pickup.
        let stops = vec![
            Stop::pickup("p", "A", x(5.0)),
            Stop::dropoff("d", "A", x(0.0)),
        ];
        let route = plan_route(&stops, x(0.0), &RoutingConfig::default()).unwrap();
        assert_eq!(order_ids(&route), vec!["p", "d"]);
    }

    #[test]
    fn iteration_cap_bounds_moves() {
        let stops: Vec<Stop> = (0..6)
            .map(|i| Stop::pickup(format!("p{i}"), format!("pkg{i}"), x(i as f64 + 1.0)))
            .collect();
        let problem = Problem::new(&stops, x(0.0), &HashSet::new()).unwrap();
        let (_, moves) = problem.improve(vec![5, 4, 3, 2, 1, 0], 1);
        assert_eq!(moves, 1);
    }

    #[test]
    fn deterministic_across_calls() {
        let stops = vec![
            Stop::pickup("pa", "A", c(-8.80, 13.20)),
            Stop::dropoff("da", "A", c(-8.92, 13.18)),
            Stop::pickup("pb", "B", c(-8.83, 13.26)),
            Stop::dropoff("db", "B", c(-8.79, 13.31)),
        ];
        let config = RoutingConfig::default();
        let first = plan_route(&stops, c(-8.84, 13.23), &config).unwrap();
        for _ in 0..10 {
            assert_eq!(plan_route(&stops, c(-8.84, 13.23), &config).unwrap(), first);
        }
    }

    #[test]
    fn ties_break_on_departure_then_input_order() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        // Both pickups are equidistant from the start.
        let stops = vec![
            Stop::pickup("east", "A", x(1.0)).with_earliest_departure(late),
            Stop::pickup("west", "B", x(-1.0)).with_earliest_departure(early),
        ];
        let route = plan_route(&stops, x(0.0), &RoutingConfig::default()).unwrap();
        assert_eq!(route.stops[0].stop_id, "west");

        let stops = vec![
            Stop::pickup("east", "A", x(1.0)),
            Stop::pickup("west", "B", x(-1.0)),
        ];
        let route = plan_route(&stops, x(0.0), &RoutingConfig::default()).unwrap();
        assert_eq!(route.stops[0].stop_id, "east");
    }

    #[test]
    fn totals_match_leg_sum() {
        let route = plan_route(&two_package_batch(), x(0.0), &RoutingConfig::default()).unwrap();
        let expected: f64 = route.legs().map(|(a, b)| distance(&a, &b)).sum();
        assert!(route.total_distance_km >= 0.0);
        assert!((route.total_distance_km - expected).abs() < 1e-9);
        let minutes = route.total_distance_km / 30.0 * 60.0;
        assert!((route.total_duration_minutes - minutes).abs() < 1e-9);
        assert_eq!(route.duration_source, DurationSource::Geometric);
    }

    #[test]
    fn picked_up_packages_release_their_dropoffs() {
        let stops = vec![
            Stop::dropoff("da", "A", x(1.0)),
            Stop::pickup("pb", "B", x(2.0)),
            Stop::dropoff("db", "B", x(3.0)),
        ];
        let picked: HashSet<String> = ["A".to_string()].into();
        let route =
            plan_route_with_progress(&stops, x(0.0), &picked, &RoutingConfig::default()).unwrap();
        assert_eq!(order_ids(&route), vec!["da", "pb", "db"]);

        let stops_with_pickup = vec![Stop::pickup("pa", "A", x(1.0))];
        assert!(matches!(
            plan_route_with_progress(&stops_with_pickup, x(0.0), &picked, &RoutingConfig::default()),
            Err(LogisticsError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn remaining_distance_runs_to_target() {
        let route = plan_route(&two_package_batch(), x(0.0), &RoutingConfig::default()).unwrap();
        let here = x(0.5);
        let full = remaining_distance_km(&route, &here, 0, 3);
        let expected = distance(&here, &x(1.0)) + distance(&x(1.0), &x(2.0))
            + distance(&x(2.0), &x(3.0))
            + distance(&x(3.0), &x(4.0));
        assert!((full - expected).abs() < 1e-9);

        let to_second = remaining_distance_km(&route, &here, 0, 1);
        assert!(to_second < full);
        assert_eq!(remaining_distance_km(&route, &here, 4, 3), 0.0);
        assert_eq!(remaining_distance_km(&route, &here, 2, 1), 0.0);
    }

    struct FixedProvider {
        minutes: f64,
        fail_every_other: bool,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl DirectionsProvider for FixedProvider {
        fn leg(&self, from: &Coordinate, to: &Coordinate) -> std::result::Result<LegEstimate, ProviderError> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail_every_other && call % 2 == 1 {
                return Err(ProviderError::Unavailable("timeout".into()));
            }
            Ok(LegEstimate {
                distance_km: distance(from, to),
                duration_minutes: self.minutes,
                polyline: None,
            })
        }
    }

    #[test]
    fn provider_durations_replace_geometric_estimate() {
        let route = plan_route(&two_package_batch(), x(0.0), &RoutingConfig::default()).unwrap();
        let provider = FixedProvider {
            minutes: 7.0,
            fail_every_other: false,
            calls: Default::default(),
        };
        let (timed, warning) = time_route(&route, &provider, 30.0);
        assert!(warning.is_none());
        assert_eq!(timed.duration_source, DurationSource::Provider);
        assert!((timed.total_duration_minutes - 28.0).abs() < 1e-9);
        assert_eq!(timed.stops, route.stops);
    }

    #[test]
    fn provider_failures_degrade_without_aborting() {
        let route = plan_route(&two_package_batch(), x(0.0), &RoutingConfig::default()).unwrap();
        let provider = FixedProvider {
            minutes: 7.0,
            fail_every_other: true,
            calls: Default::default(),
        };
        let (timed, warning) = time_route(&route, &provider, 30.0);
        let warning = warning.expect("degraded warning");
        assert!(warning.is_warning());
        assert_eq!(timed.duration_source, DurationSource::Degraded);
        assert!(timed.total_duration_minutes > 0.0);
        assert_eq!(timed.total_distance_km, route.total_distance_km);
    }
}
