//! Per-delivery tracking state and ETA estimation.
//!
//! Everything here is single-owner and synchronous. The station crate
//! wraps one [`TrackingState`] per delivery behind its own lock.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use crate::config::TrackingConfig;
use crate::geo::{bearing_deg, distance, within_radius};
use crate::models::{Coordinate, LocationSample, Route};
use crate::route_planner::{remaining_distance_km, travel_minutes};

/// Upper bound on a reported ETA (one year). A near-zero speed would
/// otherwise push the arrival timestamp past what chrono can represent.
pub const MAX_ETA_MINUTES: f64 = 525_600.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPhase {
    /// No sample accepted yet
    #[default]
    NotTracked,
    /// Accepting samples and producing ETAs
    Tracking,
    /// Terminal; samples are refused
    Stopped,
}

/// Where the speed behind the current ETA came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    Reported,
    MovingAverage,
    Default,
}

/// Result of offering a sample to a [`TrackingState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Accepted,
    /// Not newer than the last accepted sample; state left untouched.
    Discarded,
}

/// Which stops of the courier route are done.
///
/// Keyed by stop id so progress survives a route being replaced by a
/// re-planned one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteProgress {
    reached: BTreeSet<String>,
}

impl RouteProgress {
    pub fn mark_reached(&mut self, stop_id: impl Into<String>) -> bool {
        self.reached.insert(stop_id.into())
    }

    pub fn is_reached(&self, stop_id: &str) -> bool {
        self.reached.contains(stop_id)
    }

    pub fn reached(&self) -> impl Iterator<Item = &str> {
        self.reached.iter().map(String::as_str)
    }

    /// First stop of `route` not yet reached.
    pub fn next_index(&self, route: &Route) -> Option<usize> {
        route.stops.iter().position(|s| !self.reached.contains(&s.stop_id))
    }

    /// Mark planned stops as reached while the courier is within
    /// `radius_km` of the next one.
    fn advance(&mut self, route: &Route, position: &Coordinate, radius_km: f64) {
        while let Some(idx) = self.next_index(route) {
            let stop = &route.stops[idx];
            if !within_radius(&stop.location, position, radius_km) {
                break;
            }
            tracing::debug!(stop_id = %stop.stop_id, "stop reached by proximity");
            self.reached.insert(stop.stop_id.clone());
        }
    }
}

/// Route and target the ETA is computed against.
#[derive(Debug, Clone, Copy)]
pub struct EtaContext<'a> {
    pub route: Option<&'a Route>,
    /// Package whose dropoff ends the ETA. `None` runs to the final stop.
    /// A package with no dropoff left on the route has nothing remaining.
    pub package_id: Option<&'a str>,
    pub config: &'a TrackingConfig,
}

impl<'a> EtaContext<'a> {
    fn target_index(&self, route: &Route) -> Option<usize> {
        match self.package_id {
            Some(pkg) => route.dropoff_index(pkg),
            None => route.stops.len().checked_sub(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub last_sample: LocationSample,
    /// Oldest first, newest last
    pub sample_history: VecDeque<LocationSample>,
    pub current_eta_minutes: f64,
    pub current_eta_timestamp: DateTime<Utc>,
    pub remaining_distance_km: f64,
    pub effective_speed_kmh: f64,
    pub speed_source: SpeedSource,
}

impl TrackingState {
    /// Begin tracking from the first accepted sample.
    pub fn start(sample: LocationSample, ctx: EtaContext<'_>, progress: &mut RouteProgress) -> Self {
        let mut state = Self {
            last_sample: sample.clone(),
            sample_history: VecDeque::with_capacity(ctx.config.history_max_samples.min(64)),
            current_eta_minutes: 0.0,
            current_eta_timestamp: sample.timestamp,
            remaining_distance_km: 0.0,
            effective_speed_kmh: ctx.config.default_speed_kmh,
            speed_source: SpeedSource::Default,
        };
        state.sample_history.push_back(sample);
        state.recompute(ctx, progress);
        state
    }

    /// Offer a new sample. Samples not strictly newer than the last
    /// accepted one are discarded without touching the state.
    pub fn ingest(
        &mut self,
        mut sample: LocationSample,
        ctx: EtaContext<'_>,
        progress: &mut RouteProgress,
    ) -> SampleOutcome {
        if sample.timestamp <= self.last_sample.timestamp {
            return SampleOutcome::Discarded;
        }

        if sample.heading_deg.is_none() && sample.coordinate != self.last_sample.coordinate {
            sample.heading_deg = Some(bearing_deg(&self.last_sample.coordinate, &sample.coordinate));
        }

        self.last_sample = sample.clone();
        self.sample_history.push_back(sample);
        self.evict(ctx.config);
        self.recompute(ctx, progress);
        SampleOutcome::Accepted
    }

    /// Recompute ETA from the last sample, e.g. after the route changed.
    pub fn recompute(&mut self, ctx: EtaContext<'_>, progress: &mut RouteProgress) {
        let position = self.last_sample.coordinate;

        self.remaining_distance_km = match ctx.route {
            Some(route) => {
                progress.advance(route, &position, ctx.config.arrival_radius_km);
                match (progress.next_index(route), ctx.target_index(route)) {
                    (Some(next), Some(target)) => remaining_distance_km(route, &position, next, target),
                    _ => 0.0,
                }
            }
            None => 0.0,
        };

        let (speed, source) = self.effective_speed(ctx.config);
        self.effective_speed_kmh = speed;
        self.speed_source = source;

        self.current_eta_minutes = travel_minutes(self.remaining_distance_km, speed).clamp(0.0, MAX_ETA_MINUTES);
        let millis = (self.current_eta_minutes * 60_000.0).round() as i64;
        self.current_eta_timestamp = TimeDelta::try_milliseconds(millis)
            .and_then(|eta| self.last_sample.timestamp.checked_add_signed(eta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Reported speed, else moving average of implied speeds, else default.
    fn effective_speed(&self, config: &TrackingConfig) -> (f64, SpeedSource) {
        if let Some(speed) = self.last_sample.usable_speed_kmh() {
            return (speed, SpeedSource::Reported);
        }
        match implied_speed_ema(&self.sample_history, config.ema_window, config.ema_alpha) {
            Some(speed) if speed.is_finite() && speed > 0.0 => (speed, SpeedSource::MovingAverage),
            _ => (config.default_speed_kmh, SpeedSource::Default),
        }
    }

    fn evict(&mut self, config: &TrackingConfig) {
        while self.sample_history.len() > config.history_max_samples {
            self.sample_history.pop_front();
        }
        // An age window reaching before the earliest representable instant
        // keeps everything.
        let horizon = config.history_max_age_minutes.and_then(|minutes| {
            TimeDelta::try_milliseconds((minutes * 60_000.0) as i64)
                .and_then(|age| self.last_sample.timestamp.checked_sub_signed(age))
        });
        if let Some(horizon) = horizon {
            while self
                .sample_history
                .front()
                .is_some_and(|oldest| oldest.timestamp < horizon)
            {
                self.sample_history.pop_front();
            }
        }
    }
}

/// Exponential moving average over the speeds implied by the last
/// `window` pairs of consecutive samples (km/h), oldest weighted least.
pub fn implied_speed_ema(history: &VecDeque<LocationSample>, window: usize, alpha: f64) -> Option<f64> {
    if window == 0 || history.len() < 2 {
        return None;
    }
    let skip = history.len().saturating_sub(window + 1);
    let recent: Vec<&LocationSample> = history.iter().skip(skip).collect();

    let mut ema: Option<f64> = None;
    for pair in recent.windows(2) {
        let hours = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            continue;
        }
        let speed = distance(&pair[0].coordinate, &pair[1].coordinate) / hours;
        ema = Some(match ema {
            None => speed,
            Some(prev) => alpha * speed + (1.0 - alpha) * prev,
        });
    }
    ema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use crate::models::Stop;
    use crate::route_planner::plan_route;
    use chrono::TimeZone;

    fn x(hundredths: f64) -> Coordinate {
        Coordinate::new(0.0, hundredths / 100.0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(secs: i64, pos: Coordinate) -> LocationSample {
        LocationSample::new("d1", pos, at(secs))
    }

    fn line_route() -> Route {
        let stops = vec![
            Stop::pickup("pa", "A", x(10.0)),
            Stop::dropoff("da", "A", x(20.0)),
        ];
        plan_route(&stops, x(0.0), &RoutingConfig::default()).unwrap()
    }

    #[test]
    fn out_of_order_sample_is_discarded() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: Some("A"),
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(100, x(1.0)), ctx, &mut progress);
        let before = state.clone();

        assert_eq!(state.ingest(sample(90, x(2.0)), ctx, &mut progress), SampleOutcome::Discarded);
        assert_eq!(state.ingest(sample(100, x(2.0)), ctx, &mut progress), SampleOutcome::Discarded);
        assert_eq!(state, before);
        assert_eq!(state.sample_history.len(), 1);
        assert_eq!(state.sample_history[0].timestamp, at(100));
    }

    #[test]
    fn eta_uses_reported_speed() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: Some("A"),
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let state = TrackingState::start(sample(0, x(0.0)).with_speed(60.0), ctx, &mut progress);

        let remaining = distance(&x(0.0), &x(10.0)) + distance(&x(10.0), &x(20.0));
        assert!((state.remaining_distance_km - remaining).abs() < 1e-9);
        assert_eq!(state.speed_source, SpeedSource::Reported);
        assert!((state.current_eta_minutes - remaining).abs() < 1e-9);
        assert!(state.current_eta_timestamp > at(0));
    }

    #[test]
    fn falls_back_to_default_then_moving_average() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: None,
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)), ctx, &mut progress);
        assert_eq!(state.speed_source, SpeedSource::Default);
        assert_eq!(state.effective_speed_kmh, config.default_speed_kmh);

        // 0.01 deg (~1.11 km) per minute, about 66.6 km/h
        state.ingest(sample(60, x(1.0)), ctx, &mut progress);
        state.ingest(sample(120, x(2.0)), ctx, &mut progress);
        assert_eq!(state.speed_source, SpeedSource::MovingAverage);
        assert!((state.effective_speed_kmh - 66.6).abs() < 0.1);
    }

    #[test]
    fn stationary_courier_uses_default_speed() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: None,
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(1.0)), ctx, &mut progress);
        state.ingest(sample(60, x(1.0)), ctx, &mut progress);
        assert_eq!(state.speed_source, SpeedSource::Default);
        assert!(state.current_eta_minutes >= 0.0);
    }

    #[test]
    fn eta_non_increasing_while_approaching() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: Some("A"),
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)).with_speed(30.0), ctx, &mut progress);
        let mut last_eta = state.current_eta_minutes;

        for step in 1..=9 {
            let s = sample(step * 30, x(step as f64)).with_speed(30.0);
            assert_eq!(state.ingest(s, ctx, &mut progress), SampleOutcome::Accepted);
            assert!(state.current_eta_minutes <= last_eta);
            assert!(state.current_eta_minutes >= 0.0);
            last_eta = state.current_eta_minutes;
        }
    }

    #[test]
    fn proximity_marks_stops_reached() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: Some("A"),
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)), ctx, &mut progress);

        state.ingest(sample(60, x(10.0)), ctx, &mut progress);
        assert!(progress.is_reached("pa"));
        assert_eq!(progress.next_index(&route), Some(1));
        assert!((state.remaining_distance_km - distance(&x(10.0), &x(20.0))).abs() < 1e-9);

        state.ingest(sample(120, x(20.0)), ctx, &mut progress);
        assert!(progress.is_reached("da"));
        assert_eq!(state.remaining_distance_km, 0.0);
        assert_eq!(state.current_eta_minutes, 0.0);
    }

    #[test]
    fn history_is_bounded_by_count_and_age() {
        let config = TrackingConfig {
            history_max_samples: 3,
            history_max_age_minutes: Some(2.0),
            ..TrackingConfig::default()
        };
        let ctx = EtaContext {
            route: None,
            package_id: None,
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)), ctx, &mut progress);
        for secs in [10, 20, 30] {
            state.ingest(sample(secs, x(0.0)), ctx, &mut progress);
        }
        let kept: Vec<_> = state.sample_history.iter().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![at(10), at(20), at(30)]);

        state.ingest(sample(200, x(0.0)), ctx, &mut progress);
        let kept: Vec<_> = state.sample_history.iter().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![at(200)]);
    }

    #[test]
    fn heading_is_inferred_when_missing() {
        let config = TrackingConfig::default();
        let ctx = EtaContext {
            route: None,
            package_id: None,
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)), ctx, &mut progress);
        state.ingest(sample(10, x(1.0)), ctx, &mut progress);
        let heading = state.last_sample.heading_deg.unwrap();
        assert!((heading - 90.0).abs() < 0.01);
        assert_eq!(state.current_eta_minutes, 0.0);
    }

    #[test]
    fn ema_weights_recent_speeds() {
        let mut history = VecDeque::new();
        history.push_back(sample(0, x(0.0)));
        history.push_back(sample(60, x(1.0))); // ~66.6 km/h
        history.push_back(sample(120, x(1.0))); // 0 km/h
        let ema = implied_speed_ema(&history, 5, 0.5).unwrap();
        assert!((ema - 33.3).abs() < 0.1);
        assert_eq!(implied_speed_ema(&history, 0, 0.5), None);

        // Window of one only sees the last pair.
        assert_eq!(implied_speed_ema(&history, 1, 0.5), Some(0.0));
    }

    #[test]
    fn crawling_speed_caps_eta_instead_of_overflowing() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: Some("A"),
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)), ctx, &mut progress);

        let outcome = state.ingest(sample(1, x(0.0)).with_speed(1e-9), ctx, &mut progress);
        assert_eq!(outcome, SampleOutcome::Accepted);
        assert_eq!(state.speed_source, SpeedSource::Reported);
        assert_eq!(state.current_eta_minutes, MAX_ETA_MINUTES);
        assert!(state.current_eta_timestamp > at(1));
        assert_eq!(state.sample_history.len(), 2);
    }

    #[test]
    fn unbounded_age_window_keeps_history() {
        let config = TrackingConfig {
            history_max_age_minutes: Some(1e15),
            ..TrackingConfig::default()
        };
        let ctx = EtaContext {
            route: None,
            package_id: None,
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let mut state = TrackingState::start(sample(0, x(0.0)), ctx, &mut progress);
        state.ingest(sample(60, x(1.0)), ctx, &mut progress);

        let kept: Vec<_> = state.sample_history.iter().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![at(0), at(60)]);
    }

    #[test]
    fn package_without_dropoff_on_route_has_nothing_remaining() {
        let config = TrackingConfig::default();
        let route = line_route();
        let ctx = EtaContext {
            route: Some(&route),
            package_id: Some("B"),
            config: &config,
        };
        let mut progress = RouteProgress::default();
        let state = TrackingState::start(sample(0, x(0.0)).with_speed(30.0), ctx, &mut progress);
        assert_eq!(state.remaining_distance_km, 0.0);
        assert_eq!(state.current_eta_minutes, 0.0);
        assert_eq!(state.current_eta_timestamp, at(0));

        // Without a package the final stop is the target.
        let ctx = EtaContext { package_id: None, ..ctx };
        let state = TrackingState::start(sample(0, x(0.0)).with_speed(30.0), ctx, &mut progress);
        assert!(state.remaining_distance_km > 0.0);
    }
}
