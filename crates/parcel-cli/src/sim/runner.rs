//! Drive a scenario through the tracking station.
//!
//! The courier follows its planned route at constant speed; every step
//! each undelivered parcel receives a location sample, stops whose arrival
//! time has passed are confirmed, and a reached dropoff ends that delivery.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parcel_core::{
    distance, quote, DeliveryTransition, LocationSample, LogisticsConfig, PricingQuote, Route,
    SampleOutcome, StopKind,
};
use parcel_station::{CoreEvent, EventKind, TrackingStation};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time;

use super::paths::{CourierPath, RoutePath};
use super::scenarios::Scenario;

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub speed_kmh: f64,
    /// Simulated seconds between location samples
    pub step_secs: f64,
    /// Report device speed on every other sample; the rest leave it to the
    /// moving average
    pub report_speed: bool,
    /// Wall-clock pause per step. `None` runs as fast as possible.
    pub tick: Option<Duration>,
    pub departure: DateTime<Utc>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            speed_kmh: 25.0,
            step_secs: 30.0,
            report_speed: true,
            tick: None,
            departure: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub delivery_id: String,
    pub quote: PricingQuote,
    pub first_eta_minutes: Option<f64>,
    pub delivered_after_minutes: Option<f64>,
    pub samples_accepted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub scenario: String,
    pub route: Route,
    pub deliveries: Vec<DeliveryOutcome>,
    pub route_events: usize,
    pub eta_events: usize,
    pub lagged_events: u64,
}

#[derive(Debug, Default)]
struct EventTally {
    route: usize,
    eta: usize,
    lagged: u64,
}

impl EventTally {
    fn drain(&mut self, events: &mut broadcast::Receiver<CoreEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => match event.kind() {
                    EventKind::RouteRecomputed => self.route += 1,
                    EventKind::EtaUpdated => self.eta += 1,
                },
                Err(TryRecvError::Lagged(missed)) => self.lagged += missed,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

pub async fn run_simulation(
    scenario: &Scenario,
    config: LogisticsConfig,
    opts: &SimOptions,
) -> Result<SimReport> {
    let station = TrackingStation::new(config);
    let mut events = station.subscribe();
    let mut tally = EventTally::default();

    let mut outcomes: BTreeMap<String, DeliveryOutcome> = BTreeMap::new();
    for plan in &scenario.deliveries {
        let quote = quote(
            &station.config().pricing,
            distance(&plan.pickup, &plan.dropoff),
            plan.size,
            plan.weight_kg,
            &scenario.region,
        )
        .with_context(|| format!("quoting {}", plan.delivery_id))?;

        station.apply_transition(
            &plan.delivery_id,
            DeliveryTransition::Assigned {
                courier_id: scenario.courier_id.clone(),
                package_id: plan.package_id.clone(),
            },
        )?;
        station.apply_transition(&plan.delivery_id, DeliveryTransition::InTransit)?;

        outcomes.insert(
            plan.delivery_id.clone(),
            DeliveryOutcome {
                delivery_id: plan.delivery_id.clone(),
                quote,
                first_eta_minutes: None,
                delivered_after_minutes: None,
                samples_accepted: 0,
            },
        );
    }

    let route = station
        .assign_route(&scenario.courier_id, &scenario.stops(), scenario.start)
        .context("planning courier route")?;
    tracing::info!(
        "Scenario {}: {} stops, {:.2} km, ~{:.0} min",
        scenario.name,
        route.stops.len(),
        route.total_distance_km,
        route.total_duration_minutes
    );

    let path = RoutePath::new(&route, opts.speed_kmh);
    let step = opts.step_secs.max(1.0);
    let mut arrivals = path.arrivals().iter().peekable();
    let mut active: BTreeSet<String> = outcomes.keys().cloned().collect();
    let mut interval = opts.tick.filter(|d| !d.is_zero()).map(time::interval);

    let mut t = 0.0_f64;
    let mut step_count = 0u64;
    loop {
        if let Some(interval) = interval.as_mut() {
            interval.tick().await;
        }

        let at = opts.departure + ChronoDuration::milliseconds((t * 1000.0).round() as i64);
        let position = path.position_at(t);
        let heading = path.heading_at(t);

        for delivery_id in &active {
            let mut sample = LocationSample::new(delivery_id, position, at).with_heading(heading);
            if opts.report_speed && step_count % 2 == 0 {
                sample = sample.with_speed(path.speed_kmh());
            }
            let report = station.ingest_sample(sample)?;
            if report.outcome == SampleOutcome::Accepted {
                if let Some(outcome) = outcomes.get_mut(delivery_id) {
                    outcome.samples_accepted += 1;
                    outcome
                        .first_eta_minutes
                        .get_or_insert(report.state.current_eta_minutes);
                }
            }
        }

        while let Some((stop_id, _)) = arrivals.next_if(|(_, arrival)| *arrival <= t) {
            let Some(stop) = route.stops.iter().find(|s| &s.stop_id == stop_id) else {
                continue;
            };
            // The courier passed the stop, so every parcel on board sees it.
            for delivery_id in &active {
                station.mark_stop_reached(delivery_id, stop_id)?;
            }
            if stop.kind != StopKind::Dropoff {
                continue;
            }
            let Some(plan) = scenario.delivery_for_package(&stop.package_id) else {
                continue;
            };
            if active.remove(&plan.delivery_id) {
                station.apply_transition(&plan.delivery_id, DeliveryTransition::Delivered)?;
                if let Some(outcome) = outcomes.get_mut(&plan.delivery_id) {
                    outcome.delivered_after_minutes = Some(t / 60.0);
                }
                tracing::info!("{} delivered after {:.1} min", plan.delivery_id, t / 60.0);
            }
        }

        tally.drain(&mut events);
        if active.is_empty() || t >= path.duration_secs() {
            break;
        }
        t = (t + step).min(path.duration_secs());
        step_count += 1;
    }

    if !active.is_empty() {
        tracing::warn!("{} deliveries never reached their dropoff", active.len());
    }

    Ok(SimReport {
        scenario: scenario.name.clone(),
        route: route.as_ref().clone(),
        deliveries: outcomes.into_values().collect(),
        route_events: tally.route,
        eta_events: tally.eta,
        lagged_events: tally.lagged,
    })
}
