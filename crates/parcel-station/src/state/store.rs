//! In-memory tracking station using DashMap.
//!
//! Deliveries are partitioned by id. Each delivery sits behind its own
//! mutex so sample ingestion and ETA recomputation for one delivery are
//! serialized while other deliveries proceed in parallel. Courier routes
//! live in a separate map and are replaced wholesale on every re-plan.

use dashmap::DashMap;
use parcel_core::models::{DeliveryTransition, LocationSample, Route, Stop, StopKind};
use parcel_core::route_planner::{plan_route_with_progress, time_route};
use parcel_core::tracking::{EtaContext, RouteProgress, SampleOutcome, TrackingPhase, TrackingState};
use parcel_core::{Coordinate, DirectionsProvider, LogisticsConfig, LogisticsError, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::events::{CoreEvent, EventPayload};

#[derive(Debug, Default)]
struct DeliverySlot {
    courier_id: Option<String>,
    package_id: Option<String>,
    in_transit: bool,
    phase: TrackingPhase,
    tracking: Option<TrackingState>,
    progress: RouteProgress,
    rejected_samples: u64,
}

#[derive(Debug, Default)]
struct CourierEntry {
    route: Option<Arc<Route>>,
    /// Bumped on every route replacement; used to drop stale merges.
    revision: u64,
    deliveries: BTreeSet<String>,
}

/// Read-only view of one delivery's tracking.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    pub delivery_id: String,
    pub phase: TrackingPhase,
    pub state: Option<TrackingState>,
    /// Samples discarded as stale or duplicate
    pub rejected_samples: u64,
    pub reached_stops: Vec<String>,
}

/// Result of [`TrackingStation::ingest_sample`].
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub outcome: SampleOutcome,
    pub state: TrackingState,
    pub rejected_samples: u64,
}

/// Thread-safe store of per-delivery tracking state and courier routes.
pub struct TrackingStation {
    config: LogisticsConfig,
    deliveries: DashMap<String, Arc<Mutex<DeliverySlot>>>,
    couriers: DashMap<String, CourierEntry>,
    events: broadcast::Sender<CoreEvent>,
}

impl TrackingStation {
    pub fn new(config: LogisticsConfig) -> Self {
        Self::with_event_capacity(config, Config::default().event_capacity)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_event_capacity(config.logistics.clone(), config.event_capacity)
    }

    pub fn with_event_capacity(config: LogisticsConfig, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            config,
            deliveries: DashMap::new(),
            couriers: DashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &LogisticsConfig {
        &self.config
    }

    /// Receive `RouteRecomputed` and `EtaUpdated` events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Apply a lifecycle transition from the delivery-status service.
    pub fn apply_transition(
        &self,
        delivery_id: &str,
        transition: DeliveryTransition,
    ) -> Result<TrackingPhase> {
        let slot = self.slot_or_insert(delivery_id);
        let mut guard = lock(&slot);

        if guard.phase == TrackingPhase::Stopped {
            return Err(LogisticsError::DeliveryNotTrackable(delivery_id.to_string()));
        }

        match transition {
            DeliveryTransition::Assigned {
                courier_id,
                package_id,
            } => {
                if let Some(previous) = guard.courier_id.replace(courier_id.clone()) {
                    if previous != courier_id {
                        if let Some(mut entry) = self.couriers.get_mut(&previous) {
                            entry.deliveries.remove(delivery_id);
                        }
                    }
                }
                guard.package_id = Some(package_id);
                self.couriers
                    .entry(courier_id.clone())
                    .or_default()
                    .deliveries
                    .insert(delivery_id.to_string());
                tracing::info!("Delivery {} assigned to courier {}", delivery_id, courier_id);
            }
            DeliveryTransition::InTransit => {
                guard.in_transit = true;
                tracing::info!("Delivery {} in transit", delivery_id);
            }
            terminal @ (DeliveryTransition::Delivered | DeliveryTransition::Cancelled) => {
                guard.phase = TrackingPhase::Stopped;
                guard.in_transit = false;
                guard.tracking = None;
                if let Some(courier_id) = guard.courier_id.as_deref() {
                    if let Some(mut entry) = self.couriers.get_mut(courier_id) {
                        entry.deliveries.remove(delivery_id);
                    }
                }
                tracing::info!("Delivery {} stopped ({:?})", delivery_id, terminal);
            }
        }

        Ok(guard.phase)
    }

    /// Ingest one location sample.
    ///
    /// Samples that are not strictly newer than the last accepted one are
    /// discarded silently and counted; the returned state is then unchanged.
    pub fn ingest_sample(&self, sample: LocationSample) -> Result<IngestReport> {
        let delivery_id = sample.delivery_id.clone();
        let slot = self
            .slot(&delivery_id)
            .ok_or_else(|| LogisticsError::DeliveryNotTrackable(delivery_id.clone()))?;
        let mut guard = lock(&slot);
        let slot = &mut *guard;

        if slot.phase == TrackingPhase::Stopped || !slot.in_transit {
            return Err(LogisticsError::DeliveryNotTrackable(delivery_id));
        }

        let route = slot.courier_id.as_deref().and_then(|id| self.courier_route(id));
        let ctx = EtaContext {
            route: route.as_deref(),
            package_id: slot.package_id.as_deref(),
            config: &self.config.tracking,
        };

        let outcome = match slot.tracking.as_mut() {
            Some(state) => state.ingest(sample, ctx, &mut slot.progress),
            None => {
                slot.tracking = Some(TrackingState::start(sample, ctx, &mut slot.progress));
                slot.phase = TrackingPhase::Tracking;
                SampleOutcome::Accepted
            }
        };

        let Some(state) = slot.tracking.clone() else {
            return Err(LogisticsError::DeliveryNotTrackable(delivery_id));
        };

        match outcome {
            SampleOutcome::Accepted => self.emit_eta(&delivery_id, &state),
            SampleOutcome::Discarded => {
                slot.rejected_samples += 1;
                tracing::debug!(
                    delivery_id = %delivery_id,
                    rejected = slot.rejected_samples,
                    "discarded stale sample"
                );
            }
        }

        Ok(IngestReport {
            outcome,
            state,
            rejected_samples: slot.rejected_samples,
        })
    }

    /// Retained samples for a delivery, most recent last.
    pub fn get_history(&self, delivery_id: &str) -> Result<Vec<LocationSample>> {
        let slot = self
            .slot(delivery_id)
            .ok_or_else(|| LogisticsError::DeliveryNotTrackable(delivery_id.to_string()))?;
        let guard = lock(&slot);
        Ok(guard
            .tracking
            .as_ref()
            .map(|state| state.sample_history.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn tracking_snapshot(&self, delivery_id: &str) -> Option<TrackingSnapshot> {
        let slot = self.slot(delivery_id)?;
        let guard = lock(&slot);
        Some(snapshot(delivery_id, &guard))
    }

    /// Externally confirm that a stop was reached (e.g. pickup scanned).
    pub fn mark_stop_reached(&self, delivery_id: &str, stop_id: &str) -> Result<TrackingSnapshot> {
        let slot = self
            .slot(delivery_id)
            .ok_or_else(|| LogisticsError::DeliveryNotTrackable(delivery_id.to_string()))?;
        let mut guard = lock(&slot);
        let slot = &mut *guard;

        if slot.phase == TrackingPhase::Stopped {
            return Err(LogisticsError::DeliveryNotTrackable(delivery_id.to_string()));
        }

        if slot.progress.mark_reached(stop_id) {
            self.refresh_eta_locked(delivery_id, slot);
        }
        Ok(snapshot(delivery_id, slot))
    }

    /// Remove every trace of a delivery.
    pub fn forget(&self, delivery_id: &str) -> bool {
        let Some((_, slot)) = self.deliveries.remove(delivery_id) else {
            return false;
        };
        let guard = lock(&slot);
        if let Some(courier_id) = guard.courier_id.as_deref() {
            if let Some(mut entry) = self.couriers.get_mut(courier_id) {
                entry.deliveries.remove(delivery_id);
            }
        }
        true
    }

    pub fn courier_route(&self, courier_id: &str) -> Option<Arc<Route>> {
        self.couriers
            .get(courier_id)
            .and_then(|entry| entry.route.clone())
    }

    pub fn active_deliveries(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|entry| lock(entry.value()).phase != TrackingPhase::Stopped)
            .count()
    }

    /// Re-plan a courier's route from the authoritative stop list.
    ///
    /// Stops already reached by any of the courier's deliveries are left
    /// out, and packages whose pickup was reached count as on board. The
    /// new route replaces the old one and every delivery on the courier gets
    /// a fresh ETA.
    pub fn assign_route(&self, courier_id: &str, stops: &[Stop], start: Coordinate) -> Result<Arc<Route>> {
        let delivery_ids = self.courier_deliveries(courier_id);
        let previous = self.courier_route(courier_id);

        let mut reached: HashSet<String> = HashSet::new();
        for delivery_id in &delivery_ids {
            if let Some(slot) = self.slot(delivery_id) {
                let guard = lock(&slot);
                reached.extend(guard.progress.reached().map(str::to_string));
            }
        }

        let picked_up: HashSet<String> = previous
            .iter()
            .flat_map(|route| route.stops.iter())
            .chain(stops.iter())
            .filter(|s| s.kind == StopKind::Pickup && reached.contains(&s.stop_id))
            .map(|s| s.package_id.clone())
            .collect();

        let remaining: Vec<Stop> = stops
            .iter()
            .filter(|s| !reached.contains(&s.stop_id))
            .cloned()
            .collect();

        let route = Arc::new(plan_route_with_progress(
            &remaining,
            start,
            &picked_up,
            &self.config.routing,
        )?);

        {
            let mut entry = self.couriers.entry(courier_id.to_string()).or_default();
            entry.route = Some(route.clone());
            entry.revision += 1;
        }

        tracing::info!(
            "Courier {} route re-planned: {} stops, {:.2} km",
            courier_id,
            route.stops.len(),
            route.total_distance_km
        );

        self.publish_route(courier_id, &route);
        Ok(route)
    }

    /// Replace the courier route's duration with provider leg durations.
    ///
    /// The provider runs on a blocking thread with no lock held. The result
    /// is merged only if the route was not re-planned in the meantime.
    /// Returns the `ProviderDegraded` warning when the provider fell short.
    pub async fn refresh_route_durations(
        &self,
        courier_id: &str,
        provider: Arc<dyn DirectionsProvider>,
    ) -> Result<Option<LogisticsError>> {
        let (route, revision) = {
            let entry = self
                .couriers
                .get(courier_id)
                .ok_or(LogisticsError::EmptyRoute)?;
            let route = entry.route.clone().ok_or(LogisticsError::EmptyRoute)?;
            (route, entry.revision)
        };

        let speed = self.config.routing.average_speed_kmh;
        let fallback = route.clone();
        let (timed, warning) = match tokio::task::spawn_blocking(move || {
            time_route(&route, provider.as_ref(), speed)
        })
        .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!("Directions provider task failed: {}", err);
                (
                    fallback.as_ref().clone(),
                    Some(LogisticsError::ProviderDegraded(err.to_string())),
                )
            }
        };

        let timed = Arc::new(timed);
        {
            let Some(mut entry) = self.couriers.get_mut(courier_id) else {
                return Ok(warning);
            };
            if entry.revision != revision {
                tracing::debug!(courier_id, "route changed during provider refresh; result dropped");
                return Ok(warning);
            }
            entry.route = Some(timed.clone());
            entry.revision += 1;
        }

        self.publish_route(courier_id, &timed);
        Ok(warning)
    }

    fn publish_route(&self, courier_id: &str, route: &Arc<Route>) {
        for delivery_id in self.courier_deliveries(courier_id) {
            let Some(slot) = self.slot(&delivery_id) else {
                continue;
            };
            let mut guard = lock(&slot);
            let slot = &mut *guard;
            if slot.phase == TrackingPhase::Stopped {
                continue;
            }
            let _ = self.events.send(CoreEvent::new(
                delivery_id.clone(),
                EventPayload::RouteRecomputed {
                    courier_id: courier_id.to_string(),
                    route: route.as_ref().clone(),
                },
            ));
            self.refresh_eta_locked(&delivery_id, slot);
        }
    }

    /// Recompute ETA against the current courier route. Caller holds the
    /// delivery lock.
    fn refresh_eta_locked(&self, delivery_id: &str, slot: &mut DeliverySlot) {
        let route = slot.courier_id.as_deref().and_then(|id| self.courier_route(id));
        let Some(state) = slot.tracking.as_mut() else {
            return;
        };
        let ctx = EtaContext {
            route: route.as_deref(),
            package_id: slot.package_id.as_deref(),
            config: &self.config.tracking,
        };
        state.recompute(ctx, &mut slot.progress);
        let state = state.clone();
        self.emit_eta(delivery_id, &state);
    }

    fn emit_eta(&self, delivery_id: &str, state: &TrackingState) {
        // No subscribers is fine; the collaborator may not be attached.
        let _ = self.events.send(CoreEvent::new(
            delivery_id,
            EventPayload::EtaUpdated {
                eta_minutes: state.current_eta_minutes,
                eta_at: state.current_eta_timestamp,
                remaining_distance_km: state.remaining_distance_km,
                speed_kmh: state.effective_speed_kmh,
                speed_source: state.speed_source,
            },
        ));
    }

    fn courier_deliveries(&self, courier_id: &str) -> Vec<String> {
        self.couriers
            .get(courier_id)
            .map(|entry| entry.deliveries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn slot(&self, delivery_id: &str) -> Option<Arc<Mutex<DeliverySlot>>> {
        self.deliveries.get(delivery_id).map(|entry| entry.value().clone())
    }

    fn slot_or_insert(&self, delivery_id: &str) -> Arc<Mutex<DeliverySlot>> {
        self.deliveries
            .entry(delivery_id.to_string())
            .or_default()
            .value()
            .clone()
    }
}

fn snapshot(delivery_id: &str, slot: &DeliverySlot) -> TrackingSnapshot {
    TrackingSnapshot {
        delivery_id: delivery_id.to_string(),
        phase: slot.phase,
        state: slot.tracking.clone(),
        rejected_samples: slot.rejected_samples,
        reached_stops: slot.progress.reached().map(str::to_string).collect(),
    }
}

/// Take the slot even if a previous holder panicked, so one failed call
/// cannot lock a delivery out for good. The slot is used as that holder
/// left it.
fn lock(slot: &Mutex<DeliverySlot>) -> MutexGuard<'_, DeliverySlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
