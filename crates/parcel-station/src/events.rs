//! Outbound notification events.
//!
//! The station only emits these on a broadcast channel; delivering them to
//! customers is the notification service's job.

use chrono::{DateTime, Utc};
use parcel_core::{Route, SpeedSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    RouteRecomputed,
    EtaUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventPayload {
    RouteRecomputed {
        courier_id: String,
        route: Route,
    },
    EtaUpdated {
        eta_minutes: f64,
        eta_at: DateTime<Utc>,
        remaining_distance_km: f64,
        speed_kmh: f64,
        speed_source: SpeedSource,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreEvent {
    pub event_id: Uuid,
    pub delivery_id: String,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl CoreEvent {
    pub fn new(delivery_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            delivery_id: delivery_id.into(),
            emitted_at: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::RouteRecomputed { .. } => EventKind::RouteRecomputed,
            EventPayload::EtaUpdated { .. } => EventKind::EtaUpdated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_event_wire_shape() {
        let event = CoreEvent::new(
            "d1",
            EventPayload::EtaUpdated {
                eta_minutes: 12.5,
                eta_at: Utc::now(),
                remaining_distance_km: 6.25,
                speed_kmh: 30.0,
                speed_source: SpeedSource::Reported,
            },
        );
        assert_eq!(event.kind(), EventKind::EtaUpdated);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EtaUpdated");
        assert_eq!(json["delivery_id"], "d1");
        assert_eq!(json["payload"]["speed_source"], "reported");
    }
}
