//! Pre-defined and seeded delivery scenarios for simulation.

use parcel_core::geo::offset_by_bearing;
use parcel_core::{Coordinate, ParcelSize, Result, Stop};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Luanda city centre.
pub const DEFAULT_CENTER: (f64, f64) = (-8.8390, 13.2894);

/// One parcel to be moved from pickup to dropoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPlan {
    pub delivery_id: String,
    pub package_id: String,
    pub size: ParcelSize,
    pub weight_kg: f64,
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
}

/// A named scenario: one courier and the deliveries assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub region: String,
    pub courier_id: String,
    pub start: Coordinate,
    pub deliveries: Vec<DeliveryPlan>,
}

impl Scenario {
    /// Pickup and dropoff stops for every delivery.
    pub fn stops(&self) -> Vec<Stop> {
        self.deliveries
            .iter()
            .flat_map(|d| {
                [
                    Stop::pickup(format!("{}-pickup", d.delivery_id), &d.package_id, d.pickup),
                    Stop::dropoff(format!("{}-dropoff", d.delivery_id), &d.package_id, d.dropoff),
                ]
            })
            .collect()
    }

    pub fn delivery_for_package(&self, package_id: &str) -> Option<&DeliveryPlan> {
        self.deliveries.iter().find(|d| d.package_id == package_id)
    }
}

/// Two parcels along an east-west corridor through `center`.
///
/// - PKG001: picked up west of center, dropped east of it
/// - PKG002: picked up just east of center, dropped further west
pub fn create_corridor_scenario(center: Coordinate) -> Result<Scenario> {
    let west = |km: f64| offset_by_bearing(&center, km, 270.0);
    let east = |km: f64| offset_by_bearing(&center, km, 90.0);

    Ok(Scenario {
        name: "corridor".to_string(),
        region: "Luanda".to_string(),
        courier_id: "COURIER001".to_string(),
        start: west(4.0)?,
        deliveries: vec![
            DeliveryPlan {
                delivery_id: "DLV001".to_string(),
                package_id: "PKG001".to_string(),
                size: ParcelSize::Small,
                weight_kg: 1.2,
                pickup: west(3.0)?,
                dropoff: east(3.0)?,
            },
            DeliveryPlan {
                delivery_id: "DLV002".to_string(),
                package_id: "PKG002".to_string(),
                size: ParcelSize::Large,
                weight_kg: 14.0,
                pickup: east(1.0)?,
                dropoff: west(2.0)?,
            },
        ],
    })
}

/// `count` deliveries scattered within `radius_km` of `center`.
///
/// The same seed always produces the same scenario.
pub fn create_random_scenario(
    seed: u64,
    count: usize,
    center: Coordinate,
    radius_km: f64,
) -> Result<Scenario> {
    let mut rng = StdRng::seed_from_u64(seed);
    let radius_km = radius_km.max(0.5);

    let scatter = |rng: &mut StdRng| {
        let km = rng.random_range(0.2..radius_km);
        let bearing = rng.random_range(0.0..360.0);
        offset_by_bearing(&center, km, bearing)
    };

    let start = scatter(&mut rng)?;
    let mut deliveries = Vec::with_capacity(count);
    for i in 0..count {
        let size = ParcelSize::ALL[rng.random_range(0..ParcelSize::ALL.len())];
        let weight_kg = (rng.random_range(0.5..25.0_f64) * 10.0).round() / 10.0;
        deliveries.push(DeliveryPlan {
            delivery_id: format!("DLV{:03}", i + 1),
            package_id: format!("PKG{:03}", i + 1),
            size,
            weight_kg,
            pickup: scatter(&mut rng)?,
            dropoff: scatter(&mut rng)?,
        });
    }

    Ok(Scenario {
        name: format!("random-{seed}"),
        region: "Luanda".to_string(),
        courier_id: "COURIER001".to_string(),
        start,
        deliveries,
    })
}
