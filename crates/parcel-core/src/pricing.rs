//! Delivery fee quotes.
//!
//! `fee = round((base(region) + distance_km * per_km_rate) * multiplier(size) + surcharge)`
//! where the surcharge is zero unless a per-kg weight rate is configured.

use crate::config::PricingConfig;
use crate::error::{LogisticsError, Result};
use crate::models::{ParcelSize, PricingQuote};

/// Quote a delivery fee. Callers supply the distance (usually from
/// [`crate::geo::distance`] between pickup and dropoff).
pub fn quote(
    config: &PricingConfig,
    distance_km: f64,
    size: ParcelSize,
    weight_kg: f64,
    region: &str,
) -> Result<PricingQuote> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(LogisticsError::InvalidQuoteInput(format!(
            "distance must be a non-negative number, got {distance_km}"
        )));
    }
    if !weight_kg.is_finite() || weight_kg < 0.0 {
        return Err(LogisticsError::InvalidQuoteInput(format!(
            "weight must be a non-negative number, got {weight_kg}"
        )));
    }
    let size_multiplier = *config.size_multipliers.get(&size).ok_or_else(|| {
        LogisticsError::InvalidQuoteInput(format!("no multiplier configured for size {size}"))
    })?;

    let base_rate = config.base_rate(region);
    let surcharge = config
        .weight_surcharge_per_kg
        .map(|per_kg| weight_kg * per_kg)
        .unwrap_or(0.0);

    let fee_total = ((base_rate + distance_km * config.per_km_rate) * size_multiplier + surcharge).round();
    if !fee_total.is_finite() || fee_total < 0.0 {
        return Err(LogisticsError::InvalidQuoteInput(format!(
            "inputs produce an unusable fee ({fee_total})"
        )));
    }

    Ok(PricingQuote {
        distance_km,
        base_rate,
        size_multiplier,
        surcharge,
        fee_total,
        currency: config.currency.clone(),
    })
}

/// Quote with the size class given as text, e.g. from a request body.
pub fn quote_named(
    config: &PricingConfig,
    distance_km: f64,
    size: &str,
    weight_kg: f64,
    region: &str,
) -> Result<PricingQuote> {
    let size: ParcelSize = size.parse()?;
    quote(config, distance_km, size, weight_kg, region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn example_config() -> PricingConfig {
        PricingConfig {
            currency: "AOA".into(),
            base_rates: BTreeMap::from([("Luanda".to_string(), 750.0)]),
            default_base_rate: 500.0,
            per_km_rate: 200.0,
            size_multipliers: BTreeMap::from([
                (ParcelSize::Small, 1.0),
                (ParcelSize::Medium, 1.4),
            ]),
            weight_surcharge_per_kg: None,
        }
    }

    #[test]
    fn worked_examples() {
        let config = example_config();
        let small = quote(&config, 10.0, ParcelSize::Small, 2.0, "Luanda").unwrap();
        assert_eq!(small.fee_total, 2750.0);
        assert_eq!(small.base_rate, 750.0);
        assert_eq!(small.currency, "AOA");

        let medium = quote(&config, 10.0, ParcelSize::Medium, 2.0, "Luanda").unwrap();
        assert_eq!(medium.fee_total, 3850.0);
        assert_eq!(medium.size_multiplier, 1.4);
    }

    #[test]
    fn unknown_region_uses_default_rate() {
        let config = example_config();
        let q = quote(&config, 10.0, ParcelSize::Small, 0.0, "Namibe").unwrap();
        assert_eq!(q.base_rate, 500.0);
        assert_eq!(q.fee_total, 2500.0);
    }

    #[test]
    fn fee_increases_with_distance() {
        let config = PricingConfig::default();
        let mut previous = -1.0;
        for km in [0.0, 0.5, 1.0, 2.5, 10.0, 42.0, 300.0] {
            let fee = quote(&config, km, ParcelSize::Large, 1.0, "Luanda")
                .unwrap()
                .fee_total;
            assert!(fee > previous, "fee {fee} at {km} km not above {previous}");
            previous = fee;
        }
    }

    #[test]
    fn fee_non_decreasing_across_sizes() {
        let config = PricingConfig::default();
        let fees: Vec<f64> = ParcelSize::ALL
            .iter()
            .map(|size| quote(&config, 7.3, *size, 1.0, "Huambo").unwrap().fee_total)
            .collect();
        assert!(fees.windows(2).all(|w| w[0] <= w[1]), "{fees:?}");
    }

    #[test]
    fn weight_is_a_no_op_unless_enabled() {
        let mut config = example_config();
        let light = quote(&config, 5.0, ParcelSize::Small, 0.5, "Luanda").unwrap();
        let heavy = quote(&config, 5.0, ParcelSize::Small, 40.0, "Luanda").unwrap();
        assert_eq!(light.fee_total, heavy.fee_total);
        assert_eq!(heavy.surcharge, 0.0);

        config.weight_surcharge_per_kg = Some(10.0);
        let heavy = quote(&config, 5.0, ParcelSize::Small, 40.0, "Luanda").unwrap();
        assert_eq!(heavy.surcharge, 400.0);
        assert_eq!(heavy.fee_total, 1750.0 + 400.0);
    }

    #[test]
    fn rejects_bad_input() {
        let config = example_config();
        assert!(matches!(
            quote(&config, -1.0, ParcelSize::Small, 1.0, "Luanda"),
            Err(LogisticsError::InvalidQuoteInput(_))
        ));
        assert!(quote(&config, f64::NAN, ParcelSize::Small, 1.0, "Luanda").is_err());
        assert!(quote(&config, 1.0, ParcelSize::Small, -3.0, "Luanda").is_err());
        // Size class missing from this table
        assert!(quote(&config, 1.0, ParcelSize::Large, 1.0, "Luanda").is_err());
        assert!(quote_named(&config, 1.0, "gigantic", 1.0, "Luanda").is_err());
        assert!(quote_named(&config, 1.0, "medium", 1.0, "Luanda").is_ok());
    }
}
