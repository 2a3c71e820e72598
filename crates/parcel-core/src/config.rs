//! Tunable rates, speeds and limits for the logistics core.
//!
//! One [`LogisticsConfig`] is supplied at startup; nothing here is fetched
//! over the network.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LogisticsError, Result};
use crate::models::ParcelSize;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticsConfig {
    pub pricing: PricingConfig,
    pub routing: RoutingConfig,
    pub tracking: TrackingConfig,
}

impl LogisticsConfig {
    pub fn validate(&self) -> Result<()> {
        self.pricing.validate()?;
        self.routing.validate()?;
        self.tracking.validate()
    }
}

/// Fee model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// ISO currency code attached to every quote
    pub currency: String,
    /// Region name -> base rate
    pub base_rates: BTreeMap<String, f64>,
    /// Base rate for regions missing from `base_rates`
    pub default_base_rate: f64,
    /// Currency units per kilometre
    pub per_km_rate: f64,
    /// Size class -> multiplier, non-decreasing from small to extra_large
    pub size_multipliers: BTreeMap<ParcelSize, f64>,
    /// Currency units per kilogram. `None` keeps weight a no-op.
    pub weight_surcharge_per_kg: Option<f64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: "AOA".into(),
            base_rates: BTreeMap::from([
                ("Luanda".to_string(), 750.0),
                ("Benguela".to_string(), 650.0),
                ("Huambo".to_string(), 600.0),
                ("Lubango".to_string(), 600.0),
            ]),
            default_base_rate: 700.0,
            per_km_rate: 200.0,
            size_multipliers: BTreeMap::from([
                (ParcelSize::Small, 1.0),
                (ParcelSize::Medium, 1.4),
                (ParcelSize::Large, 1.8),
                (ParcelSize::ExtraLarge, 2.5),
            ]),
            weight_surcharge_per_kg: None,
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(LogisticsError::InvalidConfig(msg));

        for (region, rate) in &self.base_rates {
            if !rate.is_finite() || *rate < 0.0 {
                return invalid(format!("base rate for {region} must be >= 0, got {rate}"));
            }
        }
        if !self.default_base_rate.is_finite() || self.default_base_rate < 0.0 {
            return invalid(format!(
                "default base rate must be >= 0, got {}",
                self.default_base_rate
            ));
        }
        if !self.per_km_rate.is_finite() || self.per_km_rate < 0.0 {
            return invalid(format!("per-km rate must be >= 0, got {}", self.per_km_rate));
        }
        if let Some(rate) = self.weight_surcharge_per_kg {
            if !rate.is_finite() || rate < 0.0 {
                return invalid(format!("weight surcharge must be >= 0, got {rate}"));
            }
        }

        // BTreeMap iterates in size order, so a single pass checks monotonicity.
        let mut previous: Option<(ParcelSize, f64)> = None;
        for (size, factor) in &self.size_multipliers {
            if !factor.is_finite() || *factor <= 0.0 {
                return invalid(format!("multiplier for {size} must be > 0, got {factor}"));
            }
            if let Some((prev_size, prev_factor)) = previous {
                if *factor < prev_factor {
                    return invalid(format!(
                        "multiplier for {size} ({factor}) is below {prev_size} ({prev_factor})"
                    ));
                }
            }
            previous = Some((*size, *factor));
        }
        Ok(())
    }

    /// Base rate for a region, falling back to the default rate.
    pub fn base_rate(&self, region: &str) -> f64 {
        let region = region.trim();
        self.base_rates
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(region))
            .map(|(_, rate)| *rate)
            .unwrap_or(self.default_base_rate)
    }
}

/// Route planning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Speed used for geometric duration estimates (km/h)
    pub average_speed_kmh: f64,
    /// Max accepted improvement moves. `None` means n² for n stops.
    pub improvement_iteration_cap: Option<usize>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            average_speed_kmh: 30.0,
            improvement_iteration_cap: None,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.average_speed_kmh.is_finite() || self.average_speed_kmh <= 0.0 {
            return Err(LogisticsError::InvalidConfig(format!(
                "average speed must be > 0, got {}",
                self.average_speed_kmh
            )));
        }
        Ok(())
    }

    pub fn iteration_cap(&self, stop_count: usize) -> usize {
        self.improvement_iteration_cap
            .unwrap_or(stop_count.saturating_mul(stop_count))
            .max(1)
    }
}

/// Tracking station parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Retained samples per delivery
    pub history_max_samples: usize,
    /// Retained time window relative to the newest sample (minutes)
    pub history_max_age_minutes: Option<f64>,
    /// Implied speeds fed to the moving average
    pub ema_window: usize,
    /// Weight of the newest implied speed, in (0, 1]
    pub ema_alpha: f64,
    /// Cruising speed when nothing better is known (km/h)
    pub default_speed_kmh: f64,
    /// Distance at which the next planned stop counts as reached (km)
    pub arrival_radius_km: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            history_max_samples: 50,
            history_max_age_minutes: Some(30.0),
            ema_window: 5,
            ema_alpha: 0.3,
            default_speed_kmh: 25.0,
            arrival_radius_km: 0.05,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(LogisticsError::InvalidConfig(msg));

        if self.history_max_samples == 0 {
            return invalid("history must retain at least one sample".into());
        }
        if let Some(minutes) = self.history_max_age_minutes {
            if !minutes.is_finite() || minutes <= 0.0 {
                return invalid(format!("history age must be > 0, got {minutes}"));
            }
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return invalid(format!("ema alpha must be in (0, 1], got {}", self.ema_alpha));
        }
        if !self.default_speed_kmh.is_finite() || self.default_speed_kmh <= 0.0 {
            return invalid(format!(
                "default speed must be > 0, got {}",
                self.default_speed_kmh
            ));
        }
        if !self.arrival_radius_km.is_finite() || self.arrival_radius_km < 0.0 {
            return invalid(format!(
                "arrival radius must be >= 0, got {}",
                self.arrival_radius_km
            ));
        }
        Ok(())
    }
}
