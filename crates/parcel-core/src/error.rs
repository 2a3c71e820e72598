//! Error taxonomy shared by every component of the logistics core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogisticsError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LogisticsError {
    #[error("invalid coordinate ({lat}, {lon}): {reason}")]
    InvalidCoordinate { lat: f64, lon: f64, reason: String },

    #[error("invalid quote input: {0}")]
    InvalidQuoteInput(String),

    #[error("route has no stops")]
    EmptyRoute,

    /// A dropoff whose pickup is neither in the stop set nor already picked up.
    #[error("dropoff {stop_id} has no matching pickup for package {package_id}")]
    UnmatchedStop { stop_id: String, package_id: String },

    #[error("precedence constraint cannot be satisfied: {0}")]
    ConstraintViolation(String),

    #[error("delivery {0} is not trackable")]
    DeliveryNotTrackable(String),

    /// Recoverable: the geometric fallback was used instead.
    #[error("directions provider degraded: {0}")]
    ProviderDegraded(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LogisticsError {
    /// Warnings are surfaced to callers but never fail an operation.
    pub fn is_warning(&self) -> bool {
        matches!(self, LogisticsError::ProviderDegraded(_))
    }
}
