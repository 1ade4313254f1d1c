use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`Sensor`](crate::Sensor) read.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct SensorError(pub String);

impl SensorError {
    pub fn new(message: impl Into<String>) -> Self {
        SensorError(message.into())
    }
}

/// Error type for the control core.
///
/// Every variant is recoverable; callers either propagate it or substitute
/// a documented fallback value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    /// The power telemetry cache is older than the allowed age, or was never filled.
    #[error("power telemetry is stale (cache age: {age:?})")]
    StaleTelemetry {
        /// Age of the cache, `None` if no frame has ever been decoded.
        age: Option<Duration>,
    },
    /// The sensor feeding a control loop could not be read.
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(#[from] SensorError),
    /// Invalid parameter value (NaN, infinity, or out of allowed range)
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// A lock was poisoned, indicating a panic in another thread
    #[error("lock was poisoned")]
    LockPoisoned,
}
