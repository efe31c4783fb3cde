//! Batch parameters supplied by the operator before a run.
//!
//! Every field carries an inclusive range. [`BatchParameters::validate`] checks them in
//! declaration order and reports the first violation, so nothing reaches the plant with an
//! out-of-range target.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BatchError, BatchResult};

/// Inclusive bounds for a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum allowed value (inclusive).
    pub min: f64,
    /// Maximum allowed value (inclusive).
    pub max: f64,
}

impl Bounds {
    const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check `value` against the bounds, rejecting NaN and infinities.
    pub fn check(&self, field: &'static str, value: f64) -> BatchResult<()> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(())
        } else {
            Err(BatchError::Validation {
                field,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Cooking duration in seconds.
pub const COOKING_DURATION_BOUNDS: Bounds = Bounds::new(0.0, 180.0);
/// Target digester temperature in °C.
pub const TARGET_TEMPERATURE_BOUNDS: Bounds = Bounds::new(20.0, 100.0);
/// Target digester pressure in bar.
pub const TARGET_PRESSURE_BOUNDS: Bounds = Bounds::new(0.0, 300.0);
/// Impregnation duration in seconds.
pub const IMPREGNATION_TIME_BOUNDS: Bounds = Bounds::new(0.0, 180.0);

/// Parameters for one batch. Immutable once a run has started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchParameters {
    /// How long the regulated cooking stage lasts (seconds).
    pub cooking_duration_secs: f64,
    /// Digester temperature to reach and hold (°C).
    pub target_temperature: f64,
    /// Digester pressure to hold during cooking (bar).
    pub target_pressure: f64,
    /// How long the chips soak after the digester is full (seconds).
    pub impregnation_time_secs: f64,
}

impl BatchParameters {
    /// Validate every field against its documented bound.
    pub fn validate(&self) -> BatchResult<()> {
        COOKING_DURATION_BOUNDS.check("cooking_duration_secs", self.cooking_duration_secs)?;
        TARGET_TEMPERATURE_BOUNDS.check("target_temperature", self.target_temperature)?;
        TARGET_PRESSURE_BOUNDS.check("target_pressure", self.target_pressure)?;
        IMPREGNATION_TIME_BOUNDS.check("impregnation_time_secs", self.impregnation_time_secs)?;
        Ok(())
    }

    /// Cooking duration as a [`Duration`]. Only meaningful after validation.
    pub fn cooking_duration(&self) -> Duration {
        Duration::from_secs_f64(self.cooking_duration_secs.max(0.0))
    }

    /// Impregnation duration as a [`Duration`]. Only meaningful after validation.
    pub fn impregnation_time(&self) -> Duration {
        Duration::from_secs_f64(self.impregnation_time_secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> BatchParameters {
        BatchParameters {
            cooking_duration_secs: 30.0,
            target_temperature: 90.0,
            target_pressure: 15.0,
            impregnation_time_secs: 30.0,
        }
    }

    #[test]
    fn test_nominal_parameters_validate() {
        assert!(nominal().validate().is_ok());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let params = BatchParameters {
            cooking_duration_secs: 180.0,
            target_temperature: 20.0,
            target_pressure: 300.0,
            impregnation_time_secs: 0.0,
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_pressure_out_of_range_is_rejected() {
        let params = BatchParameters {
            target_pressure: 400.0,
            ..nominal()
        };
        match params.validate() {
            Err(BatchError::Validation { field, value, .. }) => {
                assert_eq!(field, "target_pressure");
                assert_eq!(value, 400.0);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_temperature_below_minimum_is_rejected() {
        let params = BatchParameters {
            target_temperature: 19.5,
            ..nominal()
        };
        assert!(matches!(
            params.validate(),
            Err(BatchError::Validation {
                field: "target_temperature",
                ..
            })
        ));
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        let params = BatchParameters {
            cooking_duration_secs: f64::NAN,
            ..nominal()
        };
        assert!(params.validate().is_err());

        let params = BatchParameters {
            impregnation_time_secs: f64::INFINITY,
            ..nominal()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let params = nominal();
        assert_eq!(params.cooking_duration(), Duration::from_secs(30));
        assert_eq!(params.impregnation_time(), Duration::from_secs(30));
    }
}
