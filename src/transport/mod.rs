//! Process transport boundary.
//!
//! The sequencer talks to the plant only through [`ProcessTransport`]: write a digital or
//! analog point, read the latest snapshot, ask whether the link is up. Real field-bus
//! clients live outside this crate; the implementations here are a recording mock for tests
//! and a small simulated plant for the CLI.

pub mod mock;
pub mod simulator;

pub use mock::MockTransport;
pub use simulator::SimulatedPlant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;
use crate::process::ProcessSnapshot;

/// Value written to an actuator point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointValue {
    /// On/off (valves, heater, pump preset).
    Digital(bool),
    /// Opening or power in percent, 0..=100.
    Analog(u8),
}

impl PointValue {
    /// True when the point is in its neutral (off/closed) position.
    pub fn is_neutral(&self) -> bool {
        matches!(self, PointValue::Digital(false) | PointValue::Analog(0))
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Digital(true) => write!(f, "on"),
            PointValue::Digital(false) => write!(f, "off"),
            PointValue::Analog(percent) => write!(f, "{percent}%"),
        }
    }
}

/// Capability interface onto the plant.
///
/// All methods may fail with a connectivity error; the sequencer treats any write failure as
/// an actuation failure.
#[async_trait]
pub trait ProcessTransport: Send + Sync {
    /// Switch a digital point on or off.
    async fn write_digital(&self, name: &str, value: bool) -> Result<(), TransportError>;

    /// Set an analog point (valve opening or pump power) in percent.
    async fn write_analog(&self, name: &str, percent: u8) -> Result<(), TransportError>;

    /// Latest sensor readings.
    fn snapshot(&self) -> ProcessSnapshot;

    /// Whether the link to the plant is up.
    fn is_connected(&self) -> bool;

    /// Write a [`PointValue`], dispatching on its kind.
    async fn write_point(&self, name: &str, value: PointValue) -> Result<(), TransportError> {
        match value {
            PointValue::Digital(on) => self.write_digital(name, on).await,
            PointValue::Analog(percent) => self.write_analog(name, percent).await,
        }
    }
}

/// Reject analog writes outside 0..=100.
pub(crate) fn check_percent(name: &str, percent: u8) -> Result<(), TransportError> {
    if percent > 100 {
        return Err(TransportError::Rejected {
            point: name.to_string(),
            reason: format!("{percent}% is outside 0..=100"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_value_neutral() {
        assert!(PointValue::Digital(false).is_neutral());
        assert!(PointValue::Analog(0).is_neutral());
        assert!(!PointValue::Digital(true).is_neutral());
        assert!(!PointValue::Analog(1).is_neutral());
    }

    #[test]
    fn test_point_value_display() {
        assert_eq!(PointValue::Digital(true).to_string(), "on");
        assert_eq!(PointValue::Analog(42).to_string(), "42%");
    }

    #[test]
    fn test_percent_check() {
        assert!(check_percent("V104", 100).is_ok());
        assert!(check_percent("V104", 101).is_err());
    }
}
