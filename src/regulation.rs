//! Cooking regulation loop.
//!
//! While the cooking stage runs, two loops hold the digester at its targets:
//!
//! - **Pressure**: an integrating controller on V104. Each tick the opening moves by
//!   `gain * (target - measured)` away from the error (more pressure than wanted opens the
//!   valve, less closes it) and is clamped to 0..=100 before it is written.
//! - **Temperature**: bang-bang on E100, on while `TI300 < target`.
//!
//! The loop stops on its stop signal. Whatever ends it, U1_OP3 and U1_OP4 run on the way out
//! so the digester is never left with the heater on or the valve mid-travel.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::cancel::CancelSignal;
use crate::config::RegulationSettings;
use crate::error::{BatchError, BatchResult, TransportError};
use crate::operations::{Actuator, Operation, E100, V104};
use crate::parameters::BatchParameters;

/// Integrating pressure controller for V104.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureController {
    opening: f64,
    gain: f64,
}

impl PressureController {
    /// Start from `initial_opening` percent.
    pub fn new(initial_opening: f64, gain: f64) -> Self {
        Self {
            opening: initial_opening.clamp(0.0, 100.0),
            gain,
        }
    }

    /// Build from settings.
    pub fn from_settings(settings: &RegulationSettings) -> Self {
        Self::new(settings.initial_valve_opening, settings.pressure_gain)
    }

    /// Feed one measurement and return the new opening in percent, within 0..=100.
    pub fn step(&mut self, target: f64, measured: f64) -> f64 {
        let next = self.opening - self.gain * (target - measured);
        // NaN from a bad reading keeps the previous opening.
        if next.is_finite() {
            self.opening = next.clamp(0.0, 100.0);
        }
        self.opening
    }

    /// Current opening as a point value. Fractions are truncated.
    pub fn percent(&self) -> u8 {
        self.opening as u8
    }
}

/// Heater demand for the current temperature.
pub fn heater_on(temperature: f64, target: f64) -> bool {
    temperature < target
}

/// Run both loops until `stop` fires.
///
/// Returns the first write failure. U1_OP3 and U1_OP4 are attempted on every exit; a
/// failure there is reported only if the loop itself ended cleanly.
#[instrument(skip_all, fields(target_pressure = params.target_pressure, target_temperature = params.target_temperature))]
pub async fn regulate(
    actuator: Arc<Actuator>,
    params: BatchParameters,
    settings: RegulationSettings,
    tick: Duration,
    stop: CancelSignal,
) -> BatchResult<()> {
    info!("Regulation started");
    let result = regulation_loop(&actuator, &params, &settings, tick, &stop).await;

    // Shutdown must not be cut short by the stop signal that ended the loop.
    let shutdown = CancelSignal::new();
    let finish = actuator
        .execute_all(&[Operation::U1Op3, Operation::U1Op4], &shutdown)
        .await;
    if let Err(err) = &finish {
        error!(error = %err, "Failed to stop regulation cleanly");
    }
    info!(ok = result.is_ok(), "Regulation stopped");
    result.and(finish)
}

async fn regulation_loop(
    actuator: &Actuator,
    params: &BatchParameters,
    settings: &RegulationSettings,
    tick: Duration,
    stop: &CancelSignal,
) -> BatchResult<()> {
    let transport = actuator.transport();
    let mut pressure = PressureController::from_settings(settings);
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = interval.tick() => {}
        }

        let snapshot = transport.snapshot();
        let opening = pressure.step(params.target_pressure, f64::from(snapshot.pi300));
        let heat = heater_on(snapshot.ti300, params.target_temperature);
        debug!(
            pi300 = snapshot.pi300,
            ti300 = snapshot.ti300,
            opening,
            heat,
            "Regulation tick"
        );

        transport
            .write_analog(V104, pressure.percent())
            .await
            .map_err(|source| regulation_failure(V104, source))?;
        transport
            .write_digital(E100, heat)
            .await
            .map_err(|source| regulation_failure(E100, source))?;
    }
}

fn regulation_failure(point: &'static str, source: TransportError) -> BatchError {
    error!(point, error = %source, "Regulation write failed");
    BatchError::Actuation {
        operation: "REGULATION",
        point,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, PointValue};

    fn params() -> BatchParameters {
        BatchParameters {
            cooking_duration_secs: 30.0,
            target_temperature: 90.0,
            target_pressure: 15.0,
            impregnation_time_secs: 0.0,
        }
    }

    #[test]
    fn test_controller_closes_valve_below_target() {
        let mut controller = PressureController::new(100.0, 0.001);
        let opening = controller.step(15.0, 5.0);
        assert!((opening - 99.99).abs() < 1e-9);
        assert_eq!(controller.percent(), 99);
    }

    #[test]
    fn test_controller_opens_valve_above_target() {
        let mut controller = PressureController::new(50.0, 0.5);
        assert_eq!(controller.step(10.0, 20.0), 55.0);
    }

    #[test]
    fn test_controller_output_is_always_clamped() {
        let mut controller = PressureController::new(100.0, 0.001);
        for (target, measured) in [
            (300.0, -1.0e9),
            (0.0, 1.0e12),
            (0.0, f64::MAX),
            (300.0, f64::MIN),
            (f64::NAN, 10.0),
        ] {
            let opening = controller.step(target, measured);
            assert!((0.0..=100.0).contains(&opening), "opening {opening}");
        }
    }

    #[test]
    fn test_heater_demand() {
        assert!(heater_on(80.0, 90.0));
        assert!(!heater_on(90.0, 90.0));
        assert!(!heater_on(95.0, 90.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regulation_writes_and_stops_cleanly() {
        let transport = Arc::new(MockTransport::new());
        transport.update_snapshot(|s| {
            s.pi300 = 5;
            s.ti300 = 80.0;
        });
        let actuator = Arc::new(Actuator::new(transport.clone(), Duration::from_secs(1)));
        let stop = CancelSignal::new();

        let handle = tokio::spawn(regulate(
            actuator,
            params(),
            RegulationSettings::default(),
            Duration::from_millis(50),
            stop.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        let v104 = transport.history(V104);
        assert!(v104.len() >= 10);
        assert_eq!(v104.first(), Some(&PointValue::Analog(99)));
        assert_eq!(v104.last(), Some(&PointValue::Analog(0)));
        assert!(transport.history(E100).contains(&PointValue::Digital(true)));
        assert_eq!(transport.point(E100), Some(PointValue::Digital(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_still_stops_regulation() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_writes_to(E100);
        let actuator = Arc::new(Actuator::new(transport.clone(), Duration::from_secs(1)));

        let err = regulate(
            actuator,
            params(),
            RegulationSettings::default(),
            Duration::from_millis(50),
            CancelSignal::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BatchError::Actuation { point: "E100", .. }));
        // U1_OP3 still closed the valve even though U1_OP4 could not run.
        assert_eq!(transport.point(V104), Some(PointValue::Analog(0)));
    }
}
