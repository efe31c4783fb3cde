//! Actuation operations.
//!
//! Each [`Operation`] is a fixed list of point writes named after the plant's equipment
//! modules (`EM1`..`EM5`) and the cooking unit (`U1`). Operations never read sensors.
//! Writes run in order; the first failure stops the operation and is reported as
//! [`BatchError::Actuation`]. Nothing is retried.
//!
//! [`Actuator::safe_state_reset`] is the exception: it drives every actuator to neutral,
//! attempts every write even when some fail, and only reports what went wrong.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cancel::CancelSignal;
use crate::error::{BatchError, BatchResult};
use crate::transport::{PointValue, ProcessTransport};

/// Analog valve T100 -> digester.
pub const V102: &str = "V102";
/// Digester -> T100 discharge route.
pub const V103: &str = "V103";
/// Analog digester pressure throttling valve.
pub const V104: &str = "V104";
/// Impregnation outlet.
pub const V201: &str = "V201";
/// Digester top outlet, also used to depressurize.
pub const V204: &str = "V204";
/// Digester inlet.
pub const V301: &str = "V301";
/// Digester bottom outlet.
pub const V302: &str = "V302";
/// P200 route to the digester.
pub const V303: &str = "V303";
/// P100 route to the digester.
pub const V304: &str = "V304";
/// Digester -> T400 outlet.
pub const V401: &str = "V401";
/// T400 outlet.
pub const V404: &str = "V404";
/// White liquor pump.
pub const P100: &str = "P100";
/// Impregnation / discharge pump.
pub const P200: &str = "P200";
/// Pump control-mode preset.
pub const PUMPS_PRESET: &str = "P100_P200_PRESET";
/// Digester heater.
pub const E100: &str = "E100";

/// One step of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Write a value to a point.
    Write(&'static str, PointValue),
    /// Pause for the configured hold before the next write.
    Hold,
}

const fn on(point: &'static str) -> Step {
    Step::Write(point, PointValue::Digital(true))
}

const fn off(point: &'static str) -> Step {
    Step::Write(point, PointValue::Digital(false))
}

const fn set(point: &'static str, percent: u8) -> Step {
    Step::Write(point, PointValue::Analog(percent))
}

const PRESET_PUMPS: &[Step] = &[on(PUMPS_PRESET)];
const EM1_OP1: &[Step] = &[set(V102, 100), on(V304), set(P100, 100), on(E100)];
const EM1_OP2: &[Step] = &[set(V102, 100), on(V304), set(P100, 100)];
const EM1_OP3: &[Step] = &[set(V102, 0), off(V304), set(P100, 0), off(E100)];
const EM1_OP4: &[Step] = &[set(V102, 0), off(V304), set(P100, 0)];
const EM2_OP1: &[Step] = &[on(V201)];
const EM2_OP2: &[Step] = &[off(V201)];
const EM3_OP1: &[Step] = &[set(V104, 0), off(V204), off(V401)];
const EM3_OP2: &[Step] = &[on(V204), on(V301)];
const EM3_OP3: &[Step] = &[on(V301), on(V401)];
const EM3_OP4: &[Step] = &[set(V104, 100), on(V301)];
const EM3_OP5: &[Step] = &[on(V204), on(V302)];
const EM3_OP6: &[Step] = &[set(V104, 0), off(V204), off(V301), off(V401)];
const EM3_OP7: &[Step] = &[off(V302), off(V204)];
const EM3_OP8: &[Step] = &[on(V204), Step::Hold, off(V204)];
const EM4_OP1: &[Step] = &[on(V404)];
const EM4_OP2: &[Step] = &[off(V404)];
const EM5_OP1: &[Step] = &[on(V303), set(P200, 100)];
const EM5_OP2: &[Step] = &[on(V103), on(V303), set(P200, 100)];
const EM5_OP3: &[Step] = &[off(V303), set(P200, 0)];
const EM5_OP4: &[Step] = &[off(V103), off(V303), set(P200, 0)];
const U1_OP3: &[Step] = &[set(V104, 0)];
const U1_OP4: &[Step] = &[off(E100)];

/// Named macro-operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    /// Put both pumps under sequence control.
    PresetPumps,
    /// Route T100 to the digester, pump P100 and heat.
    Em1Op1,
    /// Route T100 to the digester and pump P100.
    Em1Op2,
    /// Close the T100 route, stop P100 and the heater.
    Em1Op3,
    /// Close the T100 route and stop P100.
    Em1Op4,
    /// Open the impregnation outlet.
    Em2Op1,
    /// Close the impregnation outlet.
    Em2Op2,
    /// Close the digester outlets.
    Em3Op1,
    /// Open the digester inlet and top outlet to T200.
    Em3Op2,
    /// Open the digester inlet and outlet to T400.
    Em3Op3,
    /// Open the digester inlet and circulation return to T100.
    Em3Op4,
    /// Open the digester discharge outlets.
    Em3Op5,
    /// Close all digester inlets and outlets.
    Em3Op6,
    /// Close the discharge outlets.
    Em3Op7,
    /// Depressurize the digester through V204.
    Em3Op8,
    /// Open the T400 outlet.
    Em4Op1,
    /// Close the T400 outlet.
    Em4Op2,
    /// Route P200 to the digester and start it.
    Em5Op1,
    /// Route the digester to T100 through P200 and start it.
    Em5Op2,
    /// Close the P200 route and stop it.
    Em5Op3,
    /// Close the discharge route and stop P200.
    Em5Op4,
    /// Stop pressure regulation.
    U1Op3,
    /// Stop temperature regulation.
    U1Op4,
}

impl Operation {
    /// Plant name of the operation.
    pub const fn name(&self) -> &'static str {
        match self {
            Operation::PresetPumps => "PRESET_PUMPS",
            Operation::Em1Op1 => "EM1_OP1",
            Operation::Em1Op2 => "EM1_OP2",
            Operation::Em1Op3 => "EM1_OP3",
            Operation::Em1Op4 => "EM1_OP4",
            Operation::Em2Op1 => "EM2_OP1",
            Operation::Em2Op2 => "EM2_OP2",
            Operation::Em3Op1 => "EM3_OP1",
            Operation::Em3Op2 => "EM3_OP2",
            Operation::Em3Op3 => "EM3_OP3",
            Operation::Em3Op4 => "EM3_OP4",
            Operation::Em3Op5 => "EM3_OP5",
            Operation::Em3Op6 => "EM3_OP6",
            Operation::Em3Op7 => "EM3_OP7",
            Operation::Em3Op8 => "EM3_OP8",
            Operation::Em4Op1 => "EM4_OP1",
            Operation::Em4Op2 => "EM4_OP2",
            Operation::Em5Op1 => "EM5_OP1",
            Operation::Em5Op2 => "EM5_OP2",
            Operation::Em5Op3 => "EM5_OP3",
            Operation::Em5Op4 => "EM5_OP4",
            Operation::U1Op3 => "U1_OP3",
            Operation::U1Op4 => "U1_OP4",
        }
    }

    /// Writes (and holds) issued by the operation, in order.
    pub const fn steps(&self) -> &'static [Step] {
        match self {
            Operation::PresetPumps => PRESET_PUMPS,
            Operation::Em1Op1 => EM1_OP1,
            Operation::Em1Op2 => EM1_OP2,
            Operation::Em1Op3 => EM1_OP3,
            Operation::Em1Op4 => EM1_OP4,
            Operation::Em2Op1 => EM2_OP1,
            Operation::Em2Op2 => EM2_OP2,
            Operation::Em3Op1 => EM3_OP1,
            Operation::Em3Op2 => EM3_OP2,
            Operation::Em3Op3 => EM3_OP3,
            Operation::Em3Op4 => EM3_OP4,
            Operation::Em3Op5 => EM3_OP5,
            Operation::Em3Op6 => EM3_OP6,
            Operation::Em3Op7 => EM3_OP7,
            Operation::Em3Op8 => EM3_OP8,
            Operation::Em4Op1 => EM4_OP1,
            Operation::Em4Op2 => EM4_OP2,
            Operation::Em5Op1 => EM5_OP1,
            Operation::Em5Op2 => EM5_OP2,
            Operation::Em5Op3 => EM5_OP3,
            Operation::Em5Op4 => EM5_OP4,
            Operation::U1Op3 => U1_OP3,
            Operation::U1Op4 => U1_OP4,
        }
    }

    /// Human-readable purpose, for logs.
    pub const fn description(&self) -> &'static str {
        match self {
            Operation::PresetPumps => "preset pumps P100/P200",
            Operation::Em1Op1 => "open route to digester, pump P100 on, heater on",
            Operation::Em1Op2 => "open route to digester, pump P100 on",
            Operation::Em1Op3 => "close route to digester, pump P100 off, heater off",
            Operation::Em1Op4 => "close route to digester, pump P100 off",
            Operation::Em2Op1 => "open impregnation outlet",
            Operation::Em2Op2 => "close impregnation outlet",
            Operation::Em3Op1 => "close digester outlets",
            Operation::Em3Op2 => "open digester inlet and outlet to T200",
            Operation::Em3Op3 => "open digester inlet and outlet to T400",
            Operation::Em3Op4 => "open digester inlet and circulation to T100",
            Operation::Em3Op5 => "allow digester discharge",
            Operation::Em3Op6 => "close all digester inlets and outlets",
            Operation::Em3Op7 => "close discharge outlets",
            Operation::Em3Op8 => "depressurize digester",
            Operation::Em4Op1 => "open black liquor outlet",
            Operation::Em4Op2 => "close black liquor outlet",
            Operation::Em5Op1 => "open route to digester, pump P200 on",
            Operation::Em5Op2 => "open route to T100, pump P200 on",
            Operation::Em5Op3 => "close route to digester, pump P200 off",
            Operation::Em5Op4 => "close route to T100, pump P200 off",
            Operation::U1Op3 => "stop digester pressure regulation",
            Operation::U1Op4 => "stop digester temperature regulation",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every actuator and its neutral value.
pub const NEUTRAL_STATE: [(&str, PointValue); 14] = [
    (V102, PointValue::Analog(0)),
    (V103, PointValue::Digital(false)),
    (V104, PointValue::Analog(0)),
    (V201, PointValue::Digital(false)),
    (V204, PointValue::Digital(false)),
    (V301, PointValue::Digital(false)),
    (V302, PointValue::Digital(false)),
    (V303, PointValue::Digital(false)),
    (V304, PointValue::Digital(false)),
    (V401, PointValue::Digital(false)),
    (V404, PointValue::Digital(false)),
    (P100, PointValue::Analog(0)),
    (P200, PointValue::Analog(0)),
    (E100, PointValue::Digital(false)),
];

/// Result of a safe-state reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    /// Number of writes attempted.
    pub attempted: usize,
    /// Points whose write failed.
    pub failed: Vec<String>,
}

impl ResetReport {
    /// True when every actuator was driven to neutral.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Executes operations against a transport.
#[derive(Clone)]
pub struct Actuator {
    transport: Arc<dyn ProcessTransport>,
    hold: Duration,
}

impl fmt::Debug for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actuator").field("hold", &self.hold).finish()
    }
}

impl Actuator {
    /// Create an actuator; `hold` is the pause used by [`Step::Hold`].
    pub fn new(transport: Arc<dyn ProcessTransport>, hold: Duration) -> Self {
        Self { transport, hold }
    }

    /// Run `operation`, stopping at the first failed write.
    ///
    /// A hold observes `cancel`; the writes after it still run so the operation leaves its
    /// points in a consistent state.
    pub async fn execute(&self, operation: Operation, cancel: &CancelSignal) -> BatchResult<()> {
        for step in operation.steps() {
            match *step {
                Step::Write(point, value) => {
                    self.transport
                        .write_point(point, value)
                        .await
                        .map_err(|source| {
                            error!(%operation, point, %value, error = %source, "Operation failed");
                            BatchError::Actuation {
                                operation: operation.name(),
                                point,
                                source,
                            }
                        })?;
                }
                Step::Hold => {
                    cancel.sleep(self.hold).await;
                }
            }
        }
        debug!(%operation, description = operation.description(), "Operation executed");
        Ok(())
    }

    /// Run several operations in order, stopping at the first failure.
    pub async fn execute_all(
        &self,
        operations: &[Operation],
        cancel: &CancelSignal,
    ) -> BatchResult<()> {
        for operation in operations {
            self.execute(*operation, cancel).await?;
        }
        Ok(())
    }

    /// Drive every actuator to neutral. Never fails; failures are logged and reported.
    pub async fn safe_state_reset(&self) -> ResetReport {
        let mut report = ResetReport::default();
        for (point, value) in NEUTRAL_STATE {
            report.attempted += 1;
            if let Err(err) = self.transport.write_point(point, value).await {
                error!(point, error = %err, "Safe-state reset write failed");
                report.failed.push(point.to_string());
            }
        }
        if report.is_clean() {
            info!("Safe-state reset applied");
        } else {
            error!(failed = ?report.failed, "Safe-state reset incomplete");
        }
        report
    }

    /// Transport this actuator writes to.
    pub fn transport(&self) -> &Arc<dyn ProcessTransport> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    fn actuator(transport: &Arc<MockTransport>) -> Actuator {
        Actuator::new(transport.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_operation_writes_all_points_in_order() {
        let transport = Arc::new(MockTransport::new());
        actuator(&transport)
            .execute(Operation::Em1Op1, &CancelSignal::new())
            .await
            .unwrap();

        let written: Vec<_> = transport
            .writes()
            .into_iter()
            .map(|w| (w.point, w.value))
            .collect();
        assert_eq!(
            written,
            vec![
                ("V102".to_string(), PointValue::Analog(100)),
                ("V304".to_string(), PointValue::Digital(true)),
                ("P100".to_string(), PointValue::Analog(100)),
                ("E100".to_string(), PointValue::Digital(true)),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_writes() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_writes_to(P100);

        let err = actuator(&transport)
            .execute(Operation::Em1Op1, &CancelSignal::new())
            .await
            .unwrap_err();

        match err {
            BatchError::Actuation {
                operation, point, ..
            } => {
                assert_eq!(operation, "EM1_OP1");
                assert_eq!(point, "P100");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // V102 and V304 written, E100 never attempted.
        assert_eq!(transport.write_count(), 2);
        assert!(transport.point(E100).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_depressurize_holds_between_writes() {
        let transport = Arc::new(MockTransport::new());
        let start = Instant::now();
        actuator(&transport)
            .execute(Operation::Em3Op8, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(
            transport.history(V204),
            vec![PointValue::Digital(true), PointValue::Digital(false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_hold_still_closes_valve() {
        let transport = Arc::new(MockTransport::new());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let start = Instant::now();
        actuator(&transport)
            .execute(Operation::Em3Op8, &cancel)
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_millis(1));
        assert_eq!(transport.point(V204), Some(PointValue::Digital(false)));
    }

    #[tokio::test]
    async fn test_safe_state_reset_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let actuator = actuator(&transport);
        actuator
            .execute_all(
                &[Operation::Em1Op1, Operation::Em5Op2, Operation::Em3Op4],
                &CancelSignal::new(),
            )
            .await
            .unwrap();
        assert!(!transport.all_neutral());

        let first = actuator.safe_state_reset().await;
        let after_once = transport.points();
        let second = actuator.safe_state_reset().await;

        assert!(first.is_clean() && second.is_clean());
        assert_eq!(first.attempted, NEUTRAL_STATE.len());
        assert_eq!(transport.points(), after_once);
        assert!(transport.all_neutral());
        for (point, value) in NEUTRAL_STATE {
            assert_eq!(transport.point(point), Some(value));
        }
    }

    #[tokio::test]
    async fn test_safe_state_reset_continues_past_failures() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_writes_to(V104);
        transport.fail_writes_to(E100);

        let report = actuator(&transport).safe_state_reset().await;

        assert_eq!(report.attempted, NEUTRAL_STATE.len());
        assert_eq!(report.failed, vec!["V104".to_string(), "E100".to_string()]);
        assert_eq!(transport.write_count(), NEUTRAL_STATE.len() - 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_safe_state_reset_logs_failed_writes() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_writes_to(P200);

        let report = actuator(&transport).safe_state_reset().await;

        assert!(!report.is_clean());
        assert!(logs_contain("Safe-state reset write failed"));
        assert!(logs_contain("P200"));
        assert!(logs_contain("Safe-state reset incomplete"));
    }

    #[test]
    fn test_every_operation_point_has_a_neutral_value() {
        let neutral: Vec<&str> = NEUTRAL_STATE.iter().map(|(p, _)| *p).collect();
        let operations = [
            Operation::Em1Op1,
            Operation::Em1Op3,
            Operation::Em2Op1,
            Operation::Em3Op5,
            Operation::Em3Op6,
            Operation::Em4Op1,
            Operation::Em5Op2,
        ];
        for operation in operations {
            for step in operation.steps() {
                if let Step::Write(point, _) = step {
                    assert!(neutral.contains(point), "{point} missing from NEUTRAL_STATE");
                }
            }
        }
    }
}
