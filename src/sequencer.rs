//! Phase sequencer.
//!
//! Runs one batch: a pump preset, then the five phases in fixed order. Each phase is a
//! closed script of operations, at most one condition wait, and optional holds. Any failure
//! ends the run at the step where it happened; later phases never start.
//!
//! Every run, successful or not, ends with exactly one safe-state reset.
//!
//! ## States
//!
//! `NotStarted -> Impregnation -> BlackLiquorFill -> WhiteLiquorFill -> Cooking -> Discharge
//! -> Completed`, with any phase able to fall through to `Aborted`. The current state is
//! published on a `watch` channel; phase transitions and the reset are also broadcast as
//! [`BatchEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::{ConditionSettings, Settings, TimeoutSettings};
use crate::controller::RunState;
use crate::error::{BatchError, BatchResult};
use crate::operations::{Actuator, Operation, ResetReport};
use crate::parameters::BatchParameters;
use crate::process::ProcessSnapshot;
use crate::regulation;
use crate::transport::ProcessTransport;
use crate::waiter::wait_until;

/// Phases of a batch, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Fill the digester with impregnation liquor and let the chips soak.
    Impregnation,
    /// Displace the impregnation liquor with black liquor.
    BlackLiquorFill,
    /// Displace the black liquor with white liquor.
    WhiteLiquorFill,
    /// Heat to temperature and hold temperature and pressure.
    Cooking,
    /// Pump the digester contents back to T100.
    Discharge,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::Impregnation,
        Phase::BlackLiquorFill,
        Phase::WhiteLiquorFill,
        Phase::Cooking,
        Phase::Discharge,
    ];

    /// The phase's fixed script.
    pub fn script(&self) -> &'static [ScriptStep] {
        use Operation::*;
        use ScriptStep::{Impregnate, Regulate, Run, WaitFor};

        match self {
            Phase::Impregnation => &[
                Run(Em2Op1),
                Run(Em5Op1),
                Run(Em3Op2),
                WaitFor(Condition::DigesterFull),
                Run(Em3Op1),
                Impregnate,
                Run(Em2Op2),
                Run(Em5Op3),
                Run(Em3Op6),
                Run(Em3Op8),
            ],
            Phase::BlackLiquorFill => &[
                Run(Em3Op2),
                Run(Em5Op1),
                Run(Em4Op1),
                WaitFor(Condition::BlackLiquorDisplaced),
                Run(Em3Op6),
                Run(Em5Op3),
                Run(Em4Op2),
            ],
            Phase::WhiteLiquorFill => &[
                Run(Em3Op3),
                Run(Em1Op2),
                WaitFor(Condition::WhiteLiquorDisplaced),
                Run(Em3Op6),
                Run(Em1Op4),
            ],
            Phase::Cooking => &[
                Run(Em3Op4),
                Run(Em1Op1),
                WaitFor(Condition::CookingTemperature),
                Run(Em3Op1),
                Run(Em1Op2),
                Regulate,
                Run(Em3Op6),
                Run(Em1Op4),
                Run(Em3Op8),
            ],
            Phase::Discharge => &[
                Run(Em5Op2),
                Run(Em3Op5),
                WaitFor(Condition::DigesterDrained),
                Run(Em5Op4),
                Run(Em3Op7),
            ],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Impregnation => "Impregnation",
            Phase::BlackLiquorFill => "BlackLiquorFill",
            Phase::WhiteLiquorFill => "WhiteLiquorFill",
            Phase::Cooking => "Cooking",
            Phase::Discharge => "Discharge",
        };
        f.write_str(name)
    }
}

/// Blocking conditions used by the phase scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// `LS+300` raised.
    DigesterFull,
    /// LI400 meets the black liquor threshold.
    BlackLiquorDisplaced,
    /// LI400 meets the white liquor threshold.
    WhiteLiquorDisplaced,
    /// `TI300 >= target temperature`.
    CookingTemperature,
    /// `LS-300` cleared.
    DigesterDrained,
}

impl Condition {
    /// Description carried by timeouts and logs.
    pub const fn description(&self) -> &'static str {
        match self {
            Condition::DigesterFull => "digester upper limit reached (LS+300)",
            Condition::BlackLiquorDisplaced => "black liquor displaced (LI400)",
            Condition::WhiteLiquorDisplaced => "white liquor displaced (LI400)",
            Condition::CookingTemperature => "cooking temperature reached (TI300)",
            Condition::DigesterDrained => "digester drained (LS-300 cleared)",
        }
    }

    /// Configured timeout for this wait.
    pub fn timeout(&self, timeouts: &TimeoutSettings) -> Duration {
        let secs = match self {
            Condition::DigesterFull => timeouts.upper_limit_secs,
            Condition::BlackLiquorDisplaced => timeouts.black_liquor_secs,
            Condition::WhiteLiquorDisplaced => timeouts.white_liquor_secs,
            Condition::CookingTemperature => timeouts.cooking_temperature_secs,
            Condition::DigesterDrained => timeouts.digester_drained_secs,
        };
        Duration::from_secs(secs)
    }

    /// Evaluate against a snapshot. Pure.
    pub fn is_met(
        &self,
        snapshot: &ProcessSnapshot,
        params: &BatchParameters,
        conditions: &ConditionSettings,
    ) -> bool {
        match self {
            Condition::DigesterFull => snapshot.upper_limit,
            Condition::BlackLiquorDisplaced => {
                conditions.black_liquor_displaced.is_met(snapshot.li400)
            }
            Condition::WhiteLiquorDisplaced => {
                conditions.white_liquor_displaced.is_met(snapshot.li400)
            }
            Condition::CookingTemperature => snapshot.ti300 >= params.target_temperature,
            Condition::DigesterDrained => !snapshot.lower_limit,
        }
    }
}

/// One step of a phase script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Execute an operation.
    Run(Operation),
    /// Block until a condition holds.
    WaitFor(Condition),
    /// Hold for the impregnation time.
    Impregnate,
    /// Run the regulation loop for the cooking duration.
    Regulate,
}

/// Sequencer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SequencerState {
    /// No run yet, or a new run is about to begin.
    #[default]
    NotStarted,
    /// Executing a phase.
    InPhase(Phase),
    /// All phases finished.
    Completed,
    /// The run failed or was cancelled.
    Aborted,
}

impl SequencerState {
    /// Phase being executed, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SequencerState::InPhase(phase) => Some(*phase),
            _ => None,
        }
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerState::NotStarted => f.write_str("NotStarted"),
            SequencerState::InPhase(phase) => write!(f, "{phase}"),
            SequencerState::Completed => f.write_str("Completed"),
            SequencerState::Aborted => f.write_str("Aborted"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RunOutcome {
    /// Every phase completed.
    Success,
    /// An operation failed or the run was cancelled.
    Aborted {
        /// What went wrong.
        reason: String,
        /// Phase that was executing.
        phase: Phase,
    },
    /// A condition wait expired.
    TimedOut {
        /// Condition that was never met.
        condition: String,
        /// Phase that was executing.
        phase: Phase,
        /// Time spent waiting.
        elapsed: Duration,
    },
}

/// Reason recorded when an operator abort ends a run.
pub const ABORT_REQUESTED: &str = "abort requested";

impl RunOutcome {
    /// True for [`RunOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    /// Phase the run failed in, if it failed.
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            RunOutcome::Success => None,
            RunOutcome::Aborted { phase, .. } | RunOutcome::TimedOut { phase, .. } => Some(*phase),
        }
    }

    fn from_failure(phase: Phase, err: BatchError) -> Self {
        match err {
            BatchError::ConditionTimeout { condition, elapsed } => RunOutcome::TimedOut {
                condition: condition.to_string(),
                phase,
                elapsed,
            },
            BatchError::Cancelled => RunOutcome::Aborted {
                reason: ABORT_REQUESTED.to_string(),
                phase,
            },
            other => RunOutcome::Aborted {
                reason: other.to_string(),
                phase,
            },
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::Aborted { reason, phase } => write!(f, "aborted in {phase}: {reason}"),
            RunOutcome::TimedOut {
                condition,
                phase,
                elapsed,
            } => write!(f, "timed out in {phase} after {elapsed:?} waiting for {condition}"),
        }
    }
}

/// Notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// The caller-facing run state changed.
    StateChanged {
        /// New state.
        state: RunState,
    },
    /// A phase began.
    PhaseStarted {
        /// Run the phase belongs to.
        run_id: Uuid,
        /// Phase entered.
        phase: Phase,
        /// Wall-clock start.
        started_at: DateTime<Utc>,
    },
    /// A phase finished its script.
    PhaseCompleted {
        /// Run the phase belongs to.
        run_id: Uuid,
        /// Phase completed.
        phase: Phase,
        /// Time spent in the phase.
        elapsed_ms: u64,
    },
    /// The end-of-run safe-state reset ran.
    SafeStateApplied {
        /// Run that was reset.
        run_id: Uuid,
        /// Points whose reset write failed.
        failed_points: Vec<String>,
    },
    /// The run ended.
    Finished {
        /// Run that ended.
        run_id: Uuid,
        /// Terminal outcome.
        outcome: RunOutcome,
        /// Wall-clock end.
        finished_at: DateTime<Utc>,
    },
}

/// Executes batch runs against a transport.
pub struct PhaseSequencer {
    actuator: Arc<Actuator>,
    settings: Arc<Settings>,
    state: watch::Sender<SequencerState>,
    events: broadcast::Sender<BatchEvent>,
}

impl fmt::Debug for PhaseSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseSequencer")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl PhaseSequencer {
    /// Create a sequencer publishing events on `events`.
    pub fn new(
        transport: Arc<dyn ProcessTransport>,
        settings: Arc<Settings>,
        events: broadcast::Sender<BatchEvent>,
    ) -> Self {
        let actuator = Arc::new(Actuator::new(
            transport,
            settings.sequencer.depressurize_hold(),
        ));
        let (state, _) = watch::channel(SequencerState::NotStarted);
        Self {
            actuator,
            settings,
            state,
            events,
        }
    }

    /// Current sequencer state.
    pub fn state(&self) -> SequencerState {
        *self.state.borrow()
    }

    /// Subscribe to sequencer state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SequencerState> {
        self.state.subscribe()
    }

    /// Transport the sequencer drives.
    pub fn transport(&self) -> &Arc<dyn ProcessTransport> {
        self.actuator.transport()
    }

    /// Execute one run to completion and return its outcome.
    ///
    /// Never returns an error: every failure is folded into the outcome after the safe-state
    /// reset has been applied. Parameters must already be validated.
    #[instrument(skip_all, fields(%run_id))]
    pub async fn run(
        &self,
        run_id: Uuid,
        params: BatchParameters,
        cancel: CancelSignal,
    ) -> RunOutcome {
        self.state.send_replace(SequencerState::NotStarted);
        info!(?params, "Batch run starting");

        let (outcome, state) = match self.run_phases(run_id, &params, &cancel).await {
            Ok(()) => (RunOutcome::Success, SequencerState::Completed),
            Err((phase, err)) => {
                if matches!(err, BatchError::Cancelled) {
                    warn!(%phase, "Batch run aborted by request");
                } else {
                    error!(%phase, error = %err, "Batch run failed");
                }
                (RunOutcome::from_failure(phase, err), SequencerState::Aborted)
            }
        };
        self.state.send_replace(state);
        self.apply_safe_state(run_id).await;

        info!(%outcome, "Batch run finished");
        outcome
    }

    /// Drive every actuator to neutral and announce it with [`BatchEvent::SafeStateApplied`].
    ///
    /// [`run`](Self::run) calls this exactly once per run. The controller calls it directly when
    /// the run task died before getting that far.
    pub async fn apply_safe_state(&self, run_id: Uuid) -> ResetReport {
        let report = self.actuator.safe_state_reset().await;
        let _ = self.events.send(BatchEvent::SafeStateApplied {
            run_id,
            failed_points: report.failed.clone(),
        });
        report
    }

    async fn run_phases(
        &self,
        run_id: Uuid,
        params: &BatchParameters,
        cancel: &CancelSignal,
    ) -> Result<(), (Phase, BatchError)> {
        let first = Phase::Impregnation;
        if cancel.is_cancelled() {
            return Err((first, BatchError::Cancelled));
        }
        self.actuator
            .execute(Operation::PresetPumps, cancel)
            .await
            .map_err(|err| (first, err))?;

        for phase in Phase::ALL {
            self.state.send_replace(SequencerState::InPhase(phase));
            let _ = self.events.send(BatchEvent::PhaseStarted {
                run_id,
                phase,
                started_at: Utc::now(),
            });
            let start = Instant::now();

            self.run_phase(phase, params, cancel)
                .await
                .map_err(|err| (phase, err))?;

            let elapsed = start.elapsed();
            info!(%phase, elapsed_ms = elapsed.as_millis() as u64, "Phase completed");
            let _ = self.events.send(BatchEvent::PhaseCompleted {
                run_id,
                phase,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(%phase))]
    async fn run_phase(
        &self,
        phase: Phase,
        params: &BatchParameters,
        cancel: &CancelSignal,
    ) -> BatchResult<()> {
        info!("Phase started");
        let sequencer = &self.settings.sequencer;

        for step in phase.script() {
            if cancel.is_cancelled() {
                return Err(BatchError::Cancelled);
            }
            match *step {
                ScriptStep::Run(operation) => self.actuator.execute(operation, cancel).await?,
                ScriptStep::WaitFor(condition) => {
                    let conditions = &self.settings.conditions;
                    wait_until(
                        self.transport().as_ref(),
                        condition.description(),
                        |snapshot| condition.is_met(snapshot, params, conditions),
                        condition.timeout(&sequencer.timeouts),
                        sequencer.poll_interval(),
                        cancel,
                    )
                    .await?;
                }
                ScriptStep::Impregnate => {
                    if !cancel.sleep(params.impregnation_time()).await {
                        return Err(BatchError::Cancelled);
                    }
                }
                ScriptStep::Regulate => self.regulate(params, cancel).await?,
            }
        }
        Ok(())
    }

    /// Run the regulation loop until the cooking duration elapses or the run is cancelled.
    async fn regulate(&self, params: &BatchParameters, cancel: &CancelSignal) -> BatchResult<()> {
        let stop = CancelSignal::new();
        let mut handle = tokio::spawn(regulation::regulate(
            self.actuator.clone(),
            *params,
            self.settings.regulation.clone(),
            self.settings.sequencer.poll_interval(),
            stop.clone(),
        ));

        let elapsed = tokio::select! {
            elapsed = cancel.sleep(params.cooking_duration()) => elapsed,
            // The loop only ends on its own when a write fails.
            joined = &mut handle => return flatten(joined),
        };

        stop.cancel();
        flatten(handle.await)?;
        if elapsed {
            Ok(())
        } else {
            Err(BatchError::Cancelled)
        }
    }
}

fn flatten(joined: Result<BatchResult<()>, tokio::task::JoinError>) -> BatchResult<()> {
    joined.map_err(|err| BatchError::Task(err.to_string()))?
}
