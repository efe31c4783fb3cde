//! Caller-facing run-state machine.
//!
//! [`BatchController`] owns the [`PhaseSequencer`] and exposes the lifecycle a UI drives:
//!
//! ```text
//! Initialized --start_run--> Running --success--> Initialized
//!                               |
//!                               +--failure/abort--> Halted --reset--> Initialized
//! ```
//!
//! `start_run` returns as soon as the run is spawned. Progress is observed through
//! [`BatchController::subscribe`] (events) or [`BatchController::subscribe_state`] (run state),
//! or by awaiting [`BatchController::wait_for_outcome`].

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::Settings;
use crate::error::{BatchError, BatchResult};
use crate::parameters::BatchParameters;
use crate::sequencer::{BatchEvent, Phase, PhaseSequencer, RunOutcome};
use crate::transport::ProcessTransport;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Ready to start a run.
    Initialized,
    /// A run is executing.
    Running,
    /// The last run failed or was aborted; reset required.
    Halted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initialized => write!(f, "Initialized"),
            RunState::Running => write!(f, "Running"),
            RunState::Halted => write!(f, "Halted"),
        }
    }
}

#[derive(Debug)]
struct ActiveRun {
    run_id: Uuid,
    cancel: CancelSignal,
}

#[derive(Debug)]
struct Inner {
    sequencer: PhaseSequencer,
    run_state: watch::Sender<RunState>,
    active: Mutex<Option<ActiveRun>>,
    last_outcome: Mutex<Option<RunOutcome>>,
    events: broadcast::Sender<BatchEvent>,
}

impl Inner {
    fn set_state(&self, state: RunState) {
        let previous = self.run_state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Run state changed");
            let _ = self.events.send(BatchEvent::StateChanged { state });
        }
    }

    fn finish(&self, run_id: Uuid, outcome: RunOutcome) {
        *self.last_outcome.lock() = Some(outcome.clone());
        self.active.lock().take();

        let next = if outcome.is_success() {
            RunState::Initialized
        } else {
            RunState::Halted
        };
        let _ = self.events.send(BatchEvent::Finished {
            run_id,
            outcome,
            finished_at: Utc::now(),
        });
        self.set_state(next);
    }
}

/// Handle on the batch run lifecycle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BatchController {
    inner: Arc<Inner>,
}

impl BatchController {
    /// Create a controller in the `Initialized` state.
    ///
    /// Settings built in code skip the checks [`Settings::load`] applies, so they are
    /// validated here before anything can run with them.
    pub fn new(transport: Arc<dyn ProcessTransport>, settings: Settings) -> BatchResult<Self> {
        settings.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sequencer = PhaseSequencer::new(transport, Arc::new(settings), events.clone());
        let (run_state, _) = watch::channel(RunState::Initialized);
        Ok(Self {
            inner: Arc::new(Inner {
                sequencer,
                run_state,
                active: Mutex::new(None),
                last_outcome: Mutex::new(None),
                events,
            }),
        })
    }

    /// Validate `params` and start a run on a background task.
    ///
    /// Must be called from within a tokio runtime. Fails without side effects when the
    /// parameters are out of bounds, a run is not allowed in the current state, or the
    /// transport is disconnected.
    #[instrument(skip(self))]
    pub fn start_run(&self, params: BatchParameters) -> BatchResult<Uuid> {
        params.validate()?;

        let mut active = self.inner.active.lock();
        let state = self.current_state();
        if state != RunState::Initialized {
            warn!(%state, "Run start rejected");
            return Err(BatchError::InvalidState {
                action: "start a run",
                state,
            });
        }
        if !self.inner.sequencer.transport().is_connected() {
            warn!("Run start rejected: transport disconnected");
            return Err(BatchError::Connectivity(
                "process transport is not connected".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let cancel = CancelSignal::new();
        *active = Some(ActiveRun {
            run_id,
            cancel: cancel.clone(),
        });
        self.inner.set_state(RunState::Running);
        drop(active);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let worker = inner.clone();
            let joined =
                tokio::spawn(async move { worker.sequencer.run(run_id, params, cancel).await })
                    .await;
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(%run_id, error = %err, "Sequencer task failed");
                    let phase = inner
                        .sequencer
                        .state()
                        .phase()
                        .unwrap_or(Phase::Impregnation);
                    inner.sequencer.apply_safe_state(run_id).await;
                    RunOutcome::Aborted {
                        reason: format!("sequencer task failed: {err}"),
                        phase,
                    }
                }
            };
            inner.finish(run_id, outcome);
        });

        info!(%run_id, "Run started");
        Ok(run_id)
    }

    /// Request cancellation of the active run.
    ///
    /// The run settles to `Halted` once the safe-state reset has been applied.
    pub fn abort(&self) -> BatchResult<()> {
        match self.inner.active.lock().as_ref() {
            Some(run) => {
                warn!(run_id = %run.run_id, "Abort requested");
                run.cancel.cancel();
                Ok(())
            }
            None => Err(BatchError::InvalidState {
                action: "abort",
                state: self.current_state(),
            }),
        }
    }

    /// Return from `Halted` to `Initialized`.
    pub fn reset(&self) -> BatchResult<()> {
        let _active = self.inner.active.lock();
        let state = self.current_state();
        if state != RunState::Halted {
            return Err(BatchError::InvalidState {
                action: "reset",
                state,
            });
        }
        self.inner.set_state(RunState::Initialized);
        Ok(())
    }

    /// Current run state.
    pub fn current_state(&self) -> RunState {
        *self.inner.run_state.borrow()
    }

    /// Phase being executed by the active run.
    pub fn active_phase(&self) -> Option<Phase> {
        if self.current_state() != RunState::Running {
            return None;
        }
        self.inner.sequencer.state().phase()
    }

    /// Id of the active run.
    pub fn active_run(&self) -> Option<Uuid> {
        self.inner.active.lock().as_ref().map(|run| run.run_id)
    }

    /// Outcome of the most recent finished run.
    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.inner.last_outcome.lock().clone()
    }

    /// Subscribe to batch events.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to run state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.inner.run_state.subscribe()
    }

    /// Wait until no run is active and return the latest outcome.
    pub async fn wait_for_outcome(&self) -> Option<RunOutcome> {
        let mut rx = self.subscribe_state();
        // The sender lives in `self`, so the wait cannot fail.
        let _ = rx
            .wait_for(|state| *state != RunState::Running)
            .await
            .map(|_| ());
        self.last_outcome()
    }
}
