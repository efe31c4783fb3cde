//! Batch runs against the simulated plant, as the CLI drives it.

mod common;

use std::time::Duration;

use common::*;
use pulp_daq::config::Settings;
use pulp_daq::operations::NEUTRAL_STATE;
use pulp_daq::transport::{ProcessTransport, SimulatedPlant};
use pulp_daq::{BatchController, BatchError, BatchParameters, Phase, RunOutcome, RunState};

fn short_batch() -> BatchParameters {
    BatchParameters {
        cooking_duration_secs: 2.0,
        target_temperature: 40.0,
        target_pressure: 5.0,
        impregnation_time_secs: 1.0,
    }
}

#[tokio::test(start_paused = true)]
async fn simulated_plant_completes_a_batch() {
    let settings = Settings::default();
    let plant = SimulatedPlant::spawn(settings.simulator.clone());
    let controller = BatchController::new(plant.clone(), settings).unwrap();
    let mut events = controller.subscribe();

    controller.start_run(short_batch()).unwrap();
    let outcome = controller.wait_for_outcome().await;

    assert_eq!(outcome, Some(RunOutcome::Success));
    assert_eq!(controller.current_state(), RunState::Initialized);
    assert_eq!(started_phases(&drain_events(&mut events)), Phase::ALL.to_vec());
    for (point, value) in NEUTRAL_STATE {
        assert_eq!(plant.actuator(point), Some(value), "{point} not neutral");
    }

    let snapshot = plant.snapshot();
    assert!(!snapshot.lower_limit, "digester not drained: {snapshot:?}");
}

#[tokio::test(start_paused = true)]
async fn disconnected_plant_refuses_to_start() {
    let settings = Settings::default();
    let plant = SimulatedPlant::spawn(settings.simulator.clone());
    let controller = BatchController::new(plant.clone(), settings).unwrap();

    assert!(plant.disconnect());
    let err = controller.start_run(short_batch()).unwrap_err();
    assert!(matches!(err, BatchError::Connectivity(_)));
    assert_eq!(controller.current_state(), RunState::Initialized);

    plant.connect();
    controller.start_run(short_batch()).unwrap();
    assert_eq!(controller.current_state(), RunState::Running);
    controller.abort().unwrap();
    let outcome = controller.wait_for_outcome().await.unwrap();
    assert_eq!(outcome.failed_phase(), Some(Phase::Impregnation));
}

#[tokio::test(start_paused = true)]
async fn unreachable_temperature_times_out_in_cooking() {
    let mut settings = Settings::default();
    settings.sequencer.timeouts.cooking_temperature_secs = 5;
    let plant = SimulatedPlant::spawn(settings.simulator.clone());
    let controller = BatchController::new(plant.clone(), settings).unwrap();

    let params = BatchParameters {
        target_temperature: 100.0,
        ..short_batch()
    };
    controller.start_run(params).unwrap();
    let outcome = controller.wait_for_outcome().await.unwrap();

    match outcome {
        RunOutcome::TimedOut { phase, elapsed, .. } => {
            assert_eq!(phase, Phase::Cooking);
            assert_duration_between(
                elapsed,
                Duration::from_secs(5) - POLL,
                Duration::from_secs(5) + POLL,
                "cooking temperature timeout",
            );
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(controller.current_state(), RunState::Halted);
}
