//! Common test utilities for pulp_daq integration tests
//!
//! This module provides reusable helpers for:
//! - Timing assertions under paused tokio time
//! - Canned plant snapshots and batch parameters
//! - Draining the controller's event stream

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;
use std::time::Duration;

use pulp_daq::config::Settings;
use pulp_daq::process::ProcessSnapshot;
use pulp_daq::transport::MockTransport;
use pulp_daq::{BatchController, BatchEvent, BatchParameters, Phase};
use tokio::sync::broadcast;

/// Poll interval used by the default settings.
pub const POLL: Duration = Duration::from_millis(50);

/// Parameters from the reference batch: 30 s cooking at 90 °C / 15 bar, 30 s impregnation.
pub fn nominal_params() -> BatchParameters {
    BatchParameters {
        cooking_duration_secs: 30.0,
        target_temperature: 90.0,
        target_pressure: 15.0,
        impregnation_time_secs: 30.0,
    }
}

/// A snapshot on which every phase's wait condition already holds.
pub fn satisfied_snapshot() -> ProcessSnapshot {
    ProcessSnapshot {
        li100: 80,
        li200: 40,
        li400: 30,
        pi300: 15,
        ti300: 95.0,
        upper_limit: true,
        lower_limit: false,
    }
}

/// Mock transport and a controller driving it with default settings.
pub fn mock_controller(snapshot: ProcessSnapshot) -> (Arc<MockTransport>, BatchController) {
    let transport = Arc::new(MockTransport::with_snapshot(snapshot));
    let controller = BatchController::new(transport.clone(), Settings::default()).unwrap();
    (transport, controller)
}

/// Everything currently buffered on an event receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Phases entered, in the order their `PhaseStarted` events were emitted.
pub fn started_phases(events: &[BatchEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::PhaseStarted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

/// Phases completed, in order.
pub fn completed_phases(events: &[BatchEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::PhaseCompleted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

/// Number of safe-state resets reported.
pub fn reset_count(events: &[BatchEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, BatchEvent::SafeStateApplied { .. }))
        .count()
}

/// Wait for the next `PhaseStarted` for `phase`.
pub async fn wait_for_phase(rx: &mut broadcast::Receiver<BatchEvent>, phase: Phase) {
    loop {
        match rx.recv().await {
            Ok(BatchEvent::PhaseStarted { phase: started, .. }) if started == phase => return,
            Ok(_) => continue,
            Err(err) => panic!("event stream ended before {phase} started: {err}"),
        }
    }
}

/// Assert that a duration lies within `[min, max]`.
///
/// # Panics
/// Panics if the actual duration is outside the range.
pub fn assert_duration_between(actual: Duration, min: Duration, max: Duration, context: &str) {
    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} to {:?}, got {:?}",
        context,
        min,
        max,
        actual
    );
}
