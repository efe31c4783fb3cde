//! Core library for the pulp_daq batch sequencer.
//!
//! Drives one pulp-cooking batch through a digester: five phases in fixed order, each a
//! script of actuation operations and condition waits against the live process snapshot,
//! with a regulation loop during cooking. Any failure aborts the run and returns every
//! actuator to its neutral state. The `pulp-daq` binary runs batches against a simulated
//! plant.

pub mod cancel;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod operations;
pub mod parameters;
pub mod process;
pub mod regulation;
pub mod sequencer;
pub mod transport;
pub mod waiter;

pub use controller::{BatchController, RunState};
pub use error::{BatchError, BatchResult, TransportError};
pub use parameters::BatchParameters;
pub use sequencer::{BatchEvent, Phase, RunOutcome};
