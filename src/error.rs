//! Custom error types for the batch sequencer.
//!
//! This module defines the primary error type, `BatchError`, shared by every layer of the
//! crate, plus `TransportError` for failures reported by a process transport. Using the
//! `thiserror` crate keeps the taxonomy in one place so the sequencer can decide how to
//! react to a failure instead of logging and carrying on.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: a batch parameter is outside its documented bound. Raised before any
//!   actuation, no side effects.
//! - **`Connectivity`**: the transport is unreachable when a run is requested. Raised before
//!   any actuation, no side effects.
//! - **`Actuation`**: a point write failed in the middle of an operation. Terminal for the
//!   run; the sequencer applies the safe-state reset before reporting the outcome.
//! - **`ConditionTimeout`**: a wait predicate was never satisfied in time. Terminal for the
//!   run, same reset behaviour as `Actuation`.
//! - **`Cancelled`**: an abort was requested while the run was in progress.
//! - **`InvalidState`**: a caller action that the current run state does not allow.
//! - **`Config`** / **`Configuration`**: loading settings failed, or a loaded value is invalid.
//! - **`Task`**: a spawned worker panicked or was cancelled by the runtime.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// Failure reported by a process transport for a single point access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link to the plant is down.
    #[error("transport is disconnected")]
    Disconnected,

    /// The plant refused the write.
    #[error("write to '{point}' rejected: {reason}")]
    Rejected {
        /// Point that was written.
        point: String,
        /// Reason given by the transport.
        reason: String,
    },

    /// The point name is not known to the transport.
    #[error("unknown process point '{0}'")]
    UnknownPoint(String),
}

/// Primary error type for the batch sequencer.
#[derive(Error, Debug)]
pub enum BatchError {
    /// A batch parameter is outside its inclusive bound.
    #[error("Invalid parameter {field} = {value}: must be within {min}..={max}")]
    Validation {
        /// Parameter name.
        field: &'static str,
        /// Rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// The transport was unreachable when a run was requested.
    #[error("Transport not connected: {0}")]
    Connectivity(String),

    /// A point write failed inside an operation.
    #[error("Operation {operation} failed writing '{point}': {source}")]
    Actuation {
        /// Operation being executed.
        operation: &'static str,
        /// Point whose write failed.
        point: &'static str,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// A wait condition was not satisfied before its deadline.
    #[error("Condition '{condition}' not met within {elapsed:?}")]
    ConditionTimeout {
        /// Description of the awaited condition.
        condition: &'static str,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// An abort was requested.
    #[error("Run cancelled")]
    Cancelled,

    /// The action is not allowed in the current run state.
    #[error("Cannot {action} while run state is {state}")]
    InvalidState {
        /// Refused action.
        action: &'static str,
        /// Run state at the time of the request.
        state: crate::controller::RunState,
    },

    /// Settings could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings were loaded but hold an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A spawned worker panicked or was cancelled by the runtime.
    #[error("Background task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RunState;

    #[test]
    fn test_error_display() {
        let err = BatchError::Validation {
            field: "target_pressure",
            value: 400.0,
            min: 0.0,
            max: 300.0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameter target_pressure = 400: must be within 0..=300"
        );
    }

    #[test]
    fn test_actuation_error_keeps_transport_cause() {
        let err = BatchError::Actuation {
            operation: "EM5_OP1",
            point: "P200",
            source: TransportError::Disconnected,
        };
        assert!(err.to_string().contains("EM5_OP1"));
        assert!(err.to_string().contains("P200"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("transport is disconnected"));
    }

    #[test]
    fn test_invalid_state_names_action_and_state() {
        let err = BatchError::InvalidState {
            action: "reset",
            state: RunState::Running,
        };
        assert_eq!(err.to_string(), "Cannot reset while run state is Running");
    }
}
