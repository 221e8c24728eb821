//! Error taxonomy for the health controller

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by controller components
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Resource snapshot could not be read from the host
    #[error("resource snapshot unavailable: {0}")]
    CollectionFailure(String),

    /// A single cleanup step failed; the cycle carries on without it
    #[error("cleanup step '{step}' failed: {message}")]
    CleanupFailure { step: String, message: String },

    /// Session registry is still full after evicting the oldest sessions
    #[error("session capacity exceeded (max {max_sessions} sessions)")]
    CapacityExceeded { max_sessions: usize },

    /// Active operations did not drain within the restart grace period
    #[error("restart drain timed out after {waited:?} with {remaining} active operation(s)")]
    RestartDrainTimeout { waited: Duration, remaining: usize },

    /// Invalid threshold or limit values
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// A restart is already being executed
    #[error("restart already in progress")]
    RestartInProgress,

    /// Caller passed an argument the operation cannot work with
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Build a cleanup failure for the named step
    pub fn cleanup(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::CleanupFailure {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for errors that must stop the controller from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
