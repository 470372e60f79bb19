//! Error types for the segtrain system

use thiserror::Error;

use crate::session::{SessionHandle, SessionStatus};

/// Main error type for segtrain operations
#[derive(Error, Debug)]
pub enum Error {
    /// Run configuration rejected before the session started
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// State machine transition not permitted from the current status
    #[error("Invalid transition: cannot {action} while {from}")]
    InvalidTransition {
        /// Status the machine was in
        from: SessionStatus,
        /// Attempted transition
        action: &'static str,
    },

    /// A session is already running on this controller
    #[error("Session already active: {0}")]
    SessionAlreadyActive(SessionHandle),

    /// The addressed session is not running
    #[error("Session not running: {0}")]
    NotRunning(SessionHandle),

    /// The handle does not belong to this controller
    #[error("Unknown session: {0}")]
    UnknownSession(SessionHandle),

    /// Progress event rejected by validation
    #[error("Malformed progress event: {0}")]
    MalformedEvent(String),

    /// Launching or talking to the training process failed
    #[error("Trainer error: {0}")]
    Trainer(String),

    /// Application configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for segtrain operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid run configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(from: SessionStatus, action: &'static str) -> Self {
        Self::InvalidTransition { from, action }
    }

    /// Create a malformed event error
    pub fn malformed_event(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Create a trainer error
    pub fn trainer(msg: impl Into<String>) -> Self {
        Self::Trainer(msg.into())
    }

    /// Create an application configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
