//! Training session lifecycle
//!
//! This module holds everything needed to run and observe one external
//! training job at a time: the run configuration, the progress event stream,
//! the session state machine, the history of finished sessions and the
//! controller tying them together.
//!
//! # Main Components
//!
//! - **Configuration**: validated parameters for a run
//! - **Events**: progress updates and terminal signals from the trainer
//! - **State**: the `Idle -> Running -> terminal` state machine and its snapshots
//! - **History**: append-only record of terminated sessions
//! - **Controller**: start/stop, event ingestion, snapshot publication
//! - **Commands**: message-passing front end for UI layers

pub mod commands;
pub mod config;
pub mod controller;
pub mod event;
pub mod history;
pub mod state;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use commands::{spawn_command_loop, Command, CommandSender};
pub use config::{ModelMode, RunConfiguration, TrainingMode, DEFAULT_EPOCHS};
pub use controller::{NotificationKind, SessionController, SessionNotification};
pub use event::{ProgressEvent, TrainerSignal, WireMessage};
pub use history::{HistoryList, HistoryRecord, HistoryStore, Outcome};
pub use state::{LatestMetrics, MetricPoint, MetricSeries, SessionMachine, SessionState, SessionStatus};

/// Immutable, shareable session state
pub type Snapshot = Arc<SessionState>;

/// Identifies a session started by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wrap a raw id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
