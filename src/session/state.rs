//! Session lifecycle state machine
//!
//! `SessionMachine` owns the mutable state of one session and enforces the
//! lifecycle `Idle -> Running -> {Completed, Failed, Cancelled}`. Every
//! transition takes the current `Instant` from the caller, which keeps the
//! elapsed/remaining bookkeeping deterministic under test.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::config::RunConfiguration;
use crate::session::event::ProgressEvent;
use crate::session::history::Outcome;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Not started yet
    Idle,
    /// Trainer launched, accepting progress events
    Running,
    /// Final epoch reached
    Completed,
    /// Trainer reported or caused a failure
    Failed,
    /// Stopped before the final epoch
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// History outcome for terminal statuses
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            SessionStatus::Completed => Some(Outcome::Completed),
            SessionStatus::Failed => Some(Outcome::Failed),
            SessionStatus::Cancelled => Some(Outcome::Cancelled),
            SessionStatus::Idle | SessionStatus::Running => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Metrics from the most recently accepted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestMetrics {
    /// Loss on the training split
    pub training_loss: f64,
    /// Loss on the validation split
    pub validation_loss: f64,
    /// Jaccard index (IoU), in `[0, 1]`
    pub jaccard_index: f64,
    /// Optimizer learning rate for the epoch
    pub learning_rate: f64,
    /// When the trainer produced the event
    pub timestamp: DateTime<Utc>,
}

impl From<&ProgressEvent> for LatestMetrics {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            training_loss: event.training_loss,
            validation_loss: event.validation_loss,
            jaccard_index: event.jaccard_index,
            learning_rate: event.learning_rate,
            timestamp: event.timestamp,
        }
    }
}

/// A single chart point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Epoch the value belongs to
    pub epoch: u32,
    /// Metric value
    pub value: f64,
}

/// Per-epoch metric history backing the loss and Jaccard charts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    /// "Training Loss" line
    pub training_loss: Vec<MetricPoint>,
    /// "Validation Loss" line
    pub validation_loss: Vec<MetricPoint>,
    /// "Jaccard Index" line
    pub jaccard_index: Vec<MetricPoint>,
}

impl MetricSeries {
    fn record(&mut self, event: &ProgressEvent) {
        upsert(&mut self.training_loss, event.epoch, event.training_loss);
        upsert(&mut self.validation_loss, event.epoch, event.validation_loss);
        upsert(&mut self.jaccard_index, event.epoch, event.jaccard_index);
    }

    /// Number of epochs with a recorded point
    pub fn len(&self) -> usize {
        self.training_loss.len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.training_loss.is_empty()
    }
}

// Events arrive in non-decreasing epoch order, so only the tail can collide
fn upsert(points: &mut Vec<MetricPoint>, epoch: u32, value: f64) {
    match points.last_mut() {
        Some(last) if last.epoch == epoch => last.value = value,
        _ => points.push(MetricPoint { epoch, value }),
    }
}

/// Immutable view of a session, handed to renderers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Lifecycle status
    pub status: SessionStatus,

    /// Run name, empty while idle
    pub name: String,

    /// Epochs the run was configured for
    pub total_epochs: u32,

    /// Last epoch reported by the trainer
    pub current_epoch: u32,

    /// Wall-clock start of the run
    pub started_at: Option<DateTime<Utc>>,

    /// Time spent running as of the last update
    pub elapsed: Duration,

    /// Linear extrapolation of the time left, unknown before the first epoch
    pub estimated_remaining: Option<Duration>,

    /// Metrics of the latest accepted event
    pub latest: Option<LatestMetrics>,

    /// Chart data
    pub series: MetricSeries,

    /// Reason reported when the session failed
    pub failure_reason: Option<String>,
}

impl SessionState {
    /// State of a session that has not been started
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            name: String::new(),
            total_epochs: 0,
            current_epoch: 0,
            started_at: None,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
            latest: None,
            series: MetricSeries::default(),
            failure_reason: None,
        }
    }

    /// Elapsed time as seen at `now`; keeps ticking while running
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        match (self.status, self.started_at) {
            (SessionStatus::Running, Some(started)) => {
                (now - started).to_std().unwrap_or(self.elapsed).max(self.elapsed)
            }
            _ => self.elapsed,
        }
    }

    /// Fraction of planned epochs reported so far
    pub fn progress(&self) -> f64 {
        if self.total_epochs == 0 {
            return 0.0;
        }
        f64::from(self.current_epoch) / f64::from(self.total_epochs)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Mutable owner of one session's state
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    started: Option<Instant>,
}

impl SessionMachine {
    /// Create a machine in the `Idle` state
    pub fn new() -> Self {
        Self {
            state: SessionState::idle(),
            started: None,
        }
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Whether the configured number of epochs has been reported
    pub fn reached_final_epoch(&self) -> bool {
        self.state.status == SessionStatus::Running
            && self.state.current_epoch == self.state.total_epochs
    }

    /// Idle -> Running
    pub fn start(&mut self, config: &RunConfiguration, now: Instant) -> Result<()> {
        if self.state.status != SessionStatus::Idle {
            return Err(Error::invalid_transition(self.state.status, "start"));
        }
        config.validate()?;

        self.state = SessionState {
            status: SessionStatus::Running,
            name: config.name.clone(),
            total_epochs: config.epochs,
            started_at: Some(Utc::now()),
            ..SessionState::idle()
        };
        self.started = Some(now);
        Ok(())
    }

    /// Running -> Running with new metrics
    pub fn on_event(&mut self, event: &ProgressEvent, now: Instant) -> Result<()> {
        self.require_running("apply progress")?;
        event.check_metrics()?;

        if event.epoch < self.state.current_epoch {
            return Err(Error::malformed_event(format!(
                "epoch {} arrived after epoch {}",
                event.epoch, self.state.current_epoch
            )));
        }
        if event.epoch > self.state.total_epochs {
            return Err(Error::malformed_event(format!(
                "epoch {} exceeds the configured {} epochs",
                event.epoch, self.state.total_epochs
            )));
        }

        self.state.current_epoch = event.epoch;
        self.state.latest = Some(LatestMetrics::from(event));
        self.state.series.record(event);
        self.tick(now);
        self.state.estimated_remaining = self.extrapolate_remaining();
        Ok(())
    }

    /// Running -> Failed
    pub fn on_external_failure(&mut self, reason: impl Into<String>, now: Instant) -> Result<()> {
        self.require_running("fail")?;
        self.state.failure_reason = Some(reason.into());
        self.finish(SessionStatus::Failed, now);
        Ok(())
    }

    /// Running -> Cancelled
    pub fn cancel(&mut self, now: Instant) -> Result<()> {
        self.require_running("cancel")?;
        self.finish(SessionStatus::Cancelled, now);
        Ok(())
    }

    /// Running -> Completed, only once every epoch has been reported
    pub fn on_completion(&mut self, now: Instant) -> Result<()> {
        self.require_running("complete")?;
        if self.state.current_epoch != self.state.total_epochs {
            return Err(Error::invalid_transition(self.state.status, "complete before the final epoch"));
        }
        self.finish(SessionStatus::Completed, now);
        Ok(())
    }

    fn require_running(&self, action: &'static str) -> Result<()> {
        if self.state.status != SessionStatus::Running {
            return Err(Error::invalid_transition(self.state.status, action));
        }
        Ok(())
    }

    fn finish(&mut self, status: SessionStatus, now: Instant) {
        self.tick(now);
        self.state.status = status;
        self.state.estimated_remaining = Some(Duration::ZERO);
    }

    fn tick(&mut self, now: Instant) {
        if let Some(started) = self.started {
            self.state.elapsed = now.saturating_duration_since(started);
        }
    }

    fn extrapolate_remaining(&self) -> Option<Duration> {
        let done = self.state.current_epoch;
        if done == 0 {
            return None;
        }
        let left = self.state.total_epochs.saturating_sub(done);
        Some(self.state.elapsed.mul_f64(f64::from(left) / f64::from(done)))
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
