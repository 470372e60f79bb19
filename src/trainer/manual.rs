//! Launcher whose runs are driven by hand
//!
//! Each launch produces a [`TrainerFeed`] that is handed to whoever holds the
//! feed receiver. Tests use it to play a training process; embedders can use
//! it to bridge a transport of their own.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::{ProgressEvent, RunConfiguration, TrainerSignal};
use crate::trainer::{TrainerLauncher, TrainerRun, DEFAULT_EVENT_CAPACITY};

/// Launcher that hands the producing side of every run to the caller
pub struct ManualLauncher {
    capacity: usize,
    feeds: mpsc::UnboundedSender<TrainerFeed>,
}

impl ManualLauncher {
    /// Create a launcher and the receiver its feeds are delivered to
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrainerFeed>) {
        Self::channel_with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Same as [`ManualLauncher::channel`] with a custom event channel capacity
    pub fn channel_with_capacity(capacity: usize) -> (Self, mpsc::UnboundedReceiver<TrainerFeed>) {
        let (feeds, feed_rx) = mpsc::unbounded_channel();
        (Self { capacity, feeds }, feed_rx)
    }
}

#[async_trait]
impl TrainerLauncher for ManualLauncher {
    async fn launch(&self, config: &RunConfiguration) -> Result<TrainerRun> {
        let (run, signals, cancelled) = TrainerRun::channel(self.capacity);
        let feed = TrainerFeed {
            config: config.clone(),
            signals,
            cancelled,
            cancel_seen: false,
        };

        self.feeds
            .send(feed)
            .map_err(|_| Error::trainer("nobody is listening for manual trainer feeds"))?;

        debug!("Manual run prepared for '{}'", config.name);
        Ok(run)
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// Producing side of a manually driven run
#[derive(Debug)]
pub struct TrainerFeed {
    config: RunConfiguration,
    signals: mpsc::Sender<TrainerSignal>,
    cancelled: oneshot::Receiver<()>,
    cancel_seen: bool,
}

impl TrainerFeed {
    /// Configuration the run was launched with
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Deliver a progress event
    pub async fn progress(&self, event: ProgressEvent) -> Result<()> {
        self.send(TrainerSignal::Progress(event)).await
    }

    /// Report successful completion
    pub async fn complete(&self) -> Result<()> {
        self.send(TrainerSignal::Completed).await
    }

    /// Report a crash
    pub async fn fail(&self, reason: impl Into<String>) -> Result<()> {
        self.send(TrainerSignal::Failed {
            reason: reason.into(),
        })
        .await
    }

    /// Deliver any signal
    pub async fn send(&self, signal: TrainerSignal) -> Result<()> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| Error::trainer("controller stopped listening"))
    }

    /// Whether the controller has asked the run to stop
    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancel_seen {
            self.cancel_seen = matches!(self.cancelled.try_recv(), Ok(()));
        }
        self.cancel_seen
    }

    /// Wait until the controller asks the run to stop or drops it
    pub async fn cancelled(&mut self) {
        if self.cancel_seen {
            return;
        }
        let _ = (&mut self.cancelled).await;
        self.cancel_seen = true;
    }
}
