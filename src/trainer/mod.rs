//! Boundary with the external training process
//!
//! A [`TrainerLauncher`] turns a validated [`RunConfiguration`] into a running
//! training job and hands back a [`TrainerRun`]: the receiving half of the
//! event channel plus a way to request cancellation. How the job actually
//! runs (child process, in-process simulation, test feed) is up to the
//! launcher.

pub mod command;
pub mod manual;
pub mod simulated;

pub use command::CommandLauncher;
pub use manual::{ManualLauncher, TrainerFeed};
pub use simulated::SimulatedLauncher;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::session::{RunConfiguration, TrainerSignal};

/// Default capacity of the event channel between trainer and controller
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A launched training job as seen by the controller
#[derive(Debug)]
pub struct TrainerRun {
    /// Signals emitted by the job, in emission order
    pub signals: mpsc::Receiver<TrainerSignal>,

    /// Fired by the controller when the session is stopped
    pub cancel: oneshot::Sender<()>,
}

impl TrainerRun {
    /// Create the channel pair for a new run.
    ///
    /// Returns the controller side and the trainer side
    /// (signal sender, cancellation receiver).
    pub fn channel(
        capacity: usize,
    ) -> (Self, mpsc::Sender<TrainerSignal>, oneshot::Receiver<()>) {
        let (signal_tx, signal_rx) = mpsc::channel(capacity.max(1));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        (
            Self {
                signals: signal_rx,
                cancel: cancel_tx,
            },
            signal_tx,
            cancel_rx,
        )
    }
}

/// Starts training jobs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrainerLauncher: Send + Sync {
    /// Start a job for `config`, which has already been validated
    async fn launch(&self, config: &RunConfiguration) -> Result<TrainerRun>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
