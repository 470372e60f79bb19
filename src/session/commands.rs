//! Message-passing front end for the controller
//!
//! UI layers do not call the controller directly; they send [`Command`]s
//! through a [`CommandSender`] and get the result back on a oneshot channel.
//! Commands are handled one at a time, in the order they were sent.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::config::RunConfiguration;
use crate::session::controller::SessionController;
use crate::session::history::HistoryList;
use crate::session::{SessionHandle, Snapshot};

/// A UI action addressed to the controller
#[derive(Debug)]
pub enum Command {
    /// "Start Training"
    Start {
        /// Run to start
        config: RunConfiguration,
        /// Receives the new handle
        reply: oneshot::Sender<Result<SessionHandle>>,
    },
    /// "Stop Training"
    Stop {
        /// Session to stop
        handle: SessionHandle,
        /// Receives the outcome of the stop
        reply: oneshot::Sender<Result<()>>,
    },
    /// Fetch the latest snapshot of a session
    Snapshot {
        /// Session to read
        handle: SessionHandle,
        /// Receives the snapshot
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    /// Fetch the history table
    History {
        /// Receives the history view
        reply: oneshot::Sender<HistoryList>,
    },
}

/// Cloneable handle for sending commands
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Start a session
    pub async fn start(&self, config: RunConfiguration) -> Result<SessionHandle> {
        self.request(|reply| Command::Start { config, reply }).await?
    }

    /// Stop a session
    pub async fn stop(&self, handle: SessionHandle) -> Result<()> {
        self.request(|reply| Command::Stop { handle, reply }).await?
    }

    /// Latest snapshot of a session
    pub async fn snapshot(&self, handle: SessionHandle) -> Result<Snapshot> {
        self.request(|reply| Command::Snapshot { handle, reply }).await?
    }

    /// History of terminated sessions
    pub async fn history(&self) -> Result<HistoryList> {
        self.request(|reply| Command::History { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::Other(anyhow::anyhow!("command loop has shut down")))?;
        response
            .await
            .map_err(|_| Error::Other(anyhow::anyhow!("command loop dropped the request")))
    }
}

/// Spawn the command loop for `controller`
pub fn spawn_command_loop(
    controller: SessionController,
    capacity: usize,
) -> (CommandSender, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_command_loop(controller, rx));
    (CommandSender { tx }, task)
}

/// Handle commands until every sender is dropped
pub async fn run_command_loop(controller: SessionController, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Start { config, reply } => {
                let _ = reply.send(controller.start_session(config).await);
            }
            Command::Stop { handle, reply } => {
                let _ = reply.send(controller.stop_session(handle));
            }
            Command::Snapshot { handle, reply } => {
                let _ = reply.send(controller.current_snapshot(handle));
            }
            Command::History { reply } => {
                let _ = reply.send(controller.history().list());
            }
        }
    }
    debug!("Command loop finished");
}
