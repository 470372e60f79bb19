//! Session controller
//!
//! The controller is the only mutator of session state. Each session lives in
//! a cell holding its state machine behind a short-held mutex, the latest
//! published snapshot in an `ArcSwap`, and the plumbing to stop the trainer.
//!
//! Two parties can mutate a cell: the event pump task draining the trainer's
//! channel, and `stop_session`. Both go through the cell mutex and both refuse
//! to touch a machine that is already terminal, so the terminal transition,
//! its history record and its notification happen exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::session::config::RunConfiguration;
use crate::session::event::TrainerSignal;
use crate::session::history::{HistoryRecord, HistoryStore, Outcome};
use crate::session::state::{SessionMachine, SessionState, SessionStatus};
use crate::session::{SessionHandle, Snapshot};
use crate::trainer::TrainerLauncher;

/// Default number of notifications buffered per subscriber
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Session entered `Running`
    Started,
    /// New metrics were accepted
    Progress,
    /// Session reached a terminal state
    Terminated(Outcome),
}

/// State-change notification for rendering subscribers
#[derive(Debug, Clone)]
pub struct SessionNotification {
    /// Session that changed
    pub handle: SessionHandle,
    /// What changed
    pub kind: NotificationKind,
    /// State right after the change
    pub snapshot: Snapshot,
}

/// Orchestrates training sessions; cheap to clone
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    launcher: Arc<dyn TrainerLauncher>,
    history: Arc<HistoryStore>,
    sessions: RwLock<HashMap<SessionHandle, Arc<SessionCell>>>,
    active: Mutex<Option<SessionHandle>>,
    next_id: AtomicU64,
    notifications: broadcast::Sender<SessionNotification>,
}

struct SessionCell {
    handle: SessionHandle,
    machine: Mutex<SessionMachine>,
    snapshot: ArcSwap<SessionState>,
    status: watch::Sender<SessionStatus>,
    stopped: Notify,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

enum Flow {
    Continue,
    Stop,
}

impl SessionController {
    /// Create a controller launching jobs with `launcher` and recording
    /// terminated sessions in `history`
    pub fn new(launcher: Arc<dyn TrainerLauncher>, history: Arc<HistoryStore>) -> Self {
        Self::with_notification_capacity(launcher, history, DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Same as [`SessionController::new`] with a custom notification buffer
    pub fn with_notification_capacity(
        launcher: Arc<dyn TrainerLauncher>,
        history: Arc<HistoryStore>,
        capacity: usize,
    ) -> Self {
        let (notifications, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ControllerInner {
                launcher,
                history,
                sessions: RwLock::new(HashMap::new()),
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
                notifications,
            }),
        }
    }

    /// Validate `config`, launch the trainer and start tracking the session
    #[instrument(
        skip(self, config),
        fields(name = %config.name, epochs = config.epochs, handle = tracing::field::Empty)
    )]
    pub async fn start_session(&self, config: RunConfiguration) -> Result<SessionHandle> {
        let handle = self.inner.reserve_slot()?;
        tracing::Span::current().record("handle", tracing::field::display(handle));

        let mut machine = SessionMachine::new();
        if let Err(e) = machine.start(&config, Instant::now()) {
            self.inner.release_slot(handle);
            return Err(e);
        }

        let run = match self.inner.launcher.launch(&config).await {
            Ok(run) => run,
            Err(e) => {
                warn!("Failed to launch trainer for {}: {}", handle, e);
                self.inner.release_slot(handle);
                return Err(e);
            }
        };

        let snapshot: Snapshot = Arc::new(machine.state().clone());
        let (status, _) = watch::channel(SessionStatus::Running);
        let cell = Arc::new(SessionCell {
            handle,
            machine: Mutex::new(machine),
            snapshot: ArcSwap::new(Arc::clone(&snapshot)),
            status,
            stopped: Notify::new(),
            cancel: Mutex::new(Some(run.cancel)),
        });

        self.inner.sessions.write().insert(handle, Arc::clone(&cell));
        let _ = self.inner.notifications.send(SessionNotification {
            handle,
            kind: NotificationKind::Started,
            snapshot,
        });

        info!("Started {} '{}' for {} epochs", handle, config.name, config.epochs);
        tokio::spawn(pump(Arc::clone(&self.inner), cell, run.signals));
        Ok(handle)
    }

    /// Cancel a running session.
    ///
    /// Safe to call while events are in flight: whichever of this call and
    /// the event pump takes the session lock first wins, and nothing mutates
    /// the session after it is cancelled.
    #[instrument(skip(self, handle), fields(handle = %handle))]
    pub fn stop_session(&self, handle: SessionHandle) -> Result<()> {
        let cell = self.inner.cell(handle)?;

        {
            let mut machine = cell.machine.lock();
            machine
                .cancel(Instant::now())
                .map_err(|_| Error::NotRunning(handle))?;
            self.inner.publish(&cell, &machine, Some(Outcome::Cancelled));
        }

        if let Some(cancel) = cell.cancel.lock().take() {
            let _ = cancel.send(());
        }
        info!("Stopped {}", handle);
        Ok(())
    }

    /// Latest published state of a session; never waits on the trainer
    pub fn current_snapshot(&self, handle: SessionHandle) -> Result<Snapshot> {
        Ok(self.inner.cell(handle)?.snapshot.load_full())
    }

    /// Wait until the session reaches a terminal state
    pub async fn wait_for_termination(&self, handle: SessionHandle) -> Result<Snapshot> {
        let cell = self.inner.cell(handle)?;
        let mut status = cell.status.subscribe();
        // The sender lives in the cell, which we hold, so this cannot fail
        let _ = status.wait_for(|s| s.is_terminal()).await;
        Ok(cell.snapshot.load_full())
    }

    /// Subscribe to state-change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.inner.notifications.subscribe()
    }

    /// Handle of the running session, if any
    pub fn active(&self) -> Option<SessionHandle> {
        *self.inner.active.lock()
    }

    /// Every session this controller has started, oldest first
    pub fn sessions(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.inner.sessions.read().keys().copied().collect();
        handles.sort();
        handles
    }

    /// History of terminated sessions
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }
}

impl ControllerInner {
    fn reserve_slot(&self) -> Result<SessionHandle> {
        let mut active = self.active.lock();
        if let Some(current) = *active {
            return Err(Error::SessionAlreadyActive(current));
        }
        let handle = SessionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        *active = Some(handle);
        Ok(handle)
    }

    fn release_slot(&self, handle: SessionHandle) {
        let mut active = self.active.lock();
        if *active == Some(handle) {
            *active = None;
        }
    }

    fn cell(&self, handle: SessionHandle) -> Result<Arc<SessionCell>> {
        self.sessions
            .read()
            .get(&handle)
            .cloned()
            .ok_or(Error::UnknownSession(handle))
    }

    /// Apply one trainer signal to a session
    fn apply(&self, cell: &SessionCell, signal: TrainerSignal) -> Flow {
        let mut machine = cell.machine.lock();
        if machine.status().is_terminal() {
            debug!("Ignoring {:?} for {}: session already {}", signal, cell.handle, machine.status());
            return Flow::Stop;
        }

        let now = Instant::now();
        let result = match signal {
            TrainerSignal::Progress(event) => {
                if let Err(e) = machine.on_event(&event, now) {
                    warn!("Dropping progress event for {}: {}", cell.handle, e);
                    return Flow::Continue;
                }
                debug!(
                    "{} epoch {}/{} loss={:.4} jaccard={:.4}",
                    cell.handle,
                    event.epoch,
                    machine.state().total_epochs,
                    event.training_loss,
                    event.jaccard_index
                );
                if machine.reached_final_epoch() {
                    machine.on_completion(now)
                } else {
                    Ok(())
                }
            }
            TrainerSignal::Completed => {
                if machine.reached_final_epoch() {
                    machine.on_completion(now)
                } else {
                    let state = machine.state();
                    let reason = format!(
                        "training process finished after epoch {} of {}",
                        state.current_epoch, state.total_epochs
                    );
                    machine.on_external_failure(reason, now)
                }
            }
            TrainerSignal::Failed { reason } => machine.on_external_failure(reason, now),
            // Acknowledged a cancellation nobody here requested
            TrainerSignal::CancelAck => machine.cancel(now),
        };

        if let Err(e) = result {
            warn!("Rejected trainer signal for {}: {}", cell.handle, e);
            return Flow::Continue;
        }

        let outcome = machine.status().outcome();
        self.publish(cell, &machine, outcome);
        match outcome {
            Some(_) => Flow::Stop,
            None => Flow::Continue,
        }
    }

    /// The trainer went away without a terminal signal
    fn stream_closed(&self, cell: &SessionCell) {
        let mut machine = cell.machine.lock();
        if machine.status().is_terminal() {
            return;
        }
        let reason = "training process closed its event stream without finishing";
        if machine.on_external_failure(reason, Instant::now()).is_ok() {
            warn!("{}: {}", cell.handle, reason);
            self.publish(cell, &machine, Some(Outcome::Failed));
        }
    }

    /// Publish the machine's state; called with the cell lock held
    fn publish(&self, cell: &SessionCell, machine: &SessionMachine, outcome: Option<Outcome>) {
        let snapshot: Snapshot = Arc::new(machine.state().clone());
        cell.snapshot.store(Arc::clone(&snapshot));

        let kind = match outcome {
            Some(outcome) => {
                self.finalize(cell, &snapshot);
                NotificationKind::Terminated(outcome)
            }
            None => NotificationKind::Progress,
        };

        cell.status.send_replace(snapshot.status);
        let _ = self.notifications.send(SessionNotification {
            handle: cell.handle,
            kind,
            snapshot,
        });
    }

    fn finalize(&self, cell: &SessionCell, snapshot: &Snapshot) {
        if let Some(record) = HistoryRecord::from_state(cell.handle, snapshot) {
            info!(
                "{} '{}' {} after {}/{} epochs",
                cell.handle, record.name, record.outcome, record.epochs_completed, record.total_epochs
            );
            if let Err(e) = self.history.append(record) {
                warn!("Failed to persist history for {}: {}", cell.handle, e);
            }
        }
        self.release_slot(cell.handle);
        cell.stopped.notify_one();
    }
}

#[instrument(name = "pump", skip_all, fields(handle = %cell.handle))]
async fn pump(
    inner: Arc<ControllerInner>,
    cell: Arc<SessionCell>,
    mut signals: mpsc::Receiver<TrainerSignal>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cell.stopped.notified() => break,
            signal = signals.recv() => match signal {
                Some(signal) => {
                    if let Flow::Stop = inner.apply(&cell, signal) {
                        break;
                    }
                }
                None => {
                    inner.stream_closed(&cell);
                    break;
                }
            },
        }
    }
    debug!("Event pump for {} finished", cell.handle);
}
