//! Launcher that runs training as an external program
//!
//! The program reports progress as JSON lines on stdout (see
//! [`WireMessage`]); anything else it prints is treated as log output.
//! Exit status 0 without an explicit terminal message counts as completion,
//! any other exit as a failure carrying the last line written to stderr.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{RunConfiguration, TrainerSignal, WireMessage};
use crate::trainer::{TrainerLauncher, TrainerRun, DEFAULT_EVENT_CAPACITY};

/// Launches one child process per run
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    capacity: usize,
}

impl CommandLauncher {
    /// `args` may contain `{name}`, `{data_folder}`, `{epochs}`, `{model}`
    /// and `{mode}` placeholders, filled in per run
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Event channel capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Arguments for `config` with placeholders substituted.
    ///
    /// Each argument is expanded in one pass, so substituted values are
    /// passed through verbatim even if they contain braces.
    pub fn render_args(&self, config: &RunConfiguration) -> Vec<String> {
        let data_folder = config.data_folder.display().to_string();
        let epochs = config.epochs.to_string();
        let values = [
            ("name", config.name.as_str()),
            ("data_folder", data_folder.as_str()),
            ("epochs", epochs.as_str()),
            ("model", config.model_mode.as_str()),
            ("mode", config.training_mode.as_str()),
        ];
        self.args.iter().map(|arg| expand(arg, &values)).collect()
    }
}

/// Replace `{key}` with its value; unknown keys are left as written
fn expand(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let substitution = tail.find('}').and_then(|close| {
            let key = &tail[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, *value))
        });
        match substitution {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

#[async_trait]
impl TrainerLauncher for CommandLauncher {
    async fn launch(&self, config: &RunConfiguration) -> Result<TrainerRun> {
        let args = self.render_args(config);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::trainer(format!("failed to spawn '{}': {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::trainer("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::trainer("child stderr was not captured"))?;

        info!(
            "Spawned training process '{}' (pid {:?}) for '{}'",
            self.program,
            child.id(),
            config.name
        );

        let (run, signals, cancel) = TrainerRun::channel(self.capacity);
        tokio::spawn(supervise(child, stdout, stderr, signals, cancel));
        Ok(run)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

enum Exit {
    Status(ExitStatus),
    Cancelled { requested: bool },
}

async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    signals: mpsc::Sender<TrainerSignal>,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut last_stderr: Option<String> = None;
    let mut terminal_sent = false;
    let mut listening = true;

    let exit = loop {
        tokio::select! {
            requested = &mut cancel => {
                break Exit::Cancelled { requested: requested.is_ok() };
            }
            line = stdout_lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    if let Some(signal) = decode_line(&line) {
                        terminal_sent |= !matches!(signal, TrainerSignal::Progress(_));
                        // The session may already be over while the process
                        // is still writing its outputs; keep draining.
                        if listening && signals.send(signal).await.is_err() {
                            debug!("Controller stopped listening to the training process");
                            listening = false;
                        }
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!("Failed to read trainer stdout: {}", e);
                    stdout_open = false;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    debug!(target: "segtrain::trainer::stderr", "{}", line);
                    if !line.trim().is_empty() {
                        last_stderr = Some(line);
                    }
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
            status = child.wait(), if !stdout_open && !stderr_open => match status {
                Ok(status) => break Exit::Status(status),
                Err(e) => {
                    let _ = signals
                        .send(TrainerSignal::Failed { reason: format!("failed to wait for training process: {}", e) })
                        .await;
                    return;
                }
            },
        }
    };

    match exit {
        Exit::Cancelled { requested } => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill training process: {}", e);
            }
            if requested {
                let _ = signals.send(TrainerSignal::CancelAck).await;
            }
        }
        Exit::Status(status) => {
            info!("Training process exited with {}", status);
            if terminal_sent {
                return;
            }
            let signal = if status.success() {
                TrainerSignal::Completed
            } else {
                TrainerSignal::Failed {
                    reason: failure_reason(status, last_stderr.as_deref()),
                }
            };
            let _ = signals.send(signal).await;
        }
    }
}

fn decode_line(line: &str) -> Option<TrainerSignal> {
    match WireMessage::parse_line(line)? {
        Ok(message) => Some(message.into()),
        Err(e) => {
            warn!("Ignoring unparseable trainer message '{}': {}", line.trim(), e);
            None
        }
    }
}

fn failure_reason(status: ExitStatus, last_stderr: Option<&str>) -> String {
    match last_stderr {
        Some(line) => format!("training process exited with {}: {}", status, line.trim()),
        None => format!("training process exited with {}", status),
    }
}
