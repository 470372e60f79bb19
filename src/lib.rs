//! segtrain - monitor and control segmentation training runs
//!
//! This crate starts one external training job at a time, follows its
//! per-epoch progress reports, keeps an always-readable snapshot of the run
//! for renderers and records every finished run in a history.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use segtrain::{HistoryStore, RunConfiguration, SessionController, SimulatedLauncher};
//!
//! # async fn demo() -> segtrain::Result<()> {
//! let launcher = SimulatedLauncher::new(Duration::from_millis(50), 0.001);
//! let controller = SessionController::new(Arc::new(launcher), Arc::new(HistoryStore::new()));
//!
//! let handle = controller
//!     .start_session(RunConfiguration::new("Run 1", "./data").with_epochs(10))
//!     .await?;
//! let finished = controller.wait_for_termination(handle).await?;
//! println!("{} after {} epochs", finished.status, finished.current_epoch);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod logging;
pub mod render;
pub mod session;
pub mod trainer;

// Re-exports
pub use config::AppConfig;
pub use error::{Error, Result};
pub use render::{Chart, HistoryTable, StatsPanel};
pub use session::{
    HistoryRecord, HistoryStore, ModelMode, Outcome, ProgressEvent, RunConfiguration,
    SessionController, SessionHandle, SessionState, SessionStatus, Snapshot, TrainingMode,
};
pub use trainer::{CommandLauncher, ManualLauncher, SimulatedLauncher, TrainerLauncher};
