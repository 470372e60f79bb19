use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use segtrain::config::{self, AppConfig, TrainerKind};
use segtrain::logging;
use segtrain::session::{spawn_command_loop, NotificationKind, DEFAULT_EPOCHS};
use segtrain::{
    Error, HistoryStore, HistoryTable, ModelMode, RunConfiguration, SessionController,
    SessionState, SessionStatus, StatsPanel, TrainingMode,
};

#[derive(Parser)]
#[command(
    name = "segtrain",
    version,
    about = "Start, follow and stop segmentation training runs"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set the verbosity level (can be repeated for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SEGTRAIN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a training run and follow it until it ends
    Run(RunArgs),

    /// Show the history of finished runs
    History,

    /// Manage segtrain configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Name of the run, shown in the history
    #[arg(short, long)]
    name: String,

    /// Folder holding the training images and masks
    #[arg(short, long)]
    data_folder: PathBuf,

    /// Number of epochs
    #[arg(short, long, default_value_t = DEFAULT_EPOCHS)]
    epochs: u32,

    /// "from-scratch" or "pretrained"
    #[arg(long, default_value = "from-scratch")]
    model: ModelMode,

    /// "train" or "fine-tune"
    #[arg(long, default_value = "train")]
    mode: TrainingMode,

    /// Use the built-in simulated trainer regardless of configuration
    #[arg(long)]
    simulate: bool,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    logging::init_logging(
        cli.verbose.max(config.logging.verbosity),
        cli.quiet,
        cli.json || config.logging.json,
    )?;

    match cli.command {
        Commands::Run(args) => run(args, config).await,
        Commands::History => show_history(&config),
        Commands::Config { subcommand } => manage_config(subcommand, cli.config, &config),
    }
}

async fn run(args: RunArgs, mut config: AppConfig) -> Result<()> {
    if args.simulate {
        config.trainer.kind = TrainerKind::Simulated;
    }
    config.validate().context("Invalid configuration")?;

    let history = Arc::new(open_history(&config)?);
    let controller = SessionController::new(config.build_launcher(), history);
    let mut notifications = controller.subscribe();
    let (commands, command_loop) = spawn_command_loop(controller.clone(), 16);

    let run_config = RunConfiguration::new(args.name, args.data_folder)
        .with_epochs(args.epochs)
        .with_model_mode(args.model)
        .with_training_mode(args.mode);
    let handle = commands
        .start(run_config)
        .await
        .context("Failed to start training")?;
    info!("Training started as {}", handle);

    let bar = epoch_bar(u64::from(args.epochs));
    let mut interrupted = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                bar.println("Stopping training...");
                match commands.stop(handle).await {
                    Ok(()) | Err(Error::NotRunning(_)) => {}
                    Err(e) => return Err(e).context("Failed to stop training"),
                }
            }
            notification = notifications.recv() => match notification {
                Ok(n) if n.handle == handle => {
                    update_bar(&bar, &n.snapshot);
                    if let NotificationKind::Terminated(_) = n.kind {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Renderer lagged by {} notifications", skipped);
                    if controller.current_snapshot(handle)?.status.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let snapshot = controller.wait_for_termination(handle).await?;
    bar.finish_and_clear();

    println!("{}", StatsPanel::new(&snapshot, Utc::now(), config.trainer.initial_learning_rate));
    match snapshot.status {
        SessionStatus::Completed => logging::success(&format!("'{}' completed", snapshot.name)),
        SessionStatus::Cancelled => logging::warning(&format!("'{}' was stopped", snapshot.name)),
        _ => logging::error(&format!(
            "'{}' failed: {}",
            snapshot.name,
            snapshot.failure_reason.as_deref().unwrap_or("unknown reason")
        )),
    }

    println!();
    print_history(&HistoryTable::new(&commands.history().await?));

    drop(commands);
    command_loop.await.context("Command loop panicked")?;
    Ok(())
}

fn epoch_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} Epoch {pos}/{len} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}")
    {
        bar.set_style(style.progress_chars("█▇▆▅▄▃▂▁  "));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn update_bar(bar: &ProgressBar, state: &SessionState) {
    bar.set_position(u64::from(state.current_epoch));
    if let Some(latest) = &state.latest {
        bar.set_message(format!(
            "loss {:.4}  val {:.4}  jaccard {:.4}  lr {}",
            latest.training_loss, latest.validation_loss, latest.jaccard_index, latest.learning_rate
        ));
    }
}

fn open_history(config: &AppConfig) -> Result<HistoryStore> {
    match &config.controller.history_file {
        Some(path) => HistoryStore::open(path)
            .with_context(|| format!("Failed to open history at {}", path.display())),
        None => Ok(HistoryStore::new()),
    }
}

fn show_history(config: &AppConfig) -> Result<()> {
    let history = open_history(config)?;
    if history.is_empty() {
        println!("No training runs recorded yet");
        return Ok(());
    }
    print_history(&HistoryTable::new(&history.list()));
    Ok(())
}

fn print_history(table: &HistoryTable) {
    let text = table.to_string();
    let mut lines = text.lines();
    if let Some(header) = lines.next() {
        println!("{}", header.bold());
    }
    for line in lines {
        println!("{}", line);
    }
}

fn manage_config(
    subcommand: ConfigSubcommand,
    path: Option<PathBuf>,
    config: &AppConfig,
) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            print!("{}", serde_yaml::to_string(config)?);
        }
        ConfigSubcommand::Init { force } => {
            let path = match path {
                Some(path) => path,
                None => config::default_config_path()?,
            };
            config::init_config(&path, force)?;
            logging::success(&format!("Configuration file created: {}", path.display()));
        }
        ConfigSubcommand::Validate => {
            config.validate()?;
            logging::success("Configuration is valid");
        }
    }
    Ok(())
}
