//! Application configuration for segtrain
//!
//! Settings live in a single file (YAML, TOML or JSON, picked by extension)
//! under the platform config directory unless `--config` points elsewhere.
//! Every field has a default, so a partial file or no file at all is fine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::render::DEFAULT_LEARNING_RATE;
use crate::trainer::{CommandLauncher, SimulatedLauncher, TrainerLauncher, DEFAULT_EVENT_CAPACITY};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Controller settings
    pub controller: ControllerConfig,
    /// How training jobs are launched
    pub trainer: TrainerConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Capacity of the trainer event channel
    pub event_capacity: usize,
    /// JSON-lines file the history is persisted to; in-memory when unset
    pub history_file: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            history_file: ProjectDirs::from("org", "segtrain", "segtrain")
                .map(|dirs| dirs.data_dir().join("history.jsonl")),
        }
    }
}

/// Which launcher runs training jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainerKind {
    /// External program speaking the JSON-lines protocol
    Command,
    /// In-process simulation
    Simulated,
}

/// Trainer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Launcher used for new runs
    pub kind: TrainerKind,
    /// Program to run for `kind: command`
    pub program: String,
    /// Program arguments; see [`CommandLauncher::new`] for placeholders
    pub args: Vec<String>,
    /// Milliseconds per simulated epoch
    pub tick_ms: u64,
    /// Learning rate shown before the first event, and the simulation's starting rate
    pub initial_learning_rate: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            kind: TrainerKind::Simulated,
            program: "python3".to_string(),
            args: [
                "train.py",
                "--name",
                "{name}",
                "--data-folder",
                "{data_folder}",
                "--epochs",
                "{epochs}",
                "--model",
                "{model}",
                "--mode",
                "{mode}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            tick_ms: 200,
            initial_learning_rate: DEFAULT_LEARNING_RATE,
        }
    }
}

/// Logging settings; command-line flags take precedence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Same scale as repeated `-v` flags
    pub verbosity: u8,
    /// Emit logs as JSON
    pub json: bool,
}

impl AppConfig {
    /// Check the values that cannot be caught by deserialization
    pub fn validate(&self) -> Result<()> {
        if self.controller.event_capacity == 0 {
            return Err(Error::config("controller.event_capacity must be > 0"));
        }
        if self.trainer.kind == TrainerKind::Command && self.trainer.program.trim().is_empty() {
            return Err(Error::config("trainer.program must be set for the command trainer"));
        }
        if self.trainer.tick_ms == 0 {
            return Err(Error::config("trainer.tick_ms must be > 0"));
        }
        let lr = self.trainer.initial_learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(Error::config("trainer.initial_learning_rate must be positive"));
        }
        Ok(())
    }

    /// Build the launcher described by the trainer section
    pub fn build_launcher(&self) -> Arc<dyn TrainerLauncher> {
        let capacity = self.controller.event_capacity;
        match self.trainer.kind {
            TrainerKind::Command => Arc::new(
                CommandLauncher::new(self.trainer.program.clone(), self.trainer.args.clone())
                    .with_capacity(capacity),
            ),
            TrainerKind::Simulated => Arc::new(
                SimulatedLauncher::new(
                    Duration::from_millis(self.trainer.tick_ms),
                    self.trainer.initial_learning_rate,
                )
                .with_capacity(capacity),
            ),
        }
    }
}

enum Format {
    Yaml,
    Toml,
    Json,
}

fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => Format::Yaml,
        Some("toml") => Format::Toml,
        _ => Format::Json,
    }
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "segtrain", "segtrain")
        .ok_or_else(|| Error::config("Failed to determine config directory"))?;
    Ok(dirs.config_dir().join("config.yaml"))
}

/// Load configuration from `path`, or the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

    let config = match format_of(&path) {
        Format::Yaml => serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("YAML parse error: {}", e)))?,
        Format::Toml => {
            toml::from_str(&content).map_err(|e| Error::config(format!("TOML parse error: {}", e)))?
        }
        Format::Json => serde_json::from_str(&content)?,
    };
    Ok(config)
}

/// Write `config` to `path`, creating parent directories
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = match format_of(path) {
        Format::Yaml => serde_yaml::to_string(config)
            .map_err(|e| Error::config(format!("YAML serialization error: {}", e)))?,
        Format::Toml => toml::to_string(config)
            .map_err(|e| Error::config(format!("TOML serialization error: {}", e)))?,
        Format::Json => serde_json::to_string_pretty(config)?,
    };

    fs::write(path, content)
        .map_err(|e| Error::config(format!("Failed to write {}: {}", path.display(), e)))
}

/// Write the default configuration to `path`; refuses to overwrite unless `force`
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            path.display()
        )));
    }
    save_config(&AppConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test_case("config.yaml" ; "yaml")]
    #[test_case("config.toml" ; "toml")]
    #[test_case("config.json" ; "json")]
    fn test_save_then_load(file: &str) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(file);

        let mut config = AppConfig::default();
        config.trainer.kind = TrainerKind::Command;
        config.trainer.program = "/opt/train".to_string();
        config.controller.history_file = Some(dir.path().join("history.jsonl"));
        save_config(&config, &path).unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "trainer:\n  kind: command\n  program: ./train.sh\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.trainer.kind, TrainerKind::Command);
        assert_eq!(config.trainer.program, "./train.sh");
        assert_eq!(config.trainer.tick_ms, 200);
        assert_eq!(config.controller.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "controller = [").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = AppConfig::default();
        config.controller.event_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.trainer.kind = TrainerKind::Command;
        config.trainer.program = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.trainer.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
    }

    #[test]
    fn test_build_launcher_follows_kind() {
        let mut config = AppConfig::default();
        assert_eq!(config.build_launcher().name(), "simulated");
        config.trainer.kind = TrainerKind::Command;
        assert_eq!(config.build_launcher().name(), "command");
    }
}
