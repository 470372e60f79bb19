//! Run configuration for a single training session

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Epoch count the configuration form starts with
pub const DEFAULT_EPOCHS: u32 = 100;

/// Parameters for one run of the external training process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Human readable run name, shown in the history table
    pub name: String,

    /// Folder holding the training data
    pub data_folder: PathBuf,

    /// Number of epochs to train for
    #[serde(default = "default_epochs")]
    pub epochs: u32,

    /// Whether to start from random weights or a pretrained model
    #[serde(default)]
    pub model_mode: ModelMode,

    /// Plain training or fine-tuning
    #[serde(default)]
    pub training_mode: TrainingMode,
}

fn default_epochs() -> u32 {
    DEFAULT_EPOCHS
}

impl RunConfiguration {
    /// Create a configuration with default epochs and modes
    pub fn new(name: impl Into<String>, data_folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_folder: data_folder.into(),
            epochs: DEFAULT_EPOCHS,
            model_mode: ModelMode::default(),
            training_mode: TrainingMode::default(),
        }
    }

    /// Set the epoch count
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the model mode
    pub fn with_model_mode(mut self, mode: ModelMode) -> Self {
        self.model_mode = mode;
        self
    }

    /// Set the training mode
    pub fn with_training_mode(mut self, mode: TrainingMode) -> Self {
        self.training_mode = mode;
        self
    }

    /// Check the configuration against the filesystem.
    ///
    /// The data folder must exist and be readable at the time of the call.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_config("run name must not be empty"));
        }

        if self.epochs == 0 {
            return Err(Error::invalid_config("epochs must be at least 1"));
        }

        check_data_folder(&self.data_folder)
    }
}

fn check_data_folder(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        Error::invalid_config(format!(
            "data folder {} is not accessible: {}",
            path.display(),
            e
        ))
    })?;

    if !metadata.is_dir() {
        return Err(Error::invalid_config(format!(
            "data folder {} is not a directory",
            path.display()
        )));
    }

    // Readable means listable
    std::fs::read_dir(path).map_err(|e| {
        Error::invalid_config(format!(
            "data folder {} is not readable: {}",
            path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Starting point for the model weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelMode {
    /// Random initialisation
    #[default]
    FromScratch,
    /// Start from a pretrained checkpoint
    Pretrained,
}

impl ModelMode {
    /// Label used by the configuration form
    pub fn label(&self) -> &'static str {
        match self {
            ModelMode::FromScratch => "Train from scratch",
            ModelMode::Pretrained => "Use pretrained model",
        }
    }

    /// Identifier passed to the training process
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelMode::FromScratch => "from-scratch",
            ModelMode::Pretrained => "pretrained",
        }
    }
}

impl fmt::Display for ModelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "from-scratch" | "scratch" | "train from scratch" => Ok(ModelMode::FromScratch),
            "pretrained" | "use pretrained model" => Ok(ModelMode::Pretrained),
            other => Err(Error::invalid_config(format!("unknown model mode '{}'", other))),
        }
    }
}

/// Kind of training run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrainingMode {
    /// Regular training
    #[default]
    Train,
    /// Fine-tune an existing model
    FineTune,
}

impl TrainingMode {
    /// Label used by the configuration form
    pub fn label(&self) -> &'static str {
        match self {
            TrainingMode::Train => "Train",
            TrainingMode::FineTune => "Fine-tune",
        }
    }

    /// Identifier passed to the training process
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::Train => "train",
            TrainingMode::FineTune => "fine-tune",
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TrainingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(TrainingMode::Train),
            "fine-tune" | "finetune" => Ok(TrainingMode::FineTune),
            other => Err(Error::invalid_config(format!("unknown training mode '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test]
    fn test_valid_configuration() {
        let dir = TempDir::new().unwrap();
        let config = RunConfiguration::new("Run 1", dir.path()).with_epochs(10);
        assert!(config.validate().is_ok());
        assert_eq!(config.model_mode, ModelMode::FromScratch);
        assert_eq!(config.training_mode, TrainingMode::Train);
    }

    #[test]
    fn test_default_epochs() {
        let config = RunConfiguration::new("Run 1", "/data");
        assert_eq!(config.epochs, 100);
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let dir = TempDir::new().unwrap();
        let config = RunConfiguration::new("Run 1", dir.path()).with_epochs(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_blank_name_rejected() {
        let dir = TempDir::new().unwrap();
        let config = RunConfiguration::new("   ", dir.path());
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_folder_rejected() {
        let dir = TempDir::new().unwrap();
        let config = RunConfiguration::new("Run 1", dir.path().join("missing"));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_file_instead_of_folder_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("images.tif");
        std::fs::write(&file, b"tif").unwrap();
        let config = RunConfiguration::new("Run 1", file);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test_case("from-scratch", ModelMode::FromScratch)]
    #[test_case("Train from scratch", ModelMode::FromScratch)]
    #[test_case("pretrained", ModelMode::Pretrained)]
    #[test_case("Use pretrained model", ModelMode::Pretrained)]
    fn test_parse_model_mode(input: &str, expected: ModelMode) {
        assert_eq!(input.parse::<ModelMode>().unwrap(), expected);
    }

    #[test_case("train", TrainingMode::Train)]
    #[test_case("Fine-tune", TrainingMode::FineTune)]
    #[test_case("finetune", TrainingMode::FineTune)]
    fn test_parse_training_mode(input: &str, expected: TrainingMode) {
        assert_eq!(input.parse::<TrainingMode>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_mode() {
        assert!("transfer".parse::<TrainingMode>().is_err());
        assert!("imagenet".parse::<ModelMode>().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: RunConfiguration =
            serde_json::from_str(r#"{"name":"nuclei","data_folder":"/data/nuclei"}"#).unwrap();
        assert_eq!(config.epochs, DEFAULT_EPOCHS);
        assert_eq!(config.model_mode, ModelMode::FromScratch);

        let config: RunConfiguration = serde_json::from_str(
            r#"{"name":"nuclei","data_folder":"/d","epochs":5,"model_mode":"pretrained","training_mode":"fine-tune"}"#,
        )
        .unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.model_mode, ModelMode::Pretrained);
        assert_eq!(config.training_mode, TrainingMode::FineTune);
    }
}
