//! Progress events and terminal signals emitted by the training process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metric update for one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Epoch the metrics belong to
    pub epoch: u32,

    /// Loss on the training split
    pub training_loss: f64,

    /// Loss on the validation split
    pub validation_loss: f64,

    /// Jaccard index (IoU) on the validation split, in [0, 1]
    pub jaccard_index: f64,

    /// Learning rate in effect for the epoch
    pub learning_rate: f64,

    /// Emission time, defaults to receipt time on the wire
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event stamped with the current time
    pub fn new(
        epoch: u32,
        training_loss: f64,
        validation_loss: f64,
        jaccard_index: f64,
        learning_rate: f64,
    ) -> Self {
        Self {
            epoch,
            training_loss,
            validation_loss,
            jaccard_index,
            learning_rate,
            timestamp: Utc::now(),
        }
    }

    /// Check the metric values, independent of any session.
    pub fn check_metrics(&self) -> Result<()> {
        let metrics = [
            ("training_loss", self.training_loss),
            ("validation_loss", self.validation_loss),
            ("jaccard_index", self.jaccard_index),
            ("learning_rate", self.learning_rate),
        ];
        for (name, value) in metrics {
            if !value.is_finite() {
                return Err(Error::malformed_event(format!(
                    "epoch {}: {} is not finite ({})",
                    self.epoch, name, value
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.jaccard_index) {
            return Err(Error::malformed_event(format!(
                "epoch {}: jaccard_index {} outside [0, 1]",
                self.epoch, self.jaccard_index
            )));
        }

        if self.learning_rate <= 0.0 {
            return Err(Error::malformed_event(format!(
                "epoch {}: learning_rate {} must be positive",
                self.epoch, self.learning_rate
            )));
        }

        Ok(())
    }
}

/// Everything the training process can tell the controller
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerSignal {
    /// Metrics for an epoch
    Progress(ProgressEvent),
    /// The process finished successfully
    Completed,
    /// The process crashed or reported an error
    Failed {
        /// Human-readable cause
        reason: String,
    },
    /// The process acknowledged a cancellation request
    CancelAck,
}

/// One line of the JSON-lines protocol spoken by external trainers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// `{"type":"progress","epoch":1,...}`
    Progress(ProgressEvent),
    /// `{"type":"completed"}`
    Completed,
    /// `{"type":"failed","reason":"..."}`
    Failed {
        /// Human-readable cause
        reason: String,
    },
}

impl From<WireMessage> for TrainerSignal {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Progress(event) => TrainerSignal::Progress(event),
            WireMessage::Completed => TrainerSignal::Completed,
            WireMessage::Failed { reason } => TrainerSignal::Failed { reason },
        }
    }
}

impl WireMessage {
    /// Parse a stdout line; `None` for lines that are not protocol messages
    pub fn parse_line(line: &str) -> Option<Result<Self>> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        Some(serde_json::from_str(trimmed).map_err(Error::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_event() {
        let event = ProgressEvent::new(3, 0.42, 0.51, 0.66, 1e-3);
        assert!(event.check_metrics().is_ok());
    }

    #[test]
    fn test_nan_metric_rejected() {
        let event = ProgressEvent::new(3, f64::NAN, 0.51, 0.66, 1e-3);
        assert!(matches!(event.check_metrics(), Err(Error::MalformedEvent(_))));

        let event = ProgressEvent::new(3, 0.4, f64::INFINITY, 0.66, 1e-3);
        assert!(event.check_metrics().is_err());
    }

    #[test]
    fn test_jaccard_range() {
        assert!(ProgressEvent::new(1, 0.4, 0.4, 0.0, 1e-3).check_metrics().is_ok());
        assert!(ProgressEvent::new(1, 0.4, 0.4, 1.0, 1e-3).check_metrics().is_ok());
        assert!(ProgressEvent::new(1, 0.4, 0.4, 1.01, 1e-3).check_metrics().is_err());
        assert!(ProgressEvent::new(1, 0.4, 0.4, -0.1, 1e-3).check_metrics().is_err());
    }

    #[test]
    fn test_learning_rate_positive() {
        assert!(ProgressEvent::new(1, 0.4, 0.4, 0.5, 0.0).check_metrics().is_err());
        assert!(ProgressEvent::new(1, 0.4, 0.4, 0.5, -1e-4).check_metrics().is_err());
    }

    #[test]
    fn test_parse_progress_line() {
        let line = r#"{"type":"progress","epoch":2,"training_loss":0.5,"validation_loss":0.6,"jaccard_index":0.3,"learning_rate":0.001}"#;
        let message = WireMessage::parse_line(line).unwrap().unwrap();
        match TrainerSignal::from(message) {
            TrainerSignal::Progress(event) => {
                assert_eq!(event.epoch, 2);
                assert_eq!(event.jaccard_index, 0.3);
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_parse_terminal_lines() {
        let completed = WireMessage::parse_line(r#"{"type":"completed"}"#).unwrap().unwrap();
        assert_eq!(completed, WireMessage::Completed);

        let failed = WireMessage::parse_line(r#" {"type":"failed","reason":"CUDA out of memory"} "#)
            .unwrap()
            .unwrap();
        assert_eq!(
            TrainerSignal::from(failed),
            TrainerSignal::Failed { reason: "CUDA out of memory".to_string() }
        );
    }

    #[test]
    fn test_parse_non_protocol_lines() {
        assert!(WireMessage::parse_line("Epoch 1/100: loading images").is_none());
        assert!(WireMessage::parse_line("").is_none());
        assert!(matches!(
            WireMessage::parse_line(r#"{"type":"unknown"}"#),
            Some(Err(_))
        ));
    }
}
