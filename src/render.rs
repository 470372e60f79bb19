//! Render-ready views of controller state
//!
//! Nothing here draws anything. These types turn snapshots and history lists
//! into the text, rows and series a front end needs for the statistics
//! panel, the history table and the two charts.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{HistoryList, MetricPoint, SessionState, SessionStatus, DEFAULT_EPOCHS};

/// Learning rate shown before the first event arrives
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Format a duration as `HH:MM:SS`; hours keep growing past 99
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// The six-field training statistics panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsPanel {
    /// `Current Epoch: e / n`
    pub current_epoch: String,
    /// `Time Elapsed: HH:MM:SS`
    pub time_elapsed: String,
    /// `Estimated Time Remaining: HH:MM:SS`
    pub time_remaining: String,
    /// `Current Loss: x`
    pub current_loss: String,
    /// `Current Jaccard Index: x`
    pub current_jaccard: String,
    /// `Learning Rate: x`
    pub learning_rate: String,
}

impl StatsPanel {
    /// Build the panel for `state` as seen at `now`
    pub fn new(state: &SessionState, now: DateTime<Utc>, initial_learning_rate: f64) -> Self {
        let total = if state.status == SessionStatus::Idle {
            DEFAULT_EPOCHS
        } else {
            state.total_epochs
        };
        let latest = state.latest.as_ref();
        let remaining = state.estimated_remaining.unwrap_or(Duration::ZERO);

        Self {
            current_epoch: format!("Current Epoch: {} / {}", state.current_epoch, total),
            time_elapsed: format!("Time Elapsed: {}", format_hms(state.elapsed_at(now))),
            time_remaining: format!("Estimated Time Remaining: {}", format_hms(remaining)),
            current_loss: format!(
                "Current Loss: {}",
                latest.map_or("0.0".to_string(), |m| format!("{:.4}", m.training_loss))
            ),
            current_jaccard: format!(
                "Current Jaccard Index: {}",
                latest.map_or("0.0".to_string(), |m| format!("{:.4}", m.jaccard_index))
            ),
            learning_rate: format!(
                "Learning Rate: {}",
                latest.map_or(initial_learning_rate, |m| m.learning_rate)
            ),
        }
    }

    /// Lines in panel order
    pub fn lines(&self) -> [&str; 6] {
        [
            self.current_epoch.as_str(),
            self.time_elapsed.as_str(),
            self.time_remaining.as_str(),
            self.current_loss.as_str(),
            self.current_jaccard.as_str(),
            self.learning_rate.as_str(),
        ]
    }
}

impl fmt::Display for StatsPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Rows of the training history table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryTable {
    /// Cells in [`HistoryTable::HEADER`] order
    pub rows: Vec<[String; 4]>,
}

impl HistoryTable {
    /// Column titles
    pub const HEADER: [&'static str; 4] = ["Name", "Loss", "Accuracy", "Outcome"];

    /// One row per record, in completion order
    pub fn new(history: &HistoryList) -> Self {
        let rows = history
            .iter()
            .map(|record| {
                [
                    record.name.clone(),
                    format_optional(record.final_loss),
                    format_optional(record.final_jaccard),
                    record.outcome.to_string(),
                ]
            })
            .collect();
        Self { rows }
    }
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

impl fmt::Display for HistoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths = Self::HEADER.map(str::len);
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        write_row(f, &Self::HEADER, &widths)?;
        for row in &self.rows {
            write_row(f, &row.each_ref().map(String::as_str), &widths)?;
        }
        Ok(())
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, cells: &[&str], widths: &[usize]) -> fmt::Result {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect();
    writeln!(f, "{}", padded.join("  ").trim_end())
}

/// A named line on a chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    /// Legend entry
    pub name: &'static str,
    /// `(epoch, value)` pairs in epoch order
    pub points: Vec<(f64, f64)>,
}

/// Data for one chart panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    /// Panel title
    pub title: &'static str,
    /// Horizontal axis label
    pub x_label: &'static str,
    /// Vertical axis label
    pub y_label: &'static str,
    /// Lines drawn on the chart
    pub series: Vec<ChartSeries>,
}

impl Chart {
    /// "Loss" chart with training and validation curves
    pub fn loss(state: &SessionState) -> Self {
        Self {
            title: "Loss",
            x_label: "Epoch",
            y_label: "Loss",
            series: vec![
                series("Training Loss", &state.series.training_loss),
                series("Validation Loss", &state.series.validation_loss),
            ],
        }
    }

    /// "Jaccard Index" chart
    pub fn jaccard(state: &SessionState) -> Self {
        Self {
            title: "Jaccard Index",
            x_label: "Epoch",
            y_label: "Jaccard Index",
            series: vec![series("Jaccard Index", &state.series.jaccard_index)],
        }
    }
}

fn series(name: &'static str, points: &[MetricPoint]) -> ChartSeries {
    ChartSeries {
        name,
        points: points
            .iter()
            .map(|p| (f64::from(p.epoch), p.value))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{HistoryRecord, HistoryStore, Outcome, SessionHandle};

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(Duration::ZERO), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_hms(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn test_idle_panel_matches_empty_window() {
        let panel = StatsPanel::new(&SessionState::idle(), Utc::now(), DEFAULT_LEARNING_RATE);
        assert_eq!(
            panel.lines(),
            [
                "Current Epoch: 0 / 100",
                "Time Elapsed: 00:00:00",
                "Estimated Time Remaining: 00:00:00",
                "Current Loss: 0.0",
                "Current Jaccard Index: 0.0",
                "Learning Rate: 0.001",
            ]
        );
    }

    #[test]
    fn test_panel_with_metrics() {
        let mut state = SessionState::idle();
        state.status = SessionStatus::Completed;
        state.total_epochs = 10;
        state.current_epoch = 10;
        state.elapsed = Duration::from_secs(65);
        state.estimated_remaining = Some(Duration::ZERO);
        state.latest = Some(crate::session::LatestMetrics {
            training_loss: 0.18,
            validation_loss: 0.2,
            jaccard_index: 0.9,
            learning_rate: 0.0005,
            timestamp: Utc::now(),
        });

        let panel = StatsPanel::new(&state, Utc::now(), DEFAULT_LEARNING_RATE);
        assert_eq!(panel.current_epoch, "Current Epoch: 10 / 10");
        assert_eq!(panel.time_elapsed, "Time Elapsed: 00:01:05");
        assert_eq!(panel.current_loss, "Current Loss: 0.1800");
        assert_eq!(panel.current_jaccard, "Current Jaccard Index: 0.9000");
        assert_eq!(panel.learning_rate, "Learning Rate: 0.0005");
    }

    #[test]
    fn test_history_table() {
        let store = HistoryStore::new();
        for (id, (name, loss, jaccard)) in [("Run 1", 0.25, 0.85), ("Run 2", 0.20, 0.88)]
            .into_iter()
            .enumerate()
        {
            store
                .append(HistoryRecord {
                    handle: SessionHandle::new(id as u64 + 1),
                    name: name.to_string(),
                    final_loss: Some(loss),
                    final_jaccard: Some(jaccard),
                    outcome: Outcome::Completed,
                    epochs_completed: 100,
                    total_epochs: 100,
                    finished_at: Utc::now(),
                })
                .unwrap();
        }
        store
            .append(HistoryRecord {
                handle: SessionHandle::new(3),
                name: "Run 3".to_string(),
                final_loss: None,
                final_jaccard: None,
                outcome: Outcome::Cancelled,
                epochs_completed: 0,
                total_epochs: 100,
                finished_at: Utc::now(),
            })
            .unwrap();

        let table = HistoryTable::new(&store.list());
        assert_eq!(table.rows[0], ["Run 1", "0.25", "0.85", "Completed"].map(String::from));
        assert_eq!(table.rows[2], ["Run 3", "-", "-", "Cancelled"].map(String::from));

        let text = table.to_string();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "Name   Loss  Accuracy  Outcome");
        assert_eq!(lines.next().unwrap(), "Run 1  0.25  0.85      Completed");
    }

    #[test]
    fn test_charts_follow_series() {
        let mut state = SessionState::idle();
        state.series.training_loss = vec![MetricPoint { epoch: 1, value: 0.5 }];
        state.series.validation_loss = vec![MetricPoint { epoch: 1, value: 0.6 }];
        state.series.jaccard_index = vec![MetricPoint { epoch: 1, value: 0.3 }];

        let loss = Chart::loss(&state);
        assert_eq!(loss.series.len(), 2);
        assert_eq!(loss.series[1].name, "Validation Loss");
        assert_eq!(loss.series[1].points, vec![(1.0, 0.6)]);

        let jaccard = Chart::jaccard(&state);
        assert_eq!(jaccard.title, "Jaccard Index");
        assert_eq!(jaccard.series[0].points, vec![(1.0, 0.3)]);
    }
}
