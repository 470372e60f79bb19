//! In-process stand-in for a segmentation training job
//!
//! Produces plausible curves: exponentially decaying losses, a Jaccard index
//! saturating towards 0.9 and a step-decayed learning rate, with a little
//! noise on top. Handy for demos and for exercising renderers.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::Result;
use crate::session::{ProgressEvent, RunConfiguration, TrainerSignal};
use crate::trainer::{TrainerLauncher, TrainerRun, DEFAULT_EVENT_CAPACITY};

/// Launcher for simulated runs
#[derive(Debug, Clone)]
pub struct SimulatedLauncher {
    tick: Duration,
    initial_learning_rate: f64,
    capacity: usize,
    seed: Option<u64>,
}

impl SimulatedLauncher {
    /// One simulated epoch every `tick`
    pub fn new(tick: Duration, initial_learning_rate: f64) -> Self {
        Self {
            tick,
            initial_learning_rate,
            capacity: DEFAULT_EVENT_CAPACITY,
            seed: None,
        }
    }

    /// Fix the noise seed for reproducible curves
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Event channel capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl TrainerLauncher for SimulatedLauncher {
    async fn launch(&self, config: &RunConfiguration) -> Result<TrainerRun> {
        let (run, signals, cancel) = TrainerRun::channel(self.capacity);
        let rng = StdRng::seed_from_u64(self.seed.unwrap_or_else(rand::random));
        let curve = Curve {
            epochs: config.epochs,
            initial_learning_rate: self.initial_learning_rate,
        };

        info!(
            "Simulating {} epochs for '{}' ({:?} per epoch)",
            config.epochs, config.name, self.tick
        );
        tokio::spawn(simulate(curve, self.tick, rng, signals, cancel));
        Ok(run)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

struct Curve {
    epochs: u32,
    initial_learning_rate: f64,
}

impl Curve {
    fn event(&self, epoch: u32, rng: &mut StdRng) -> ProgressEvent {
        let progress = f64::from(epoch) / f64::from(self.epochs.max(1));
        let training_loss = (1.2 * (-3.0 * progress).exp() + 0.05 + noise(rng)).max(0.0);
        let validation_loss = (training_loss * 1.1 + 0.02 + noise(rng)).max(0.0);
        let jaccard_index = (0.9 * (1.0 - (-4.0 * progress).exp()) + noise(rng)).clamp(0.0, 1.0);

        // Halve the rate every third of the run
        let step = (self.epochs / 3).max(1);
        let learning_rate = self.initial_learning_rate * 0.5_f64.powi((epoch / step) as i32);

        ProgressEvent::new(epoch, training_loss, validation_loss, jaccard_index, learning_rate)
    }
}

fn noise(rng: &mut StdRng) -> f64 {
    rng.random_range(-0.01..0.01)
}

async fn simulate(
    curve: Curve,
    tick: Duration,
    mut rng: StdRng,
    signals: mpsc::Sender<TrainerSignal>,
    mut cancel: oneshot::Receiver<()>,
) {
    for epoch in 1..=curve.epochs {
        tokio::select! {
            requested = &mut cancel => {
                if requested.is_ok() {
                    debug!("Simulated run cancelled before epoch {}", epoch);
                    let _ = signals.send(TrainerSignal::CancelAck).await;
                }
                return;
            }
            _ = tokio::time::sleep(tick) => {}
        }

        let event = curve.event(epoch, &mut rng);
        if signals.send(TrainerSignal::Progress(event)).await.is_err() {
            return;
        }
    }

    let _ = signals.send(TrainerSignal::Completed).await;
}
