use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use segtrain::trainer::TrainerFeed;
use segtrain::{
    Error, HistoryStore, ManualLauncher, Outcome, ProgressEvent, RunConfiguration,
    SessionController, SessionHandle, SessionStatus, SimulatedLauncher,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn manual_controller() -> (SessionController, UnboundedReceiver<TrainerFeed>) {
    let (launcher, feeds) = ManualLauncher::channel();
    let controller = SessionController::new(Arc::new(launcher), Arc::new(HistoryStore::new()));
    (controller, feeds)
}

fn event(epoch: u32, total: u32) -> ProgressEvent {
    let progress = f64::from(epoch) / f64::from(total);
    ProgressEvent::new(epoch, 1.0 - 0.8 * progress, 1.1 - 0.8 * progress, 0.9 * progress, 1e-3)
}

async fn wait_for_epoch(controller: &SessionController, handle: SessionHandle, epoch: u32) {
    for _ in 0..400 {
        if controller.current_snapshot(handle).unwrap().current_epoch >= epoch {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} never reached epoch {}", handle, epoch);
}

#[tokio::test]
async fn started_session_is_running_at_epoch_zero() {
    let data = TempDir::new().unwrap();
    let (controller, mut feeds) = manual_controller();

    let handle = controller
        .start_session(RunConfiguration::new("Run 1", data.path()).with_epochs(10))
        .await
        .unwrap();
    let _feed = feeds.recv().await.unwrap();

    let snapshot = controller.current_snapshot(handle).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.current_epoch, 0);
    assert_eq!(snapshot.total_epochs, 10);
    assert!(snapshot.latest.is_none());
    assert!(snapshot.series.is_empty());
}

#[tokio::test]
async fn full_run_completes_with_one_record() {
    let data = TempDir::new().unwrap();
    let (controller, mut feeds) = manual_controller();

    let handle = controller
        .start_session(RunConfiguration::new("Run 1", data.path()).with_epochs(10))
        .await
        .unwrap();
    let feed = feeds.recv().await.unwrap();

    for epoch in 1..=10 {
        feed.progress(event(epoch, 10)).await.unwrap();
    }

    let snapshot = controller.wait_for_termination(handle).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.current_epoch, 10);
    assert_eq!(snapshot.series.len(), 10);
    assert_eq!(snapshot.estimated_remaining, Some(Duration::ZERO));

    let history = controller.history().list();
    assert_eq!(history.len(), 1);
    let record = history.last().unwrap();
    assert_eq!(record.name, "Run 1");
    assert_eq!(record.outcome, Outcome::Completed);
    assert_relative_eq!(record.final_loss.unwrap(), 0.2, epsilon = 1e-9);
    assert_relative_eq!(record.final_jaccard.unwrap(), 0.9, epsilon = 1e-9);

    assert!(controller.active().is_none());
}

#[tokio::test]
async fn stopped_session_ignores_later_events() {
    let data = TempDir::new().unwrap();
    let (controller, mut feeds) = manual_controller();

    let handle = controller
        .start_session(RunConfiguration::new("Run 2", data.path()).with_epochs(5))
        .await
        .unwrap();
    let mut feed = feeds.recv().await.unwrap();

    feed.progress(event(1, 5)).await.unwrap();
    feed.progress(event(2, 5)).await.unwrap();
    wait_for_epoch(&controller, handle, 2).await;

    controller.stop_session(handle).unwrap();
    assert!(feed.is_cancelled());

    // The pump may already be gone, in which case the send itself fails
    let _ = feed.progress(event(3, 5)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = controller.current_snapshot(handle).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert_eq!(snapshot.current_epoch, 2);

    let history = controller.history().list();
    assert_eq!(history.len(), 1);
    assert_eq!(history.last().unwrap().outcome, Outcome::Cancelled);
    assert_eq!(history.last().unwrap().epochs_completed, 2);
}

#[tokio::test]
async fn trainer_failure_is_recorded_and_frees_the_slot() {
    let data = TempDir::new().unwrap();
    let (controller, mut feeds) = manual_controller();

    let first = controller
        .start_session(RunConfiguration::new("Run 3", data.path()).with_epochs(5))
        .await
        .unwrap();
    let feed = feeds.recv().await.unwrap();
    feed.progress(event(1, 5)).await.unwrap();
    feed.fail("CUDA out of memory").await.unwrap();

    let snapshot = controller.wait_for_termination(first).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.failure_reason.as_deref(), Some("CUDA out of memory"));
    assert_eq!(controller.history().list().last().unwrap().outcome, Outcome::Failed);

    let second = controller
        .start_session(RunConfiguration::new("Run 4", data.path()).with_epochs(5))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(controller.active(), Some(second));
    assert!(matches!(controller.stop_session(first), Err(Error::NotRunning(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_racing_final_events_terminates_once() {
    let data = TempDir::new().unwrap();

    for round in 0..20 {
        let (controller, mut feeds) = manual_controller();
        let handle = controller
            .start_session(RunConfiguration::new(format!("race {}", round), data.path()).with_epochs(8))
            .await
            .unwrap();
        let feed = feeds.recv().await.unwrap();

        let producer = tokio::spawn(async move {
            for epoch in 1..=8 {
                if feed.progress(event(epoch, 8)).await.is_err() {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_micros(200 * round)).await;
        let stopped = controller.stop_session(handle);
        producer.await.unwrap();

        let snapshot = controller.wait_for_termination(handle).await.unwrap();
        let history = controller.history().list();
        assert_eq!(history.len(), 1, "round {}", round);

        let record = history.last().unwrap();
        assert_eq!(Some(record.outcome), snapshot.status.outcome());
        match stopped {
            Ok(()) => assert_eq!(record.outcome, Outcome::Cancelled),
            Err(Error::NotRunning(_)) => assert_eq!(record.outcome, Outcome::Completed),
            Err(e) => panic!("unexpected error {}", e),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshots_never_go_backwards() {
    let data = TempDir::new().unwrap();
    let (controller, mut feeds) = manual_controller();

    let handle = controller
        .start_session(RunConfiguration::new("observed", data.path()).with_epochs(50))
        .await
        .unwrap();
    let feed = feeds.recv().await.unwrap();

    let reader = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut last = 0;
            loop {
                let snapshot = controller.current_snapshot(handle).unwrap();
                assert!(snapshot.current_epoch >= last);
                assert_eq!(snapshot.series.len() as u32, snapshot.current_epoch);
                last = snapshot.current_epoch;
                if snapshot.status.is_terminal() {
                    return last;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for epoch in 1..=50 {
        feed.progress(event(epoch, 50)).await.unwrap();
    }

    assert_eq!(reader.await.unwrap(), 50);
}

#[tokio::test]
async fn simulated_run_persists_history() {
    let data = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let history_path = state.path().join("history.jsonl");

    {
        let launcher = SimulatedLauncher::new(Duration::from_millis(1), 1e-3).with_seed(7);
        let history = Arc::new(HistoryStore::open(&history_path).unwrap());
        let controller = SessionController::new(Arc::new(launcher), history);

        let handle = controller
            .start_session(RunConfiguration::new("simulated", data.path()).with_epochs(6))
            .await
            .unwrap();
        let snapshot = controller.wait_for_termination(handle).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.series.jaccard_index.len(), 6);
    }

    let reopened = HistoryStore::open(&history_path).unwrap();
    let history = reopened.list();
    assert_eq!(history.len(), 1);
    let record = history.last().unwrap();
    assert_eq!(record.name, "simulated");
    assert_eq!(record.outcome, Outcome::Completed);
    assert_eq!(record.epochs_completed, 6);
}
