//! Graceful-shutdown scenarios driven through the runner.

mod support;

use logpipe::{PipelineConfig, Runner, Termination, FORCE_QUIT_EXIT_CODE};
use std::sync::Arc;
use std::time::Duration;
use support::{unit, InMemoryBroker, ScriptedHandler};
use tokio::time::sleep;

fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .seed_addresses(["localhost:9092"])
        .group_id("shutdown-tests")
        .topics(["orders"])
        .build()
        .unwrap()
}

fn runner(broker: Arc<InMemoryBroker>, handler: Arc<ScriptedHandler>) -> Runner {
    Runner::new(
        config(),
        broker.clone(),
        broker.clone(),
        broker,
        handler,
    )
}

#[tokio::test]
async fn shutdown_request_drains_and_exits_clean() {
    let broker = Arc::new(InMemoryBroker::with_batches(vec![Ok(vec![
        unit(0, 1),
        unit(1, 5),
    ])]));
    let handler = Arc::new(ScriptedHandler::default());

    let runner = runner(broker.clone(), handler.clone());
    let coordinator = runner.coordinator();
    let run = tokio::spawn(runner.run());

    broker.exhausted.cancelled().await;
    coordinator.request_shutdown();

    let outcome = run
        .await
        .expect("runner task should not panic")
        .expect("run should succeed");

    assert_eq!(outcome.termination, Termination::Drained);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.stats.processed, 2);
    assert_eq!(handler.calls().len(), 2);
    let mut commits = broker.commits();
    commits.sort_unstable();
    assert_eq!(commits, vec![(0, 1), (1, 5)]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_backoff_abandons_the_unit_uncommitted() {
    let broker = Arc::new(InMemoryBroker::with_batches(vec![Ok(vec![unit(0, 9)])]));
    let handler = Arc::new(ScriptedHandler::default());
    handler.fail_times(0, 9, u32::MAX);

    let runner = runner(broker.clone(), handler.clone());
    let coordinator = runner.coordinator();
    let run = tokio::spawn(runner.run());

    // Let the first attempt fail and the backoff wait begin.
    sleep(Duration::from_millis(500)).await;
    assert_eq!(handler.calls().len(), 1);
    coordinator.request_shutdown();

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.termination, Termination::Drained);
    assert_eq!(
        handler.calls().len(),
        1,
        "no further attempt after shutdown interrupts the backoff"
    );
    assert!(
        broker.commits().is_empty(),
        "an abandoned unit is redelivered later, never committed"
    );
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn force_quit_abandons_stuck_cleanup() {
    let broker = Arc::new(InMemoryBroker::with_batches(vec![]));
    let handler = Arc::new(ScriptedHandler::default());

    let runner = runner(broker.clone(), handler);
    let coordinator = runner.coordinator();
    coordinator.register_cleanup("wedged resource", futures::future::pending());

    let run = tokio::spawn(runner.run());
    broker.exhausted.cancelled().await;

    coordinator.request_shutdown();
    // Give the drain a moment to block on the wedged cleanup.
    sleep(Duration::from_millis(50)).await;
    assert!(coordinator.pending_cleanups() > 0);
    coordinator.request_force_quit();

    let outcome = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("force quit must unblock the run")
        .expect("runner task should not panic")
        .expect("run should report an outcome");

    assert_eq!(outcome.termination, Termination::ForceQuit);
    assert_eq!(outcome.exit_code(), FORCE_QUIT_EXIT_CODE);
}

#[tokio::test]
async fn external_cleanups_run_after_the_pipeline_stops_polling() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let broker = Arc::new(InMemoryBroker::with_batches(vec![Ok(vec![unit(0, 1)])]));
    let handler = Arc::new(ScriptedHandler::default());

    let runner = runner(broker.clone(), handler);
    let coordinator = runner.coordinator();

    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = cleaned.clone();
    coordinator.register_cleanup("flush state", async move {
        flag.store(true, Ordering::SeqCst);
    });

    let run = tokio::spawn(runner.run());
    broker.exhausted.cancelled().await;
    assert!(!cleaned.load(Ordering::SeqCst), "cleanup must wait for shutdown");

    coordinator.request_shutdown();
    let outcome = run.await.unwrap().unwrap();

    assert_eq!(outcome.termination, Termination::Drained);
    assert!(cleaned.load(Ordering::SeqCst));
    assert_eq!(coordinator.pending_cleanups(), 0);
}
