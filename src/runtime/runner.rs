//! Ties a [`ProcessingPipeline`] to a [`ShutdownCoordinator`] and OS signals.

use crate::pipeline::consumer::ProcessingPipeline;
use crate::runtime::broker::{OffsetCommitter, RecordHandler, RecordPublisher, RecordSource};
use crate::runtime::config::PipelineConfig;
use crate::runtime::shutdown::{ShutdownCoordinator, Termination};
use crate::runtime::telemetry::{self, RunStats};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Final report of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub stats: RunStats,
    pub termination: Termination,
}

impl RunOutcome {
    /// Process exit code a host binary should report.
    pub fn exit_code(&self) -> i32 {
        self.termination.exit_code()
    }
}

/// Owns the full lifecycle of one pipeline run: wiring, the metrics
/// reporter, signal handling, and the graceful drain.
///
/// A host binary builds a `Runner` with its broker collaborators and calls
/// [`Runner::run`]; everything else (first interrupt drains, second interrupt
/// force-quits, pipeline errors stop the run) is handled here.
pub struct Runner {
    config: PipelineConfig,
    source: Arc<dyn RecordSource>,
    committer: Arc<dyn OffsetCommitter>,
    publisher: Arc<dyn RecordPublisher>,
    handler: Arc<dyn RecordHandler>,
    coordinator: ShutdownCoordinator,
}

impl Runner {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn RecordSource>,
        committer: Arc<dyn OffsetCommitter>,
        publisher: Arc<dyn RecordPublisher>,
        handler: Arc<dyn RecordHandler>,
    ) -> Self {
        Self {
            config,
            source,
            committer,
            publisher,
            handler,
            coordinator: ShutdownCoordinator::new(),
        }
    }

    /// The coordinator driving this run. Callers can clone it to request a
    /// shutdown programmatically or to register their own cleanup actions.
    pub fn coordinator(&self) -> ShutdownCoordinator {
        self.coordinator.clone()
    }

    /// Runs the pipeline until an external interrupt or a fatal error.
    ///
    /// On the first interrupt the pipeline drains: in-flight slices resolve,
    /// offsets are committed, and every registered cleanup action runs. A
    /// second interrupt abandons the drain. The pipeline stopping on its own
    /// (fatal commit or dead-letter error) also ends the run, with the error
    /// surfaced after the drain completes.
    pub async fn run(self) -> Result<RunOutcome> {
        telemetry::init_tracing();

        let coordinator = self.coordinator.clone();
        let cancel = coordinator.cancellation_token();

        let pipeline = ProcessingPipeline::new(
            self.config.clone(),
            self.source,
            self.committer,
            self.publisher,
            self.handler,
            cancel.clone(),
        );
        let stats_handle = pipeline.telemetry();

        let reporter = telemetry::spawn_metrics_reporter(
            stats_handle.clone(),
            cancel.clone(),
            self.config.metrics_interval(),
        );

        // The pipeline signals this token when its run future returns, both
        // so the drain can wait for it and so a self-stop ends the run.
        let finished = CancellationToken::new();
        let finished_signal = finished.clone();
        let pipeline_task = tokio::spawn(async move {
            let result = pipeline.run().await;
            finished_signal.cancel();
            result
        });

        let drain_gate = finished.clone();
        coordinator.register_cleanup("pipeline drain", async move {
            drain_gate.cancelled().await;
        });

        let termination = tokio::select! {
            termination = coordinator.await_external_signal() => {
                termination.context("failed to listen for termination signals")?
            }
            _ = finished.cancelled() => {
                coordinator.request_shutdown();
                coordinator.await_termination().await
            }
        };

        if termination == Termination::ForceQuit {
            pipeline_task.abort();
        }

        let pipeline_error = match pipeline_task.await {
            Ok(Ok(_)) => None,
            Ok(Err(err)) => Some(err),
            // Aborted on force quit; any panic was already fatal to the run.
            Err(join_err) if join_err.is_cancelled() => None,
            Err(join_err) => Some(anyhow::anyhow!(join_err).context("pipeline task panicked")),
        };

        let _ = reporter.await;

        let stats = stats_handle.stats();
        tracing::info!(
            processed = stats.processed,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            errors = stats.errors,
            termination = ?termination,
            "run finished"
        );

        match pipeline_error {
            Some(err) => Err(err),
            None => Ok(RunOutcome { stats, termination }),
        }
    }
}
