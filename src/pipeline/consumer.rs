//! The poll/dispatch/commit loop driving the whole pipeline.

use crate::pipeline::commit::CommitCursor;
use crate::pipeline::dead_letter::DeadLetterSink;
use crate::pipeline::dispatch::{SliceStatus, UnitDispatcher};
use crate::record::WorkUnit;
use crate::runtime::broker::{OffsetCommitter, RecordHandler, RecordPublisher, RecordSource};
use crate::runtime::config::PipelineConfig;
use crate::runtime::telemetry::{RunStats, Telemetry};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// At-least-once record pipeline: polls a source, dispatches each partition's
/// slice to its own task, and records progress through the committer.
///
/// Partitions are independent: a unit stuck in backoff suspends only its own
/// partition. Within a partition, units resolve in strict offset order and
/// commits never regress. The pipeline stops when the cancellation token
/// fires (draining in-flight slices first) or when a fatal error surfaces
/// from a commit or an unrecoverable dead-letter forward.
pub struct ProcessingPipeline {
    config: PipelineConfig,
    source: Arc<dyn RecordSource>,
    dispatcher: Arc<UnitDispatcher>,
    telemetry: Arc<Telemetry>,
    cancel: CancellationToken,
    cursors: BTreeMap<u32, CommitCursor>,
}

impl ProcessingPipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn RecordSource>,
        committer: Arc<dyn OffsetCommitter>,
        publisher: Arc<dyn RecordPublisher>,
        handler: Arc<dyn RecordHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let sink = Arc::new(DeadLetterSink::new(publisher, config.dead_letter_topic()));
        let dispatcher = Arc::new(UnitDispatcher::new(
            handler,
            committer,
            sink,
            config.retry_policy(),
            config.commit_mode(),
            config.dead_letter_failure(),
            config.source_topic(),
            telemetry.clone(),
            cancel.clone(),
        ));

        Self {
            config,
            source,
            dispatcher,
            telemetry,
            cancel,
            cursors: BTreeMap::new(),
        }
    }

    /// Shared counters, for reporting alongside the run.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Runs the pipeline until cancellation or a fatal error.
    ///
    /// Returns the final counters on a clean stop. Fetch errors are transient
    /// by definition: they are logged, counted, and followed by a pause, never
    /// surfaced as fatal.
    pub async fn run(mut self) -> Result<RunStats> {
        tracing::info!(
            group_id = %self.config.group_id(),
            topics = ?self.config.topics(),
            commit_mode = ?self.config.commit_mode(),
            "pipeline starting"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.source.poll(
                    self.config.poll_max_wait(),
                    self.config.poll_max_records(),
                ) => result,
            };

            let units = match batch {
                Ok(units) => units,
                Err(err) => {
                    self.telemetry.record_fetch_error();
                    tracing::warn!(error = %err, "poll failed; pausing before the next poll");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(self.config.fetch_error_backoff()) => {}
                    }
                    continue;
                }
            };

            if units.is_empty() {
                continue;
            }

            self.dispatch_batch(units).await?;
        }

        tracing::info!(
            processed = self.telemetry.processed(),
            dead_lettered = self.telemetry.dead_lettered(),
            "pipeline stopped"
        );
        Ok(self.telemetry.stats())
    }

    /// Splits a poll batch by partition and drives each slice on its own
    /// task, waiting for all of them before the next poll.
    async fn dispatch_batch(&mut self, units: Vec<WorkUnit>) -> Result<()> {
        let mut slices: BTreeMap<u32, Vec<WorkUnit>> = BTreeMap::new();
        for unit in units {
            slices.entry(unit.partition()).or_default().push(unit);
        }

        let mut tasks = Vec::with_capacity(slices.len());
        for (partition, slice) in slices {
            let mut cursor = self
                .cursors
                .remove(&partition)
                .unwrap_or_else(|| CommitCursor::new(partition));
            let dispatcher = self.dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                let result = dispatcher.run_slice(slice, &mut cursor).await;
                (cursor, result)
            }));
        }

        let mut fatal: Option<anyhow::Error> = None;
        for task in tasks {
            match task.await {
                Ok((cursor, result)) => {
                    let partition = cursor.partition();
                    self.cursors.insert(partition, cursor);
                    match result {
                        Ok(SliceStatus::Completed | SliceStatus::Interrupted) => {}
                        Err(err) => {
                            if fatal.is_none() {
                                fatal = Some(err.context(format!(
                                    "partition {partition} slice failed"
                                )));
                            }
                        }
                    }
                }
                Err(join_err) => {
                    if fatal.is_none() {
                        fatal = Some(anyhow!(join_err).context("partition task panicked"));
                    }
                }
            }
        }

        match fatal {
            Some(err) => Err(err).context("stopping pipeline after fatal batch error"),
            None => Ok(()),
        }
    }
}
