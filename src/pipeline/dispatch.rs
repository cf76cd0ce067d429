//! Per-partition processing: the attempt loop, backoff waits, dead-letter
//! hand-off, and commit bookkeeping for one partition's slice of a poll batch.

use crate::pipeline::backoff::{RetryDecision, RetryPolicy};
use crate::pipeline::commit::{CommitCursor, CommitMode};
use crate::pipeline::dead_letter::{DeadLetterFailurePolicy, DeadLetterSink, FailureMetadata};
use crate::record::{AttemptState, WorkUnit};
use crate::runtime::broker::{ErrorClass, OffsetCommitter, RecordHandler};
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// How a partition slice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// Every unit in the slice reached a terminal outcome and was committed.
    Completed,
    /// Shutdown interrupted the slice. Resolved units were committed; the
    /// remainder was abandoned for redelivery.
    Interrupted,
}

/// Drives units of a single partition through attempts until each reaches a
/// terminal outcome.
///
/// One dispatcher is shared by all partition tasks; the per-partition state
/// ([`CommitCursor`]) is passed in by the caller, which owns it exclusively
/// for the duration of the slice.
pub struct UnitDispatcher {
    handler: Arc<dyn RecordHandler>,
    committer: Arc<dyn OffsetCommitter>,
    sink: Arc<DeadLetterSink>,
    policy: RetryPolicy,
    commit_mode: CommitMode,
    dead_letter_failure: DeadLetterFailurePolicy,
    source_topic: String,
    telemetry: Arc<Telemetry>,
    cancel: CancellationToken,
}

impl UnitDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handler: Arc<dyn RecordHandler>,
        committer: Arc<dyn OffsetCommitter>,
        sink: Arc<DeadLetterSink>,
        policy: RetryPolicy,
        commit_mode: CommitMode,
        dead_letter_failure: DeadLetterFailurePolicy,
        source_topic: impl Into<String>,
        telemetry: Arc<Telemetry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            committer,
            sink,
            policy,
            commit_mode,
            dead_letter_failure,
            source_topic: source_topic.into(),
            telemetry,
            cancel,
        }
    }

    /// Processes one partition's slice of a poll batch, in offset order.
    ///
    /// Units resolve strictly one at a time; a backoff wait suspends this
    /// partition only. Commit errors and unrecoverable dead-letter forwards
    /// propagate as fatal. A cancellation observed during a backoff wait (or
    /// between units) abandons the rest of the slice without committing it.
    pub async fn run_slice(
        &self,
        units: Vec<WorkUnit>,
        cursor: &mut CommitCursor,
    ) -> Result<SliceStatus> {
        let mut resolved_up_to: Option<u64> = None;

        for unit in units {
            if self.cancel.is_cancelled() {
                self.flush_batched(cursor, resolved_up_to).await?;
                return Ok(SliceStatus::Interrupted);
            }

            let offset = unit.offset();
            match self.resolve_unit(unit).await? {
                UnitResolution::Resolved => {
                    resolved_up_to = Some(offset);
                    if self.commit_mode == CommitMode::PerUnit {
                        self.commit(cursor, offset).await?;
                    }
                }
                UnitResolution::Abandoned => {
                    self.flush_batched(cursor, resolved_up_to).await?;
                    return Ok(SliceStatus::Interrupted);
                }
            }
        }

        self.flush_batched(cursor, resolved_up_to).await?;
        Ok(SliceStatus::Completed)
    }

    /// Runs the attempt loop for one unit until success or dead-letter.
    async fn resolve_unit(&self, unit: WorkUnit) -> Result<UnitResolution> {
        let partition = unit.partition();
        let offset = unit.offset();
        let mut state = AttemptState::new(unit);

        loop {
            match self.handler.handle(state.unit()).await {
                Ok(()) => {
                    self.telemetry.record_processed();
                    tracing::debug!(partition, offset, attempts = state.attempt(), "unit processed");
                    return Ok(UnitResolution::Resolved);
                }
                Err(err) => {
                    self.telemetry.record_error();
                    let class = err.class();
                    let message = format!("{:#}", err.into_source());
                    let failure_index = state.attempt();
                    state.record_failure(&message);

                    match self.policy.decide(failure_index, class) {
                        RetryDecision::Retry { after } => {
                            self.telemetry.record_retry();
                            tracing::warn!(
                                partition,
                                offset,
                                attempt = state.attempt(),
                                backoff = ?after,
                                error = %message,
                                "attempt failed; retrying after backoff"
                            );
                            if self.wait_or_cancel(after).await.is_err() {
                                tracing::info!(
                                    partition,
                                    offset,
                                    "shutdown during backoff; abandoning unit for redelivery"
                                );
                                return Ok(UnitResolution::Abandoned);
                            }
                        }
                        RetryDecision::GiveUp => {
                            self.dead_letter(state).await?;
                            return Ok(UnitResolution::Resolved);
                        }
                    }
                }
            }
        }
    }

    /// Hands a terminally-failed unit to the dead-letter sink, applying the
    /// configured forward-failure policy.
    async fn dead_letter(&self, state: AttemptState) -> Result<()> {
        let metadata = FailureMetadata {
            source_topic: self.source_topic.clone(),
            partition: state.unit().partition(),
            offset: state.unit().offset(),
            failed_at: SystemTime::now(),
            last_error: state.last_error().unwrap_or("unknown").to_string(),
            attempts: state.attempt(),
        };
        let unit = state.into_unit();

        let mut forward_attempt: u32 = 0;
        loop {
            match self.sink.forward(&unit, &metadata).await {
                Ok(()) => {
                    self.telemetry.record_dead_lettered();
                    return Ok(());
                }
                Err(err) => {
                    self.telemetry.record_error();
                    match self.dead_letter_failure {
                        DeadLetterFailurePolicy::Fatal => {
                            return Err(err).with_context(|| {
                                format!(
                                    "dead-letter forward failed for partition {} offset {}",
                                    metadata.partition, metadata.offset
                                )
                            });
                        }
                        DeadLetterFailurePolicy::Retry => {
                            match self.policy.decide(forward_attempt, ErrorClass::Transient) {
                                RetryDecision::Retry { after } => {
                                    forward_attempt += 1;
                                    tracing::warn!(
                                        partition = metadata.partition,
                                        offset = metadata.offset,
                                        attempt = forward_attempt,
                                        backoff = ?after,
                                        error = %err,
                                        "dead-letter forward failed; retrying"
                                    );
                                    if self.wait_or_cancel(after).await.is_err() {
                                        return Err(err).context(
                                            "shutdown while retrying dead-letter forward",
                                        );
                                    }
                                }
                                RetryDecision::GiveUp => {
                                    return Err(err).with_context(|| {
                                        format!(
                                            "dead-letter forward exhausted retries for partition {} offset {}",
                                            metadata.partition, metadata.offset
                                        )
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// In batched mode, commits the highest resolved offset of the slice.
    async fn flush_batched(&self, cursor: &mut CommitCursor, resolved: Option<u64>) -> Result<()> {
        if self.commit_mode != CommitMode::Batched {
            return Ok(());
        }
        if let Some(offset) = resolved {
            self.commit(cursor, offset).await?;
        }
        Ok(())
    }

    async fn commit(&self, cursor: &mut CommitCursor, offset: u64) -> Result<()> {
        cursor.advance(offset)?;
        self.committer
            .commit(cursor.partition(), offset)
            .await
            .with_context(|| {
                format!(
                    "failed to commit offset {} on partition {}",
                    offset,
                    cursor.partition()
                )
            })?;
        tracing::trace!(partition = cursor.partition(), offset, "offset committed");
        Ok(())
    }

    /// Sleeps for `wait`, returning `Err(())` if cancellation wins the race.
    async fn wait_or_cancel(&self, wait: std::time::Duration) -> std::result::Result<(), ()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(()),
            _ = sleep(wait) => Ok(()),
        }
    }
}

enum UnitResolution {
    /// Succeeded or dead-lettered; safe to commit past.
    Resolved,
    /// Dropped mid-flight due to shutdown; must not be committed.
    Abandoned,
}
