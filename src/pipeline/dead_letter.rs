use crate::record::{Header, WorkUnit};
use crate::runtime::broker::{PublishError, RecordPublisher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Suffix appended to the source topic when no explicit dead-letter topic is
/// configured.
pub const DEAD_LETTER_TOPIC_SUFFIX: &str = "-dlq";

/// What the pipeline does when forwarding to the dead-letter destination
/// itself fails. Losing a poison record silently is worse than stalling the
/// partition, so there is no "skip" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterFailurePolicy {
    /// Stop the run and surface the publish error.
    Fatal,
    /// Re-forward under the pipeline's backoff policy; fatal only once the
    /// forward attempts are exhausted.
    Retry,
}

/// Provenance attached to a dead-lettered unit.
#[derive(Debug, Clone)]
pub struct FailureMetadata {
    pub source_topic: String,
    pub partition: u32,
    pub offset: u64,
    pub failed_at: SystemTime,
    pub last_error: String,
    pub attempts: u32,
}

impl FailureMetadata {
    fn provenance_headers(&self) -> Vec<Header> {
        let failed_at_secs = self
            .failed_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        vec![
            Header::new("original-topic", self.source_topic.as_bytes().to_vec()),
            Header::new("original-partition", self.partition.to_string().into_bytes()),
            Header::new("original-offset", self.offset.to_string().into_bytes()),
            Header::new(
                "failure-timestamp",
                failed_at_secs.to_string().into_bytes(),
            ),
            Header::new("last-error", self.last_error.as_bytes().to_vec()),
            Header::new("attempts", self.attempts.to_string().into_bytes()),
        ]
    }
}

/// Forwards terminally-failed units to an alternate destination, enriched
/// with provenance headers.
pub struct DeadLetterSink {
    publisher: Arc<dyn RecordPublisher>,
    topic: String,
}

impl DeadLetterSink {
    pub fn new(publisher: Arc<dyn RecordPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Builds a sink publishing to `<source_topic>-dlq`.
    pub fn for_source_topic(publisher: Arc<dyn RecordPublisher>, source_topic: &str) -> Self {
        Self::new(
            publisher,
            format!("{source_topic}{DEAD_LETTER_TOPIC_SUFFIX}"),
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes the unit to the dead-letter topic. Publish errors propagate
    /// to the caller; they are never swallowed here.
    pub async fn forward(
        &self,
        unit: &WorkUnit,
        metadata: &FailureMetadata,
    ) -> Result<(), PublishError> {
        let enriched = unit.with_prepended_headers(metadata.provenance_headers());

        self.publisher
            .publish(
                &self.topic,
                enriched.key(),
                enriched.value(),
                enriched.headers(),
            )
            .await?;

        tracing::warn!(
            topic = %self.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            attempts = metadata.attempts,
            last_error = %metadata.last_error,
            "unit forwarded to dead-letter topic"
        );
        Ok(())
    }
}
