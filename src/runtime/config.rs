use crate::pipeline::backoff::{RetryPolicy, DEFAULT_MULTIPLIER};
use crate::pipeline::commit::CommitMode;
use crate::pipeline::dead_letter::{DeadLetterFailurePolicy, DEAD_LETTER_TOPIC_SUFFIX};
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_INITIAL_DELAY_SECS: u64 = 1;
const DEFAULT_MAX_DELAY_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_MAX_WAIT_MS: u64 = 1_000;
const DEFAULT_POLL_MAX_RECORDS: usize = 500;
const DEFAULT_FETCH_ERROR_BACKOFF_MS: u64 = 1_000;

/// Runtime configuration for the record-processing pipeline.
///
/// All instances must be constructed via [`PipelineConfig::builder`] or
/// [`PipelineConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    seed_addresses: Vec<String>,
    group_id: String,
    topics: Vec<String>,
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    multiplier: f64,
    commit_mode: CommitMode,
    dead_letter_topic: Option<String>,
    dead_letter_failure: DeadLetterFailurePolicy,
    poll_max_wait: Duration,
    poll_max_records: usize,
    fetch_error_backoff: Duration,
    metrics_interval: Duration,
}

pub struct PipelineConfigParams {
    pub seed_addresses: Vec<String>,
    pub group_id: String,
    pub topics: Vec<String>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub multiplier: f64,
    pub commit_mode: CommitMode,
    pub dead_letter_topic: Option<String>,
    pub dead_letter_failure: DeadLetterFailurePolicy,
    pub poll_max_wait: Duration,
    pub poll_max_records: usize,
    pub fetch_error_backoff: Duration,
    pub metrics_interval: Duration,
}

impl PipelineConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`PipelineConfig::builder`] for ergonomics when many values use
    /// defaults. Callers that already have concrete runtime parameters can use
    /// this method to enforce validation without going through the builder.
    pub fn new(params: PipelineConfigParams) -> Result<Self> {
        let PipelineConfigParams {
            seed_addresses,
            group_id,
            topics,
            initial_delay,
            max_delay,
            max_attempts,
            multiplier,
            commit_mode,
            dead_letter_topic,
            dead_letter_failure,
            poll_max_wait,
            poll_max_records,
            fetch_error_backoff,
            metrics_interval,
        } = params;

        let config = Self {
            seed_addresses: seed_addresses
                .into_iter()
                .map(|addr| addr.trim().to_owned())
                .collect(),
            group_id: group_id.trim().to_owned(),
            topics: topics
                .into_iter()
                .map(|topic| topic.trim().to_owned())
                .collect(),
            initial_delay,
            max_delay,
            max_attempts,
            multiplier,
            commit_mode,
            dead_letter_topic: dead_letter_topic.map(|topic| topic.trim().to_owned()),
            dead_letter_failure,
            poll_max_wait,
            poll_max_records,
            fetch_error_backoff,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Broker seed addresses handed to the collaborating client.
    pub fn seed_addresses(&self) -> &[String] {
        &self.seed_addresses
    }

    /// Consumer group identifier.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Topics the consumer subscribes to.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// First retry wait.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Backoff ceiling.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Hard cap on retry attempts. Zero dead-letters on first failure.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff growth factor.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Commit granularity.
    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// Destination for dead-lettered units. Defaults to the first subscribed
    /// topic with a `-dlq` suffix when not overridden.
    pub fn dead_letter_topic(&self) -> String {
        match &self.dead_letter_topic {
            Some(topic) => topic.clone(),
            None => format!("{}{}", self.topics[0], DEAD_LETTER_TOPIC_SUFFIX),
        }
    }

    /// Provenance name recorded as `original-topic` on dead-lettered units.
    pub fn source_topic(&self) -> &str {
        &self.topics[0]
    }

    /// Policy applied when the dead-letter forward itself fails.
    pub fn dead_letter_failure(&self) -> DeadLetterFailurePolicy {
        self.dead_letter_failure
    }

    /// Longest a single poll may wait for records.
    pub fn poll_max_wait(&self) -> Duration {
        self.poll_max_wait
    }

    /// Upper bound on records returned by one poll.
    pub fn poll_max_records(&self) -> usize {
        self.poll_max_records
    }

    /// Pause after a transient fetch error before polling again.
    pub fn fetch_error_backoff(&self) -> Duration {
        self.fetch_error_backoff
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Retry policy derived from the configured backoff parameters.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.initial_delay, self.max_delay, self.max_attempts)
            .with_multiplier(self.multiplier)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.seed_addresses.is_empty() {
            bail!("seed_addresses must not be empty");
        }
        if self.seed_addresses.iter().any(|addr| addr.is_empty()) {
            bail!("seed_addresses entries cannot be empty");
        }

        ensure_not_empty(&self.group_id, "group_id")?;

        if self.topics.is_empty() {
            bail!("topics must not be empty");
        }
        if self.topics.iter().any(|topic| topic.is_empty()) {
            bail!("topics entries cannot be empty");
        }

        if self.initial_delay.is_zero() {
            bail!("initial_delay must be greater than 0");
        }

        if self.max_delay < self.initial_delay {
            bail!("max_delay must be at least initial_delay");
        }

        if self.multiplier < 1.0 {
            bail!("multiplier must be at least 1.0");
        }

        if let Some(topic) = &self.dead_letter_topic {
            if topic.is_empty() {
                bail!("dead_letter_topic cannot be empty when set");
            }
        }

        if self.poll_max_wait.is_zero() {
            bail!("poll_max_wait must be greater than 0");
        }

        if self.poll_max_records == 0 {
            bail!("poll_max_records must be greater than 0");
        }

        if self.fetch_error_backoff.is_zero() {
            bail!("fetch_error_backoff must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PipelineConfigBuilder {
    seed_addresses: Option<Vec<String>>,
    group_id: Option<String>,
    topics: Option<Vec<String>>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
    multiplier: Option<f64>,
    commit_mode: Option<CommitMode>,
    dead_letter_topic: Option<String>,
    dead_letter_failure: Option<DeadLetterFailurePolicy>,
    poll_max_wait: Option<Duration>,
    poll_max_records: Option<usize>,
    fetch_error_backoff: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl PipelineConfigBuilder {
    pub fn seed_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_addresses = Some(addresses.into_iter().map(Into::into).collect());
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = Some(mode);
        self
    }

    pub fn dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    pub fn dead_letter_failure(mut self, policy: DeadLetterFailurePolicy) -> Self {
        self.dead_letter_failure = Some(policy);
        self
    }

    pub fn poll_max_wait(mut self, wait: Duration) -> Self {
        self.poll_max_wait = Some(wait);
        self
    }

    pub fn poll_max_records(mut self, records: usize) -> Self {
        self.poll_max_records = Some(records);
        self
    }

    pub fn fetch_error_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_error_backoff = Some(backoff);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        let params = PipelineConfigParams {
            seed_addresses: self.seed_addresses.context("seed_addresses is required")?,
            group_id: self.group_id.context("group_id is required")?,
            topics: self.topics.context("topics is required")?,
            initial_delay: self
                .initial_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS)),
            max_delay: self
                .max_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MAX_DELAY_SECS)),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            multiplier: self.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
            commit_mode: self.commit_mode.unwrap_or(CommitMode::Batched),
            dead_letter_topic: self.dead_letter_topic,
            dead_letter_failure: self
                .dead_letter_failure
                .unwrap_or(DeadLetterFailurePolicy::Fatal),
            poll_max_wait: self
                .poll_max_wait
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_MAX_WAIT_MS)),
            poll_max_records: self.poll_max_records.unwrap_or(DEFAULT_POLL_MAX_RECORDS),
            fetch_error_backoff: self
                .fetch_error_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_FETCH_ERROR_BACKOFF_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        PipelineConfig::new(params)
    }
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}
