//! In-memory broker doubles shared by the integration suites.
#![allow(dead_code)]

use futures::future::BoxFuture;
use logpipe::{
    CommitError, FetchError, Header, HandlerError, OffsetCommitter, PipelineConfig,
    PublishError, RecordHandler, RecordPublisher, RecordSource, WorkUnit,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A record accepted by the in-memory publisher.
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
}

impl PublishedRecord {
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_slice())
    }
}

/// Scripted in-memory broker implementing all three collaborator traits.
///
/// Polls replay the scripted batches in order; once the script runs out the
/// `exhausted` token fires and further polls park until cancellation, which
/// mirrors an idle consumer at the head of the log.
#[derive(Default)]
pub struct InMemoryBroker {
    batches: Mutex<Vec<Result<Vec<WorkUnit>, FetchError>>>,
    pub exhausted: CancellationToken,
    commits: Mutex<Vec<(u32, u64, Instant)>>,
    published: Mutex<Vec<PublishedRecord>>,
    publish_failures: AtomicU32,
}

impl InMemoryBroker {
    pub fn with_batches(batches: Vec<Result<Vec<WorkUnit>, FetchError>>) -> Self {
        Self {
            batches: Mutex::new(batches),
            ..Self::default()
        }
    }

    /// Makes the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.publish_failures.store(n, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<(u32, u64)> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .map(|&(p, o, _)| (p, o))
            .collect()
    }

    /// Commits restricted to one partition, with the paused-clock instant at
    /// which each was recorded.
    pub fn commits_for(&self, partition: u32) -> Vec<(u64, Instant)> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .filter(|&&(p, _, _)| p == partition)
            .map(|&(_, o, at)| (o, at))
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedRecord> {
        self.published.lock().unwrap().clone()
    }
}

impl RecordSource for InMemoryBroker {
    fn poll(
        &self,
        _max_wait: Duration,
        _max_records: usize,
    ) -> BoxFuture<'_, Result<Vec<WorkUnit>, FetchError>> {
        let next = {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                None
            } else {
                Some(batches.remove(0))
            }
        };
        Box::pin(async move {
            match next {
                Some(batch) => batch,
                None => {
                    self.exhausted.cancel();
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        })
    }
}

impl OffsetCommitter for InMemoryBroker {
    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), CommitError>> {
        self.commits
            .lock()
            .unwrap()
            .push((partition, offset, Instant::now()));
        Box::pin(async { Ok(()) })
    }
}

impl RecordPublisher for InMemoryBroker {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a [u8],
        value: &'a [u8],
        headers: &'a [Header],
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let remaining = self.publish_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.publish_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PublishError(anyhow::anyhow!("simulated publish failure")));
            }
            self.published.lock().unwrap().push(PublishedRecord {
                topic: topic.to_string(),
                key: key.to_vec(),
                value: value.to_vec(),
                headers: headers.to_vec(),
            });
            Ok(())
        })
    }
}

/// Handler scripted to fail a fixed number of times per unit before
/// succeeding. `u32::MAX` means the unit never succeeds.
#[derive(Default)]
pub struct ScriptedHandler {
    failures: Mutex<HashMap<(u32, u64), u32>>,
    permanent: Mutex<HashMap<(u32, u64), bool>>,
    calls: Mutex<Vec<(u32, u64)>>,
}

impl ScriptedHandler {
    pub fn fail_times(&self, partition: u32, offset: u64, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert((partition, offset), times);
    }

    pub fn fail_permanently(&self, partition: u32, offset: u64) {
        self.permanent
            .lock()
            .unwrap()
            .insert((partition, offset), true);
    }

    pub fn calls(&self) -> Vec<(u32, u64)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, partition: u32, offset: u64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|&&c| c == (partition, offset))
            .count()
    }
}

impl RecordHandler for ScriptedHandler {
    fn handle<'a>(&'a self, unit: &'a WorkUnit) -> BoxFuture<'a, Result<(), HandlerError>> {
        let key = (unit.partition(), unit.offset());
        self.calls.lock().unwrap().push(key);

        if self.permanent.lock().unwrap().get(&key).copied().unwrap_or(false) {
            return Box::pin(async move {
                Err(HandlerError::permanent(anyhow::anyhow!(
                    "unparseable record at {}:{}",
                    key.0,
                    key.1
                )))
            });
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };

        Box::pin(async move {
            if should_fail {
                Err(HandlerError::transient(anyhow::anyhow!(
                    "downstream unavailable for {}:{}",
                    key.0,
                    key.1
                )))
            } else {
                Ok(())
            }
        })
    }
}

pub fn unit(partition: u32, offset: u64) -> WorkUnit {
    WorkUnit::new(
        partition,
        offset,
        format!("key-{offset}").into_bytes(),
        format!("value-{offset}").into_bytes(),
        vec![],
    )
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig::builder()
        .seed_addresses(["localhost:9092"])
        .group_id("integration-tests")
        .topics(["orders"])
        .build()
        .expect("test config should build")
}
