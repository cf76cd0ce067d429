//! Collaborator interfaces consumed by the pipeline: record fetching, offset
//! commits, publishing, and the host's processing hook. The broker client
//! implementing these traits lives outside this crate.

use crate::record::{Header, WorkUnit};
use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;

/// Classification of a processing failure, decided by the handler.
///
/// The retry policy never inspects record content; it only sees this class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: the same attempt may succeed later.
    Transient,
    /// Retrying cannot help; the unit goes straight to the dead-letter sink.
    Permanent,
}

/// Error surfaced by [`RecordHandler::handle`].
#[derive(Debug)]
pub struct HandlerError {
    class: ErrorClass,
    source: AnyError,
}

impl HandlerError {
    pub fn transient(source: impl Into<AnyError>) -> Self {
        Self {
            class: ErrorClass::Transient,
            source: source.into(),
        }
    }

    pub fn permanent(source: impl Into<AnyError>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            source: source.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} handler error: {}", self.class, self.source)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Transient fetch failure. Logged and retried after a short pause; never
/// fatal to the run.
#[derive(Debug)]
pub struct FetchError(pub AnyError);

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetch error: {}", self.0)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Commit failure. Fatal to the run: processing without recorded progress
/// risks unbounded reprocessing after a restart.
#[derive(Debug)]
pub struct CommitError(pub AnyError);

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commit error: {}", self.0)
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Publish failure from the dead-letter destination. Never downgraded to a
/// skip; handled according to the configured dead-letter failure policy.
#[derive(Debug)]
pub struct PublishError(pub AnyError);

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish error: {}", self.0)
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Source of records for one logical consumer.
///
/// `poll` suspends until records are available or `max_wait` elapses; an
/// empty batch is a normal outcome near the head of the log.
pub trait RecordSource: Send + Sync {
    fn poll(
        &self,
        max_wait: Duration,
        max_records: usize,
    ) -> BoxFuture<'_, Result<Vec<WorkUnit>, FetchError>>;
}

/// Durable progress recording, per partition.
pub trait OffsetCommitter: Send + Sync {
    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), CommitError>>;
}

/// Outbound publishing, used by the dead-letter sink.
pub trait RecordPublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a [u8],
        value: &'a [u8],
        headers: &'a [Header],
    ) -> BoxFuture<'a, Result<(), PublishError>>;
}

/// The host's processing hook, invoked once per attempt.
pub trait RecordHandler: Send + Sync {
    fn handle<'a>(&'a self, unit: &'a WorkUnit) -> BoxFuture<'a, Result<(), HandlerError>>;
}
