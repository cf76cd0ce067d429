use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Final statistics reported by a pipeline run.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RunStats {
    /// Units that reached a successful terminal outcome.
    pub processed: u64,
    /// Retry attempts performed (backoff waits taken).
    pub retried: u64,
    /// Units forwarded to the dead-letter sink.
    pub dead_lettered: u64,
    /// Errors observed: failed processing attempts and fetch errors.
    pub errors: u64,
}

/// Lightweight rolling counters recorded by the pipeline.
#[derive(Default, Debug)]
pub struct Telemetry {
    processed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    errors: AtomicU64,
    fetch_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Spawns a background task that periodically logs throughput and error counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_stats = telemetry.stats();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "logpipe::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.stats();
                    let processed_delta = current.processed.saturating_sub(last_stats.processed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "logpipe::metrics",
                        throughput = format!("{throughput:.2}"),
                        processed = current.processed,
                        retried = current.retried,
                        dead_lettered = current.dead_lettered,
                        errors = current.errors,
                        fetch_errors = telemetry.fetch_errors(),
                        "runtime metrics snapshot"
                    );

                    last_stats = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_processed();
        telemetry.record_processed();
        telemetry.record_retry();
        telemetry.record_dead_lettered();
        telemetry.record_error();
        telemetry.record_fetch_error();

        let stats = telemetry.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.errors, 2, "fetch errors count as errors too");
        assert_eq!(telemetry.fetch_errors(), 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_processed();

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(telemetry, shutdown.clone(), Duration::from_millis(10));

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
