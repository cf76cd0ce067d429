//! Process-wide cancellation and bounded-wait cleanup.
//!
//! A [`ShutdownCoordinator`] owns the cancellation signal every long-running
//! task observes, plus the registry of cleanup actions that must run before
//! the process exits. A first interrupt starts a graceful drain; a second
//! interrupt abandons outstanding cleanup and force-quits. Coordinators are
//! plain injected objects: tests construct a fresh one per run, there is no
//! process-global singleton.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATE_RUNNING: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;
const STATE_DRAINED: u8 = 2;
const STATE_FORCE_QUIT: u8 = 3;

/// Exit code reported after a force quit, distinct from the zero exit of a
/// clean drain (128 + SIGINT by convention).
pub const FORCE_QUIT_EXIT_CODE: i32 = 130;

/// Observable lifecycle of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Drained,
    ForceQuit,
}

/// Which terminal state [`ShutdownCoordinator::await_termination`] reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every registered cleanup action completed.
    Drained,
    /// A second termination request arrived first; outstanding cleanup
    /// actions were abandoned without being awaited.
    ForceQuit,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Drained => 0,
            Termination::ForceQuit => FORCE_QUIT_EXIT_CODE,
        }
    }
}

struct CoordinatorInner {
    cancel: CancellationToken,
    force: CancellationToken,
    state: AtomicU8,
    pending: AtomicUsize,
    cleanups: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

/// See the module documentation.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                cancel: CancellationToken::new(),
                force: CancellationToken::new(),
                state: AtomicU8::new(STATE_RUNNING),
                pending: AtomicUsize::new(0),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Token observers can watch for the cancellation signal. The signal is a
    /// level, not an edge: a clone obtained after shutdown was requested
    /// still reports cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn state(&self) -> ShutdownState {
        match self.inner.state.load(Ordering::SeqCst) {
            STATE_RUNNING => ShutdownState::Running,
            STATE_SHUTTING_DOWN => ShutdownState::ShuttingDown,
            STATE_DRAINED => ShutdownState::Drained,
            _ => ShutdownState::ForceQuit,
        }
    }

    /// Number of cleanup actions registered and not yet awaited.
    pub fn pending_cleanups(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Registers a cleanup action to run once shutdown begins.
    ///
    /// The action starts strictly after the cancellation signal fires and
    /// runs concurrently with every other registered action. The coordinator
    /// does not reach [`Termination::Drained`] until the action returns. A
    /// panicking action is logged and treated as terminated; it never blocks
    /// the drain or other actions. Callable concurrently from any number of
    /// dependents.
    pub fn register_cleanup<F>(&self, name: &'static str, action: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            tracing::debug!(cleanup = name, "running cleanup action");
            action.await;
            tracing::debug!(cleanup = name, "cleanup action finished");
        });
        self.inner
            .cleanups
            .lock()
            .expect("cleanup registry poisoned")
            .push((name, handle));
    }

    /// Requests a graceful shutdown. Idempotent: the cancellation signal is
    /// broadcast exactly once, a second call does not re-broadcast.
    pub fn request_shutdown(&self) {
        let transitioned = self
            .inner
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_SHUTTING_DOWN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if transitioned {
            tracing::info!("shutdown requested; cancelling and draining cleanup actions");
            self.inner.cancel.cancel();
        }
    }

    /// Abandons the drain. Outstanding cleanup actions are no longer awaited
    /// and [`ShutdownCoordinator::await_termination`] returns
    /// [`Termination::ForceQuit`]. Implies [`Self::request_shutdown`] if a
    /// graceful shutdown was not already in progress.
    pub fn request_force_quit(&self) {
        self.request_shutdown();
        self.inner.force.cancel();
    }

    /// Blocks until every registered cleanup action has completed
    /// (`Drained`), or until a force quit preempts the drain (`ForceQuit`).
    ///
    /// Cleanup actions that never return block this call forever; the force
    /// quit is the only bound on the wait.
    pub async fn await_termination(&self) -> Termination {
        match self.state() {
            ShutdownState::Drained => return Termination::Drained,
            ShutdownState::ForceQuit => return Termination::ForceQuit,
            _ => {}
        }

        let handles: Vec<(&'static str, JoinHandle<()>)> = {
            let mut cleanups = self
                .inner
                .cleanups
                .lock()
                .expect("cleanup registry poisoned");
            cleanups.drain(..).collect()
        };

        let pending = &self.inner.pending;
        let drain = async {
            for (name, handle) in handles {
                if let Err(err) = handle.await {
                    tracing::error!(cleanup = name, error = %err, "cleanup action panicked");
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            }
        };

        tokio::select! {
            _ = drain => {
                self.inner.state.store(STATE_DRAINED, Ordering::SeqCst);
                tracing::info!("all cleanup actions completed");
                Termination::Drained
            }
            _ = self.inner.force.cancelled() => {
                self.inner.state.store(STATE_FORCE_QUIT, Ordering::SeqCst);
                tracing::warn!(
                    abandoned = self.pending_cleanups(),
                    "force quit; abandoning outstanding cleanup actions"
                );
                Termination::ForceQuit
            }
        }
    }

    /// Blocks until the first external interrupt, then runs the full
    /// shutdown sequence. A second interrupt while draining force-quits.
    ///
    /// This is the single entry point a host binary's main control flow is
    /// expected to call.
    pub async fn await_external_signal(&self) -> std::io::Result<Termination> {
        wait_for_interrupt().await?;
        tracing::info!("interrupt received; interrupt again to force quit");
        self.request_shutdown();

        let coordinator = self.clone();
        let force_watch = tokio::spawn(async move {
            if wait_for_interrupt().await.is_ok() {
                coordinator.request_force_quit();
            }
        });

        let termination = self.await_termination().await;
        force_watch.abort();
        Ok(termination)
    }
}

async fn wait_for_interrupt() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
