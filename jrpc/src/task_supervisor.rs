use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct TaskSupervisorState {
    /// Number of currently running tasks.
    running: AtomicU64,
    /// Cancelled when stop is requested.
    stop: CancellationToken,
    /// Cancelled when all tasks have stopped.
    stopped: CancellationToken,
}

/// Tracks the background loops of an endpoint.
///
/// Tasks spawned through [`TaskSupervisor::spawn`] are cancelled at their
/// next await point once [`TaskSupervisor::stop`] is called, and
/// [`TaskSupervisor::all_stopped`] resolves after the last one exits.
/// Dropping the supervisor stops its tasks.
///
/// ```rust,no_run
/// # use jrpc::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::create(tokio::runtime::Handle::current());
/// supervisor.spawn(async {
///     // loop body
/// });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TaskSupervisor {
    state: Arc<TaskSupervisorState>,
    runtime: Handle,
}

/// Keeps a task counted as running until dropped.
#[derive(Debug)]
pub struct TaskSupervisorGuard(Arc<TaskSupervisorState>);

impl TaskSupervisorState {
    fn finish_async_task(&self) {
        let running = self.running.fetch_sub(1, Ordering::AcqRel) - 1;
        if running == 0 {
            self.stopped.cancel();
        }
    }
}

impl TaskSupervisor {
    /// Creates a supervisor spawning onto `runtime`.
    ///
    /// Starts with one sentinel task that exits on stop, so
    /// `all_stopped` never resolves before `stop` is requested.
    #[must_use]
    pub fn create(runtime: Handle) -> Self {
        let supervisor = Self {
            state: Arc::default(),
            runtime,
        };

        let guard = supervisor.start_async_task();
        supervisor.runtime.spawn(async move {
            guard.stopped().await;
        });

        supervisor
    }

    pub fn stop(&self) {
        self.state.stop.cancel();
    }

    /// A guard calling `stop()` when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.state.stop.clone().drop_guard()
    }

    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.state.stop.cancelled()
    }

    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.state.stopped.cancelled()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.stop.is_cancelled()
    }

    #[must_use]
    pub fn start_async_task(&self) -> TaskSupervisorGuard {
        self.state.running.fetch_add(1, Ordering::AcqRel);
        TaskSupervisorGuard(self.state.clone())
    }

    /// Spawns `fut` as a supervised task; it is dropped when stop is requested.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.start_async_task();
        self.runtime.spawn(async move {
            tokio::select! {
                () = guard.stopped() => {},
                () = fut => {},
            }
        });
    }

    #[must_use]
    pub fn running(&self) -> u64 {
        self.state.running.load(Ordering::Acquire)
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskSupervisorGuard {
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }
}

impl Drop for TaskSupervisorGuard {
    fn drop(&mut self) {
        self.0.finish_async_task();
    }
}
