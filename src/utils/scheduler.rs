use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use crate::error::{Error, Result};

type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Task {
    name: String,
    interval: Duration,
    handler: TaskHandler,
}

/// Scheduler - Runs named maintenance tasks on fixed intervals
///
/// ## Behaviour
/// - Each task runs once immediately, then on every interval tick.
/// - Every invocation runs on its own tokio task, bounded by half the
///   interval; a panic or error is logged and the next tick runs as usual.
/// - `close` cancels all loops and waits for them, bounded by the shutdown
///   timeout.
///
/// ## Usage
/// ```rust,ignore
/// let mut scheduler = Scheduler::new(&shutdown, Duration::from_secs(5));
/// scheduler.add_task("delete_expired_history", Duration::from_secs(60), move || {
///     let cache = cache.clone();
///     async move { cache.delete_expired_history().await }
/// });
/// scheduler.start();
/// ```
pub struct Scheduler {
    parent: CancellationToken,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    tasks: Vec<Task>,
    running: HashMap<String, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(parent: &CancellationToken, shutdown_timeout: Duration) -> Self {
        Scheduler {
            parent: parent.clone(),
            cancel: parent.child_token(),
            shutdown_timeout,
            tasks: Vec::new(),
            running: HashMap::new(),
        }
    }

    /// Registers a task. Tasks added after `start` run on the next start.
    pub fn add_task<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, handler: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, interval = ?interval, "Task added");

        self.tasks.push(Task {
            name,
            interval: interval.max(Duration::from_millis(1)),
            handler: Arc::new(move || handler().boxed()),
        });
        self
    }

    pub fn start(&mut self) {
        if self.tasks.is_empty() {
            info!("No tasks to start in scheduler");
            return;
        }
        if !self.running.is_empty() {
            warn!("Scheduler already started");
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel = self.parent.child_token();
        }

        for task in self.tasks.clone() {
            let name = task.name.clone();
            let span = tracing::info_span!("scheduled_task", task = %name);
            let handle = tokio::spawn(run_task(task, self.cancel.clone()).instrument(span));
            self.running.insert(name, handle);
        }

        info!(tasks = self.running.len(), "Scheduler started");
    }

    /// Returns an error naming any task loop that ended before `close`.
    pub fn check_health(&mut self) -> Result<()> {
        let failed: Vec<String> = self
            .running
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if failed.is_empty() {
            return Ok(());
        }

        for name in &failed {
            self.running.remove(name);
        }
        let message = format!("Tasks terminated unexpectedly: {:?}", failed);
        error!("{}", message);
        Err(Error::TaskFailed(message))
    }

    pub fn active_task_count(&self) -> usize {
        self.running.len()
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.running.is_empty() {
            return Ok(());
        }

        info!("Stopping scheduler");
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.running.drain().map(|(_, handle)| handle).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(self.shutdown_timeout, futures_util::future::join_all(handles)).await {
            Ok(_) => {
                info!("All scheduler tasks stopped");
                Ok(())
            }
            Err(_) => {
                warn!("Scheduler tasks shutdown timed out");
                for abort in aborts {
                    abort.abort();
                }
                Err(Error::ShutdownTimeout { component: "scheduler" })
            }
        }
    }
}

async fn run_task(task: Task, cancel: CancellationToken) {
    let budget = task.interval / 2;
    info!(interval = ?task.interval, "Starting task");

    // First run happens right away.
    if !invoke(&task, None, &cancel).await {
        return;
    }

    let mut ticker = interval_at(Instant::now() + task.interval, task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        debug!("Executing task");
        if !invoke(&task, Some(budget), &cancel).await {
            break;
        }
    }

    info!("Stopping task");
}

/// Runs one invocation in its own task so a panic stays contained.
/// Returns `false` when the scheduler was cancelled meanwhile.
async fn invoke(task: &Task, budget: Option<Duration>, cancel: &CancellationToken) -> bool {
    let run = (task.handler)();
    let mut handle = tokio::spawn(async move {
        match budget {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or_else(|_| Err(Error::TaskFailed(format!("timed out after {:?}", limit)))),
            None => run.await,
        }
    });

    let joined = tokio::select! {
        _ = cancel.cancelled() => {
            handle.abort();
            return false;
        }
        joined = &mut handle => joined,
    };

    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = %task.name, error = %e, "Failed to execute task"),
        Err(e) if e.is_panic() => error!(task = %task.name, "Task panicked"),
        Err(e) => warn!(task = %task.name, error = %e, "Task was cancelled"),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_immediately_then_on_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(&CancellationToken::new(), Duration::from_secs(1));

        let counter = runs.clone();
        scheduler.add_task("count", Duration::from_millis(20), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        scheduler.start();
        assert_eq!(scheduler.active_task_count(), 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while runs.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        scheduler.close().await.unwrap();
        assert_eq!(scheduler.active_task_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_keeps_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(&CancellationToken::new(), Duration::from_secs(1));

        let counter = runs.clone();
        scheduler.add_task("explode", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first run blows up");
                }
                Err(Error::TaskFailed("still failing".to_string()))
            }
        });
        scheduler.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while runs.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(scheduler.check_health().is_ok());
        scheduler.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_start_is_noop() {
        let mut scheduler = Scheduler::new(&CancellationToken::new(), Duration::from_secs(1));
        scheduler.start();
        assert_eq!(scheduler.active_task_count(), 0);
        scheduler.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_parent_cancel_ends_loops() {
        let parent = CancellationToken::new();
        let mut scheduler = Scheduler::new(&parent, Duration::from_secs(1));
        scheduler.add_task("idle", Duration::from_secs(60), || async { Ok(()) });
        scheduler.start();

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while scheduler.check_health().is_ok() && scheduler.active_task_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(scheduler.active_task_count(), 0);
    }
}
