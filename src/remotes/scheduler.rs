// ABOUTME: Bounded worker pool with composable completion handles.
// ABOUTME: schedule/then/when_all with first-error propagation and cancellation-aware execution.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Error produced by a scheduled task.
pub type TaskError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Wrap any error as a task error.
pub fn task_error<E>(error: E) -> TaskError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(error)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("context canceled")]
    Canceled,

    #[error("{0}")]
    Task(TaskError),

    #[error("scheduler stopped before the task completed")]
    Stopped,
}

impl ScheduleError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ScheduleError::Canceled)
    }
}

type Outcome = Result<(), ScheduleError>;
type Job = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Fixed-size worker pool sharing one cancellation context.
///
/// The first failing task cancels the context: tasks already running observe
/// it through their token, and tasks that have not started yet settle as
/// [`ScheduleError::Canceled`] without running. The caller's token is never
/// cancelled by the scheduler, only the child derived from it.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: CancellationToken,
    jobs: mpsc::Sender<Job>,
}

impl Scheduler {
    pub fn new(parent: &CancellationToken, max_concurrent_jobs: usize, job_buffer_size: usize) -> Self {
        let ctx = parent.child_token();
        let (jobs, rx) = mpsc::channel::<Job>(job_buffer_size.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));

        for _ in 0..max_concurrent_jobs.max(1) {
            let rx = rx.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job(ctx.clone()).await,
                        None => break,
                    }
                }
            });
        }

        Self {
            inner: Arc::new(Inner { ctx, jobs }),
        }
    }

    /// The scheduler's own context.
    pub fn context(&self) -> &CancellationToken {
        &self.inner.ctx
    }

    pub fn cancel(&self) {
        self.inner.ctx.cancel();
    }

    /// Queue a task; it starts as soon as a worker is free.
    pub fn schedule<F, Fut>(&self, task: F) -> Dependency
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        if self.inner.ctx.is_cancelled() {
            return Dependency::Failed(ScheduleError::Canceled);
        }
        Dependency::from_receiver(self.submit(task))
    }

    /// Queue a task that itself produces a dependency, and wait for both.
    pub fn schedule_and_unwrap<F, Fut>(&self, task: F) -> Dependency
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Dependency, TaskError>> + Send + 'static,
    {
        if self.inner.ctx.is_cancelled() {
            return Dependency::Failed(ScheduleError::Canceled);
        }
        let rx = self.submit(task);
        Dependency::from_future(async move {
            match rx.await {
                Ok(Ok(inner)) => inner.wait().await,
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ScheduleError::Stopped),
            }
        })
    }

    fn submit<T, F, Fut>(&self, task: F) -> oneshot::Receiver<Result<T, ScheduleError>>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |ctx: CancellationToken| {
            async move {
                if ctx.is_cancelled() {
                    let _ = tx.send(Err(ScheduleError::Canceled));
                    return;
                }
                let result = task(ctx.clone()).await.map_err(ScheduleError::Task);
                if result.is_err() {
                    // Cancel before reporting so later schedules see it.
                    ctx.cancel();
                }
                let _ = tx.send(result);
            }
            .boxed()
        });

        match self.inner.jobs.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                let jobs = self.inner.jobs.clone();
                tokio::spawn(async move {
                    if jobs.send(job).await.is_err() {
                        tracing::debug!("scheduler closed while a job was queued");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("scheduler closed, dropping job");
            }
        }
        rx
    }
}

/// Handle to eventual completion of scheduled work.
#[derive(Clone)]
pub enum Dependency {
    /// Already completed successfully.
    Done,
    /// Already failed.
    Failed(ScheduleError),
    Pending(Shared<BoxFuture<'static, Outcome>>),
}

impl Dependency {
    fn from_receiver(rx: oneshot::Receiver<Outcome>) -> Self {
        Self::from_future(async move { rx.await.unwrap_or(Err(ScheduleError::Stopped)) })
    }

    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        Dependency::Pending(future.boxed().shared())
    }

    /// Wait for completion. Any number of callers may wait on clones of one handle.
    pub async fn wait(&self) -> Outcome {
        match self {
            Dependency::Done => Ok(()),
            Dependency::Failed(e) => Err(e.clone()),
            Dependency::Pending(shared) => shared.clone().await,
        }
    }

    /// Run `continuation` on `scheduler` once this completes successfully.
    ///
    /// If this fails, the continuation never runs and the returned handle
    /// carries the same error. Waiting for the parent does not occupy a worker.
    pub fn then<F, Fut>(self, scheduler: &Scheduler, continuation: F) -> Dependency
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        match self {
            Dependency::Failed(e) => Dependency::Failed(e),
            Dependency::Done => scheduler.schedule(continuation),
            pending => {
                let scheduler = scheduler.clone();
                let (tx, rx) = oneshot::channel();
                tokio::spawn(async move {
                    let result = match pending.wait().await {
                        Ok(()) => scheduler.schedule(continuation).wait().await,
                        Err(e) => Err(e),
                    };
                    let _ = tx.send(result);
                });
                Dependency::from_receiver(rx)
            }
        }
    }
}

/// Join handles; resolves with the first error without waiting for stragglers.
pub fn when_all(dependencies: Vec<Dependency>) -> Dependency {
    if dependencies.is_empty() {
        return Dependency::Done;
    }
    Dependency::from_future(async move {
        let waits = dependencies
            .into_iter()
            .map(|dependency| async move { dependency.wait().await });
        futures::future::try_join_all(waits).await.map(|_| ())
    })
}
