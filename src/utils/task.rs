use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Result;
use crate::SystemError;

/// General one
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    name: &str,
    task: F,
    policy: &BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,                               // The type of the async function
    T: Future<Output = Result<P>>,              // The future returned by the async function
{
    let mut retries = 0;
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let mut last_error: Option<crate::Error> = None;
    loop {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => {
                return Ok(r); // Exit on success
            }
            Ok(Err(e)) => {
                warn!("task {name} attempt failed: {:?}", &e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!("task {name} attempt timed out after {:?}", timeout_duration);
            }
        };

        retries += 1;
        if retries > policy.max_retries {
            warn!("task {name} gave up after {retries} attempts");
            return Err(last_error.unwrap_or_else(|| {
                SystemError::RetryExhausted {
                    name: name.to_string(),
                    retries,
                }
                .into()
            }));
        }
        sleep(delay).await;
        // Exponential backoff (double the delay each time)
        delay = (delay * 2).min(Duration::from_millis(policy.max_delay_ms));
    }
}

// Helper function to spawn tasks and track their JoinHandles
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<tokio::task::JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    // Push the handle into the vector inside the Option
    if let Some(h) = handles {
        h.push(handle);
    }
}

/// Semaphore-bounded job pool. Jobs run on the shared runtime, at most
/// `workers` concurrently; submission awaits a free slot so producers get
/// backpressure instead of unbounded task growth.
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize) -> Self {
        WorkerPool {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub(crate) async fn submit<Fut>(
        &self,
        name: &'static str,
        fut: Fut,
    ) where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.permits.clone().acquire_owned().await {
            Ok(permit) => {
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = fut.await {
                        error!("worker job {name} failed: {:?}", e);
                    }
                });
            }
            Err(_) => {
                // pool closed during shutdown
                warn!("worker job {name} dropped, pool is closed");
            }
        }
    }

    /// Reject all future submissions. Jobs already running finish normally.
    pub(crate) fn close(&self) {
        self.permits.close();
    }
}
