//! Waiting for backend jobs that complete asynchronously

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::waiter::{WaitState, Waiter, WaiterConfig};

/// Upper bound for the best-effort cancel issued on timeout or cancellation
pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(1);

/// Status reported by one poll of a backend job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished,
    Failed(String),
    Aborted(String),
}

/// A backend job that can be polled and cancelled
#[async_trait]
pub trait PollableJob: Send {
    async fn poll(&mut self) -> Result<JobStatus>;

    async fn cancel(&mut self) -> Result<()>;
}

/// Poll `job` with the backoff policy until it finishes.
///
/// Failed and aborted jobs end with [`Error::Backend`]. On timeout or
/// cancellation the job is cancelled (bounded by [`CANCEL_TIMEOUT`]) and
/// [`Error::Timeout`] or [`Error::Cancelled`] is returned.
pub async fn wait_for_completion<J>(
    job: &mut J,
    ctx: &RunContext,
    config: WaiterConfig,
    label: &str,
) -> Result<()>
where
    J: PollableJob + ?Sized,
{
    let mut waiter = Waiter::start_now(config);
    loop {
        match waiter.wait(ctx.cancellation()).await {
            WaitState::Ready => {}
            WaitState::TimedOut => {
                cancel_job(job, ctx, label).await;
                return Err(Error::Timeout {
                    operation: label.to_owned(),
                    elapsed: waiter.elapsed(),
                });
            }
            WaitState::Cancelled => {
                cancel_job(job, ctx, label).await;
                return Err(Error::Cancelled);
            }
        }

        debug!(
            request_id = ctx.request_id(),
            attempt = waiter.attempt(),
            elapsed = ?waiter.elapsed(),
            "waiting for {label}"
        );
        let polled = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => None,
            status = job.poll() => Some(status),
        };
        let Some(status) = polled else {
            cancel_job(job, ctx, label).await;
            return Err(Error::Cancelled);
        };

        match status? {
            JobStatus::Running => continue,
            JobStatus::Finished => {
                debug!(request_id = ctx.request_id(), "{label} finished");
                return Ok(());
            }
            JobStatus::Failed(message) => {
                return Err(Error::backend(format!("{label} failed: {message}")));
            }
            JobStatus::Aborted(message) => {
                return Err(Error::backend(format!("{label} aborted: {message}")));
            }
        }
    }
}

async fn cancel_job<J>(job: &mut J, ctx: &RunContext, label: &str)
where
    J: PollableJob + ?Sized,
{
    match tokio::time::timeout(CANCEL_TIMEOUT, job.cancel()).await {
        Ok(Ok(())) => info!(request_id = ctx.request_id(), "{label} cancelled"),
        Ok(Err(err)) => warn!(request_id = ctx.request_id(), "failed to cancel {label}: {err}"),
        Err(_) => warn!(
            request_id = ctx.request_id(),
            "cancel of {label} did not finish within {CANCEL_TIMEOUT:?}"
        ),
    }
}
