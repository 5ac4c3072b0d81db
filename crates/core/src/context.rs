//! Per-run context: request id and cancellation

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Request id used when the host does not supply one
pub const DEFAULT_REQUEST_ID: &str = "-";

/// Carried through every query run. Cloning shares the same cancellation
/// token; [`RunContext::child`] derives a token that the parent can cancel
/// but that does not cancel the parent.
#[derive(Debug, Clone)]
pub struct RunContext {
    request_id: Arc<str>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            request_id: Arc::from(DEFAULT_REQUEST_ID),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<Arc<str>>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a backend call, giving up with [`Error::Cancelled`] as soon as
    /// the context is cancelled.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            output = fut => Ok(output),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
