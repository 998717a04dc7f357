use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::NetError,
    traits::{ChunkStream, Net},
    types::{Headers, HttpResponse, RangeSpec, RetryPolicy},
};

/// Retry decorator for [`Net`] implementations.
///
/// Retries only errors that [`NetError::is_retryable`] accepts, sleeping
/// the policy's jittered backoff between attempts. Cancellation during a
/// backoff sleep resolves to [`NetError::Aborted`] immediately.
pub struct RetryNet<N> {
    inner: N,
    policy: RetryPolicy,
}

impl<N: Net> RetryNet<N> {
    pub fn new(inner: N, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), NetError> {
        let delay = self.policy.delay_for_attempt(attempt);
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = cancel.cancelled() => Err(NetError::Aborted),
            () = sleep(delay) => Ok(()),
        }
    }
}

macro_rules! retry_loop {
    ($self:ident, $cancel:ident, $call:expr) => {{
        let mut attempt: u32 = 0;
        loop {
            match $call.await {
                Ok(out) => return Ok(out),
                Err(error) => {
                    if attempt >= $self.policy.max_retries || !error.is_retryable() {
                        return Err(error);
                    }
                    tracing::debug!(attempt, error = %error, "retrying request");
                    attempt += 1;
                    $self.backoff(attempt, $cancel).await?;
                }
            }
        }
    }};
}

#[async_trait]
impl<N: Net> Net for RetryNet<N> {
    async fn get(
        &self,
        url: Url,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError> {
        retry_loop!(self, cancel, {
            self.inner.get(url.clone(), headers.clone(), cancel)
        })
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError> {
        retry_loop!(self, cancel, {
            self.inner
                .get_range(url.clone(), range, headers.clone(), cancel)
        })
    }

    async fn stream(
        &self,
        url: Url,
        range: Option<RangeSpec>,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, NetError> {
        // Only opening the stream is retried; once chunks flow, mid-body
        // failures are the caller's to handle (it may have consumed data).
        retry_loop!(self, cancel, {
            self.inner
                .stream(url.clone(), range, headers.clone(), cancel)
        })
    }
}
