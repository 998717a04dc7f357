use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::NetError,
    traits::{ChunkStream, Net},
    types::{Headers, HttpResponse, RangeSpec},
};

/// Timeout decorator for [`Net`] implementations.
///
/// A timeout is just a cancellation with a specific error kind: the inner
/// request is dropped and the caller sees [`NetError::Timeout`].
pub struct TimeoutNet<N> {
    inner: N,
    timeout: Duration,
}

impl<N: Net> TimeoutNet<N> {
    pub fn new(inner: N, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, NetError>> + Send,
    ) -> Result<T, NetError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(NetError::Timeout),
        }
    }
}

#[async_trait]
impl<N: Net> Net for TimeoutNet<N> {
    async fn get(
        &self,
        url: Url,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError> {
        self.bounded(self.inner.get(url, headers, cancel)).await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError> {
        self.bounded(self.inner.get_range(url, range, headers, cancel))
            .await
    }

    async fn stream(
        &self,
        url: Url,
        range: Option<RangeSpec>,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, NetError> {
        // The timeout bounds stream *establishment*; chunk pacing is the
        // consumer's concern.
        self.bounded(self.inner.stream(url, range, headers, cancel))
            .await
    }
}
