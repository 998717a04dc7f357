use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::NetError,
    types::{Headers, HttpResponse, RangeSpec, RetryPolicy},
};

/// Progressive body delivery: one item per received chunk.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;

/// The request function every other component is written against.
///
/// Cancelling the token aborts the request; an aborted request resolves to
/// [`NetError::Aborted`], never hangs.
#[async_trait]
pub trait Net: Send + Sync {
    /// Fetch a whole resource.
    async fn get(
        &self,
        url: Url,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError>;

    /// Fetch a byte range of a resource (`Range: bytes=a-b`).
    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError>;

    /// Open a resource for progressive chunked delivery.
    async fn stream(
        &self,
        url: Url,
        range: Option<RangeSpec>,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, NetError>;
}

pub trait NetExt: Net + Sized {
    /// Add a per-request timeout layer.
    fn with_timeout(self, timeout: std::time::Duration) -> crate::timeout::TimeoutNet<Self>;

    /// Add a retry layer.
    fn with_retry(self, policy: RetryPolicy) -> crate::retry::RetryNet<Self>;
}

impl<T: Net> NetExt for T {
    fn with_timeout(self, timeout: std::time::Duration) -> crate::timeout::TimeoutNet<Self> {
        crate::timeout::TimeoutNet::new(self, timeout)
    }

    fn with_retry(self, policy: RetryPolicy) -> crate::retry::RetryNet<Self> {
        crate::retry::RetryNet::new(self, policy)
    }
}
