use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use url::Url;
use web_time::Instant;

use crate::{
    error::{NetError, NetResult},
    traits::{ChunkStream, Net},
    types::{Headers, HttpResponse, NetOptions, RangeSpec},
};

/// Default reqwest-backed implementation of [`Net`].
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized.
    #[must_use]
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .build()
            .expect("failed to build reqwest client");
        Self { inner, options }
    }

    #[must_use]
    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: Option<Headers>,
    ) -> reqwest::RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }

    async fn run_to_completion(
        &self,
        url: Url,
        req: reqwest::RequestBuilder,
        cancel: &CancellationToken,
        accept_partial: bool,
    ) -> NetResult<HttpResponse> {
        let sending_time = Instant::now();

        let send = async {
            let resp = req.send().await.map_err(NetError::from)?;
            let status = resp.status();
            let ok = status.is_success() || (accept_partial && status.as_u16() == 206);
            if !ok {
                return Err(NetError::Http {
                    status: status.as_u16(),
                    url: resp.url().clone(),
                });
            }
            let final_url = resp.url().clone();
            let data: Bytes = resp.bytes().await.map_err(NetError::from)?;
            Ok((final_url, data))
        };

        let (final_url, data) = tokio::select! {
            () = cancel.cancelled() => return Err(NetError::Aborted),
            res = send => res?,
        };

        let received_time = Instant::now();
        tracing::trace!(url = %url, bytes = data.len(), "http request complete");

        Ok(HttpResponse {
            size: data.len() as u64,
            data,
            duration: received_time.duration_since(sending_time),
            sending_time,
            received_time,
            url: final_url,
        })
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get(
        &self,
        url: Url,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError> {
        let req = self.inner.get(url.clone());
        let req = Self::apply_headers(req, headers).timeout(self.options.request_timeout);
        self.run_to_completion(url, req, cancel, false).await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NetError> {
        let req = self
            .inner
            .get(url.clone())
            .header("Range", range.to_header_value());
        let req = Self::apply_headers(req, headers).timeout(self.options.request_timeout);
        self.run_to_completion(url, req, cancel, true).await
    }

    async fn stream(
        &self,
        url: Url,
        range: Option<RangeSpec>,
        headers: Option<Headers>,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, NetError> {
        let mut req = self.inner.get(url.clone());
        if let Some(range) = range {
            req = req.header("Range", range.to_header_value());
        }
        let req = Self::apply_headers(req, headers).timeout(self.options.request_timeout);

        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(NetError::Aborted),
            res = req.send() => res.map_err(NetError::from)?,
        };

        let status = resp.status();
        if !(status.is_success() || status.as_u16() == 206) {
            return Err(NetError::Http {
                status: status.as_u16(),
                url: resp.url().clone(),
            });
        }

        let cancel = cancel.clone();
        let body = resp.bytes_stream().map_err(NetError::from);
        let guarded = futures::stream::unfold(
            (Box::pin(body), cancel),
            |(mut body, cancel)| async move {
                let next = tokio::select! {
                    () = cancel.cancelled() => Some(Err(NetError::Aborted)),
                    chunk = futures::StreamExt::next(&mut body) => chunk,
                };
                next.map(|item| (item, (body, cancel)))
            },
        );
        Ok(Box::pin(guarded))
    }
}
