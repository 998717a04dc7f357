use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use aulos_index::SegmentInfo;
use aulos_net::{Net, NetError, RangeSpec, RetryPolicy};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    cache::SegmentCache,
    error::{FetchError, FetchResult},
    events::{FetchEvent, RequestId},
    isobmff::validate_top_level_boxes,
    loader::{CustomLoaderOutcome, CustomSegmentLoader},
};

/// What one fetch is downloading.
#[derive(Clone, Debug)]
pub struct SegmentContext {
    pub period_id: String,
    pub adaptation_id: String,
    pub representation_id: String,
    /// Whether the payload is fragmented MP4 (enables integrity checks).
    pub is_isobmff: bool,
    pub segment: SegmentInfo,
}

/// A completed fetch.
#[derive(Clone, Debug)]
pub struct FetchedSegment {
    pub data: Bytes,
    pub size: u64,
    pub duration: Duration,
    pub from_cache: bool,
}

#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub retry: RetryPolicy,
    /// Request ids are `<prefix>-<monotonic counter>`.
    pub request_id_prefix: String,
    /// Deliver media progressively (`Chunk*` events) instead of one
    /// `Data` event.
    pub chunked_delivery: bool,
    pub cache_init_segments: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_id_prefix: "seg".to_string(),
            chunked_delivery: false,
            cache_init_segments: true,
        }
    }
}

/// Emits exactly one `RequestEnd` per request, whatever exit path the
/// fetch takes — including cancellation — so ABR accounting never leaks
/// an open request.
struct RequestEndGuard {
    events: UnboundedSender<FetchEvent>,
    id: RequestId,
    started: Instant,
    size: u64,
}

impl RequestEndGuard {
    fn record_bytes(&mut self, total: u64) {
        self.size = total;
    }
}

impl Drop for RequestEndGuard {
    fn drop(&mut self) {
        let _ = self.events.send(FetchEvent::RequestEnd {
            id: self.id.clone(),
            size: self.size,
            duration: self.started.elapsed(),
        });
    }
}

/// Downloads segments, with cache consultation, custom-loader first
/// refusal, URL fallbacks, jittered retry and integrity validation.
pub struct SegmentFetcher {
    net: Arc<dyn Net>,
    cache: SegmentCache,
    custom_loader: Option<Arc<dyn CustomSegmentLoader>>,
    options: FetchOptions,
    next_request: AtomicU64,
}

impl SegmentFetcher {
    #[must_use]
    pub fn new(net: Arc<dyn Net>, options: FetchOptions) -> Self {
        Self {
            net,
            cache: SegmentCache::new(),
            custom_loader: None,
            options,
            next_request: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_custom_loader(mut self, loader: Arc<dyn CustomSegmentLoader>) -> Self {
        self.custom_loader = Some(loader);
        self
    }

    #[must_use]
    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    fn next_request_id(&self) -> RequestId {
        let suffix = self.next_request.fetch_add(1, Ordering::Relaxed);
        format!("{}-{suffix}", self.options.request_id_prefix)
    }

    /// Fetch one segment, emitting lifecycle and payload events on
    /// `events` along the way.
    pub async fn fetch(
        &self,
        content: &SegmentContext,
        events: &UnboundedSender<FetchEvent>,
        cancel: &CancellationToken,
    ) -> FetchResult<FetchedSegment> {
        // Custom loader gets first refusal; its internal events are not
        // forwarded while it may still fall back.
        if let Some(loader) = &self.custom_loader {
            match loader.load(content, cancel).await? {
                CustomLoaderOutcome::Resolved { data, duration } => {
                    let id = self.next_request_id();
                    let url = first_url(content).unwrap_or_default();
                    let _ = events.send(FetchEvent::RequestBegin { id: id.clone(), url });
                    let _ = events.send(FetchEvent::Data {
                        id: id.clone(),
                        bytes: data.clone(),
                        from_cache: false,
                    });
                    let _ = events.send(FetchEvent::ChunkComplete { id: id.clone() });
                    let size = data.len() as u64;
                    let _ = events.send(FetchEvent::RequestEnd { id, size, duration });
                    return Ok(FetchedSegment {
                        data,
                        size,
                        duration,
                        from_cache: false,
                    });
                }
                CustomLoaderOutcome::Fallback => {
                    tracing::debug!("custom loader fell back to the built-in one");
                }
            }
        }

        if content.segment.is_init && self.options.cache_init_segments {
            if let Some(data) = self
                .cache
                .get(&content.representation_id, &content.segment.id)
            {
                tracing::trace!(
                    representation = %content.representation_id,
                    "init segment served from cache"
                );
                let id = self.next_request_id();
                let _ = events.send(FetchEvent::Data {
                    id: id.clone(),
                    bytes: data.clone(),
                    from_cache: true,
                });
                let _ = events.send(FetchEvent::ChunkComplete { id });
                return Ok(FetchedSegment {
                    size: data.len() as u64,
                    data,
                    duration: Duration::ZERO,
                    from_cache: true,
                });
            }
        }

        let urls = content
            .segment
            .media_urls
            .clone()
            .filter(|urls| !urls.is_empty())
            .ok_or(FetchError::NoUrl)?;

        let id = self.next_request_id();
        let _ = events.send(FetchEvent::RequestBegin {
            id: id.clone(),
            url: urls[0].clone(),
        });
        let started = Instant::now();
        let mut guard = RequestEndGuard {
            events: events.clone(),
            id: id.clone(),
            started,
            size: 0,
        };

        let max_attempts = self.options.retry.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let raw_url = &urls[attempt as usize % urls.len()];
            let mut payload_emitted = false;
            let result = self
                .attempt(
                    raw_url,
                    content,
                    &id,
                    events,
                    cancel,
                    started,
                    &mut guard,
                    &mut payload_emitted,
                )
                .await;

            match result {
                Ok(data) => {
                    if content.segment.is_init && self.options.cache_init_segments {
                        self.cache
                            .insert(&content.representation_id, &content.segment.id, data.clone());
                    }
                    let _ = events.send(FetchEvent::ChunkComplete { id: id.clone() });
                    let size = data.len() as u64;
                    guard.record_bytes(size);
                    drop(guard);
                    return Ok(FetchedSegment {
                        data,
                        size,
                        duration: started.elapsed(),
                        from_cache: false,
                    });
                }
                Err(error) => {
                    if cancel.is_cancelled() {
                        return Err(FetchError::Cancelled);
                    }
                    attempt += 1;
                    // Chunks already handed downstream cannot be unsaid; a
                    // mid-body failure must surface rather than restart the
                    // chunk sequence under the same request id.
                    if payload_emitted || !error.is_retryable() || attempt >= max_attempts {
                        return Err(error);
                    }
                    tracing::debug!(id, attempt, %error, "segment fetch retrying");
                    let _ = events.send(FetchEvent::Warning {
                        id: id.clone(),
                        error,
                    });
                    let delay = self.options.retry.delay_for_attempt(attempt);
                    tokio::select! {
                        () = cancel.cancelled() => return Err(FetchError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        raw_url: &str,
        content: &SegmentContext,
        id: &RequestId,
        events: &UnboundedSender<FetchEvent>,
        cancel: &CancellationToken,
        started: Instant,
        guard: &mut RequestEndGuard,
        payload_emitted: &mut bool,
    ) -> FetchResult<Bytes> {
        let url = Url::parse(raw_url)
            .map_err(|e| FetchError::Net(NetError::Transport(format!("bad URL {raw_url}: {e}"))))?;
        let range = content
            .segment
            .byte_range
            .map(|r| RangeSpec::new(r.start, r.end));

        if self.options.chunked_delivery && !content.segment.is_init {
            let mut stream = self.net.stream(url, range, None, cancel).await?;
            let mut assembled = BytesMut::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                assembled.extend_from_slice(&chunk);
                guard.record_bytes(assembled.len() as u64);
                *payload_emitted = true;
                let _ = events.send(FetchEvent::Chunk {
                    id: id.clone(),
                    bytes: chunk,
                });
                let _ = events.send(FetchEvent::Progress {
                    id: id.clone(),
                    bytes: assembled.len() as u64,
                    elapsed: started.elapsed(),
                });
            }
            // Chunks were already handed out; a malformed payload at this
            // point is a mid-body failure, not a retryable one.
            let data = assembled.freeze();
            if content.is_isobmff {
                validate_top_level_boxes(&data).map_err(FetchError::Integrity)?;
            }
            return Ok(data);
        }

        let response = match range {
            Some(range) => self.net.get_range(url, range, None, cancel).await?,
            None => self.net.get(url, None, cancel).await?,
        };
        let data = response.data;
        if content.is_isobmff {
            validate_top_level_boxes(&data).map_err(FetchError::Integrity)?;
        }
        guard.record_bytes(data.len() as u64);
        let _ = events.send(FetchEvent::Progress {
            id: id.clone(),
            bytes: data.len() as u64,
            elapsed: started.elapsed(),
        });
        *payload_emitted = true;
        let _ = events.send(FetchEvent::Data {
            id: id.clone(),
            bytes: data.clone(),
            from_cache: false,
        });
        Ok(data)
    }
}

fn first_url(content: &SegmentContext) -> Option<String> {
    content
        .segment
        .media_urls
        .as_ref()
        .and_then(|urls| urls.first().cloned())
}
