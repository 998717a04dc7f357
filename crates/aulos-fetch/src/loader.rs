use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{error::FetchError, fetcher::SegmentContext};

/// What a custom loader decided to do with a segment request.
///
/// The source pattern — a loader callback that may resolve, reject, or
/// call `fallback()` — expressed as an explicit result: `Resolved` ends
/// the fetch, `Fallback` hands the request to the built-in loader (events
/// the custom loader may have produced are discarded), and `Err` fails
/// the fetch.
#[derive(Clone, Debug)]
pub enum CustomLoaderOutcome {
    Resolved {
        data: Bytes,
        /// Wall time the load took, for throughput accounting.
        duration: std::time::Duration,
    },
    Fallback,
}

/// Application-provided segment loader with first refusal on every fetch.
#[async_trait]
pub trait CustomSegmentLoader: Send + Sync {
    async fn load(
        &self,
        content: &SegmentContext,
        cancel: &CancellationToken,
    ) -> Result<CustomLoaderOutcome, FetchError>;
}
