use std::time::Duration;

use bytes::Bytes;

use crate::error::FetchError;

/// Unique request identifier: configured prefix plus a monotonic suffix.
pub type RequestId = String;

/// Lifecycle and payload events of one fetch.
///
/// Contract, per request id: exactly one `RequestBegin`, zero or more
/// `Progress`, exactly one `RequestEnd` — in that order, the end emitted
/// even when the fetch is cancelled. Payload events (`Chunk*` then one
/// `ChunkComplete`, or one `Data` then `ChunkComplete`) sit between begin
/// and end. `Progress` may be coalesced by consumers; payload and end
/// events must not be dropped.
#[derive(Clone, Debug)]
pub enum FetchEvent {
    RequestBegin {
        id: RequestId,
        url: String,
    },
    Progress {
        id: RequestId,
        /// Bytes received so far.
        bytes: u64,
        elapsed: Duration,
    },
    /// One piece of a progressively-delivered segment.
    Chunk {
        id: RequestId,
        bytes: Bytes,
    },
    /// Whole-segment delivery (non-chunked mode, or cache hit).
    Data {
        id: RequestId,
        bytes: Bytes,
        from_cache: bool,
    },
    /// No more payload will follow for this request.
    ChunkComplete {
        id: RequestId,
    },
    RequestEnd {
        id: RequestId,
        /// Bytes received in total.
        size: u64,
        duration: Duration,
    },
    /// A retryable problem occurred; the fetch is still running.
    Warning {
        id: RequestId,
        error: FetchError,
    },
}
