use async_trait::async_trait;
use aulos_observer::TimeRanges;
use bytes::Bytes;

use crate::error::MediaError;

/// The (opaque) media buffer the engine pushes decoded-ready chunks into.
///
/// Implementations wrap whatever buffer-source API the host exposes. The
/// engine only needs to append and to know what ended up buffered.
#[async_trait]
pub trait MediaBufferSink: Send + Sync {
    /// Append one chunk, preceded by initialization data when switching
    /// qualities. `append_window` clamps the samples to the period's
    /// bounds.
    async fn push(
        &self,
        init: Option<Bytes>,
        chunk: Bytes,
        timestamp_offset: f64,
        append_window: (f64, Option<f64>),
        codec: &str,
    ) -> Result<TimeRanges, MediaError>;

    /// Currently buffered ranges.
    fn buffered(&self) -> TimeRanges;
}
