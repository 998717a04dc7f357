use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Media-pipeline failures. Fatal to the current load.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("no playable position found to start from")]
    StartingTimeNotFound,

    #[error("media buffer is full")]
    BufferFull,

    #[error("codec not supported: {0}")]
    CodecNotSupported(String),
}

/// DRM failures, surfaced by the (external) key-system layer.
///
/// Key-scoped errors may blacklist a single key while playback continues;
/// the rest tear the load down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrmError {
    #[error("license request failed: {0}")]
    KeyLoad(String),

    #[error("unusable key status: {0}")]
    KeyStatus(String),

    #[error("license update failed: {0}")]
    KeyUpdate(String),

    #[error("key session error: {0}")]
    KeyError(String),

    #[error("no supported key system")]
    NoSupport,
}

impl DrmError {
    /// Whether the error condemns one key rather than the whole load.
    #[must_use]
    pub fn is_per_key(&self) -> bool {
        matches!(self, Self::KeyStatus(_) | Self::KeyError(_))
    }
}

/// Top-level error taxonomy, mediating every sub-pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network: {0}")]
    Network(#[from] aulos_net::NetError),

    #[error("manifest: {0}")]
    Manifest(#[from] aulos_manifest::ManifestError),

    #[error("segment fetch: {0}")]
    Fetch(#[from] aulos_fetch::FetchError),

    #[error("segment index: {0}")]
    Index(#[from] aulos_index::IndexError),

    #[error("track selection: {0}")]
    Track(#[from] aulos_tracks::TrackError),

    #[error("media: {0}")]
    Media(#[from] MediaError),

    #[error("drm: {0}")]
    Drm(#[from] DrmError),

    #[error("{0}")]
    Other(String),
}
