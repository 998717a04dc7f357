use aulos_net::NetError;
use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;

/// Segment-fetch failures.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error(transparent)]
    Net(#[from] NetError),

    /// The payload is not structurally valid ISOBMFF. Treated like a
    /// transient network error: the next attempt may get clean bytes.
    #[error("malformed media payload: {0}")]
    Integrity(String),

    #[error("segment has no addressable URL")]
    NoUrl,

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Net(error) => error.is_retryable(),
            Self::Integrity(_) => true,
            Self::NoUrl | Self::Cancelled => false,
        }
    }
}
