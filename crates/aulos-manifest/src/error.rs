use thiserror::Error;

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Manifest-level failures.
///
/// Fatal only when the presentation cannot progress at all; anything
/// recoverable is reported as a [`ManifestWarning`] instead.
#[derive(Debug, Error, Clone)]
pub enum ManifestError {
    #[error("manifest parse error: {0}")]
    Parse(String),

    #[error("unsupported manifest: {0}")]
    Unsupported(String),

    #[error("manifest refresh failed: {0}")]
    RefreshFailed(String),
}

/// Non-fatal oddities encountered while building a manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestWarning {
    /// Two consecutive periods overlapped; the earlier one was clamped.
    OverlappingPeriods { first_id: String, second_id: String },
    /// A representation could not be built and was dropped.
    RepresentationDropped { id: String, reason: String },
    /// An adaptation ended up with no representation and was dropped.
    EmptyAdaptation { id: String },
}

impl std::fmt::Display for ManifestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverlappingPeriods { first_id, second_id } => {
                write!(f, "period {first_id} overlaps period {second_id}; clamped")
            }
            Self::RepresentationDropped { id, reason } => {
                write!(f, "representation {id} dropped: {reason}")
            }
            Self::EmptyAdaptation { id } => {
                write!(f, "adaptation {id} has no usable representation")
            }
        }
    }
}
