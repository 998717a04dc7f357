use thiserror::Error;

pub type IndexResult<T> = Result<T, IndexError>;

/// Segment-index errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index is not initialized yet")]
    NotInitialized,

    #[error("index is out of sync with the server")]
    OutOfSync,

    #[error("URL template error: {0}")]
    Template(#[from] TemplateError),
}

/// URL template resolution errors.
///
/// These fail the Representation that carries the template, never the
/// whole manifest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template token ${0}$")]
    UnknownToken(String),

    #[error("token ${0}$ has no value in this context")]
    MissingValue(&'static str),

    #[error("malformed width modifier in ${0}$")]
    BadWidth(String),
}
