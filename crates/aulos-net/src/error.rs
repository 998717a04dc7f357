use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Typed transport errors.
///
/// Mirrors the four failure shapes a request function can produce:
/// timeout, caller-side abort, an HTTP error status, or anything else the
/// transport reports (DNS, connection reset, body decode, ...).
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("request timed out")]
    Timeout,

    #[error("request aborted")]
    Aborted,

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: Url },

    #[error("transport error: {0}")]
    Transport(String),
}

impl NetError {
    /// Whether a request failing with this error is worth retrying.
    ///
    /// Timeouts, transport failures and server-side statuses (5xx, plus
    /// 408/429) are transient; an abort is a caller decision and any other
    /// 4xx means the request itself is wrong.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Aborted => false,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting includes the full error chain
        // (e.g. "error sending request ...: connection refused").
        Self::Transport(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn test_url() -> Url {
        Url::parse("http://example.com/seg.m4s").unwrap()
    }

    #[rstest]
    #[case::timeout(NetError::Timeout, true)]
    #[case::transport(NetError::Transport("connection reset".into()), true)]
    #[case::http_500(NetError::Http { status: 500, url: test_url() }, true)]
    #[case::http_503(NetError::Http { status: 503, url: test_url() }, true)]
    #[case::http_408(NetError::Http { status: 408, url: test_url() }, true)]
    #[case::http_429(NetError::Http { status: 429, url: test_url() }, true)]
    #[case::http_404(NetError::Http { status: 404, url: test_url() }, false)]
    #[case::http_403(NetError::Http { status: 403, url: test_url() }, false)]
    #[case::aborted(NetError::Aborted, false)]
    fn retryability(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn display_contains_status_and_url() {
        let err = NetError::Http {
            status: 404,
            url: test_url(),
        };
        let s = err.to_string();
        assert!(s.contains("404"));
        assert!(s.contains("example.com"));
    }
}
