use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use aulos_index::Clock;
use aulos_manifest::{
    build_dash_manifest, build_smooth_manifest, parse_utc_timestamp, Manifest, ManifestResult,
    ManifestWarning, MpdIr, ParseContext, ParseOutcome, PeriodIr, SmoothIr,
};
use aulos_net::Net;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{EngineError, EngineResult};

/// A pre-parsed manifest document.
#[derive(Clone, Debug)]
pub enum DocumentIr {
    Dash(MpdIr),
    Smooth(SmoothIr),
}

/// The syntactic layer: raw bytes to intermediate representation.
///
/// XML handling stays outside the engine; implementations typically wrap
/// an MPD parser (possibly compiled to run elsewhere) and hand back the
/// attribute tree.
pub trait ManifestParser: Send + Sync {
    fn parse_document(&self, bytes: &[u8]) -> ManifestResult<DocumentIr>;

    /// Parse the body of an xlinked period fetched separately.
    fn parse_xlink_periods(&self, bytes: &[u8]) -> ManifestResult<Vec<PeriodIr>>;
}

/// Fetches a manifest and drives the build continuations (UTC clock
/// endpoints, xlinked periods) until the model is complete.
pub struct ManifestLoader {
    net: Arc<dyn Net>,
    parser: Arc<dyn ManifestParser>,
    aggressive_mode: bool,
    unbounded_last_segment_range: bool,
}

impl ManifestLoader {
    #[must_use]
    pub fn new(
        net: Arc<dyn Net>,
        parser: Arc<dyn ManifestParser>,
        aggressive_mode: bool,
        unbounded_last_segment_range: bool,
    ) -> Self {
        Self {
            net,
            parser,
            aggressive_mode,
            unbounded_last_segment_range,
        }
    }

    /// Fetch, parse and build the manifest at `url`.
    pub async fn load(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<(Manifest, Vec<ManifestWarning>)> {
        let parsed_url = Url::parse(url)
            .map_err(|e| EngineError::Other(format!("bad manifest URL {url}: {e}")))?;
        let response = self.net.get(parsed_url, None, cancel).await?;
        let document = self.parser.parse_document(&response.data)?;
        self.build(url, &document, cancel).await
    }

    /// Build a manifest from an already-parsed document, fetching the
    /// external resources the build suspends on.
    pub async fn build(
        &self,
        url: &str,
        document: &DocumentIr,
        cancel: &CancellationToken,
    ) -> EngineResult<(Manifest, Vec<ManifestWarning>)> {
        let mut ctx = ParseContext {
            manifest_url: Some(url.to_string()),
            clock: Clock::System,
            aggressive_mode: self.aggressive_mode,
            unbounded_last_segment_range: self.unbounded_last_segment_range,
            ..ParseContext::default()
        };

        loop {
            let outcome: ManifestResult<ParseOutcome> = match document {
                DocumentIr::Dash(mpd) => build_dash_manifest(mpd, &ctx),
                DocumentIr::Smooth(smooth) => build_smooth_manifest(smooth, &ctx),
            };
            match outcome? {
                ParseOutcome::Done { manifest, warnings } => {
                    for warning in &warnings {
                        tracing::warn!(%warning, "manifest oddity");
                    }
                    return Ok((manifest, warnings));
                }
                ParseOutcome::NeedsClock { url: clock_url } => {
                    tracing::debug!(url = %clock_url, "fetching server clock");
                    let parsed = Url::parse(&clock_url)
                        .map_err(|e| EngineError::Other(format!("bad clock URL: {e}")))?;
                    let response = self.net.get(parsed, None, cancel).await?;
                    // Lenient on purpose: timing bodies are tiny and some
                    // servers prepend stray bytes.
                    let body = String::from_utf8_lossy(&response.data).to_string();
                    let server_ms = parse_utc_timestamp(&body)?;
                    ctx.external_clock = Some((server_ms, unix_now_ms()));
                }
                ParseOutcome::NeedsResources { urls } => {
                    for xlink_url in urls {
                        tracing::debug!(url = %xlink_url, "resolving xlinked period");
                        let parsed = Url::parse(&xlink_url)
                            .map_err(|e| EngineError::Other(format!("bad xlink URL: {e}")))?;
                        let response = self.net.get(parsed, None, cancel).await?;
                        let periods = self.parser.parse_xlink_periods(&response.data)?;
                        ctx.resolved_xlinks.insert(xlink_url, periods);
                    }
                }
            }
        }
    }
}

fn unix_now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1_000.0)
        .unwrap_or(0.0)
}
