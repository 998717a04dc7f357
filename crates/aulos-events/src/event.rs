use std::time::Duration;

/// Unified event for the whole engine.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    Manifest(ManifestEvent),
    Stream(StreamEvent),
    Abr(AbrEvent),
    Playback(PlaybackEvent),
    Track(TrackEvent),
}

/// Manifest lifecycle events.
#[derive(Clone, Debug)]
pub enum ManifestEvent {
    /// A manifest refresh was absorbed into the live model.
    Updated,
    /// Next refresh scheduled after the given delay.
    RefreshScheduled { delay: Duration },
    /// A refresh attempt failed; playback continues on the stale manifest.
    RefreshFailed { error: String },
}

/// Per-stream (one media type of one period) events.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// The stream switched to another quality.
    RepresentationChanged {
        period_id: String,
        media_type: &'static str,
        representation_id: String,
        bitrate: u64,
    },
    /// A media segment finished downloading and was pushed.
    SegmentLoaded {
        representation_id: String,
        segment_id: String,
        size: u64,
        duration: Duration,
    },
    /// A transient problem occurred; the stream keeps going.
    Warning { message: String },
}

/// Adaptive-bitrate estimator events.
#[derive(Clone, Debug)]
pub enum AbrEvent {
    /// New estimate produced.
    Estimate {
        bitrate: u64,
        representation_id: String,
        urgent: bool,
        manual: bool,
    },
    /// Probing one quality above the measured one started.
    GuessEntered { representation_id: String },
    /// The probe was judged wrong and abandoned.
    GuessAborted {
        representation_id: String,
        cooldown: Duration,
    },
}

/// Why rebuffering started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebufferReason {
    Seeking,
    InternalSeek,
    NotReady,
    Buffering,
}

/// Playback lifecycle events.
#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    /// Enough data to start playback.
    Loaded,
    /// Playback cannot progress (waiting on data).
    Stalled,
    /// Rebuffering started for the given reason.
    RebufferStarted { reason: RebufferReason },
    /// Rebuffering ended.
    RebufferEnded,
    /// The presentation reached its end.
    EndOfStream,
    /// The current content must be torn down and reloaded.
    ReloadNeeded,
    /// An unrecoverable error tore the load down.
    Failed { error: String },
}

/// Track-choice events.
#[derive(Clone, Debug)]
pub enum TrackEvent {
    /// The active track for a (period, type) changed.
    Changed {
        period_id: String,
        media_type: &'static str,
        adaptation_id: Option<String>,
    },
    /// The previously chosen track disappeared from the manifest.
    NoLongerAvailable {
        period_id: String,
        media_type: &'static str,
        adaptation_id: String,
    },
}

impl From<ManifestEvent> for Event {
    fn from(e: ManifestEvent) -> Self {
        Self::Manifest(e)
    }
}

impl From<StreamEvent> for Event {
    fn from(e: StreamEvent) -> Self {
        Self::Stream(e)
    }
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}

impl From<PlaybackEvent> for Event {
    fn from(e: PlaybackEvent) -> Self {
        Self::Playback(e)
    }
}

impl From<TrackEvent> for Event {
    fn from(e: TrackEvent) -> Self {
        Self::Track(e)
    }
}
