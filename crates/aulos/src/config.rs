use aulos_abr::AbrOptions;
use aulos_fetch::FetchOptions;
use aulos_net::NetOptions;
use aulos_observer::ObserverOptions;

/// Engine-wide numeric knobs with stable defaults.
///
/// The per-subsystem options carry their own tunables; these are the ones
/// that cross subsystem boundaries.
#[derive(Clone, Debug)]
pub struct Tunables {
    /// Seconds of media to keep buffered ahead of the position.
    pub buffer_goal: f64,
    /// Window passed to segment indexes when asking what to fetch next.
    pub segment_lookahead: f64,
    /// Minimum delay between two manifest refreshes.
    pub minimum_refresh_interval: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            buffer_goal: 30.0,
            segment_lookahead: 30.0,
            minimum_refresh_interval: 0.2,
        }
    }
}

/// Everything configurable about an [`Engine`](crate::Engine), built once
/// and passed at construction — there is no global state to mutate.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub net: NetOptions,
    pub fetch: FetchOptions,
    pub abr: AbrOptions,
    pub observer: ObserverOptions,
    pub tunables: Tunables,
    /// Ask dynamic indexes for one extra segment of live lookahead.
    pub aggressive_mode: bool,
    /// Legacy-packaging hook: treat the final sidx segment's byte range
    /// as open-ended.
    pub unbounded_last_segment_range: bool,
    /// Event-bus channel capacity.
    pub event_capacity: usize,
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            event_capacity: 64,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    #[must_use]
    pub fn with_fetch(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    #[must_use]
    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.abr = abr;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: ObserverOptions) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    #[must_use]
    pub fn with_aggressive_mode(mut self, enabled: bool) -> Self {
        self.aggressive_mode = enabled;
        self
    }
}
