use std::collections::HashMap;
use std::sync::Arc;

use aulos_manifest::MediaType;
use parking_lot::Mutex;

/// User-facing adaptation settings for one media type.
#[derive(Clone, Copy, Debug)]
pub struct AbrSettings {
    /// Bits per second; negative = automatic.
    pub manual_bitrate: i64,
    pub min_auto_bitrate: u64,
    pub max_auto_bitrate: u64,
    /// Filter command: ignore qualities above this bitrate.
    pub bitrate_ceiling: Option<u64>,
    /// Filter command: ignore qualities wider than this.
    pub width_ceiling: Option<u32>,
}

impl Default for AbrSettings {
    fn default() -> Self {
        Self {
            manual_bitrate: -1,
            min_auto_bitrate: 0,
            max_auto_bitrate: u64::MAX,
            bitrate_ceiling: None,
            width_ceiling: None,
        }
    }
}

/// Shared handle carrying the user's adaptation commands to the running
/// streams. Streams read it on every decision, so a change takes effect
/// on the next estimate.
#[derive(Clone, Debug, Default)]
pub struct AbrControls {
    inner: Arc<Mutex<HashMap<MediaType, AbrSettings>>>,
}

impl AbrControls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, media_type: MediaType) -> AbrSettings {
        self.inner
            .lock()
            .get(&media_type)
            .copied()
            .unwrap_or_default()
    }

    fn update(&self, media_type: MediaType, apply: impl FnOnce(&mut AbrSettings)) {
        let mut inner = self.inner.lock();
        apply(inner.entry(media_type).or_default());
    }

    /// Force a bitrate for one media type; negative returns to automatic.
    pub fn set_manual_bitrate(&self, media_type: MediaType, bitrate: i64) {
        self.update(media_type, |s| s.manual_bitrate = bitrate);
    }

    /// Clamp automatic choices to `[min, max]` bits per second.
    pub fn set_auto_bitrate_bounds(&self, media_type: MediaType, min: u64, max: u64) {
        self.update(media_type, |s| {
            s.min_auto_bitrate = min;
            s.max_auto_bitrate = max;
        });
    }

    pub fn set_bitrate_ceiling(&self, media_type: MediaType, ceiling: Option<u64>) {
        self.update(media_type, |s| s.bitrate_ceiling = ceiling);
    }

    pub fn set_width_ceiling(&self, media_type: MediaType, ceiling: Option<u32>) {
        self.update(media_type, |s| s.width_ceiling = ceiling);
    }
}
