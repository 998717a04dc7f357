use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// Small in-memory store for init segments.
///
/// Audio/video initialization data is re-fetched every time the player
/// switches back to a quality; caching it saves a round-trip on every
/// switch. Media segments are never cached here.
#[derive(Clone, Debug, Default)]
pub struct SegmentCache {
    entries: Arc<Mutex<HashMap<(String, String), Bytes>>>,
}

impl SegmentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, representation_id: &str, segment_id: &str) -> Option<Bytes> {
        self.entries
            .lock()
            .get(&(representation_id.to_string(), segment_id.to_string()))
            .cloned()
    }

    pub fn insert(&self, representation_id: &str, segment_id: &str, data: Bytes) {
        self.entries.lock().insert(
            (representation_id.to_string(), segment_id.to_string()),
            data,
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
