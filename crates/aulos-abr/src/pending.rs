use std::collections::HashMap;

use web_time::Instant;

use crate::types::SegmentContent;

/// Progress point of an in-flight request.
#[derive(Clone, Copy, Debug)]
pub struct ProgressSnapshot {
    pub at: Instant,
    /// Bytes received so far.
    pub bytes: u64,
}

/// One in-flight segment request.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub id: String,
    pub content: SegmentContent,
    pub requested_at: Instant,
    pub progress: Vec<ProgressSnapshot>,
}

impl PendingRequest {
    /// Projected final bandwidth from bytes received so far, bits per
    /// second. `None` until enough has elapsed to be meaningful.
    #[must_use]
    pub fn inflight_bandwidth(&self) -> Option<f64> {
        let last = self.progress.last()?;
        let elapsed = last.at.duration_since(self.requested_at).as_secs_f64();
        if elapsed < 0.2 || last.bytes == 0 {
            return None;
        }
        Some(last.bytes as f64 * 8.0 / elapsed)
    }

    /// Seconds the request has been running.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> f64 {
        now.duration_since(self.requested_at).as_secs_f64()
    }
}

/// Set of in-flight segment requests, keyed by request id.
///
/// Every id sees exactly one `add` and one `remove`; the store tolerates
/// (and logs) violations rather than corrupting accounting.
#[derive(Clone, Debug, Default)]
pub struct PendingRequestsStore {
    requests: HashMap<String, PendingRequest>,
}

impl PendingRequestsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: String, content: SegmentContent, requested_at: Instant) {
        let previous = self.requests.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                content,
                requested_at,
                progress: Vec::new(),
            },
        );
        if previous.is_some() {
            tracing::warn!(id, "pending request registered twice");
        }
    }

    pub fn progress(&mut self, id: &str, bytes: u64, at: Instant) {
        match self.requests.get_mut(id) {
            Some(request) => request.progress.push(ProgressSnapshot { at, bytes }),
            None => tracing::warn!(id, "progress for unknown request"),
        }
    }

    pub fn remove(&mut self, id: &str) {
        if self.requests.remove(id).is_none() {
            tracing::warn!(id, "removing unknown request");
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PendingRequest> {
        self.requests.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.requests.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn content() -> SegmentContent {
        SegmentContent {
            representation_id: "r1".to_string(),
            bitrate: 800_000,
            segment_duration: Some(4.0),
            is_init: false,
        }
    }

    #[test]
    fn lifecycle_add_progress_remove() {
        let mut store = PendingRequestsStore::new();
        let t0 = Instant::now();
        store.add("req-1".to_string(), content(), t0);
        assert_eq!(store.len(), 1);

        store.progress("req-1", 100_000, t0 + Duration::from_millis(500));
        assert_eq!(store.get("req-1").unwrap().progress.len(), 1);

        store.remove("req-1");
        assert!(store.is_empty());
    }

    #[test]
    fn inflight_bandwidth_projects_from_progress() {
        let mut store = PendingRequestsStore::new();
        let t0 = Instant::now();
        store.add("req-1".to_string(), content(), t0);
        // 100 kB over 1 s = 800 kb/s
        store.progress("req-1", 100_000, t0 + Duration::from_secs(1));
        let bw = store.get("req-1").unwrap().inflight_bandwidth().unwrap();
        assert!((bw - 800_000.0).abs() < 1_000.0, "bandwidth {bw}");
    }

    #[test]
    fn too_early_progress_gives_no_bandwidth() {
        let mut store = PendingRequestsStore::new();
        let t0 = Instant::now();
        store.add("req-1".to_string(), content(), t0);
        store.progress("req-1", 10_000, t0 + Duration::from_millis(50));
        assert!(store.get("req-1").unwrap().inflight_bandwidth().is_none());
    }

    #[test]
    fn unknown_ids_do_not_panic() {
        let mut store = PendingRequestsStore::new();
        store.progress("ghost", 1, Instant::now());
        store.remove("ghost");
    }
}
