use std::sync::Arc;
use std::time::Duration;

use aulos_manifest::Manifest;
use tokio::sync::Notify;

/// Why a refresh is being requested ahead of schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    /// The manifest's lifetime elapsed.
    LifetimeElapsed,
    /// A segment index ran out of described segments.
    IndexNeedsData,
    /// A segment request failed in a way the index says can mean the
    /// whole document is stale.
    OutOfSync,
}

/// Delay until the next scheduled refresh, from the manifest's lifetime.
///
/// `None` when the document never needs refreshing (static content with
/// complete indexes).
#[must_use]
pub fn next_refresh_delay(manifest: &Manifest, minimum: Duration) -> Option<Duration> {
    manifest
        .lifetime
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)).max(minimum))
}

/// Wakes the refresh loop ahead of its schedule.
///
/// Streams signal through this when an index asks for more data or a
/// request comes back out-of-sync; the refresh loop also ticks on the
/// manifest lifetime by itself.
#[derive(Clone, Debug, Default)]
pub struct RefreshSignal {
    notify: Arc<Notify>,
}

impl RefreshSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, reason: RefreshReason) {
        tracing::debug!(?reason, "manifest refresh requested");
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use aulos_manifest::{MaximumTimeDescriptor, TimeBounds, TransportType};

    use super::*;

    fn manifest(lifetime: Option<f64>) -> Manifest {
        Manifest {
            transport: TransportType::Dash,
            is_dynamic: lifetime.is_some(),
            is_live: lifetime.is_some(),
            is_last_period_known: true,
            availability_start_time: None,
            clock_offset_ms: None,
            suggested_presentation_delay: None,
            lifetime,
            time_bounds: TimeBounds {
                absolute_minimum_time: 0.0,
                timeshift_depth: None,
                maximum: MaximumTimeDescriptor {
                    is_linear: false,
                    value: 0.0,
                    at_ms: 0.0,
                },
            },
            uris: Vec::new(),
            periods: Vec::new(),
        }
    }

    #[test]
    fn static_manifests_never_schedule_a_refresh() {
        assert_eq!(
            next_refresh_delay(&manifest(None), Duration::from_millis(200)),
            None
        );
    }

    #[test]
    fn lifetime_is_clamped_to_the_minimum_interval() {
        assert_eq!(
            next_refresh_delay(&manifest(Some(5.0)), Duration::from_millis(200)),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            next_refresh_delay(&manifest(Some(0.01)), Duration::from_millis(200)),
            Some(Duration::from_millis(200))
        );
    }

    #[tokio::test]
    async fn signal_wakes_a_waiter() {
        let signal = RefreshSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        signal.request(RefreshReason::OutOfSync);
        handle.await.unwrap();
    }
}
