use web_time::Instant;

use crate::{
    bandwidth::BandwidthEstimator,
    buffer_based::BufferBasedChooser,
    guess::GuessEstimator,
    pending::{PendingRequest, PendingRequestsStore},
    score::{RepresentationScorer, ScoreConfidence, ScoreLookup},
    types::{AbrOptions, ClockSample, Estimate, RepresentationRef, StreamEvent},
};

/// The adaptive-bitrate estimator for one (media type, period) pair.
///
/// Owns the bandwidth estimator, the pending-requests store, the
/// per-quality scorer and the guess-mode state; nothing here is shared
/// across instances.
pub struct AbrEstimator {
    options: AbrOptions,
    bandwidth: BandwidthEstimator,
    pending: PendingRequestsStore,
    scorer: RepresentationScorer,
    guess: GuessEstimator,
    /// Bits per second; negative means automatic.
    manual_bitrate: i64,
    bitrate_ceiling: Option<u64>,
    width_ceiling: Option<u32>,
    /// Hysteresis state of the buffer-based chooser.
    buffer_based_active: bool,
    chooser_cache: Option<(Vec<u64>, BufferBasedChooser)>,
    /// Quality the pipeline last reported actually playing.
    current: Option<RepresentationRef>,
}

struct IndexedScores<'a> {
    scorer: &'a RepresentationScorer,
    representations: &'a [RepresentationRef],
}

impl ScoreLookup for IndexedScores<'_> {
    fn score_for_index(&self, index: usize) -> Option<(f64, ScoreConfidence)> {
        self.representations
            .get(index)
            .and_then(|r| self.scorer.get(&r.id))
    }
}

/// A response delivered implausibly fast for its size came from a local
/// cache and says nothing about the network.
fn seems_cached(duration_ms: f64, size: u64) -> bool {
    if size == 0 {
        return true;
    }
    if duration_ms < 2.0 {
        return true;
    }
    let bps = size as f64 * 8_000.0 / duration_ms;
    bps > 2.0e9
}

impl AbrEstimator {
    #[must_use]
    pub fn new(options: AbrOptions) -> Self {
        let guess = GuessEstimator::new(options.guess.clone());
        Self {
            options,
            bandwidth: BandwidthEstimator::new(),
            pending: PendingRequestsStore::new(),
            scorer: RepresentationScorer::new(),
            guess,
            manual_bitrate: -1,
            bitrate_ceiling: None,
            width_ceiling: None,
            buffer_based_active: false,
            chooser_cache: None,
            current: None,
        }
    }

    /// Force a bitrate; any negative value returns to automatic mode.
    pub fn set_manual_bitrate(&mut self, bitrate: i64) {
        self.manual_bitrate = bitrate;
    }

    /// Clamp automatic choices to `[min, max]` bits per second.
    pub fn set_auto_bounds(&mut self, min: u64, max: u64) {
        self.options.min_auto_bitrate = min;
        self.options.max_auto_bitrate = max;
    }

    /// Filter command: discard qualities above this bitrate.
    pub fn set_bitrate_ceiling(&mut self, ceiling: Option<u64>) {
        self.bitrate_ceiling = ceiling;
    }

    /// Filter command: discard qualities wider than this.
    pub fn set_width_ceiling(&mut self, ceiling: Option<u32>) {
        self.width_ceiling = ceiling;
    }

    #[must_use]
    pub fn guess_state(&self) -> &GuessEstimator {
        &self.guess
    }

    #[must_use]
    pub fn pending_requests(&self) -> &PendingRequestsStore {
        &self.pending
    }

    /// Feed one pipeline event.
    pub fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Metrics {
                duration_ms,
                size,
                content,
            } => {
                if seems_cached(duration_ms, size) {
                    tracing::debug!(size, duration_ms, "discarding cached-looking sample");
                    return;
                }
                self.bandwidth.add_sample(duration_ms, size);
                if !content.is_init {
                    if let Some(segment_duration) = content.segment_duration {
                        let representation = RepresentationRef {
                            id: content.representation_id,
                            bitrate: content.bitrate,
                            width: None,
                        };
                        self.scorer.add_sample(
                            &representation,
                            duration_ms / 1_000.0,
                            segment_duration,
                        );
                    }
                }
            }
            StreamEvent::RequestBegin {
                id,
                content,
                requested_at,
            } => self.pending.add(id, content, requested_at),
            StreamEvent::Progress { id, bytes, at } => self.pending.progress(&id, bytes, at),
            StreamEvent::RequestEnd { id } => self.pending.remove(&id),
            StreamEvent::RepresentationChanged { representation } => {
                self.current = Some(representation);
            }
            StreamEvent::AddedSegment { .. } => {}
        }
    }

    /// Produce an estimate for the sorted quality ladder.
    pub fn estimate(
        &mut self,
        clock: &ClockSample,
        representations: &[RepresentationRef],
        now: Instant,
    ) -> Option<Estimate> {
        if representations.is_empty() {
            return None;
        }
        let speed = if clock.speed > 0.0 { clock.speed } else { 1.0 };
        let known_stable_bitrate = self
            .scorer
            .last_stable_representation()
            .map(|r| r.bitrate as f64 / speed);

        if representations.len() == 1 {
            let only = representations[0].clone();
            return Some(Estimate {
                bitrate: only.bitrate,
                representation: only,
                urgent: false,
                manual: false,
                known_stable_bitrate,
            });
        }

        if self.manual_bitrate >= 0 {
            let wanted = self.manual_bitrate as u64;
            let chosen = representations
                .iter()
                .rev()
                .find(|r| r.bitrate <= wanted)
                .unwrap_or(&representations[0])
                .clone();
            return Some(Estimate {
                bitrate: chosen.bitrate,
                representation: chosen,
                urgent: true,
                manual: true,
                known_stable_bitrate,
            });
        }

        let usable = self.usable_representations(representations);

        // Bandwidth-based choice, corrected by in-flight requests that
        // trend below the historical estimate.
        let pessimistic = self.pessimistic_bandwidth();
        let mut choice = match pessimistic {
            Some(bandwidth) => {
                let threshold = bandwidth / speed;
                usable
                    .iter()
                    .rposition(|r| r.bitrate as f64 <= threshold)
                    .unwrap_or(0)
            }
            None => 0,
        };

        // Buffer-based choice takes precedence when the buffer is
        // comfortable and it asks for more.
        if clock.buffer_gap >= self.options.buffer_based_activation_gap {
            self.buffer_based_active = true;
        } else if clock.buffer_gap <= self.options.buffer_based_deactivation_gap {
            self.buffer_based_active = false;
        }
        if self.buffer_based_active {
            let ladder: Vec<u64> = usable.iter().map(|r| r.bitrate).collect();
            self.ensure_chooser(ladder);
            if let Some((_, chooser)) = &self.chooser_cache {
                let scores = IndexedScores {
                    scorer: &self.scorer,
                    representations: &usable,
                };
                if let Some(buffer_choice) = chooser.choose(clock.buffer_gap, &scores) {
                    if buffer_choice > choice {
                        choice = buffer_choice;
                    }
                }
            }
        }

        let mut chosen = usable[choice].clone();
        let mut guess_aborted = false;

        let current = self.current.clone().unwrap_or_else(|| chosen.clone());
        if self.guess.is_guessing() {
            let guessed = self.guess.guessed_bitrate().unwrap_or(0);
            if chosen.bitrate >= guessed {
                // The measured estimate caught up: the probe was right.
                self.guess.validate();
            } else {
                let condemned = self
                    .pending
                    .iter()
                    .filter(|r| r.content.bitrate == guessed)
                    .any(|r| self.guess.request_condemns_guess(r, now));
                if condemned {
                    self.guess.abort(now);
                    guess_aborted = true;
                } else if let Some(guessed_rep) =
                    usable.iter().find(|r| r.bitrate == guessed)
                {
                    chosen = guessed_rep.clone();
                } else {
                    // The ladder changed under us; drop the probe quietly.
                    self.guess.cancel();
                }
            }
        } else if chosen.bitrate <= current.bitrate {
            let current_score = self.scorer.get(&current.id);
            if self.guess.can_guess(clock, current_score, now) {
                if let Some(above) = usable.iter().find(|r| r.bitrate > current.bitrate) {
                    self.guess.start(above.bitrate);
                    chosen = above.clone();
                }
            }
        }

        let urgent = guess_aborted || self.is_urgent_downswitch(&chosen, clock, now);

        Some(Estimate {
            bitrate: chosen.bitrate,
            representation: chosen,
            urgent,
            manual: false,
            known_stable_bitrate,
        })
    }

    /// Apply filter commands and auto bounds. Falls back to the lowest
    /// quality when nothing fits.
    fn usable_representations(
        &self,
        representations: &[RepresentationRef],
    ) -> Vec<RepresentationRef> {
        let filtered: Vec<RepresentationRef> = representations
            .iter()
            .filter(|r| {
                self.bitrate_ceiling.map_or(true, |c| r.bitrate <= c)
                    && self
                        .width_ceiling
                        .map_or(true, |c| r.width.map_or(true, |w| w <= c))
            })
            .cloned()
            .collect();
        let pool = if filtered.is_empty() {
            vec![representations[0].clone()]
        } else {
            filtered
        };

        let bounded: Vec<RepresentationRef> = pool
            .iter()
            .filter(|r| {
                r.bitrate >= self.options.min_auto_bitrate
                    && r.bitrate <= self.options.max_auto_bitrate
            })
            .cloned()
            .collect();
        if bounded.is_empty() {
            vec![pool[0].clone()]
        } else {
            bounded
        }
    }

    /// Historical estimate, lowered by any in-flight request trending
    /// below it.
    fn pessimistic_bandwidth(&self) -> Option<f64> {
        let mut estimate = self.bandwidth.get_estimate();
        for request in self.pending.iter().filter(|r| !r.content.is_init) {
            if let Some(inflight) = request.inflight_bandwidth() {
                estimate = Some(match estimate {
                    Some(current) if inflight < current => inflight,
                    Some(current) => current,
                    None => inflight,
                });
            }
        }
        estimate
    }

    fn ensure_chooser(&mut self, ladder: Vec<u64>) {
        let stale = self
            .chooser_cache
            .as_ref()
            .map_or(true, |(cached, _)| *cached != ladder);
        if stale {
            let chooser = BufferBasedChooser::new(ladder.clone());
            self.chooser_cache = Some((ladder, chooser));
        }
    }

    /// A down-switch is urgent when the in-flight request for the current
    /// quality cannot reasonably complete within the remaining buffer.
    fn is_urgent_downswitch(
        &self,
        chosen: &RepresentationRef,
        clock: &ClockSample,
        now: Instant,
    ) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        if chosen.bitrate >= current.bitrate {
            return false;
        }
        self.pending
            .iter()
            .filter(|r| r.content.representation_id == current.id && !r.content.is_init)
            .any(|r| request_overruns_buffer(r, current.bitrate, clock.buffer_gap, now))
    }
}

fn request_overruns_buffer(
    request: &PendingRequest,
    bitrate: u64,
    buffer_gap: f64,
    now: Instant,
) -> bool {
    let Some(segment_duration) = request.content.segment_duration else {
        return false;
    };
    match request.inflight_bandwidth() {
        Some(bandwidth) if bandwidth > 0.0 => {
            let expected_bytes = bitrate as f64 * segment_duration / 8.0;
            let received = request.progress.last().map_or(0.0, |p| p.bytes as f64);
            let remaining_secs = (expected_bytes - received).max(0.0) * 8.0 / bandwidth;
            remaining_secs > buffer_gap
        }
        // No progress signal: judge by elapsed time alone.
        _ => request.elapsed(now) > segment_duration,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::SegmentContent;

    fn rep(id: &str, bitrate: u64) -> RepresentationRef {
        RepresentationRef {
            id: id.to_string(),
            bitrate,
            width: None,
        }
    }

    fn media_content(representation: &RepresentationRef, segment_duration: f64) -> SegmentContent {
        SegmentContent {
            representation_id: representation.id.clone(),
            bitrate: representation.bitrate,
            segment_duration: Some(segment_duration),
            is_init: false,
        }
    }

    fn vod_clock(buffer_gap: f64) -> ClockSample {
        ClockSample {
            position: 10.0,
            buffer_gap,
            speed: 1.0,
            duration: 600.0,
            live_gap: None,
        }
    }

    fn live_clock(buffer_gap: f64, live_gap: f64) -> ClockSample {
        ClockSample {
            position: 100.0,
            buffer_gap,
            speed: 1.0,
            duration: f64::INFINITY,
            live_gap: Some(live_gap),
        }
    }

    fn seed_bandwidth(estimator: &mut AbrEstimator, representation: &RepresentationRef, bps: u64) {
        // one 1-second sample at the wanted rate
        estimator.on_event(StreamEvent::Metrics {
            duration_ms: 1_000.0,
            size: bps / 8,
            content: media_content(representation, 4.0),
        });
    }

    #[test]
    fn single_representation_is_always_chosen() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("only", 640_000)];
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 640_000);
        assert!(!estimate.urgent);
        assert!(!estimate.manual);
    }

    #[test]
    fn auto_choice_follows_the_bandwidth_estimate() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("high", 2_000_000)];
        seed_bandwidth(&mut estimator, &ladder[0], 1_000_000);

        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 400_000);
        assert!(!estimate.urgent);
        assert!(!estimate.manual);
    }

    #[test]
    fn manual_bitrate_overrides_and_is_urgent() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("mid", 800_000), rep("high", 2_000_000)];
        estimator.set_manual_bitrate(1_000_000);
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 800_000);
        assert!(estimate.urgent);
        assert!(estimate.manual);

        estimator.set_manual_bitrate(100_000);
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 400_000, "lowest when none qualifies");
    }

    #[test]
    fn auto_bounds_clamp_the_choice() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("mid", 800_000), rep("high", 2_000_000)];
        seed_bandwidth(&mut estimator, &ladder[0], 10_000_000);
        estimator.set_auto_bounds(500_000, 1_000_000);

        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 800_000);

        estimator.set_auto_bounds(3_000_000, 4_000_000);
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 400_000, "lowest when no quality fits");
    }

    #[test]
    fn width_ceiling_filters_the_ladder() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![
            RepresentationRef { id: "sd".into(), bitrate: 400_000, width: Some(640) },
            RepresentationRef { id: "hd".into(), bitrate: 2_000_000, width: Some(1280) },
        ];
        seed_bandwidth(&mut estimator, &ladder[0], 10_000_000);
        estimator.set_width_ceiling(Some(720));
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.representation.id, "sd");
    }

    #[test]
    fn inflight_slowdown_lowers_the_estimate() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("high", 2_000_000)];
        seed_bandwidth(&mut estimator, &ladder[1], 8_000_000);

        let t0 = Instant::now();
        estimator.on_event(StreamEvent::RequestBegin {
            id: "req-1".into(),
            content: media_content(&ladder[1], 4.0),
            requested_at: t0,
        });
        // 50 kB over 1 s: 400 kb/s in flight, far below the 8 Mb/s history
        estimator.on_event(StreamEvent::Progress {
            id: "req-1".into(),
            bytes: 50_000,
            at: t0 + Duration::from_secs(1),
        });

        let estimate = estimator
            .estimate(&vod_clock(2.0), &ladder, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(estimate.bitrate, 400_000);
    }

    #[test]
    fn buffer_based_choice_takes_precedence_when_higher() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("mid", 800_000), rep("high", 1_600_000)];
        // weak measured bandwidth
        seed_bandwidth(&mut estimator, &ladder[0], 500_000);

        // comfortable buffer: the occupancy chooser may climb the ladder
        let estimate = estimator
            .estimate(&vod_clock(40.0), &ladder, Instant::now())
            .unwrap();
        assert!(
            estimate.bitrate >= 800_000,
            "buffer should raise the choice, got {}",
            estimate.bitrate
        );

        // hysteresis: once the gap collapses below the deactivation
        // threshold the chooser disengages
        let estimate = estimator
            .estimate(&vod_clock(2.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.bitrate, 400_000);
    }

    #[test]
    fn urgent_when_current_request_overruns_the_buffer() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("high", 4_000_000)];
        estimator.on_event(StreamEvent::RepresentationChanged {
            representation: ladder[1].clone(),
        });
        seed_bandwidth(&mut estimator, &ladder[1], 500_000);

        let t0 = Instant::now();
        estimator.on_event(StreamEvent::RequestBegin {
            id: "req-1".into(),
            content: media_content(&ladder[1], 4.0),
            requested_at: t0,
        });
        // 4 Mb/s * 4 s = 2 MB expected; 60 kB in 1 s will take ~250 s more
        estimator.on_event(StreamEvent::Progress {
            id: "req-1".into(),
            bytes: 60_000,
            at: t0 + Duration::from_secs(1),
        });

        let estimate = estimator
            .estimate(&vod_clock(1.5), &ladder, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(estimate.bitrate, 400_000);
        assert!(estimate.urgent);
    }

    #[test]
    fn cached_looking_samples_are_discarded() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("high", 2_000_000)];
        // 1 MB in 1 ms is not a network measurement
        estimator.on_event(StreamEvent::Metrics {
            duration_ms: 1.0,
            size: 1_000_000,
            content: media_content(&ladder[0], 4.0),
        });
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(
            estimate.bitrate, 400_000,
            "no usable sample yet, stay at the floor"
        );
    }

    #[test]
    fn known_stable_bitrate_follows_the_scorer() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("low", 400_000), rep("high", 2_000_000)];
        for _ in 0..5 {
            estimator.on_event(StreamEvent::Metrics {
                duration_ms: 2_000.0,
                size: 200_000,
                content: media_content(&ladder[0], 4.0),
            });
        }
        let estimate = estimator
            .estimate(&vod_clock(0.0), &ladder, Instant::now())
            .unwrap();
        assert_eq!(estimate.known_stable_bitrate, Some(400_000.0));
    }

    /// Probing state machine end to end: enter, condemn, cool down,
    /// escalate to the cap.
    #[test]
    fn wrong_guesses_escalate_the_cooldown_to_its_cap() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("r-800", 800_000), rep("r-1200", 1_200_000)];
        estimator.on_event(StreamEvent::RepresentationChanged {
            representation: ladder[0].clone(),
        });

        // 5 samples at score 1.6 (4 s of media in 2.5 s) -> high confidence
        for _ in 0..5 {
            estimator.on_event(StreamEvent::Metrics {
                duration_ms: 2_500.0,
                size: 250_000,
                content: media_content(&ladder[0], 4.0),
            });
        }

        let t0 = Instant::now();
        let mut now = t0;
        for round in 1..=3_u32 {
            let estimate = estimator.estimate(&live_clock(8.0, 10.0), &ladder, now).unwrap();
            assert_eq!(estimate.bitrate, 1_200_000, "round {round} probes upward");
            assert!(estimator.guess_state().is_guessing());

            // a probe request trending at 600 kb/s condemns the guess
            let request_id = format!("probe-{round}");
            estimator.on_event(StreamEvent::RequestBegin {
                id: request_id.clone(),
                content: media_content(&ladder[1], 4.0),
                requested_at: now,
            });
            estimator.on_event(StreamEvent::Progress {
                id: request_id.clone(),
                bytes: 75_000,
                at: now + Duration::from_secs(1),
            });

            let after = now + Duration::from_secs(1);
            let estimate = estimator.estimate(&live_clock(8.0, 10.0), &ladder, after).unwrap();
            assert_eq!(estimate.bitrate, 800_000, "round {round} falls back");
            assert!(estimate.urgent, "aborted guesses switch down urgently");
            assert_eq!(estimator.guess_state().consecutive_wrong_guesses(), round);

            estimator.on_event(StreamEvent::RequestEnd { id: request_id });

            let expected_cooldown = Duration::from_secs(u64::from(round) * 120).min(
                Duration::from_secs(360),
            );
            assert_eq!(
                estimator.guess_state().blocked_until(),
                Some(after + expected_cooldown)
            );

            // wait out the cooldown before the next round
            now = after + expected_cooldown + Duration::from_secs(1);
        }

        assert_eq!(estimator.guess_state().consecutive_wrong_guesses(), 3);
        let blocked = estimator.guess_state().blocked_until().unwrap();
        assert!(blocked >= t0 + Duration::from_secs(360));
    }

    #[test]
    fn guess_validates_when_the_estimate_catches_up() {
        let mut estimator = AbrEstimator::new(AbrOptions::default());
        let ladder = vec![rep("r-800", 800_000), rep("r-1200", 1_200_000)];
        estimator.on_event(StreamEvent::RepresentationChanged {
            representation: ladder[0].clone(),
        });
        for _ in 0..5 {
            estimator.on_event(StreamEvent::Metrics {
                duration_ms: 2_500.0,
                size: 250_000,
                content: media_content(&ladder[0], 4.0),
            });
        }

        let t0 = Instant::now();
        let estimate = estimator.estimate(&live_clock(8.0, 10.0), &ladder, t0).unwrap();
        assert_eq!(estimate.bitrate, 1_200_000);

        // strong measured bandwidth now justifies the guessed quality
        seed_bandwidth(&mut estimator, &ladder[1], 8_000_000);
        let estimate = estimator
            .estimate(&live_clock(8.0, 10.0), &ladder, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(estimate.bitrate, 1_200_000);
        assert!(!estimator.guess_state().is_guessing());
        assert_eq!(estimator.guess_state().consecutive_wrong_guesses(), 0);
    }
}
