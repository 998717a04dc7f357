use crate::types::{
    FreezingStatus, MediaSnapshot, Observation, ObservationEvent, ObserverMode, ObserverOptions,
    RebufferReason, RebufferingStatus,
};

/// Pure observation state machine.
///
/// Fed `(event, snapshot, now)` triples, it derives rebuffering and
/// freezing state and relabels player-initiated seeks. No clocks, no
/// element access: the async layer owns those.
#[derive(Debug)]
pub struct ObservationGenerator {
    options: ObserverOptions,
    /// Seeks announced by the player before it touches the element's
    /// position; decremented as the matching `seeking` events arrive.
    internal_seek_count: u32,
    rebuffering: Option<RebufferingStatus>,
    freezing: Option<FreezingStatus>,
    previous_position: Option<f64>,
}

impl ObservationGenerator {
    #[must_use]
    pub fn new(options: ObserverOptions) -> Self {
        Self {
            options,
            internal_seek_count: 0,
            rebuffering: None,
            freezing: None,
            previous_position: None,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ObserverOptions {
        &self.options
    }

    /// The player is about to move the element's position itself; the
    /// next `seeking` event is internal, not a user seek.
    pub fn announce_internal_seek(&mut self) {
        self.internal_seek_count += 1;
    }

    /// Ingest one sample.
    pub fn observe(
        &mut self,
        event: ObservationEvent,
        snapshot: &MediaSnapshot,
        now: f64,
    ) -> Observation {
        let event = if event == ObservationEvent::Seeking && self.internal_seek_count > 0 {
            self.internal_seek_count -= 1;
            ObservationEvent::InternalSeeking
        } else {
            event
        };

        let current_range = snapshot.buffered.range_containing(snapshot.position);
        let buffer_gap = snapshot.buffered.gap_from(snapshot.position);

        self.update_rebuffering(event, snapshot, buffer_gap, now);
        self.update_freezing(snapshot, buffer_gap, now);
        self.previous_position = Some(snapshot.position);

        Observation {
            event,
            position: snapshot.position,
            duration: snapshot.duration,
            buffer_gap,
            buffered: snapshot.buffered.clone(),
            current_range,
            paused: snapshot.paused,
            ended: snapshot.ended,
            ready_state: snapshot.ready_state,
            playback_rate: snapshot.playback_rate,
            seeking: snapshot.seeking,
            rebuffering: self.rebuffering,
            freezing: self.freezing,
        }
    }

    fn fully_loaded(&self, snapshot: &MediaSnapshot) -> bool {
        if snapshot.ended {
            return true;
        }
        if !snapshot.duration.is_finite() {
            return false;
        }
        snapshot
            .buffered
            .end()
            .is_some_and(|end| end >= snapshot.duration - 1e-3)
    }

    fn update_rebuffering(
        &mut self,
        event: ObservationEvent,
        snapshot: &MediaSnapshot,
        buffer_gap: f64,
        now: f64,
    ) {
        if self.options.mode == ObserverMode::DirectFile {
            self.update_rebuffering_direct_file(snapshot, now);
            return;
        }

        match self.rebuffering {
            Some(status) => {
                let resume_gap = self.options.resume_gap(status.reason);
                let refilled = buffer_gap.is_finite() && buffer_gap >= resume_gap;
                if refilled || self.fully_loaded(snapshot) {
                    tracing::debug!(reason = ?status.reason, "rebuffering ended");
                    self.rebuffering = None;
                }
            }
            None => {
                let gap_low = buffer_gap.is_infinite()
                    || buffer_gap <= self.options.rebuffering_gap.for_mode(self.options.mode);
                if snapshot.ready_state >= 1 && !self.fully_loaded(snapshot) && gap_low {
                    let reason = match event {
                        ObservationEvent::InternalSeeking => RebufferReason::InternalSeek,
                        ObservationEvent::Seeking => RebufferReason::Seeking,
                        _ if snapshot.seeking => RebufferReason::Seeking,
                        _ if snapshot.ready_state < 3 => RebufferReason::NotReady,
                        _ => RebufferReason::Buffering,
                    };
                    tracing::debug!(?reason, position = snapshot.position, "rebuffering started");
                    self.rebuffering = Some(RebufferingStatus {
                        reason,
                        position: snapshot.position,
                        since: now,
                    });
                }
            }
        }
    }

    /// Direct-file playback exposes no usable buffer levels; starvation
    /// shows up as the position standing still between two samples.
    fn update_rebuffering_direct_file(&mut self, snapshot: &MediaSnapshot, now: f64) {
        let progressing = self
            .previous_position
            .map_or(true, |prev| snapshot.position != prev);
        let should_progress = !snapshot.paused
            && !snapshot.ended
            && snapshot.playback_rate != 0.0
            && !snapshot.seeking;

        match self.rebuffering {
            Some(_) if progressing => self.rebuffering = None,
            None if !progressing && should_progress && self.previous_position.is_some() => {
                self.rebuffering = Some(RebufferingStatus {
                    reason: RebufferReason::Buffering,
                    position: snapshot.position,
                    since: now,
                });
            }
            _ => {}
        }
    }

    fn update_freezing(&mut self, snapshot: &MediaSnapshot, buffer_gap: f64, now: f64) {
        let position_changed = self
            .previous_position
            .map_or(true, |prev| snapshot.position != prev);

        if self.freezing.is_some() {
            // Once frozen, only these specific signals unfreeze.
            if position_changed
                || snapshot.paused
                || snapshot.ended
                || snapshot.ready_state == 0
                || snapshot.playback_rate == 0.0
            {
                tracing::debug!(position = snapshot.position, "freeze cleared");
                self.freezing = None;
            }
            return;
        }

        let frozen = !position_changed
            && buffer_gap.is_finite()
            && buffer_gap > self.options.freezing_minimum_buffer
            && !snapshot.paused
            && !snapshot.ended
            && snapshot.ready_state >= 1
            && snapshot.playback_rate != 0.0;
        if frozen {
            tracing::debug!(position = snapshot.position, "freeze detected");
            self.freezing = Some(FreezingStatus { since: now });
        }
    }
}
