use std::sync::Arc;
use std::time::Duration;

use aulos_abr::{AbrEstimator, ClockSample, RepresentationRef, SegmentContent, StreamEvent};
use aulos_events::{AbrEvent, EventBus, StreamEvent as BusStreamEvent};
use aulos_fetch::{
    parse_smooth_next_segments, FetchError, FetchEvent, FetchedSegment, SegmentContext,
    SegmentFetcher,
};
use aulos_index::{
    IndexPosition, SegmentAvailability, SegmentIndexOps, SegmentInfo, TransportHint,
};
use aulos_manifest::{Manifest, MediaType};
use aulos_net::NetError;
use aulos_observer::Observation;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    controls::AbrControls,
    error::{EngineResult, MediaError},
    refresh::{RefreshReason, RefreshSignal},
    sink::MediaBufferSink,
    MediaElement, PlaybackObserver,
};

/// How far ahead of the playback position the stream keeps fetching.
#[derive(Clone, Copy, Debug)]
pub struct StreamTuning {
    pub buffer_goal: f64,
    pub segment_lookahead: f64,
}

/// One period's worth of one media type: track choice applied, ABR run,
/// segments fetched and pushed in time order.
pub struct StreamTask {
    manifest: Arc<RwLock<Manifest>>,
    fetcher: Arc<SegmentFetcher>,
    sink: Arc<dyn MediaBufferSink>,
    abr: AbrEstimator,
    observations: watch::Receiver<Observation>,
    bus: EventBus,
    refresh: RefreshSignal,
    controls: AbrControls,
    tuning: StreamTuning,
    period_id: String,
    adaptation_id: String,
    media_type: MediaType,
}

/// Immutable facts about one segment's surroundings, cloned out of the
/// manifest lock before any await point.
struct FetchPlan {
    segment: SegmentInfo,
    representation_id: String,
    bitrate: u64,
    codec: String,
    is_isobmff: bool,
    append_window: (f64, Option<f64>),
}

impl StreamTask {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        manifest: Arc<RwLock<Manifest>>,
        fetcher: Arc<SegmentFetcher>,
        sink: Arc<dyn MediaBufferSink>,
        abr: AbrEstimator,
        observations: watch::Receiver<Observation>,
        bus: EventBus,
        refresh: RefreshSignal,
        controls: AbrControls,
        tuning: StreamTuning,
        period_id: String,
        adaptation_id: String,
        media_type: MediaType,
    ) -> Self {
        Self {
            manifest,
            fetcher,
            sink,
            abr,
            observations,
            bus,
            refresh,
            controls,
            tuning,
            period_id,
            adaptation_id,
            media_type,
        }
    }

    /// Apply the user's latest adaptation commands before deciding.
    fn apply_controls(&mut self) {
        let settings = self.controls.get(self.media_type);
        self.abr.set_manual_bitrate(settings.manual_bitrate);
        self.abr
            .set_auto_bounds(settings.min_auto_bitrate, settings.max_auto_bitrate);
        self.abr.set_bitrate_ceiling(settings.bitrate_ceiling);
        self.abr.set_width_ceiling(settings.width_ceiling);
    }

    /// Representations currently worth considering: supported and not
    /// known undecipherable.
    fn representation_refs(&self) -> Vec<RepresentationRef> {
        let manifest = self.manifest.read();
        let Some(adaptation) = manifest
            .period(&self.period_id)
            .and_then(|p| p.adaptation(&self.adaptation_id))
        else {
            return Vec::new();
        };
        adaptation
            .representations
            .iter()
            .filter(|r| r.is_supported && r.decipherable != Some(false))
            .map(|r| RepresentationRef {
                id: r.id.clone(),
                bitrate: r.bitrate,
                width: r.width,
            })
            .collect()
    }

    fn clock_sample(&self, observation: &Observation) -> ClockSample {
        let buffered = self.sink.buffered();
        let gap = buffered.gap_from(observation.position);
        let (duration, live_gap) = {
            let manifest = self.manifest.read();
            let now_ms = unix_now_ms();
            let max = manifest.maximum_position(now_ms);
            let live_gap = manifest.is_live.then(|| max - observation.position);
            (observation.duration, live_gap)
        };
        ClockSample {
            position: observation.position,
            buffer_gap: if gap.is_finite() { gap } else { 0.0 },
            speed: observation.playback_rate,
            duration,
            live_gap,
        }
    }

    /// Next segment to fetch, starting from `cursor` (or snapping to the
    /// segment containing the playback position on the first call).
    fn plan_next(&self, representation_id: &str, cursor: Option<f64>, position: f64) -> PlanOutcome {
        let manifest = self.manifest.read();
        let Some(period) = manifest.period(&self.period_id) else {
            return PlanOutcome::Gone;
        };
        let Some(representation) = period
            .adaptation(&self.adaptation_id)
            .and_then(|a| a.representation(representation_id))
        else {
            return PlanOutcome::Gone;
        };
        let index = &representation.index;

        let from = cursor.unwrap_or_else(|| {
            index
                .segment_containing(position.max(period.start))
                .map_or(position.max(period.start), |s| s.time)
        });

        let next = index.segments(from, self.tuning.segment_lookahead).into_iter().next();
        match next {
            Some(segment) => PlanOutcome::Fetch(Box::new(FetchPlan {
                append_window: (period.start, period.end),
                codec: representation
                    .codec
                    .clone()
                    .or_else(|| representation.mime_type.clone())
                    .unwrap_or_default(),
                is_isobmff: representation
                    .mime_type
                    .as_deref()
                    .map_or(true, |m| m.contains("mp4")),
                bitrate: representation.bitrate,
                representation_id: representation.id.clone(),
                segment,
            })),
            None => {
                let wants_refresh = index.should_refresh(from + self.tuning.segment_lookahead);
                let finished = index.is_finished();
                let exhausted = match index.last_position() {
                    IndexPosition::At(last) => from > last,
                    IndexPosition::Empty => true,
                    IndexPosition::Unknown => false,
                };
                if wants_refresh {
                    PlanOutcome::Starved
                } else if finished && exhausted {
                    PlanOutcome::Ended
                } else {
                    PlanOutcome::Starved
                }
            }
        }
    }

    fn init_segment_of(&self, representation_id: &str) -> Option<SegmentInfo> {
        let manifest = self.manifest.read();
        manifest
            .period(&self.period_id)?
            .adaptation(&self.adaptation_id)?
            .representation(representation_id)
            .and_then(|r| r.index.init_segment())
    }

    /// Run the fetch while feeding its lifecycle events into the ABR
    /// accounting, cooperatively on this task.
    async fn fetch_with_accounting(
        &mut self,
        context: &SegmentContext,
        content: SegmentContent,
        cancel: &CancellationToken,
    ) -> Result<FetchedSegment, FetchError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let fetcher = Arc::clone(&self.fetcher);
        let fetch = fetcher.fetch(context, &tx, cancel);
        tokio::pin!(fetch);

        let result = loop {
            tokio::select! {
                result = &mut fetch => break result,
                Some(event) = rx.recv() => self.account(event, &content),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.account(event, &content);
        }
        result
    }

    fn account(&mut self, event: FetchEvent, content: &SegmentContent) {
        match event {
            FetchEvent::RequestBegin { id, .. } => self.abr.on_event(StreamEvent::RequestBegin {
                id,
                content: content.clone(),
                requested_at: web_time::Instant::now(),
            }),
            FetchEvent::Progress { id, bytes, .. } => self.abr.on_event(StreamEvent::Progress {
                id,
                bytes,
                at: web_time::Instant::now(),
            }),
            FetchEvent::RequestEnd { id, size, duration } => {
                self.abr.on_event(StreamEvent::RequestEnd { id });
                self.abr.on_event(StreamEvent::Metrics {
                    duration_ms: duration.as_secs_f64() * 1_000.0,
                    size,
                    content: content.clone(),
                });
            }
            FetchEvent::Warning { error, .. } => {
                self.bus.publish(BusStreamEvent::Warning {
                    message: error.to_string(),
                });
            }
            FetchEvent::Chunk { .. } | FetchEvent::Data { .. } | FetchEvent::ChunkComplete { .. } => {}
        }
    }

    /// Whether a 404 on this segment points at a stale manifest rather
    /// than a gone segment.
    fn judge_out_of_sync(&self, representation_id: &str, segment: &SegmentInfo) -> bool {
        let manifest = self.manifest.read();
        let Some(representation) = manifest
            .period(&self.period_id)
            .and_then(|p| p.adaptation(&self.adaptation_id))
            .and_then(|a| a.representation(representation_id))
        else {
            return false;
        };
        representation.index.can_be_out_of_sync_error()
            && representation.index.is_segment_still_available(segment)
                == SegmentAvailability::Available
    }

    /// Feed a parsed `sidx` back into an index that is waiting for one.
    fn absorb_sidx(&self, representation_id: &str, init_segment: &SegmentInfo, data: &Bytes) {
        let waiting = {
            let manifest = self.manifest.read();
            manifest
                .period(&self.period_id)
                .and_then(|p| p.adaptation(&self.adaptation_id))
                .and_then(|a| a.representation(representation_id))
                .is_some_and(|r| !r.index.is_initialized())
        };
        if !waiting {
            return;
        }
        let resource_offset = init_segment.byte_range.map_or(0, |r| r.start);
        let Some(segments) = aulos_fetch::parse_sidx(data, resource_offset) else {
            tracing::warn!(
                representation = %representation_id,
                "init payload carries no sidx; index stays empty"
            );
            return;
        };
        let mut manifest = self.manifest.write();
        if let Some(representation) = manifest
            .period_mut(&self.period_id)
            .and_then(|p| p.adaptation_mut(&self.adaptation_id))
            .and_then(|a| a.representation_mut(representation_id))
        {
            representation.index.add_segments(&segments);
        }
    }

    fn patch_smooth_index(&self, representation_id: &str, data: &Bytes) {
        let successors = parse_smooth_next_segments(data);
        if successors.is_empty() {
            return;
        }
        let mut manifest = self.manifest.write();
        if let Some(representation) = manifest
            .period_mut(&self.period_id)
            .and_then(|p| p.adaptation_mut(&self.adaptation_id))
            .and_then(|a| a.representation_mut(representation_id))
        {
            representation.index.add_segments(&successors);
        }
    }

    /// Drive this stream until its period is exhausted.
    pub async fn run(mut self, cancel: CancellationToken) -> EngineResult<()> {
        let mut current_representation: Option<String> = None;
        let mut pending_init: Option<Bytes> = None;
        let mut init_fetched = false;
        let mut init_sent = false;
        let mut cursor: Option<f64> = None;
        let mut pushed_until: Option<f64> = None;
        let mut was_guessing = false;
        let mut wrong_guesses_seen = 0_u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let representations = self.representation_refs();
            if representations.is_empty() {
                return Err(MediaError::CodecNotSupported(format!(
                    "no playable representation in adaptation {}",
                    self.adaptation_id
                ))
                .into());
            }

            let observation = self.observations.borrow().clone();
            let clock = self.clock_sample(&observation);

            self.apply_controls();
            let Some(estimate) =
                self.abr
                    .estimate(&clock, &representations, web_time::Instant::now())
            else {
                return Ok(());
            };

            let guessing = self.abr.guess_state().is_guessing();
            let wrong_guesses = self.abr.guess_state().consecutive_wrong_guesses();
            if guessing && !was_guessing {
                self.bus.publish(AbrEvent::GuessEntered {
                    representation_id: estimate.representation.id.clone(),
                });
            }
            if wrong_guesses > wrong_guesses_seen {
                let cooldown = self
                    .abr
                    .guess_state()
                    .blocked_until()
                    .map(|until| until.saturating_duration_since(web_time::Instant::now()))
                    .unwrap_or_default();
                self.bus.publish(AbrEvent::GuessAborted {
                    representation_id: estimate.representation.id.clone(),
                    cooldown,
                });
            }
            was_guessing = guessing;
            wrong_guesses_seen = wrong_guesses;

            if current_representation.as_deref() != Some(estimate.representation.id.as_str()) {
                tracing::debug!(
                    period = %self.period_id,
                    media_type = self.media_type.as_str(),
                    representation = %estimate.representation.id,
                    bitrate = estimate.bitrate,
                    urgent = estimate.urgent,
                    "switching representation"
                );
                current_representation = Some(estimate.representation.id.clone());
                pending_init = None;
                init_fetched = false;
                init_sent = false;
                self.abr.on_event(StreamEvent::RepresentationChanged {
                    representation: estimate.representation.clone(),
                });
                self.bus.publish(BusStreamEvent::RepresentationChanged {
                    period_id: self.period_id.clone(),
                    media_type: self.media_type.as_str(),
                    representation_id: estimate.representation.id.clone(),
                    bitrate: estimate.bitrate,
                });
                self.bus.publish(AbrEvent::Estimate {
                    bitrate: estimate.bitrate,
                    representation_id: estimate.representation.id.clone(),
                    urgent: estimate.urgent,
                    manual: estimate.manual,
                });
            }
            let representation_id = estimate.representation.id.clone();

            // Buffer full: idle until playback consumes some of it.
            let ahead = pushed_until.map_or(0.0, |end| end - observation.position);
            if ahead >= self.tuning.buffer_goal {
                if self.wait_for_change(&cancel).await.is_err() {
                    return Ok(());
                }
                continue;
            }

            // Init comes before any media plan: for sidx-driven content it
            // is the init that makes the index addressable at all.
            if !init_fetched {
                if let Some(init_segment) = self.init_segment_of(&representation_id) {
                    match self
                        .fetch_init(&representation_id, init_segment.clone(), &cancel)
                        .await
                    {
                        Ok(init) => {
                            self.absorb_sidx(&representation_id, &init_segment, &init.data);
                            pending_init = Some(init.data);
                            init_fetched = true;
                        }
                        Err(error) => {
                            if self
                                .handle_fetch_error(error, &representation_id, &init_segment, &cancel)
                                .await
                                .is_err()
                            {
                                return Ok(());
                            }
                            continue;
                        }
                    }
                } else {
                    init_fetched = true;
                }
            }

            match self.plan_next(&representation_id, cursor, observation.position) {
                PlanOutcome::Gone => return Ok(()),
                PlanOutcome::Ended => {
                    tracing::debug!(period = %self.period_id, "period content exhausted");
                    return Ok(());
                }
                PlanOutcome::Starved => {
                    self.refresh.request(RefreshReason::IndexNeedsData);
                    if self.idle(&cancel, Duration::from_millis(300)).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                PlanOutcome::Fetch(plan) => {
                    let plan = *plan;
                    match self
                        .fetch_plan_segment(&plan, plan.segment.clone(), &cancel)
                        .await
                    {
                        Ok(fetched) => {
                            if matches!(plan.segment.hint, Some(TransportHint::Smooth { .. })) {
                                self.patch_smooth_index(&representation_id, &fetched.data);
                            }
                            let init = if init_sent { None } else { pending_init.clone() };
                            self.sink
                                .push(
                                    init,
                                    fetched.data,
                                    plan.segment.timestamp_offset,
                                    plan.append_window,
                                    &plan.codec,
                                )
                                .await?;
                            init_sent = true;
                            self.abr.on_event(StreamEvent::AddedSegment {
                                buffered_to: plan.segment.end,
                            });
                            self.bus.publish(BusStreamEvent::SegmentLoaded {
                                representation_id: representation_id.clone(),
                                segment_id: plan.segment.id.clone(),
                                size: fetched.size,
                                duration: fetched.duration,
                            });
                            cursor = Some(plan.segment.end);
                            pushed_until = Some(plan.segment.end);
                        }
                        Err(error) => {
                            if self
                                .handle_fetch_error(error, &representation_id, &plan.segment, &cancel)
                                .await
                                .is_err()
                            {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Fetch a representation's init segment (before any media plan
    /// exists for it).
    async fn fetch_init(
        &mut self,
        representation_id: &str,
        init_segment: SegmentInfo,
        cancel: &CancellationToken,
    ) -> Result<FetchedSegment, FetchError> {
        let (bitrate, is_isobmff) = {
            let manifest = self.manifest.read();
            let representation = manifest
                .period(&self.period_id)
                .and_then(|p| p.adaptation(&self.adaptation_id))
                .and_then(|a| a.representation(representation_id));
            (
                representation.map_or(0, |r| r.bitrate),
                representation
                    .and_then(|r| r.mime_type.as_deref())
                    .map_or(true, |m| m.contains("mp4")),
            )
        };
        let content = SegmentContent {
            representation_id: representation_id.to_string(),
            bitrate,
            segment_duration: None,
            is_init: true,
        };
        let context = SegmentContext {
            period_id: self.period_id.clone(),
            adaptation_id: self.adaptation_id.clone(),
            representation_id: representation_id.to_string(),
            is_isobmff,
            segment: init_segment,
        };
        self.fetch_with_accounting(&context, content, cancel).await
    }

    async fn fetch_plan_segment(
        &mut self,
        plan: &FetchPlan,
        segment: SegmentInfo,
        cancel: &CancellationToken,
    ) -> Result<FetchedSegment, FetchError> {
        let content = SegmentContent {
            representation_id: plan.representation_id.clone(),
            bitrate: plan.bitrate,
            segment_duration: (!segment.is_init).then_some(segment.duration),
            is_init: segment.is_init,
        };
        let context = SegmentContext {
            period_id: self.period_id.clone(),
            adaptation_id: self.adaptation_id.clone(),
            representation_id: plan.representation_id.clone(),
            is_isobmff: plan.is_isobmff,
            segment,
        };
        self.fetch_with_accounting(&context, content, cancel).await
    }

    /// Classify a failed fetch: out-of-sync manifests trigger a refresh,
    /// anything else surfaces as a warning and the segment is skipped so
    /// one poisoned URL cannot wedge the stream.
    async fn handle_fetch_error(
        &mut self,
        error: FetchError,
        representation_id: &str,
        segment: &SegmentInfo,
        cancel: &CancellationToken,
    ) -> Result<(), ()> {
        if matches!(error, FetchError::Cancelled | FetchError::Net(NetError::Aborted)) {
            return Err(());
        }
        if let FetchError::Net(NetError::Http { status: 404, .. }) = &error {
            if self.judge_out_of_sync(representation_id, segment) {
                tracing::warn!(segment = %segment.id, "listed segment missing; manifest looks stale");
                self.refresh.request(RefreshReason::OutOfSync);
                self.bus.publish(BusStreamEvent::Warning {
                    message: format!("segment {} out of sync with server", segment.id),
                });
                return self.idle(cancel, Duration::from_millis(500)).await;
            }
        }
        tracing::warn!(segment = %segment.id, %error, "segment fetch failed");
        self.bus.publish(BusStreamEvent::Warning {
            message: error.to_string(),
        });
        self.idle(cancel, Duration::from_millis(500)).await
    }

    async fn wait_for_change(&mut self, cancel: &CancellationToken) -> Result<(), ()> {
        tokio::select! {
            () = cancel.cancelled() => Err(()),
            changed = self.observations.changed() => changed.map_err(|_| ()),
        }
    }

    async fn idle(&self, cancel: &CancellationToken, duration: Duration) -> Result<(), ()> {
        tokio::select! {
            () = cancel.cancelled() => Err(()),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

enum PlanOutcome {
    /// Fetch this next.
    Fetch(Box<FetchPlan>),
    /// Nothing addressable yet; wait (and nudge a refresh).
    Starved,
    /// The period has no further content.
    Ended,
    /// The period or adaptation vanished from the manifest.
    Gone,
}

/// Spawn helper used by the engine: builds the per-stream ABR instance.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_stream<M: MediaElement + 'static>(
    manifest: Arc<RwLock<Manifest>>,
    fetcher: Arc<SegmentFetcher>,
    sink: Arc<dyn MediaBufferSink>,
    abr: AbrEstimator,
    observer: &Arc<PlaybackObserver<M>>,
    bus: EventBus,
    refresh: RefreshSignal,
    controls: AbrControls,
    tuning: StreamTuning,
    period_id: String,
    adaptation_id: String,
    media_type: MediaType,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<EngineResult<()>> {
    let task = StreamTask::new(
        manifest,
        fetcher,
        sink,
        abr,
        observer.subscribe(),
        bus,
        refresh,
        controls,
        tuning,
        period_id,
        adaptation_id,
        media_type,
    );
    tokio::spawn(task.run(cancel))
}

fn unix_now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1_000.0)
        .unwrap_or(0.0)
}
