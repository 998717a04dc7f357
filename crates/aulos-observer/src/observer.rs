use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    generator::ObservationGenerator,
    types::{MediaSnapshot, Observation, ObservationEvent, ObserverOptions, TimeRanges},
};

/// The host media element, as the observer needs to see it.
///
/// The element itself (and its buffer-source plumbing) lives outside the
/// engine; implementations adapt whatever playback surface is in use.
pub trait MediaElement: Send + Sync {
    fn position(&self) -> f64;
    fn duration(&self) -> f64;
    fn buffered(&self) -> TimeRanges;
    fn paused(&self) -> bool;
    fn ended(&self) -> bool;
    fn ready_state(&self) -> u8;
    fn playback_rate(&self) -> f64;
    fn seeking(&self) -> bool;

    fn snapshot(&self) -> MediaSnapshot {
        MediaSnapshot {
            position: self.position(),
            duration: self.duration(),
            buffered: self.buffered(),
            paused: self.paused(),
            ended: self.ended(),
            ready_state: self.ready_state(),
            playback_rate: self.playback_rate(),
            seeking: self.seeking(),
        }
    }
}

/// Samples the media element on a timer and on element events, publishing
/// normalized observations.
///
/// Publication goes through a `watch` channel: every subscriber first
/// sees the latest sample, so subscribers attached in the same logical
/// step as `start` all observe the same initial observation instead of
/// racing the first tick.
pub struct PlaybackObserver<M: MediaElement> {
    element: Arc<M>,
    generator: Mutex<ObservationGenerator>,
    tx: watch::Sender<Observation>,
    cancel: CancellationToken,
    epoch: std::time::Instant,
}

impl<M: MediaElement + 'static> PlaybackObserver<M> {
    /// Takes the initial sample synchronously.
    #[must_use]
    pub fn new(element: Arc<M>, options: ObserverOptions) -> Self {
        let mut generator = ObservationGenerator::new(options);
        let epoch = std::time::Instant::now();
        let initial = generator.observe(ObservationEvent::Init, &element.snapshot(), 0.0);
        let (tx, _) = watch::channel(initial);
        Self {
            element,
            generator: Mutex::new(generator),
            tx,
            cancel: CancellationToken::new(),
            epoch,
        }
    }

    /// Subscribe; the receiver immediately holds the latest observation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Observation> {
        self.tx.subscribe()
    }

    /// Latest observation.
    #[must_use]
    pub fn latest(&self) -> Observation {
        self.tx.borrow().clone()
    }

    /// The orchestrator is about to move the playback position itself;
    /// the next `seeking` event must be labeled internal.
    pub fn announce_internal_seek(&self) {
        self.generator.lock().announce_internal_seek();
    }

    /// Feed a media-element event; samples immediately.
    pub fn notify_event(&self, event: ObservationEvent) {
        self.sample(event);
    }

    fn sample(&self, event: ObservationEvent) {
        let snapshot = self.element.snapshot();
        let now = self.epoch.elapsed().as_secs_f64();
        let observation = self.generator.lock().observe(event, &snapshot, now);
        let _ = self.tx.send(observation);
    }

    /// Spawn the periodic sampling task. Stops when [`Self::stop`] is
    /// called or the observer is dropped by all holders.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = self.generator.lock().options().sampling_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the creation sample covered t=0
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.sample(ObservationEvent::Sample),
                }
            }
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
