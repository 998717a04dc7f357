use std::time::Duration;

use web_time::Instant;

use crate::{
    pending::PendingRequest,
    score::ScoreConfidence,
    types::ClockSample,
};

/// Tunables for probing one quality above the measured one.
#[derive(Clone, Debug)]
pub struct GuessOptions {
    /// Only probe close to the live edge, seconds.
    pub max_live_gap: f64,
    /// Minimum buffer comfort before probing, seconds.
    pub min_buffer_gap: f64,
    /// Minimum high-confidence score (per unit of speed) of the current
    /// quality before probing.
    pub min_score: f64,
    /// Cooldown added per consecutive wrong guess.
    pub cooldown_step: Duration,
    /// Cooldown ceiling.
    pub cooldown_cap: Duration,
    /// Grace period for init-segment requests while probing.
    pub init_request_grace: f64,
}

impl Default for GuessOptions {
    fn default() -> Self {
        Self {
            max_live_gap: 50.0,
            min_buffer_gap: 6.0,
            min_score: 1.4,
            cooldown_step: Duration::from_secs(120),
            cooldown_cap: Duration::from_secs(360),
            init_request_grace: 1.0,
        }
    }
}

/// Probing ("guess") state machine.
///
/// When conditions look safe, the estimator jumps one quality above the
/// measured choice and watches the next few requests. Requests running
/// long, or trending below the guessed bitrate, abort the guess and start
/// an escalating cooldown.
#[derive(Clone, Debug)]
pub struct GuessEstimator {
    options: GuessOptions,
    guessed_bitrate: Option<u64>,
    consecutive_wrong_guesses: u32,
    blocked_until: Option<Instant>,
}

impl GuessEstimator {
    #[must_use]
    pub fn new(options: GuessOptions) -> Self {
        Self {
            options,
            guessed_bitrate: None,
            consecutive_wrong_guesses: 0,
            blocked_until: None,
        }
    }

    #[must_use]
    pub fn is_guessing(&self) -> bool {
        self.guessed_bitrate.is_some()
    }

    #[must_use]
    pub fn guessed_bitrate(&self) -> Option<u64> {
        self.guessed_bitrate
    }

    #[must_use]
    pub fn consecutive_wrong_guesses(&self) -> u32 {
        self.consecutive_wrong_guesses
    }

    #[must_use]
    pub fn blocked_until(&self) -> Option<Instant> {
        self.blocked_until
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// Whether conditions allow starting a probe of the quality above the
    /// current one.
    #[must_use]
    pub fn can_guess(
        &self,
        clock: &ClockSample,
        current_score: Option<(f64, ScoreConfidence)>,
        now: Instant,
    ) -> bool {
        if self.is_blocked(now) {
            return false;
        }
        let near_live_edge = clock
            .live_gap
            .is_some_and(|gap| gap <= self.options.max_live_gap);
        if !near_live_edge || clock.buffer_gap < self.options.min_buffer_gap {
            return false;
        }
        let speed = if clock.speed > 0.0 { clock.speed } else { 1.0 };
        matches!(
            current_score,
            Some((score, ScoreConfidence::High)) if score / speed >= self.options.min_score
        )
    }

    /// Enter guess mode, targeting `bitrate`.
    pub fn start(&mut self, bitrate: u64) {
        tracing::debug!(bitrate, "entering guess mode");
        self.guessed_bitrate = Some(bitrate);
    }

    /// Whether an in-flight request for the guessed quality condemns the
    /// guess: it ran past its segment duration (or past a short grace for
    /// init segments), or its projected bandwidth dropped below the
    /// guessed bitrate.
    #[must_use]
    pub fn request_condemns_guess(&self, request: &PendingRequest, now: Instant) -> bool {
        let Some(guessed) = self.guessed_bitrate else {
            return false;
        };
        let elapsed = request.elapsed(now);
        let allowance = if request.content.is_init {
            self.options.init_request_grace
        } else {
            request
                .content
                .segment_duration
                .unwrap_or(self.options.init_request_grace)
        };
        if elapsed > allowance {
            return true;
        }
        request
            .inflight_bandwidth()
            .is_some_and(|bw| bw < guessed as f64)
    }

    /// Abort the current guess and escalate the cooldown.
    pub fn abort(&mut self, now: Instant) {
        self.guessed_bitrate = None;
        self.consecutive_wrong_guesses += 1;
        let cooldown = self
            .options
            .cooldown_step
            .saturating_mul(self.consecutive_wrong_guesses)
            .min(self.options.cooldown_cap);
        self.blocked_until = Some(now + cooldown);
        tracing::debug!(
            wrong_guesses = self.consecutive_wrong_guesses,
            cooldown_secs = cooldown.as_secs(),
            "guess aborted"
        );
    }

    /// A regular (bandwidth- or buffer-based) choice caught up with the
    /// guess: the probe is confirmed right.
    pub fn validate(&mut self) {
        if self.guessed_bitrate.take().is_some() {
            tracing::debug!("guess validated");
        }
        self.consecutive_wrong_guesses = 0;
    }

    /// Leave guess mode without judging it (e.g. content changed).
    pub fn cancel(&mut self) {
        self.guessed_bitrate = None;
    }
}

#[cfg(test)]
mod tests {
    use web_time::Instant;

    use super::*;

    fn clock(live_gap: f64, buffer_gap: f64) -> ClockSample {
        ClockSample {
            position: 100.0,
            buffer_gap,
            speed: 1.0,
            duration: f64::INFINITY,
            live_gap: Some(live_gap),
        }
    }

    #[test]
    fn guessing_needs_live_edge_buffer_and_score() {
        let guess = GuessEstimator::new(GuessOptions::default());
        let now = Instant::now();
        let good_score = Some((1.6, ScoreConfidence::High));

        assert!(guess.can_guess(&clock(10.0, 8.0), good_score, now));
        assert!(!guess.can_guess(&clock(80.0, 8.0), good_score, now), "far from edge");
        assert!(!guess.can_guess(&clock(10.0, 2.0), good_score, now), "thin buffer");
        assert!(
            !guess.can_guess(&clock(10.0, 8.0), Some((1.6, ScoreConfidence::Low)), now),
            "low confidence"
        );
        assert!(
            !guess.can_guess(&clock(10.0, 8.0), Some((1.2, ScoreConfidence::High)), now),
            "score too low"
        );
    }

    #[test]
    fn cooldown_escalates_and_caps() {
        let mut guess = GuessEstimator::new(GuessOptions::default());
        let t0 = Instant::now();

        guess.start(1_200_000);
        guess.abort(t0);
        assert_eq!(guess.consecutive_wrong_guesses(), 1);
        assert_eq!(guess.blocked_until(), Some(t0 + Duration::from_secs(120)));

        guess.start(1_200_000);
        guess.abort(t0);
        assert_eq!(guess.blocked_until(), Some(t0 + Duration::from_secs(240)));

        guess.start(1_200_000);
        guess.abort(t0);
        assert_eq!(guess.consecutive_wrong_guesses(), 3);
        assert_eq!(guess.blocked_until(), Some(t0 + Duration::from_secs(360)));

        guess.start(1_200_000);
        guess.abort(t0);
        assert_eq!(
            guess.blocked_until(),
            Some(t0 + Duration::from_secs(360)),
            "cap holds"
        );
    }

    #[test]
    fn validation_resets_the_streak() {
        let mut guess = GuessEstimator::new(GuessOptions::default());
        let t0 = Instant::now();
        guess.start(1_200_000);
        guess.abort(t0);
        guess.start(1_200_000);
        guess.validate();
        assert_eq!(guess.consecutive_wrong_guesses(), 0);
        assert!(!guess.is_guessing());
    }

    #[test]
    fn blocked_until_expires() {
        let mut guess = GuessEstimator::new(GuessOptions::default());
        let t0 = Instant::now();
        guess.start(1_200_000);
        guess.abort(t0);

        let good_score = Some((1.6, ScoreConfidence::High));
        assert!(!guess.can_guess(&clock(10.0, 8.0), good_score, t0 + Duration::from_secs(60)));
        assert!(guess.can_guess(&clock(10.0, 8.0), good_score, t0 + Duration::from_secs(121)));
    }
}
