use std::collections::HashMap;

use crate::types::RepresentationRef;

/// How much a maintainability score can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreConfidence {
    Low,
    High,
}

/// Score access by quality index, for choosers that reason over the
/// bitrate ladder rather than representation ids.
pub trait ScoreLookup {
    fn score_for_index(&self, index: usize) -> Option<(f64, ScoreConfidence)>;
}

/// Decayed score history of one quality.
///
/// The score average is held as debiased accumulators (weighted sum and
/// weight mass, both decayed per second of media downloaded); their ratio
/// is the current score. Recent segments dominate, but a quality's first
/// few samples already read at face value.
#[derive(Clone, Debug, Default)]
struct TrackedScore {
    weighted_scores: f64,
    weight_mass: f64,
    samples: u32,
}

impl TrackedScore {
    /// Half the influence of a sample is gone after this much downloaded
    /// media.
    const HALF_LIFE_SECS: f64 = 5.0;

    fn absorb(&mut self, weight_secs: f64, score: f64) {
        let keep = 0.5_f64.powf(weight_secs.max(0.0) / Self::HALF_LIFE_SECS);
        self.weighted_scores = self.weighted_scores * keep + score * (1.0 - keep);
        self.weight_mass = self.weight_mass * keep + (1.0 - keep);
        self.samples += 1;
    }

    fn estimate(&self) -> Option<f64> {
        (self.weight_mass > 0.0).then(|| self.weighted_scores / self.weight_mass)
    }

    fn confidence(&self) -> ScoreConfidence {
        if self.samples >= RepresentationScorer::SAMPLES_FOR_HIGH_CONFIDENCE {
            ScoreConfidence::High
        } else {
            ScoreConfidence::Low
        }
    }
}

/// Per-quality "maintainability" score.
///
/// A score is `segment_duration / download_duration`: above 1, segments
/// arrive faster than they play and the quality is sustainable.
/// Confidence stays low until enough samples accumulated.
#[derive(Clone, Debug, Default)]
pub struct RepresentationScorer {
    scores: HashMap<String, TrackedScore>,
    /// Last quality observed sustainable (high-confidence score ≥ 1),
    /// with its bitrate.
    last_stable: Option<RepresentationRef>,
}

impl RepresentationScorer {
    const SAMPLES_FOR_HIGH_CONFIDENCE: u32 = 5;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one completed media-segment download.
    pub fn add_sample(
        &mut self,
        representation: &RepresentationRef,
        download_duration_secs: f64,
        segment_duration_secs: f64,
    ) {
        if download_duration_secs <= 0.0 || segment_duration_secs <= 0.0 {
            return;
        }
        let score = segment_duration_secs / download_duration_secs;
        let tracked = self.scores.entry(representation.id.clone()).or_default();
        tracked.absorb(segment_duration_secs, score);

        let estimate = tracked.estimate().unwrap_or(0.0);
        if tracked.confidence() == ScoreConfidence::High && estimate >= 1.0 {
            self.last_stable = Some(representation.clone());
        }
        tracing::trace!(
            representation = %representation.id,
            score = estimate,
            samples = tracked.samples,
            "maintainability sample"
        );
    }

    /// Current score and confidence for a quality.
    #[must_use]
    pub fn get(&self, representation_id: &str) -> Option<(f64, ScoreConfidence)> {
        let tracked = self.scores.get(representation_id)?;
        Some((tracked.estimate()?, tracked.confidence()))
    }

    /// The last quality with a high-confidence score ≥ 1.
    #[must_use]
    pub fn last_stable_representation(&self) -> Option<&RepresentationRef> {
        self.last_stable.as_ref()
    }

    /// Drop history for one quality (e.g. its index was replaced).
    pub fn reset_representation(&mut self, representation_id: &str) {
        self.scores.remove(representation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep() -> RepresentationRef {
        RepresentationRef {
            id: "r-800k".to_string(),
            bitrate: 800_000,
            width: None,
        }
    }

    #[test]
    fn confidence_grows_with_samples() {
        let mut scorer = RepresentationScorer::new();
        let representation = rep();
        for i in 0..5 {
            let (_, confidence) = scorer
                .get(&representation.id)
                .unwrap_or((0.0, ScoreConfidence::Low));
            if i > 0 {
                assert_eq!(confidence, ScoreConfidence::Low);
            }
            scorer.add_sample(&representation, 2.5, 4.0);
        }
        let (score, confidence) = scorer.get(&representation.id).unwrap();
        assert_eq!(confidence, ScoreConfidence::High);
        assert!((score - 1.6).abs() < 0.05, "score {score}");
    }

    #[test]
    fn stable_representation_requires_high_confidence_and_score_above_one() {
        let mut scorer = RepresentationScorer::new();
        let representation = rep();
        for _ in 0..4 {
            scorer.add_sample(&representation, 2.0, 4.0);
        }
        assert!(scorer.last_stable_representation().is_none());
        scorer.add_sample(&representation, 2.0, 4.0);
        assert_eq!(
            scorer.last_stable_representation().map(|r| r.bitrate),
            Some(800_000)
        );
    }

    #[test]
    fn struggling_quality_never_becomes_stable() {
        let mut scorer = RepresentationScorer::new();
        let representation = rep();
        for _ in 0..10 {
            scorer.add_sample(&representation, 8.0, 4.0);
        }
        let (score, confidence) = scorer.get(&representation.id).unwrap();
        assert_eq!(confidence, ScoreConfidence::High);
        assert!(score < 1.0);
        assert!(scorer.last_stable_representation().is_none());
    }

    #[test]
    fn recent_samples_dominate_the_score() {
        let mut scorer = RepresentationScorer::new();
        let representation = rep();
        for _ in 0..10 {
            scorer.add_sample(&representation, 2.0, 4.0); // score 2.0
        }
        for _ in 0..10 {
            scorer.add_sample(&representation, 10.0, 4.0); // score 0.4
        }
        let (score, _) = scorer.get(&representation.id).unwrap();
        assert!(score < 0.6, "old healthy samples should fade, got {score}");
    }

    #[test]
    fn reset_forgets_a_quality() {
        let mut scorer = RepresentationScorer::new();
        let representation = rep();
        scorer.add_sample(&representation, 2.0, 4.0);
        scorer.reset_representation(&representation.id);
        assert!(scorer.get(&representation.id).is_none());
    }
}
