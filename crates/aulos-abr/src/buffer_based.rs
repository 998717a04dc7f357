use crate::score::{ScoreConfidence, ScoreLookup};

/// Buffer-occupancy quality chooser.
///
/// Maps each quality to the buffer level needed to risk it, spacing the
/// thresholds by logarithmic utility (the BOLA shape): doubling bitrate
/// costs a fixed extra amount of buffer. The chooser only ever speaks up
/// when the buffer is comfortable; the estimator gates it with hysteresis.
#[derive(Clone, Debug)]
pub struct BufferBasedChooser {
    bitrates: Vec<u64>,
    /// Buffer gap (seconds) required for each quality.
    levels: Vec<f64>,
}

impl BufferBasedChooser {
    /// Buffer needed for the lowest quality.
    const FLOOR_SECS: f64 = 0.0;
    /// Buffer needed before the second quality is considered.
    const LOWER_SECS: f64 = 5.0;
    /// Buffer at which the highest quality becomes acceptable.
    const UPPER_SECS: f64 = 30.0;

    /// `bitrates` must be sorted ascending.
    #[must_use]
    pub fn new(bitrates: Vec<u64>) -> Self {
        let levels = compute_levels(&bitrates);
        Self { bitrates, levels }
    }

    /// Quality index for the given buffer gap, adjusted down past
    /// qualities known (with high confidence) to be unsustainable.
    #[must_use]
    pub fn choose(&self, buffer_gap: f64, scores: &dyn ScoreLookup) -> Option<usize> {
        if self.bitrates.is_empty() {
            return None;
        }
        let mut candidate = self
            .levels
            .iter()
            .rposition(|&level| level <= buffer_gap)
            .unwrap_or(0);

        while candidate > 0 {
            match scores.score_for_index(candidate) {
                Some((score, ScoreConfidence::High)) if score < 1.0 => candidate -= 1,
                _ => break,
            }
        }
        Some(candidate)
    }

    #[must_use]
    pub fn bitrate_of(&self, index: usize) -> Option<u64> {
        self.bitrates.get(index).copied()
    }
}

fn compute_levels(bitrates: &[u64]) -> Vec<f64> {
    let count = bitrates.len();
    if count <= 1 {
        return vec![BufferBasedChooser::FLOOR_SECS; count];
    }
    let min = bitrates[0].max(1) as f64;
    let utilities: Vec<f64> = bitrates
        .iter()
        .map(|&b| (b.max(1) as f64 / min).ln() + 1.0)
        .collect();
    let top = utilities[count - 1];

    bitrates
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i == 0 {
                BufferBasedChooser::FLOOR_SECS
            } else if top <= 1.0 {
                BufferBasedChooser::LOWER_SECS
            } else {
                BufferBasedChooser::LOWER_SECS
                    + (BufferBasedChooser::UPPER_SECS - BufferBasedChooser::LOWER_SECS)
                        * (utilities[i] - 1.0)
                        / (top - 1.0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    struct NoScores;

    impl ScoreLookup for NoScores {
        fn score_for_index(&self, _index: usize) -> Option<(f64, ScoreConfidence)> {
            None
        }
    }

    struct BadTop;

    impl ScoreLookup for BadTop {
        fn score_for_index(&self, index: usize) -> Option<(f64, ScoreConfidence)> {
            (index == 2).then_some((0.7, ScoreConfidence::High))
        }
    }

    fn chooser() -> BufferBasedChooser {
        BufferBasedChooser::new(vec![400_000, 1_200_000, 3_600_000])
    }

    #[test]
    fn levels_are_monotonic() {
        let c = chooser();
        assert_eq!(c.levels[0], 0.0);
        assert!(c.levels[1] > c.levels[0]);
        assert!(c.levels[2] > c.levels[1]);
        assert!((c.levels[2] - 30.0).abs() < 1e-9);
    }

    #[rstest]
    #[case::starving(1.0, 0)]
    #[case::modest(6.0, 0)]
    #[case::comfortable(20.0, 1)]
    #[case::rich(40.0, 2)]
    fn buffer_gap_maps_onto_the_ladder(#[case] gap: f64, #[case] expected: usize) {
        assert_eq!(chooser().choose(gap, &NoScores), Some(expected));
    }

    #[test]
    fn unsustainable_quality_is_stepped_past() {
        assert_eq!(chooser().choose(40.0, &BadTop), Some(1));
    }

    #[test]
    fn single_quality_is_always_chosen() {
        let c = BufferBasedChooser::new(vec![640_000]);
        assert_eq!(c.choose(0.0, &NoScores), Some(0));
    }
}
