//! URL prioritization within a host group.

use crate::datum::GroupedUrlDatum;

/// Score telling the pipeline to drop a URL without fetching it.
pub const SKIP_SCORE: f64 = -1.0;

/// Assigns a fetch priority in `[0.0, 1.0]` to a grouped URL, or
/// [`SKIP_SCORE`] to omit it from the run entirely.
pub trait ScoreGenerator: Send + Sync {
    fn score(&self, datum: &GroupedUrlDatum) -> f64;
}

/// Scores by time since last fetch, saturating at 1.0 once `rescore_window`
/// milliseconds have passed. Never-fetched URLs score 1.0.
pub struct LastFetchScoreGenerator {
    now: u64,
    rescore_window: u64,
}

impl LastFetchScoreGenerator {
    pub fn new(now_ms: u64, rescore_window_ms: u64) -> Self {
        Self {
            now: now_ms,
            rescore_window: rescore_window_ms.max(1),
        }
    }
}

impl ScoreGenerator for LastFetchScoreGenerator {
    fn score(&self, datum: &GroupedUrlDatum) -> f64 {
        if datum.datum.last_fetched == 0 {
            return 1.0;
        }

        let elapsed = self.now.saturating_sub(datum.datum.last_fetched);
        (elapsed as f64 / self.rescore_window as f64).min(1.0)
    }
}

/// Returns the same score for every URL. Handy as a pipeline default and
/// for forcing skip behavior.
pub struct FixedScoreGenerator {
    score: f64,
}

impl FixedScoreGenerator {
    pub fn new(score: f64) -> Self {
        Self { score }
    }
}

impl ScoreGenerator for FixedScoreGenerator {
    fn score(&self, _datum: &GroupedUrlDatum) -> f64 {
        self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::UrlDatum;
    use crate::grouping::GroupingKey;

    fn grouped(last_fetched: u64) -> GroupedUrlDatum {
        let mut datum = UrlDatum::new("http://test.local/page");
        datum.last_fetched = last_fetched;
        GroupedUrlDatum::new(
            datum,
            GroupingKey::Fetchable {
                domain: "test.local".to_string(),
                crawl_delay_ms: 1000,
            },
        )
    }

    #[test]
    fn test_never_fetched_scores_max() {
        let scorer = LastFetchScoreGenerator::new(1_000_000, 10_000);
        assert_eq!(scorer.score(&grouped(0)), 1.0);
    }

    #[test]
    fn test_score_grows_with_age() {
        let scorer = LastFetchScoreGenerator::new(1_000_000, 10_000);

        let recent = scorer.score(&grouped(999_000));
        let old = scorer.score(&grouped(995_000));
        assert!(recent < old);
        assert!((recent - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_score_saturates() {
        let scorer = LastFetchScoreGenerator::new(1_000_000, 10_000);
        assert_eq!(scorer.score(&grouped(100)), 1.0);
    }

    #[test]
    fn test_fixed_skip() {
        let scorer = FixedScoreGenerator::new(SKIP_SCORE);
        assert!(scorer.score(&grouped(0)) < 0.0);
    }
}
