//! Score aggregation for named risk and anomaly factors

use std::collections::BTreeMap;

/// Combines per-factor scores into a single score.
///
/// Factors are kept in a `BTreeMap` so sums are always taken in the same
/// order and results are bit-for-bit reproducible.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    /// Factor weights; factors not listed weigh nothing
    weights: BTreeMap<String, f64>,
}

impl ScoreAggregator {
    /// Create a new score aggregator with factor weights.
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            weights: weights
                .into_iter()
                .map(|(name, w)| (name.into(), w.max(0.0)))
                .collect(),
        }
    }

    pub fn weight(&self, factor: &str) -> f64 {
        self.weights.get(factor).copied().unwrap_or(0.0)
    }

    /// Weighted average of the factor scores, clamped to [0, 1].
    ///
    /// Returns `None` when no factor carries weight.
    pub fn aggregate(&self, scores: &BTreeMap<String, f64>) -> Option<f64> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (factor, &score) in scores {
            let weight = self.weight(factor);
            weighted_sum += score * weight;
            total_weight += weight;
        }

        (total_weight > 0.0).then(|| (weighted_sum / total_weight).clamp(0.0, 1.0))
    }

    /// Share of the weighted average contributed by each factor.
    pub fn contributions(&self, scores: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let total_weight: f64 = scores.keys().map(|f| self.weight(f)).sum();
        scores
            .iter()
            .map(|(factor, &score)| {
                let share = if total_weight > 0.0 {
                    score * self.weight(factor) / total_weight
                } else {
                    0.0
                };
                (factor.clone(), share)
            })
            .collect()
    }

    /// Weighted score of each factor (`weight * score`, clamped to [0, 1]).
    pub fn weighted(&self, scores: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        scores
            .iter()
            .map(|(factor, &score)| {
                (factor.clone(), (score * self.weight(factor)).clamp(0.0, 1.0))
            })
            .collect()
    }

    /// Probability that at least one weighted factor fires, treating the
    /// factors as independent: `1 - prod(1 - w * s)`.
    pub fn noisy_or(&self, scores: &BTreeMap<String, f64>) -> f64 {
        let miss: f64 = self
            .weighted(scores)
            .values()
            .map(|&ws| 1.0 - ws)
            .product();
        (1.0 - miss).clamp(0.0, 1.0)
    }

    /// Factor with the highest weighted score; earliest name wins ties.
    pub fn dominant(&self, scores: &BTreeMap<String, f64>) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for (factor, ws) in self.weighted(scores) {
            if best.as_ref().map_or(true, |(_, b)| ws > *b) {
                best = Some((factor, ws));
            }
        }
        best
    }

    /// Number of factors whose weighted score reaches `threshold`.
    pub fn count_at_least(&self, scores: &BTreeMap<String, f64>, threshold: f64) -> usize {
        self.weighted(scores)
            .values()
            .filter(|&&ws| ws >= threshold)
            .count()
    }
}
