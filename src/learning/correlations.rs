//! Pairwise feature co-occurrence mining

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::FeatureCorrelation;

/// Correlation plus the association measures derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationInsight {
    pub feature_a: String,
    pub feature_b: String,
    pub co_occurrence_count: u32,
    pub total_occurrences: u32,
    pub strength: f64,
    /// P(a and b) / (P(a) * P(b))
    pub lift: f64,
    /// P(b | a)
    pub confidence_a_to_b: f64,
    /// P(a | b)
    pub confidence_b_to_a: f64,
}

/// Result of one mining pass over an item snapshot.
#[derive(Debug, Clone, Default)]
pub struct CorrelationPass {
    pub correlations: Vec<FeatureCorrelation>,
    pub insights: Vec<CorrelationInsight>,
    pub items_analyzed: usize,
}

/// Count co-occurrence for every pair of features seen together at least once.
///
/// For a pair (a, b): co = items with both, total = items with either.
pub fn mine_correlations(items: &[BTreeSet<String>]) -> CorrelationPass {
    let mut per_feature: BTreeMap<&str, u32> = BTreeMap::new();
    let mut together: BTreeMap<(&str, &str), u32> = BTreeMap::new();

    for features in items {
        let features: Vec<&str> = features.iter().map(|f| f.as_str()).collect();
        for (i, a) in features.iter().enumerate() {
            *per_feature.entry(*a).or_default() += 1;
            // BTreeSet iteration is sorted, so (a, b) is already canonical.
            for b in &features[i + 1..] {
                *together.entry((*a, *b)).or_default() += 1;
            }
        }
    }

    let n = items.len() as f64;
    let mut correlations = Vec::with_capacity(together.len());
    let mut insights = Vec::with_capacity(together.len());

    for ((a, b), co) in together {
        let count_a = per_feature.get(a).copied().unwrap_or(0);
        let count_b = per_feature.get(b).copied().unwrap_or(0);
        let total = count_a + count_b - co;

        let correlation = FeatureCorrelation::new(a, b, co, total);
        let lift = if count_a > 0 && count_b > 0 {
            (co as f64 * n) / (count_a as f64 * count_b as f64)
        } else {
            0.0
        };

        insights.push(CorrelationInsight {
            feature_a: correlation.feature_a.clone(),
            feature_b: correlation.feature_b.clone(),
            co_occurrence_count: co,
            total_occurrences: correlation.total_occurrences,
            strength: correlation.correlation_strength,
            lift,
            confidence_a_to_b: ratio(co, count_a),
            confidence_b_to_a: ratio(co, count_b),
        });
        correlations.push(correlation);
    }

    insights.sort_by(|x, y| {
        y.strength
            .total_cmp(&x.strength)
            .then_with(|| x.feature_a.cmp(&y.feature_a))
            .then_with(|| x.feature_b.cmp(&y.feature_b))
    });

    CorrelationPass {
        correlations,
        insights,
        items_analyzed: items.len(),
    }
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(sets: &[&[&str]]) -> Vec<BTreeSet<String>> {
        sets.iter()
            .map(|s| s.iter().map(|f| f.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_casual_cotton() {
        let data = items(&[
            &["casual", "cotton"],
            &["casual", "cotton"],
            &["casual", "cotton"],
            &["casual", "cotton"],
            &["casual"],
        ]);
        let pass = mine_correlations(&data);
        assert_eq!(pass.correlations.len(), 1);

        let c = &pass.correlations[0];
        assert_eq!((c.feature_a.as_str(), c.feature_b.as_str()), ("casual", "cotton"));
        assert_eq!(c.co_occurrence_count, 4);
        assert_eq!(c.total_occurrences, 5);
        assert!((c.co_occurrence_rate() - 0.8).abs() < 1e-9);

        let insight = &pass.insights[0];
        assert!((insight.confidence_a_to_b - 0.8).abs() < 1e-9);
        assert!((insight.confidence_b_to_a - 1.0).abs() < 1e-9);
        assert!((insight.lift - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pairs_never_together_not_stored() {
        let data = items(&[&["boho"], &["grunge"]]);
        assert!(mine_correlations(&data).correlations.is_empty());
    }

    #[test]
    fn test_invariants_hold() {
        let data = items(&[&["a", "b", "c"], &["a", "c"], &["b"], &["a", "b"]]);
        for c in mine_correlations(&data).correlations {
            assert!(c.feature_a < c.feature_b);
            assert!(c.co_occurrence_count <= c.total_occurrences);
            assert!((0.0..=1.0).contains(&c.co_occurrence_rate()));
        }
    }
}
