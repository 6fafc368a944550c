//! Frequent feature-group mining
//!
//! Level-wise (apriori) search over item feature sets: a group of size k is
//! only counted if every k-1 subset was frequent.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, EngineResult};

/// A feature group that appears together often enough to matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePattern {
    /// Sorted, distinct feature names
    pub features: Vec<String>,
    pub item_count: usize,
    pub support: f64,
}

/// A feature an item is probably missing, inferred from a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSuggestion {
    pub item_id: String,
    pub feature: String,
    /// count(pattern) / count(pattern without `feature`)
    pub confidence: f64,
}

fn count_containing(items: &[BTreeSet<String>], group: &BTreeSet<String>) -> usize {
    items.iter().filter(|features| group.is_subset(features)).count()
}

/// Mine every feature group of size 2..=`max_size` whose support reaches `min_support`.
///
/// Sorted by support descending, then larger groups first, then lexicographically.
pub fn discover_patterns(
    items: &[BTreeSet<String>],
    min_support: f64,
    max_size: usize,
) -> EngineResult<Vec<FeaturePattern>> {
    if !(min_support > 0.0 && min_support <= 1.0) {
        return Err(EngineError::validation(format!(
            "min_support must be in (0, 1], got {}",
            min_support
        )));
    }
    if max_size < 2 {
        return Err(EngineError::validation(format!(
            "max pattern size must be at least 2, got {}",
            max_size
        )));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let total = items.len() as f64;
    let is_frequent = |count: usize| count as f64 / total >= min_support;

    let mut singles: BTreeMap<&str, usize> = BTreeMap::new();
    for features in items {
        for feature in features {
            *singles.entry(feature.as_str()).or_default() += 1;
        }
    }
    let mut frequent: BTreeSet<BTreeSet<String>> = singles
        .into_iter()
        .filter(|(_, count)| is_frequent(*count))
        .map(|(feature, _)| BTreeSet::from([feature.to_string()]))
        .collect();

    let mut patterns = Vec::new();
    for size in 2..=max_size {
        let previous: Vec<&BTreeSet<String>> = frequent.iter().collect();
        let mut candidates: BTreeSet<BTreeSet<String>> = BTreeSet::new();
        for (i, a) in previous.iter().enumerate() {
            for b in &previous[i + 1..] {
                let union: BTreeSet<String> = a.union(b).cloned().collect();
                if union.len() != size {
                    continue;
                }
                let all_subsets_frequent = union.iter().all(|skip| {
                    let subset: BTreeSet<String> =
                        union.iter().filter(|f| *f != skip).cloned().collect();
                    frequent.contains(&subset)
                });
                if all_subsets_frequent {
                    candidates.insert(union);
                }
            }
        }

        let mut next = BTreeSet::new();
        for candidate in candidates {
            let count = count_containing(items, &candidate);
            if is_frequent(count) {
                patterns.push(FeaturePattern {
                    features: candidate.iter().cloned().collect(),
                    item_count: count,
                    support: count as f64 / total,
                });
                next.insert(candidate);
            }
        }
        if next.is_empty() {
            break;
        }
        frequent = next;
    }

    patterns.sort_by(|a, b| {
        b.support
            .total_cmp(&a.support)
            .then_with(|| b.features.len().cmp(&a.features.len()))
            .then_with(|| a.features.cmp(&b.features))
    });
    Ok(patterns)
}

/// Suggest the missing feature for items that carry all but one feature of a
/// pattern, when the implied rule is confident enough.
pub fn pattern_suggestions(
    items: &[(String, BTreeSet<String>)],
    patterns: &[FeaturePattern],
    min_confidence: f64,
) -> Vec<PatternSuggestion> {
    let feature_sets: Vec<BTreeSet<String>> = items.iter().map(|(_, f)| f.clone()).collect();
    let mut best: BTreeMap<(String, String), f64> = BTreeMap::new();

    for pattern in patterns {
        let group: BTreeSet<String> = pattern.features.iter().cloned().collect();
        let pattern_count = count_containing(&feature_sets, &group);

        for consequent in &pattern.features {
            let antecedent: BTreeSet<String> =
                group.iter().filter(|f| *f != consequent).cloned().collect();
            let antecedent_count = count_containing(&feature_sets, &antecedent);
            if antecedent_count == 0 {
                continue;
            }
            let confidence = pattern_count as f64 / antecedent_count as f64;
            if confidence < min_confidence {
                continue;
            }

            for (item_id, features) in items {
                if antecedent.is_subset(features) && !features.contains(consequent) {
                    let entry = best
                        .entry((item_id.clone(), consequent.clone()))
                        .or_insert(confidence);
                    *entry = entry.max(confidence);
                }
            }
        }
    }

    best.into_iter()
        .map(|((item_id, feature), confidence)| PatternSuggestion {
            item_id,
            feature,
            confidence,
        })
        .collect()
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
    fn test_discover_pairs_and_triples() {
        let data = items(&[
            &["casual", "cotton", "relaxed"],
            &["casual", "cotton", "relaxed"],
            &["casual", "cotton"],
            &["formal", "silk"],
        ]);
        let patterns = discover_patterns(&data, 0.5, 3).unwrap();

        assert_eq!(patterns[0].features, vec!["casual", "cotton"]);
        assert_eq!(patterns[0].support, 0.75);
        assert!(patterns
            .iter()
            .any(|p| p.features == vec!["casual", "cotton", "relaxed"] && p.support == 0.5));
        assert!(patterns.iter().all(|p| p.support >= 0.5));
        assert!(patterns.iter().all(|p| !p.features.contains(&"silk".to_string())));
    }

    #[test]
    fn test_ties_prefer_larger_groups() {
        let data = items(&[&["a", "b", "c"], &["a", "b", "c"]]);
        let patterns = discover_patterns(&data, 1.0, 3).unwrap();
        assert_eq!(patterns[0].features.len(), 3);
        assert_eq!(patterns.len(), 4);
    }

    #[test]
    fn test_invalid_support_rejected() {
        assert!(discover_patterns(&[], 0.0, 3).is_err());
        assert!(discover_patterns(&[], 1.5, 3).is_err());
        assert!(discover_patterns(&[], 0.5, 1).is_err());
        assert!(discover_patterns(&[], 0.5, 3).unwrap().is_empty());
    }

    #[test]
    fn test_pattern_suggestions() {
        let named: Vec<(String, BTreeSet<String>)> = vec![
            ("i1".into(), ["casual", "cotton"].iter().map(|s| s.to_string()).collect()),
            ("i2".into(), ["casual", "cotton"].iter().map(|s| s.to_string()).collect()),
            ("i3".into(), ["casual", "cotton"].iter().map(|s| s.to_string()).collect()),
            ("i4".into(), ["casual"].iter().map(|s| s.to_string()).collect()),
        ];
        let sets: Vec<BTreeSet<String>> = named.iter().map(|(_, f)| f.clone()).collect();
        let patterns = discover_patterns(&sets, 0.5, 2).unwrap();

        let suggestions = pattern_suggestions(&named, &patterns, 0.6);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].item_id, "i4");
        assert_eq!(suggestions[0].feature, "cotton");
        assert!((suggestions[0].confidence - 0.75).abs() < 1e-9);

        assert!(pattern_suggestions(&named, &patterns, 0.8).is_empty());
    }
}
