//! Style scoring, confidence and hybrid detection
//!
//! All functions here are pure: they take items and categories as loaded and
//! never touch storage.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ScoringConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{ClothingItem, Slot, StyleCategory};

/// Category name -> score in [0, 100]
pub type StyleScores = BTreeMap<String, f64>;

/// Percentage of the candidate's features that belong to the category signature.
pub fn calculate_match_score(
    category_features: &BTreeSet<String>,
    candidate_features: &BTreeSet<String>,
) -> f64 {
    if category_features.is_empty() || candidate_features.is_empty() {
        return 0.0;
    }
    let matches = candidate_features.intersection(category_features).count();
    matches as f64 / candidate_features.len() as f64 * 100.0
}

/// Categories close enough to the best score to count as a hybrid, best first.
///
/// The top category is always included; others must lie within `threshold`
/// of the maximum and strictly above `floor`.
pub fn hybrid_detection(scores: &StyleScores, threshold: f64, floor: f64) -> Vec<(String, f64)> {
    let ranked = ranked(scores);
    let Some(max_score) = ranked.first().map(|(_, score)| *score) else {
        return Vec::new();
    };

    ranked
        .into_iter()
        .enumerate()
        .filter(|(index, (_, score))| {
            *index == 0 || (max_score - score <= threshold && *score > floor)
        })
        .map(|(_, entry)| entry)
        .collect()
}

/// Scores sorted descending, ties broken by name.
fn ranked(scores: &StyleScores) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = scores.iter().map(|(n, s)| (n.clone(), *s)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Result of scoring one set of selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleAssignment {
    pub scores: StyleScores,
    pub primary: String,
    pub hybrids: Vec<(String, f64)>,
    pub confidence: f64,
    pub message: String,
}

impl StyleAssignment {
    pub fn secondary(&self) -> Option<&str> {
        self.hybrids.get(1).map(|(name, _)| name.as_str())
    }

    pub fn hybrid_names(&self) -> Vec<String> {
        self.hybrids.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Scoring with configured weights and thresholds
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    config: ScoringConfig,
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ScoreEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Weighted average of per-slot match scores for every category.
    ///
    /// Slots without a selection, or whose item has no features, are left out
    /// of both numerator and denominator.
    pub fn calculate_style_scores(
        &self,
        selections: &BTreeMap<Slot, &ClothingItem>,
        categories: &[StyleCategory],
    ) -> StyleScores {
        let candidates: Vec<(f64, BTreeSet<String>)> = selections
            .iter()
            .map(|(slot, item)| (self.config.weights.get(*slot), item.combined_features()))
            .filter(|(_, features)| !features.is_empty())
            .collect();

        categories
            .iter()
            .map(|category| {
                let signature = category.feature_set();
                let mut weighted = 0.0;
                let mut weight_used = 0.0;
                for (weight, features) in &candidates {
                    weighted += weight * calculate_match_score(&signature, features);
                    weight_used += weight;
                }
                let score = if weight_used > 0.0 {
                    weighted / weight_used
                } else {
                    0.0
                };
                (category.name.clone(), score)
            })
            .collect()
    }

    /// How far ahead the best category is of the runner-up, as a percentage.
    pub fn confidence_score(&self, scores: &StyleScores, complete_outfit_selected: bool) -> f64 {
        let mut non_zero: Vec<f64> = scores.values().copied().filter(|s| *s > 0.0).collect();
        if non_zero.len() < 2 {
            return 0.0;
        }
        non_zero.sort_by(|a, b| b.total_cmp(a));
        let best = non_zero[0];
        let gap = best - non_zero[1];

        let mut confidence = (gap / best).min(1.0) * 100.0;
        if complete_outfit_selected && best > self.config.booster_min_score {
            confidence = (confidence * self.config.complete_outfit_booster).min(100.0);
        }
        confidence
    }

    pub fn hybrid_detection(&self, scores: &StyleScores) -> Vec<(String, f64)> {
        hybrid_detection(scores, self.config.hybrid_threshold, self.config.hybrid_floor)
    }

    /// Score, rank and describe one set of selections.
    pub fn assign_style(
        &self,
        selections: &BTreeMap<Slot, &ClothingItem>,
        categories: &[StyleCategory],
    ) -> EngineResult<StyleAssignment> {
        if categories.is_empty() {
            return Err(EngineError::insufficient("no style categories to score against"));
        }

        let scores = self.calculate_style_scores(selections, categories);
        let hybrids = self.hybrid_detection(&scores);
        let primary = hybrids
            .first()
            .map(|(name, _)| name.clone())
            .ok_or_else(|| EngineError::insufficient("no category scores produced"))?;
        let confidence =
            self.confidence_score(&scores, selections.contains_key(&Slot::CompleteOutfit));

        let message = match hybrids.get(1) {
            Some((secondary, _)) => format!("{} with a hint of {}", primary, secondary),
            None => format!("Pure {}", primary),
        };

        Ok(StyleAssignment {
            scores,
            primary,
            hybrids,
            confidence,
            message,
        })
    }
}
