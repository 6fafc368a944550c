//! Shared domain types
//!
//! Catalog items, style categories, quiz responses and the learning records
//! derived from them. Closed enumerations are parsed through `FromStr` so an
//! unknown tag is rejected at the boundary instead of being stored.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};

/// Lowercase words separated by single spaces, hyphens or underscores.
static FEATURE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[ _\-][a-z0-9]+)*$").expect("feature name pattern is valid")
});

/// Normalize a feature tag (trim, lowercase, collapse whitespace) and reject
/// anything that is not a short descriptive tag.
pub fn normalize_feature(raw: &str) -> EngineResult<String> {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if collapsed.is_empty() {
        return Err(EngineError::validation("feature name must not be empty"));
    }
    if collapsed.len() > 100 {
        return Err(EngineError::validation(format!(
            "feature name too long ({} chars): {}",
            collapsed.len(),
            collapsed
        )));
    }
    if !FEATURE_NAME.is_match(&collapsed) {
        return Err(EngineError::validation(format!(
            "invalid feature name: {:?}",
            raw
        )));
    }
    Ok(collapsed)
}

/// Normalize every tag in a list, dropping duplicates but keeping first-seen order.
pub fn normalize_features<S: AsRef<str>>(raw: &[S]) -> EngineResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for feature in raw {
        let normalized = normalize_feature(feature.as_ref())?;
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    Ok(out)
}

/// The instant `days` before now. Out-of-range lookbacks are a validation error.
pub fn days_before_now(days: i64, field: &str) -> EngineResult<DateTime<Utc>> {
    chrono::Duration::try_days(days)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| EngineError::validation(format!("{} of {} days is out of range", field, days)))
}

/// Check a 1-5 rating.
pub fn validate_rating(rating: u8, field: &str) -> EngineResult<u8> {
    if (1..=5).contains(&rating) {
        Ok(rating)
    } else {
        Err(EngineError::validation(format!(
            "{} must be between 1 and 5, got {}",
            field, rating
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
        }
    }
}

impl FromStr for Gender {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "female" => Ok(Gender::Female),
            "male" => Ok(Gender::Male),
            other => Err(EngineError::validation(format!("unknown gender: {}", other))),
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A clothing role presented by the quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Top,
    Bottom,
    Shoes,
    Layering,
    Accessory,
    CompleteOutfit,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::Top,
        Slot::Bottom,
        Slot::Shoes,
        Slot::Layering,
        Slot::Accessory,
        Slot::CompleteOutfit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Top => "top",
            Slot::Bottom => "bottom",
            Slot::Shoes => "shoes",
            Slot::Layering => "layering",
            Slot::Accessory => "accessory",
            Slot::CompleteOutfit => "complete_outfit",
        }
    }
}

impl FromStr for Slot {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::ALL
            .iter()
            .copied()
            .find(|slot| slot.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| EngineError::validation(format!("unknown slot: {}", s)))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog item that can be selected in the quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothingItem {
    pub id: String,
    pub name: String,
    pub gender: Gender,
    pub slot: Slot,
    pub image_url: Option<String>,
    /// Curated feature tags
    pub features: Vec<String>,
    /// Tags added by vision extraction or accepted suggestions
    pub auto_extracted_features: Vec<String>,
    pub feature_confidence_scores: BTreeMap<String, f64>,
    pub selection_count: u32,
    pub satisfaction_score: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ClothingItem {
    pub fn new<S: AsRef<str>>(
        name: &str,
        gender: Gender,
        slot: Slot,
        features: &[S],
    ) -> EngineResult<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            gender,
            slot,
            image_url: None,
            features: normalize_features(features)?,
            auto_extracted_features: Vec::new(),
            feature_confidence_scores: BTreeMap::new(),
            selection_count: 0,
            satisfaction_score: None,
            is_active: true,
            created_at: Utc::now(),
        })
    }

    pub fn with_image_url(mut self, url: &str) -> Self {
        self.image_url = Some(url.to_string());
        self
    }

    /// Manual and auto-extracted features together.
    pub fn combined_features(&self) -> BTreeSet<String> {
        self.features
            .iter()
            .chain(self.auto_extracted_features.iter())
            .cloned()
            .collect()
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
            || self.auto_extracted_features.iter().any(|f| f == feature)
    }

    /// Add to the auto-extracted set. Returns false if it was already there.
    pub fn add_auto_feature(&mut self, feature: &str, confidence: Option<f64>) -> bool {
        if let Some(confidence) = confidence {
            let entry = self
                .feature_confidence_scores
                .entry(feature.to_string())
                .or_insert(confidence);
            *entry = entry.max(confidence);
        }
        if self.auto_extracted_features.iter().any(|f| f == feature) {
            return false;
        }
        self.auto_extracted_features.push(feature.to_string());
        true
    }

    pub fn needs_extraction(&self) -> bool {
        self.is_active && self.auto_extracted_features.is_empty()
    }

    /// Fold a new rating into the running average, weighted by selection count.
    pub fn update_satisfaction_score(&mut self, rating: u8) {
        let rating = rating as f64;
        self.satisfaction_score = Some(match self.satisfaction_score {
            None => rating,
            Some(old_avg) => {
                let n = self.selection_count.max(1) as f64;
                (old_avg * (n - 1.0) + rating) / n
            }
        });
    }
}

/// A style category and its signature features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleCategory {
    pub id: String,
    pub name: String,
    pub gender: Gender,
    pub features: Vec<String>,
    pub ai_theme_prompt: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
}

impl StyleCategory {
    pub fn new<S: AsRef<str>>(name: &str, gender: Gender, features: &[S]) -> EngineResult<Self> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("style category name must not be empty"));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            gender,
            features: normalize_features(features)?,
            ai_theme_prompt: None,
            description: None,
            is_active: true,
        })
    }

    pub fn feature_set(&self) -> BTreeSet<String> {
        self.features.iter().cloned().collect()
    }
}

/// One quiz submission and its computed assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResponse {
    pub id: String,
    pub user_id: String,
    pub gender: Gender,
    /// Selected item id per slot; absent slots were skipped.
    pub selections: BTreeMap<Slot, String>,
    pub calculated_scores: BTreeMap<String, f64>,
    pub assigned_category: String,
    /// Hybrid set, best first; the first entry is the assigned category.
    pub hybrid_categories: Vec<String>,
    pub confidence_score: f64,
    pub satisfaction_rating: Option<u8>,
    pub feedback_text: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl QuizResponse {
    pub fn secondary_category(&self) -> Option<&str> {
        self.hybrid_categories.get(1).map(|s| s.as_str())
    }

    pub fn selected_item_ids(&self) -> impl Iterator<Item = &String> {
        self.selections.values()
    }
}

/// Where a feature suggestion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    Manual,
    CvAuto,
    UserSuggested,
    AlgorithmDiscovered,
}

impl FeatureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureSource::Manual => "manual",
            FeatureSource::CvAuto => "cv_auto",
            FeatureSource::UserSuggested => "user_suggested",
            FeatureSource::AlgorithmDiscovered => "algorithm_discovered",
        }
    }
}

impl FromStr for FeatureSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" => Ok(FeatureSource::Manual),
            "cv_auto" => Ok(FeatureSource::CvAuto),
            "user_suggested" => Ok(FeatureSource::UserSuggested),
            "algorithm_discovered" => Ok(FeatureSource::AlgorithmDiscovered),
            other => Err(EngineError::validation(format!("unknown feature source: {}", other))),
        }
    }
}

impl std::fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance and review counters for one suggested feature on one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLearningData {
    pub id: String,
    pub feature_name: String,
    pub item_id: String,
    pub source: FeatureSource,
    pub confidence_score: f64,
    pub validation_count: u32,
    pub rejection_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureLearningData {
    pub fn new(feature_name: &str, item_id: &str, source: FeatureSource, confidence: f64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            feature_name: feature_name.to_string(),
            item_id: item_id.to_string(),
            source,
            confidence_score: confidence,
            validation_count: 0,
            rejection_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_reviews(&self) -> u32 {
        self.validation_count + self.rejection_count
    }

    pub fn validation_ratio(&self) -> f64 {
        match self.total_reviews() {
            0 => 0.0,
            total => self.validation_count as f64 / total as f64,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.total_reviews() == 0
    }
}

/// Order a feature pair canonically so (a, b) and (b, a) share one record.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Co-occurrence statistics for an unordered feature pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCorrelation {
    pub feature_a: String,
    pub feature_b: String,
    pub co_occurrence_count: u32,
    pub total_occurrences: u32,
    pub correlation_strength: f64,
    pub updated_at: DateTime<Utc>,
}

impl FeatureCorrelation {
    pub fn new(a: &str, b: &str, co_occurrence_count: u32, total_occurrences: u32) -> Self {
        let (feature_a, feature_b) = canonical_pair(a, b);
        let total_occurrences = total_occurrences.max(co_occurrence_count);
        let mut correlation = Self {
            feature_a: feature_a.to_string(),
            feature_b: feature_b.to_string(),
            co_occurrence_count,
            total_occurrences,
            correlation_strength: 0.0,
            updated_at: Utc::now(),
        };
        correlation.correlation_strength = correlation.co_occurrence_rate().min(1.0);
        correlation
    }

    pub fn co_occurrence_rate(&self) -> f64 {
        match self.total_occurrences {
            0 => 0.0,
            total => self.co_occurrence_count as f64 / total as f64,
        }
    }

    pub fn involves(&self, feature: &str) -> bool {
        self.feature_a == feature || self.feature_b == feature
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    TooBroad,
    TooNarrow,
    CompletelyWrong,
    MostlyRight,
    Perfect,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::TooBroad => "too_broad",
            FeedbackType::TooNarrow => "too_narrow",
            FeedbackType::CompletelyWrong => "completely_wrong",
            FeedbackType::MostlyRight => "mostly_right",
            FeedbackType::Perfect => "perfect",
        }
    }
}

impl FromStr for FeedbackType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "too_broad" => Ok(FeedbackType::TooBroad),
            "too_narrow" => Ok(FeedbackType::TooNarrow),
            "completely_wrong" => Ok(FeedbackType::CompletelyWrong),
            "mostly_right" => Ok(FeedbackType::MostlyRight),
            "perfect" => Ok(FeedbackType::Perfect),
            other => Err(EngineError::validation(format!("unknown feedback type: {}", other))),
        }
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's verdict on their style assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleAssignmentFeedback {
    pub id: String,
    pub quiz_response_id: String,
    pub user_id: String,
    pub accuracy_rating: u8,
    pub feedback_type: FeedbackType,
    pub preferred_style: Option<String>,
    pub feedback_text: Option<String>,
    /// item id -> feature -> was the feature accurate
    pub feature_feedback: BTreeMap<String, BTreeMap<String, bool>>,
    pub created_at: DateTime<Utc>,
}

/// An item a user added to their own closet after taking the quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUpload {
    pub id: String,
    pub user_id: String,
    pub category: String,
    pub color: Option<String>,
    pub tags: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl UserUpload {
    pub fn new(user_id: &str, category: &str, color: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            category: category.to_string(),
            color: color.map(|c| c.to_string()),
            tags: Vec::new(),
            uploaded_at: Utc::now(),
        }
    }

    /// Lowercased category, color and tags.
    pub fn descriptors(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if !self.category.trim().is_empty() {
            out.insert(self.category.trim().to_lowercase());
        }
        if let Some(color) = &self.color {
            if !color.trim().is_empty() {
                out.insert(color.trim().to_lowercase());
            }
        }
        out.extend(
            self.tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
        out
    }
}
