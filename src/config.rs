//! Configuration management
//!
//! Every empirical threshold the engines use lives here so it can be tuned
//! from `config.toml` without a rebuild.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Slot;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Per-slot weights used when aggregating match scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotWeights {
    #[serde(default = "default_top_weight")]
    pub top: f64,
    #[serde(default = "default_bottom_weight")]
    pub bottom: f64,
    #[serde(default = "default_shoes_weight")]
    pub shoes: f64,
    #[serde(default = "default_layering_weight")]
    pub layering: f64,
    #[serde(default = "default_accessory_weight")]
    pub accessory: f64,
    #[serde(default = "default_complete_outfit_weight")]
    pub complete_outfit: f64,
}

fn default_top_weight() -> f64 {
    0.20
}

fn default_bottom_weight() -> f64 {
    0.20
}

fn default_shoes_weight() -> f64 {
    0.15
}

fn default_layering_weight() -> f64 {
    0.10
}

fn default_accessory_weight() -> f64 {
    0.05
}

fn default_complete_outfit_weight() -> f64 {
    0.40
}

impl Default for SlotWeights {
    fn default() -> Self {
        Self {
            top: default_top_weight(),
            bottom: default_bottom_weight(),
            shoes: default_shoes_weight(),
            layering: default_layering_weight(),
            accessory: default_accessory_weight(),
            complete_outfit: default_complete_outfit_weight(),
        }
    }
}

impl SlotWeights {
    pub fn get(&self, slot: Slot) -> f64 {
        match slot {
            Slot::Top => self.top,
            Slot::Bottom => self.bottom,
            Slot::Shoes => self.shoes,
            Slot::Layering => self.layering,
            Slot::Accessory => self.accessory,
            Slot::CompleteOutfit => self.complete_outfit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: SlotWeights,
    /// Max distance from the best score for a category to count as hybrid
    #[serde(default = "default_hybrid_threshold")]
    pub hybrid_threshold: f64,
    /// Hybrid categories must score strictly above this
    #[serde(default = "default_hybrid_floor")]
    pub hybrid_floor: f64,
    #[serde(default = "default_booster")]
    pub complete_outfit_booster: f64,
    #[serde(default = "default_booster_min_score")]
    pub booster_min_score: f64,
}

fn default_hybrid_threshold() -> f64 {
    15.0
}

fn default_hybrid_floor() -> f64 {
    30.0
}

fn default_booster() -> f64 {
    1.2
}

fn default_booster_min_score() -> f64 {
    60.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: SlotWeights::default(),
            hybrid_threshold: default_hybrid_threshold(),
            hybrid_floor: default_hybrid_floor(),
            complete_outfit_booster: default_booster(),
            booster_min_score: default_booster_min_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_min_support")]
    pub min_support: f64,
    #[serde(default = "default_max_pattern_size")]
    pub max_pattern_size: usize,
    #[serde(default = "default_min_confidence_threshold")]
    pub min_confidence_threshold: f64,
    #[serde(default = "default_min_validation_count")]
    pub min_validation_count: u32,
    #[serde(default = "default_pending_staleness_days")]
    pub pending_staleness_days: i64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Items processed by the extraction stage of one cycle
    #[serde(default = "default_extraction_batch_limit")]
    pub extraction_batch_limit: usize,
    /// Correlations above this count as strong in metrics
    #[serde(default = "default_strong_correlation")]
    pub strong_correlation: f64,
}

fn default_min_support() -> f64 {
    0.1
}

fn default_max_pattern_size() -> usize {
    3
}

fn default_min_confidence_threshold() -> f64 {
    0.6
}

fn default_min_validation_count() -> u32 {
    3
}

fn default_pending_staleness_days() -> i64 {
    7
}

fn default_retention_days() -> i64 {
    90
}

fn default_extraction_batch_limit() -> usize {
    50
}

fn default_strong_correlation() -> f64 {
    0.7
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            max_pattern_size: default_max_pattern_size(),
            min_confidence_threshold: default_min_confidence_threshold(),
            min_validation_count: default_min_validation_count(),
            pending_staleness_days: default_pending_staleness_days(),
            retention_days: default_retention_days(),
            extraction_batch_limit: default_extraction_batch_limit(),
            strong_correlation: default_strong_correlation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,
    /// Lookback used for drift when recommendations are generated
    #[serde(default = "default_drift_window_days")]
    pub drift_window_days: i64,
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
    #[serde(default = "default_min_drift_responses")]
    pub min_drift_responses: usize,
    #[serde(default = "default_min_window_days")]
    pub min_window_days: i64,
    #[serde(default = "default_target_windows")]
    pub target_windows: i64,
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    #[serde(default = "default_sudden_drop_delta")]
    pub sudden_drop_delta: f64,
    #[serde(default = "default_min_uploads_per_user")]
    pub min_uploads_per_user: usize,
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_min_validation_rate")]
    pub min_validation_rate: f64,
    #[serde(default = "default_max_low_confidence_rate")]
    pub max_low_confidence_rate: f64,
    /// A user's uploads are consistent with their style at or above this
    #[serde(default = "default_high_consistency")]
    pub high_consistency: f64,
    #[serde(default = "default_high_alignment")]
    pub high_alignment: f64,
    /// Categories whose high-accuracy rate falls below this get a recommendation
    #[serde(default = "default_min_high_accuracy_rate")]
    pub min_high_accuracy_rate: f64,
    #[serde(default = "default_min_high_alignment_rate")]
    pub min_high_alignment_rate: f64,
}

fn default_window_days() -> i64 {
    30
}

fn default_drift_window_days() -> i64 {
    60
}

fn default_min_data_points() -> usize {
    5
}

fn default_min_drift_responses() -> usize {
    10
}

fn default_min_window_days() -> i64 {
    7
}

fn default_target_windows() -> i64 {
    10
}

fn default_trend_threshold() -> f64 {
    0.1
}

fn default_sudden_drop_delta() -> f64 {
    0.5
}

fn default_min_uploads_per_user() -> usize {
    3
}

fn default_low_confidence_threshold() -> f64 {
    0.5
}

fn default_min_validation_rate() -> f64 {
    0.3
}

fn default_max_low_confidence_rate() -> f64 {
    0.4
}

fn default_high_consistency() -> f64 {
    0.7
}

fn default_high_alignment() -> f64 {
    0.6
}

fn default_min_high_accuracy_rate() -> f64 {
    0.6
}

fn default_min_high_alignment_rate() -> f64 {
    0.5
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            drift_window_days: default_drift_window_days(),
            min_data_points: default_min_data_points(),
            min_drift_responses: default_min_drift_responses(),
            min_window_days: default_min_window_days(),
            target_windows: default_target_windows(),
            trend_threshold: default_trend_threshold(),
            sudden_drop_delta: default_sudden_drop_delta(),
            min_uploads_per_user: default_min_uploads_per_user(),
            low_confidence_threshold: default_low_confidence_threshold(),
            min_validation_rate: default_min_validation_rate(),
            max_low_confidence_rate: default_max_low_confidence_rate(),
            high_consistency: default_high_consistency(),
            high_alignment: default_high_alignment(),
            min_high_accuracy_rate: default_min_high_accuracy_rate(),
            min_high_alignment_rate: default_min_high_alignment_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Base URL of the vision/embedding service; extraction is skipped when unset
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_vision_timeout() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_vision_timeout(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cron expression (with seconds field)
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Fixed interval; takes precedence over `cron` when set
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_cron() -> String {
    "0 0 2 * * *".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Database file; defaults to `style-learning.db` in the data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("style-learning.db")),
        }
    }
}

impl Config {
    /// Load configuration from the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "style-learning", "style-learning")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "style-learning", "style-learning")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let weights = SlotWeights::default();
        assert_eq!(weights.get(Slot::CompleteOutfit), 0.40);
        assert_eq!(weights.get(Slot::Accessory), 0.05);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [learning]
            min_support = 0.25

            [scoring.weights]
            top = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.learning.min_support, 0.25);
        assert_eq!(config.learning.retention_days, 90);
        assert_eq!(config.scoring.weights.top, 0.5);
        assert_eq!(config.scoring.weights.bottom, 0.20);
        assert_eq!(config.scheduler.cron, "0 0 2 * * *");
    }

    #[test]
    fn test_load_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.analysis.min_drift_responses, 10);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.vision.timeout_secs, 30);
    }
}
