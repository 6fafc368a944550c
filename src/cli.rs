//! CLI interface for style-learning

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::BehavioralAnalyzer;
use crate::config::Config;
use crate::cycle::{CycleTrigger, ImprovementCycle};
use crate::learning::{FeatureLearningEngine, SatisfactionData};
use crate::scheduler::{CycleSchedule, CycleScheduler};
use crate::scoring::{QuizProcessor, ScoreEngine};
use crate::storage::SqliteStore;
use crate::types::{ClothingItem, FeatureSource, FeedbackType, Gender, Slot, StyleCategory, UserUpload};
use crate::vision::{HttpImageLoader, HttpVisionClient};

#[derive(Parser)]
#[command(name = "style-learning")]
#[command(about = "Style quiz scoring with continuous feature learning", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "STYLE_LEARNING_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, env = "STYLE_LEARNING_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the clothing catalog and style categories
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Score a quiz submission (selections as slot=item_id)
    Score {
        user: String,
        gender: Gender,
        #[arg(required = true)]
        selections: Vec<String>,
    },
    /// Record a user's feedback on their assignment
    Feedback {
        user: String,
        response_id: String,
        /// Accuracy rating 1-5
        #[arg(short, long)]
        accuracy: u8,
        /// too_broad, too_narrow, completely_wrong, mostly_right or perfect
        #[arg(short = 't', long = "type")]
        feedback_type: FeedbackType,
        /// Overall satisfaction rating 1-5
        #[arg(short, long)]
        overall: Option<u8>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        preferred_style: Option<String>,
    },
    /// Record a closet upload
    Upload {
        user: String,
        category: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Feature suggestions and validation
    Features {
        #[command(subcommand)]
        command: FeatureCommands,
    },
    /// Behavioral analyses
    Analyze {
        #[command(subcommand)]
        command: AnalyzeCommands,
    },
    /// Run the improvement cycle
    Cycle {
        #[command(subcommand)]
        command: CycleCommands,
    },
    /// Learning system health
    Metrics,
    /// Row counts per table
    Stats,
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Add a clothing item
    AddItem {
        name: String,
        gender: Gender,
        slot: Slot,
        #[arg(long, value_delimiter = ',')]
        features: Vec<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Add a style category
    AddCategory {
        name: String,
        gender: Gender,
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List items
    Items {
        #[arg(long)]
        all: bool,
    },
    /// List categories
    Categories {
        #[arg(long)]
        gender: Option<Gender>,
    },
    /// Activate or deactivate an item
    SetActive {
        id: String,
        #[arg(long)]
        inactive: bool,
    },
}

#[derive(Subcommand)]
enum FeatureCommands {
    /// Suggest a feature for an item
    Suggest {
        item_id: String,
        feature: String,
        #[arg(long, default_value = "0.5")]
        confidence: f64,
    },
    /// Accept or reject a suggestion
    Validate {
        id: String,
        #[arg(long)]
        reject: bool,
    },
    /// Run vision extraction for specific items
    Extract {
        #[arg(required = true)]
        item_ids: Vec<String>,
    },
    /// Discover frequent feature groups
    Patterns {
        #[arg(long)]
        min_support: Option<f64>,
    },
    /// Recompute feature correlations
    Mine,
    /// Correlations for one feature
    Correlations {
        feature: String,
        #[arg(long, default_value = "0.0")]
        min_strength: f64,
    },
}

#[derive(Subcommand)]
enum AnalyzeCommands {
    /// Assignment accuracy by category
    Accuracy {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Post-quiz upload consistency
    Uploads {
        #[arg(long)]
        user: Option<String>,
    },
    /// Performance drift over time
    Drift {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Learning data quality
    Quality,
    /// Ranked improvement recommendations
    Recommend,
}

#[derive(Subcommand)]
enum CycleCommands {
    /// Run one cycle now
    Run,
    /// Run cycles on the configured schedule until interrupted
    Schedule {
        /// Override the schedule with a fixed interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
}

/// Everything a command may need, built from one config
struct Engines {
    config: Config,
    store: SqliteStore,
    learning: Arc<FeatureLearningEngine>,
    analyzer: Arc<BehavioralAnalyzer>,
}

impl Engines {
    async fn open(config: Config, db: Option<PathBuf>) -> Result<Self> {
        let path = match db {
            Some(path) => path,
            None => config.storage.resolve_path()?,
        };
        let store = SqliteStore::open(&path)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        let mut learning =
            FeatureLearningEngine::new(store.clone(), config.learning.clone(), config.vision.clone());
        if let Some(client) = HttpVisionClient::from_config(&config.vision)? {
            let loader = HttpImageLoader::new(Duration::from_secs(config.vision.timeout_secs))?;
            learning = learning.with_vision(Arc::new(client), Arc::new(loader));
        }
        let analyzer = BehavioralAnalyzer::new(store.clone(), config.analysis.clone());

        Ok(Self {
            config,
            store,
            learning: Arc::new(learning),
            analyzer: Arc::new(analyzer),
        })
    }

    fn cycle(&self) -> Arc<ImprovementCycle> {
        Arc::new(ImprovementCycle::new(self.learning.clone(), self.analyzer.clone()))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_selections(raw: &[String]) -> Result<BTreeMap<Slot, String>> {
    let mut selections = BTreeMap::new();
    for pair in raw {
        let Some((slot, item)) = pair.split_once('=') else {
            bail!("Selection '{}' must look like slot=item_id", pair);
        };
        let slot: Slot = slot.parse()?;
        if selections.insert(slot, item.trim().to_string()).is_some() {
            bail!("Slot {} selected more than once", slot);
        }
    }
    Ok(selections)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
        return Ok(());
    }

    let engines = Engines::open(config, cli.db).await?;

    match cli.command {
        Commands::Catalog { command } => run_catalog(&engines, command).await?,
        Commands::Score { user, gender, selections } => {
            let selections = parse_selections(&selections)?;
            let processor = QuizProcessor::new(
                engines.store.clone(),
                ScoreEngine::new(engines.config.scoring.clone()),
            );
            let response = processor.process_quiz_submission(&user, gender, selections).await?;
            print_json(&response)?;
        }
        Commands::Feedback {
            user,
            response_id,
            accuracy,
            feedback_type,
            overall,
            text,
            preferred_style,
        } => {
            let mut data = SatisfactionData::new(accuracy, feedback_type);
            data.overall_rating = overall;
            data.feedback_text = text;
            data.preferred_style = preferred_style;
            let outcome = engines
                .learning
                .track_user_satisfaction(&user, &response_id, data)
                .await?;
            print_json(&outcome)?;
        }
        Commands::Upload { user, category, color, tags } => {
            let mut upload = UserUpload::new(&user, &category, color.as_deref());
            upload.tags = tags;
            engines.store.insert_upload(&upload).await?;
            println!("Recorded upload {}", upload.id);
        }
        Commands::Features { command } => run_features(&engines, command).await?,
        Commands::Analyze { command } => run_analyze(&engines, command).await?,
        Commands::Cycle { command } => run_cycle(&engines, command).await?,
        Commands::Metrics => {
            let metrics = engines.learning.learning_metrics().await?;
            print_json(&metrics)?;
        }
        Commands::Stats => {
            let stats = engines.store.stats().await?;
            println!("Store Statistics");
            println!("================");
            println!("Items: {} ({} active)", stats.items, stats.active_items);
            println!("Categories: {}", stats.categories);
            println!("Quiz responses: {}", stats.quiz_responses);
            println!("Learning records: {}", stats.learning_records);
            println!("Correlations: {}", stats.correlations);
            println!("Feedback: {}", stats.feedback);
            println!("Uploads: {}", stats.uploads);
        }
        Commands::Config => {}
    }

    Ok(())
}

async fn run_catalog(engines: &Engines, command: CatalogCommands) -> Result<()> {
    match command {
        CatalogCommands::AddItem {
            name,
            gender,
            slot,
            features,
            image_url,
        } => {
            let mut item = ClothingItem::new(&name, gender, slot, &features)?;
            if let Some(url) = image_url {
                item = item.with_image_url(&url);
            }
            engines.store.insert_item(&item).await?;
            println!("Added item {} ({})", item.id, item.name);
        }
        CatalogCommands::AddCategory {
            name,
            gender,
            features,
            prompt,
            description,
        } => {
            let mut category = StyleCategory::new(&name, gender, &features)?;
            category.ai_theme_prompt = prompt;
            category.description = description;
            engines.store.insert_category(&category).await?;
            println!("Added category {} ({})", category.id, category.name);
        }
        CatalogCommands::Items { all } => {
            let items = engines.store.list_items(!all).await?;
            print_json(&items)?;
        }
        CatalogCommands::Categories { gender } => {
            let categories = engines.store.list_categories(gender, true).await?;
            print_json(&categories)?;
        }
        CatalogCommands::SetActive { id, inactive } => {
            engines.store.set_item_active(&id, !inactive).await?;
            println!("Item {} is now {}", id, if inactive { "inactive" } else { "active" });
        }
    }
    Ok(())
}

async fn run_features(engines: &Engines, command: FeatureCommands) -> Result<()> {
    let learning = &engines.learning;
    match command {
        FeatureCommands::Suggest {
            item_id,
            feature,
            confidence,
        } => {
            let data = learning
                .add_feature_suggestion(&feature, &item_id, FeatureSource::UserSuggested, confidence)
                .await?;
            print_json(&data)?;
        }
        FeatureCommands::Validate { id, reject } => {
            let data = learning.validate_feature(&id, !reject).await?;
            print_json(&data)?;
        }
        FeatureCommands::Extract { item_ids } => {
            let report = learning.batch_extract_features(&item_ids).await?;
            print_json(&report)?;
        }
        FeatureCommands::Patterns { min_support } => {
            let min_support = min_support.unwrap_or(learning.config().min_support);
            let patterns = learning.discover_feature_patterns(min_support).await?;
            print_json(&patterns)?;
        }
        FeatureCommands::Mine => {
            let pass = learning.mine_feature_correlations().await?;
            print_json(&pass.insights)?;
        }
        FeatureCommands::Correlations { feature, min_strength } => {
            let correlations = learning.get_feature_correlations(&feature, min_strength).await?;
            print_json(&correlations)?;
        }
    }
    Ok(())
}

async fn run_analyze(engines: &Engines, command: AnalyzeCommands) -> Result<()> {
    let analyzer = &engines.analyzer;
    let defaults = analyzer.config();
    match command {
        AnalyzeCommands::Accuracy { days } => {
            let days = days.unwrap_or(defaults.default_window_days);
            print_json(&analyzer.analyze_style_assignment_accuracy(days).await?)?;
        }
        AnalyzeCommands::Uploads { user } => {
            print_json(&analyzer.analyze_user_upload_patterns(user.as_deref()).await?)?;
        }
        AnalyzeCommands::Drift { days } => {
            let days = days.unwrap_or(defaults.drift_window_days);
            print_json(&analyzer.detect_algorithm_drift(days).await?)?;
        }
        AnalyzeCommands::Quality => {
            print_json(&analyzer.assess_learning_data_quality().await?)?;
        }
        AnalyzeCommands::Recommend => {
            let recommendations = analyzer.generate_improvement_recommendations().await?;
            if recommendations.is_empty() {
                println!("No recommendations.");
            } else {
                for rec in &recommendations {
                    println!("[{}] {}: {}", rec.priority, rec.category, rec.issue);
                    println!("    {} ({})", rec.description, rec.estimated_impact);
                }
            }
        }
    }
    Ok(())
}

async fn run_cycle(engines: &Engines, command: CycleCommands) -> Result<()> {
    let cycle = engines.cycle();
    match command {
        CycleCommands::Run => {
            let summary = cycle.run(CycleTrigger::Manual).await?;
            print_json(&summary)?;
        }
        CycleCommands::Schedule { interval } => {
            let schedule = match interval {
                Some(secs) => CycleSchedule::Interval(secs),
                None => CycleSchedule::from_config(&engines.config.scheduler)?,
            };
            let scheduler = Arc::new(CycleScheduler::new(cycle, schedule)?);
            println!("Scheduler running ({:?}). Press Ctrl+C to stop.", scheduler.schedule());

            let handle = {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.start().await })
            };
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
            scheduler.stop().await;
            handle.await.context("Scheduler task panicked")??;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selections() {
        let raw = vec!["top=item-1".to_string(), "complete_outfit=item-2".to_string()];
        let selections = parse_selections(&raw).unwrap();
        assert_eq!(selections[&Slot::Top], "item-1");
        assert_eq!(selections[&Slot::CompleteOutfit], "item-2");
    }

    #[test]
    fn test_parse_selections_rejects_bad_input() {
        assert!(parse_selections(&["top".to_string()]).is_err());
        assert!(parse_selections(&["hat=item".to_string()]).is_err());
        assert!(parse_selections(&["top=a".to_string(), "top=b".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_score_command() {
        let cli = Cli::try_parse_from([
            "style-learning",
            "--db",
            "/tmp/style.db",
            "score",
            "user-1",
            "female",
            "top=item-1",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/style.db")));
        assert!(matches!(cli.command, Commands::Score { .. }));
    }
}
