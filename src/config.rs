//! Runtime configuration loaded from a YAML file.
//!
//! Every tunable the pipeline uses lives here: the closed category set, the
//! freshness window, scoring weights, article bounds, retry/backoff policy and
//! the endpoints of the capability ports. Nothing below this module hard-codes
//! any of these values; components receive the relevant section by reference.
//!
//! A missing file is not an error: [`Config::default`] describes a working
//! setup against an OpenAI-compatible endpoint.
//!
//! ```yaml
//! categories: ["Innovation & Products", "Finance & Investment"]
//! default_category: "Innovation & Products"
//! freshness_window_hours: 48
//! scoring:
//!   min_score: 20
//! article:
//!   min_words: 1000
//!   max_words: 1600
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Closed set of categories a topic may belong to.
    pub categories: Vec<String>,
    /// Category assigned to topics whose category is not in `categories`.
    pub default_category: String,
    /// Subjects the discovery prompt asks about.
    pub subjects: Vec<String>,
    /// Maximum age (hours) of a discovered topic.
    pub freshness_window_hours: i64,
    pub scoring: ScoringConfig,
    pub article: ArticleConfig,
    /// Backoff applied to every port call that fails transiently.
    pub retry: RetryConfig,
    pub discovery: DiscoveryConfig,
    pub ports: PortsConfig,
    pub image: ImageConfig,
    pub publish: PublishConfig,
    pub output: OutputConfig,
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        let categories: Vec<String> = [
            "Innovation & Products",
            "Finance & Investment",
            "Tools & Technologies",
            "Marketing & Sales",
            "Analysis & Trends",
            "Regulation & Ethics",
            "Business & Strategy",
            "Partnerships & Ecosystem",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        Self {
            default_category: "Innovation & Products".to_string(),
            categories,
            subjects: [
                "artificial intelligence",
                "large language models",
                "AI agents",
                "generative AI",
                "AI regulation",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            freshness_window_hours: 48,
            scoring: ScoringConfig::default(),
            article: ArticleConfig::default(),
            retry: RetryConfig::default(),
            discovery: DiscoveryConfig::default(),
            ports: PortsConfig::default(),
            image: ImageConfig::default(),
            publish: PublishConfig::default(),
            output: OutputConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// One discrete freshness tier: topics at most `max_hours` old earn `points`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreshnessTier {
    pub max_hours: i64,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum total a topic needs to be drafted.
    pub min_score: u32,
    /// Tiers checked in order; the first one that fits wins.
    pub freshness_tiers: Vec<FreshnessTier>,
    /// Points for topics older than every tier.
    pub stale_points: u32,
    /// Points per corroborating source.
    pub source_weight: u32,
    /// Upper bound of the corroboration component.
    pub source_cap: u32,
    /// Hosts (or host suffixes) counted as authoritative sources.
    pub authority_domains: Vec<String>,
    /// Points granted when at least one source is authoritative.
    pub authority_points: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_score: 20,
            freshness_tiers: vec![
                FreshnessTier {
                    max_hours: 24,
                    points: 20,
                },
                FreshnessTier {
                    max_hours: 48,
                    points: 15,
                },
            ],
            stale_points: 10,
            source_weight: 5,
            source_cap: 20,
            authority_domains: Vec::new(),
            authority_points: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleConfig {
    pub min_words: usize,
    pub max_words: usize,
    /// Minimum number of `##` sections.
    pub min_sections: usize,
    /// Draft attempts, corrective retries included.
    pub max_attempts: u32,
    /// Hard cap (characters) of the excerpt.
    pub excerpt_cap: usize,
    pub words_per_minute: usize,
    /// Maximum length of the slug part of the generated filename.
    pub filename_slug_max: usize,
    pub summary_heading: String,
    pub faq_heading: String,
    pub conclusion_heading: String,
    pub references_heading: String,
    pub cta_marker: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            min_words: 1000,
            max_words: 1600,
            min_sections: 5,
            max_attempts: 3,
            excerpt_cap: 3000,
            words_per_minute: 200,
            filename_slug_max: 60,
            summary_heading: "Summary".to_string(),
            faq_heading: "FAQ".to_string(),
            conclusion_heading: "Conclusion".to_string(),
            references_heading: "Sources".to_string(),
            cta_marker: "**Call-to-Action:**".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

/// Exponential backoff: `min(base * multiplier^(attempt-1), max) + jitter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    /// A policy that retries immediately; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Delay before the retry following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Whole-discovery retry loop (empty or fully duplicate batches).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub temperature: f32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
            temperature: 0.7,
        }
    }
}

/// Connection details of one OpenAI-compatible text endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl PortConfig {
    fn openai(model: &str, max_tokens: u32) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens,
            timeout_secs: 300,
        }
    }

    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingEnv(self.api_key_env.clone()))
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::openai("gpt-4o", 4000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub discover: PortConfig,
    pub research: PortConfig,
    pub draft: PortConfig,
    /// Secondary model used to convert unparseable dossiers into strict JSON.
    pub repair: PortConfig,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            discover: PortConfig::openai("gpt-4o-search-preview", 8000),
            research: PortConfig::openai("o4-mini-deep-research", 16000),
            draft: PortConfig::openai("gpt-4o", 4000),
            repair: PortConfig::openai("gpt-4o-mini", 8000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Image endpoint; empty disables illustration.
    pub endpoint: String,
    pub api_key_env: String,
    pub aspect_ratio: String,
    pub timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.reve.com/v1/image/create".to_string(),
            api_key_env: "REVE_API_KEY".to_string(),
            aspect_ratio: "16:9".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// CMS API base URL; empty leaves publishing unconfigured.
    pub api_url: String,
    pub collection_id: String,
    pub api_key_env: String,
    /// Public URL prefix articles are served under, e.g. `https://example.com/blog`.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub articles_dir: String,
    /// Where discovery and ranking snapshots are kept between CLI steps.
    pub data_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            articles_dir: "./articles".to_string(),
            data_dir: "./.data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local hour (0-23) the daemon runs the pipeline at.
    pub hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { hour: 9 }
    }
}

impl Config {
    /// Load a config file, falling back to defaults when `path` does not exist.
    #[instrument(level = "info")]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            info!(path, "Config file not found; using defaults");
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_string(),
                source,
            },
            other => other,
        })?;
        info!(path, categories = config.categories.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("category set is empty".into()));
        }
        if !self.categories.contains(&self.default_category) {
            return Err(ConfigError::Invalid(format!(
                "default category {:?} is not one of the configured categories",
                self.default_category
            )));
        }
        if self.article.min_words > self.article.max_words {
            return Err(ConfigError::Invalid(format!(
                "article.min_words ({}) exceeds article.max_words ({})",
                self.article.min_words, self.article.max_words
            )));
        }
        if self.article.max_attempts == 0 || self.discovery.max_attempts == 0 || self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("attempt budgets must be at least 1".into()));
        }
        if self.article.excerpt_cap < 2 {
            return Err(ConfigError::Invalid("article.excerpt_cap is too small".into()));
        }
        if self.schedule.hour > 23 {
            return Err(ConfigError::Invalid(format!("schedule.hour {} is not an hour", self.schedule.hour)));
        }
        Ok(())
    }
}
