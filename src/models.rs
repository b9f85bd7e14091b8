//! Data models for topics, scores and articles.
//!
//! This module defines the records that flow through the pipeline:
//! - [`Topic`] and [`Source`]: candidate subjects as discovered by the LLM
//! - [`Enrichment`]: the research dossier merged into the chosen topic
//! - [`ScoredTopic`] and [`Score`]: topics after ranking
//! - [`Article`], [`ValidationReport`] and [`FrontMatter`]: the drafted output
//!
//! Fields coming from the discovery and research models are lenient
//! (`#[serde(default)]`, a few aliases) because LLMs are loose about key
//! names; the validator is what enforces the invariants.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribution record attached to a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "publish_date", alias = "publishDate")]
    pub date: Option<String>,
    #[serde(default, alias = "sourceType", alias = "type")]
    pub source_type: Option<String>,
}

impl Source {
    /// Host of the source URL, without a leading `www.`.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
    }
}

/// Research dossier fields merged into a topic after the Research stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    #[serde(alias = "editorialAngle")]
    pub editorial_angle: Option<String>,
    #[serde(alias = "keyQuestions")]
    pub key_questions: Vec<String>,
    pub figures: Option<Value>,
    pub quotes: Option<Value>,
    #[serde(alias = "historicalContext")]
    pub historical_context: Option<Value>,
    #[serde(alias = "competitiveAnalysis")]
    pub competitive_analysis: Option<Value>,
    #[serde(alias = "additionalSources")]
    pub additional_sources: Vec<Source>,
}

/// A candidate content subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, alias = "publishDate")]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_count: usize,
    #[serde(default)]
    pub enrichment: Option<Enrichment>,
    #[serde(default)]
    pub enrichment_error: Option<String>,
}

impl Topic {
    /// Publish date as a UTC instant. Accepts RFC 3339 timestamps and bare
    /// `YYYY-MM-DD` dates (taken as midnight UTC).
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.publish_date.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    /// Time elapsed between publication and `now`; `None` without a usable date.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.published_at().map(|p| now - p)
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }
}

/// Per-topic score: independent named components and their sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub components: BTreeMap<String, u32>,
    pub total: u32,
    pub max_possible: u32,
    pub passes_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTopic {
    pub topic: Topic,
    pub score: Score,
}

/// One rule a draft failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    TooShort { words: usize, min: usize },
    TooLong { words: usize, max: usize },
    MissingTitle,
    MissingSection { heading: String },
    TooFewSections { found: usize, min: usize },
    MissingCallToAction,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::TooShort { words, min } => write!(f, "article too short ({words} words, minimum {min})"),
            Violation::TooLong { words, max } => write!(f, "article too long ({words} words, maximum {max})"),
            Violation::MissingTitle => write!(f, "missing H1 title"),
            Violation::MissingSection { heading } => write!(f, "missing {heading} section"),
            Violation::TooFewSections { found, min } => {
                write!(f, "too few sections ({found} H2 headings, minimum {min})")
            }
            Violation::MissingCallToAction => write!(f, "missing call-to-action"),
        }
    }
}

/// Measurements taken on a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftStats {
    pub word_count: usize,
    pub section_count: usize,
    pub citation_count: usize,
    pub has_faq: bool,
    pub has_cta: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub stats: DraftStats,
}

impl ValidationReport {
    pub fn issues(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.to_string()).collect()
    }

    pub fn only_too_short(&self) -> bool {
        self.violations.len() == 1 && matches!(self.violations[0], Violation::TooShort { .. })
    }

    pub fn is_too_short(&self) -> bool {
        self.violations.iter().any(|v| matches!(v, Violation::TooShort { .. }))
    }
}

/// Generated illustration for an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub filename: String,
    pub prompt: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Where the persisted image can be fetched from, once stored.
    #[serde(default)]
    pub asset_url: Option<String>,
}

/// The drafted article, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub slug: String,
    pub category: String,
    pub excerpt: String,
    /// Markdown body, reference list included.
    pub body: String,
    pub word_count: usize,
    pub section_count: usize,
    pub reading_time_minutes: usize,
    pub references: Vec<Source>,
    pub keywords: Vec<String>,
    pub filename: String,
    pub validation: ValidationReport,
    pub attempts: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoFields {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatterSource {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// YAML metadata written ahead of the article body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub title: String,
    pub slug: String,
    pub category: String,
    pub excerpt: String,
    pub reading_time: usize,
    pub date: String,
    pub seo: SeoFields,
    pub sources: Vec<FrontMatterSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl Article {
    pub fn front_matter(&self) -> FrontMatter {
        let description = self.excerpt.chars().take(155).collect::<String>();
        FrontMatter {
            title: self.title.clone(),
            slug: self.slug.clone(),
            category: self.category.clone(),
            excerpt: self.excerpt.clone(),
            reading_time: self.reading_time_minutes,
            date: self.generated_at.format("%Y-%m-%d").to_string(),
            seo: SeoFields {
                title: self.title.clone(),
                description,
                keywords: self.keywords.clone(),
            },
            sources: self
                .references
                .iter()
                .map(|s| FrontMatterSource {
                    title: s.title.clone(),
                    url: s.url.clone(),
                    date: s.date.clone(),
                })
                .collect(),
            thumbnail: self.thumbnail.as_ref().map(|t| t.filename.clone()),
            valid: self.validation.valid,
            issues: self.validation.issues(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_topic_deserializes_with_missing_fields() {
        let json = r#"{"title": "Only a title"}"#;
        let topic: Topic = serde_json::from_str(json).unwrap();
        assert_eq!(topic.title, "Only a title");
        assert!(topic.summary.is_empty());
        assert!(topic.sources.is_empty());
    }

    #[test]
    fn test_topic_accepts_camel_case_aliases() {
        let json = r#"{
            "title": "T",
            "publishDate": "2025-10-03T10:00:00Z",
            "sources": [{"title": "S", "url": "https://example.com", "sourceType": "media"}]
        }"#;
        let topic: Topic = serde_json::from_str(json).unwrap();
        assert_eq!(topic.publish_date.as_deref(), Some("2025-10-03T10:00:00Z"));
        assert_eq!(topic.sources[0].source_type.as_deref(), Some("media"));
    }

    #[test]
    fn test_published_at_accepts_bare_dates() {
        let topic = Topic {
            publish_date: Some("2025-10-03".to_string()),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 10, 4, 6, 0, 0).unwrap();
        assert_eq!(topic.age(now), Some(Duration::hours(30)));
    }

    #[test]
    fn test_published_at_rejects_garbage() {
        let topic = Topic {
            publish_date: Some("last tuesday".to_string()),
            ..Default::default()
        };
        assert_eq!(topic.published_at(), None);
    }

    #[test]
    fn test_source_host() {
        let source = Source {
            url: "https://www.Reuters.com/technology/ai".to_string(),
            ..Default::default()
        };
        assert_eq!(source.host().as_deref(), Some("reuters.com"));
        let broken = Source {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert_eq!(broken.host(), None);
    }

    #[test]
    fn test_violation_display() {
        let v = Violation::TooShort { words: 500, min: 1000 };
        assert_eq!(v.to_string(), "article too short (500 words, minimum 1000)");
        let v = Violation::MissingSection {
            heading: "FAQ".to_string(),
        };
        assert_eq!(v.to_string(), "missing FAQ section");
    }

    #[test]
    fn test_only_too_short() {
        let report = ValidationReport {
            valid: false,
            violations: vec![Violation::TooShort { words: 10, min: 20 }],
            stats: DraftStats::default(),
        };
        assert!(report.only_too_short());
        let report = ValidationReport {
            valid: false,
            violations: vec![Violation::TooShort { words: 10, min: 20 }, Violation::MissingTitle],
            stats: DraftStats::default(),
        };
        assert!(!report.only_too_short());
        assert!(report.is_too_short());
    }
}
