//! Topic scoring and ranking.
//!
//! A score is a sum of independent, capped components:
//!
//! | component       | points                                                    |
//! |-----------------|-----------------------------------------------------------|
//! | `freshness`     | first [`FreshnessTier`] the topic's age fits, else `stale_points` |
//! | `corroboration` | `min(sources × source_weight, source_cap)`                |
//! | `authority`     | `authority_points` if a source host is an authority domain (only when domains are configured) |
//!
//! Scoring is a pure function of the topic, the config and the `now` passed in.
//!
//! [`FreshnessTier`]: crate::config::FreshnessTier

use crate::config::ScoringConfig;
use crate::models::{Score, ScoredTopic, Topic};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};

pub const FRESHNESS: &str = "freshness";
pub const CORROBORATION: &str = "corroboration";
pub const AUTHORITY: &str = "authority";

fn freshness_points(topic: &Topic, config: &ScoringConfig, now: DateTime<Utc>) -> u32 {
    // an undated topic counts as published now
    let age = topic.age(now).unwrap_or_else(Duration::zero);
    config
        .freshness_tiers
        .iter()
        .find(|tier| age <= Duration::hours(tier.max_hours))
        .map(|tier| tier.points)
        .unwrap_or(config.stale_points)
}

fn is_authority(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| {
        let d = d.trim().trim_start_matches("www.").to_lowercase();
        host == d || host.ends_with(&format!(".{d}"))
    })
}

fn max_freshness(config: &ScoringConfig) -> u32 {
    config
        .freshness_tiers
        .iter()
        .map(|t| t.points)
        .chain(std::iter::once(config.stale_points))
        .max()
        .unwrap_or(0)
}

/// Score one topic.
pub fn score(topic: &Topic, config: &ScoringConfig, now: DateTime<Utc>) -> ScoredTopic {
    let mut components = BTreeMap::new();
    components.insert(FRESHNESS.to_string(), freshness_points(topic, config, now));

    let sources = topic.sources.len() as u32;
    components.insert(
        CORROBORATION.to_string(),
        sources.saturating_mul(config.source_weight).min(config.source_cap),
    );

    let mut max_possible = max_freshness(config) + config.source_cap;
    if !config.authority_domains.is_empty() {
        let authoritative = topic
            .sources
            .iter()
            .filter_map(|s| s.host())
            .any(|host| is_authority(&host, &config.authority_domains));
        components.insert(
            AUTHORITY.to_string(),
            if authoritative { config.authority_points } else { 0 },
        );
        max_possible += config.authority_points;
    }

    let total = components.values().sum();
    ScoredTopic {
        topic: topic.clone(),
        score: Score {
            components,
            total,
            max_possible,
            passes_threshold: total >= config.min_score,
        },
    }
}

/// Stable sort by descending total; ties keep their input order.
pub fn rank(mut scored: Vec<ScoredTopic>) -> Vec<ScoredTopic> {
    scored.sort_by(|a, b| b.score.total.cmp(&a.score.total));
    scored
}

/// Score and rank a batch.
#[instrument(level = "info", skip_all, fields(topics = topics.len()))]
pub fn score_all(topics: &[Topic], config: &ScoringConfig, now: DateTime<Utc>) -> Vec<ScoredTopic> {
    let ranked = rank(topics.iter().map(|t| score(t, config, now)).collect());
    let passing = ranked.iter().filter(|t| t.score.passes_threshold).count();
    info!(
        total = ranked.len(),
        passing,
        threshold = config.min_score,
        event_kind = "topics.ranked",
        "Ranking complete"
    );
    ranked
}

/// Summary of a ranking, as printed by the `score` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub total_topics: usize,
    pub passing_topics: usize,
    pub failing_topics: usize,
    pub threshold: u32,
    pub average_score: f64,
    pub top_title: Option<String>,
    pub top_score: Option<u32>,
}

pub fn report(ranked: &[ScoredTopic], threshold: u32) -> RankingReport {
    let passing = ranked.iter().filter(|t| t.score.passes_threshold).count();
    let average_score = if ranked.is_empty() {
        0.0
    } else {
        ranked.iter().map(|t| t.score.total as f64).sum::<f64>() / ranked.len() as f64
    };
    RankingReport {
        total_topics: ranked.len(),
        passing_topics: passing,
        failing_topics: ranked.len() - passing,
        threshold,
        average_score,
        top_title: ranked.first().map(|t| t.topic.title.clone()),
        top_score: ranked.first().map(|t| t.score.total),
    }
}
