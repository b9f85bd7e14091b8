//! Topic validation and duplicate detection.
//!
//! [`validate`] turns the raw discovery answer into topics the rest of the
//! pipeline can rely on: every field present, category inside the configured
//! set, recent enough, at least one source. [`deduplicate`] then drops topics
//! that look like articles already written.
//!
//! Duplicate detection is lexical: a topic is a duplicate of a past article
//! when at least [`DUPLICATE_OVERLAP`] of its significant title words appear in
//! the past title. Both sides are slugified first, so accents and punctuation
//! do not matter and filenames compare equal to the titles they came from.

use crate::config::Config;
use crate::models::Topic;
use crate::utils::slugify_title;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, instrument, warn};

/// Shared significant words needed to call two titles duplicates.
pub const DUPLICATE_OVERLAP: usize = 3;

/// Words of this many characters or fewer are ignored.
const MIN_TOKEN_LEN: usize = 3;

pub(crate) static DATE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}-").expect("valid date prefix regex"));

/// Keep the topics that satisfy the topic invariants; fix what can be fixed.
///
/// Topics with an empty title, summary, impact or category are dropped, as are
/// topics published longer than `freshness_window_hours` before `now` and
/// topics without a single usable source. Unknown categories are replaced by
/// the default category. Survivors are stamped with `now` and their source count.
#[instrument(level = "info", skip_all, fields(raw = raw.len()))]
pub fn validate(raw: Vec<Topic>, config: &Config, now: DateTime<Utc>) -> Vec<Topic> {
    let mut valid = Vec::with_capacity(raw.len());

    for mut topic in raw {
        let missing = [
            ("title", &topic.title),
            ("summary", &topic.summary),
            ("impact", &topic.impact),
            ("category", &topic.category),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name);
        if let Some(field) = missing {
            warn!(title = %topic.title, field, "Topic missing required field; skipping");
            continue;
        }

        if !config.categories.contains(&topic.category) {
            let canonical = config
                .categories
                .iter()
                .find(|c| c.eq_ignore_ascii_case(topic.category.trim()))
                .cloned();
            let replacement = canonical.unwrap_or_else(|| config.default_category.clone());
            warn!(
                title = %topic.title,
                category = %topic.category,
                replacement = %replacement,
                "Category outside the configured set; remapping"
            );
            topic.category = replacement;
        }

        let window = config.freshness_window_hours;
        if let Some(age) = topic.age(now).filter(|age| *age > Duration::hours(window)) {
            warn!(title = %topic.title, age_minutes = age.num_minutes(), window, "Topic too old; skipping");
            continue;
        }

        topic.sources.retain(|s| !s.url.trim().is_empty());
        if topic.sources.is_empty() {
            warn!(title = %topic.title, "Topic has no sources; skipping");
            continue;
        }

        topic.title = topic.title.trim().to_string();
        topic.discovered_at = Some(now);
        topic.source_count = topic.sources.len();
        valid.push(topic);
    }

    info!(kept = valid.len(), event_kind = "topics.validated", "Validated topics");
    valid
}

/// Distinct significant words of a topic title, accent-folded and lowercased.
pub fn title_tokens(title: &str) -> BTreeSet<String> {
    slugify_title(title)
        .split('-')
        .filter(|w| w.chars().count() > MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Words of a stored title. Accepts filenames such as
/// `2025-10-03-openai-ships-new-model.md` as well as plain titles.
pub fn normalize_past_title(stored: &str) -> HashSet<String> {
    let without_ext = stored.trim().trim_end_matches(".md");
    let without_date = DATE_PREFIX.replace(without_ext, "");
    slugify_title(&without_date)
        .split('-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `title` shares at least [`DUPLICATE_OVERLAP`] significant words with a past title.
pub fn is_duplicate(title: &str, past: &[HashSet<String>]) -> Option<usize> {
    let tokens = title_tokens(title);
    past.iter().position(|words| {
        let overlap = tokens.iter().filter(|t| words.contains(*t)).count();
        overlap >= DUPLICATE_OVERLAP
    })
}

/// Drop topics that duplicate a past article, preserving order.
///
/// Overlap is counted over distinct whole words: a word repeated in the
/// candidate title counts once, and `model` does not match `models`.
#[instrument(level = "info", skip_all, fields(topics = topics.len(), past = past_titles.len()))]
pub fn deduplicate(topics: Vec<Topic>, past_titles: &[String]) -> Vec<Topic> {
    let past: Vec<HashSet<String>> = past_titles.iter().map(|t| normalize_past_title(t)).collect();
    let before = topics.len();

    let unique: Vec<Topic> = topics
        .into_iter()
        .filter(|topic| match is_duplicate(&topic.title, &past) {
            Some(i) => {
                warn!(title = %topic.title, similar_to = %past_titles[i], "Duplicate topic; skipping");
                false
            }
            None => true,
        })
        .collect();

    if unique.len() < before {
        info!(filtered = before - unique.len(), "Filtered out duplicate topics");
    } else {
        debug!("No duplicates found");
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 3, 12, 0, 0).unwrap()
    }

    fn source() -> Source {
        Source {
            title: "Example".to_string(),
            url: "https://example.com/a".to_string(),
            ..Default::default()
        }
    }

    fn topic(title: &str, category: &str) -> Topic {
        Topic {
            title: title.to_string(),
            summary: "summary".to_string(),
            impact: "impact".to_string(),
            category: category.to_string(),
            sources: vec![source()],
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_categories_are_remapped_never_dropped() {
        let config = Config::default();
        let raw = vec![
            topic("A", "Finance & Investment"),
            topic("B", "Space Opera"),
            topic("C", "finance & investment"),
            topic("D", "  "),
        ];
        let valid = validate(raw, &config, now());
        assert_eq!(valid.len(), 3);
        for t in &valid {
            assert!(config.categories.contains(&t.category), "{}", t.category);
        }
        assert_eq!(valid[1].category, config.default_category);
        assert_eq!(valid[2].category, "Finance & Investment");
    }

    #[test]
    fn test_missing_fields_and_sources_are_dropped() {
        let config = Config::default();
        let mut no_summary = topic("No summary", "Finance & Investment");
        no_summary.summary.clear();
        let mut no_sources = topic("No sources", "Finance & Investment");
        no_sources.sources.clear();
        let mut blank_url = topic("Blank url", "Finance & Investment");
        blank_url.sources[0].url = " ".to_string();
        let valid = validate(vec![no_summary, no_sources, blank_url], &config, now());
        assert!(valid.is_empty());
    }

    #[test]
    fn test_freshness_window_only_applies_with_a_date() {
        let config = Config::default();
        let mut stale = topic("Stale", "Finance & Investment");
        stale.publish_date = Some((now() - Duration::hours(49)).to_rfc3339());
        let mut fresh = topic("Fresh", "Finance & Investment");
        fresh.publish_date = Some((now() - Duration::hours(47)).to_rfc3339());
        let undated = topic("Undated", "Finance & Investment");
        let mut garbled = topic("Garbled", "Finance & Investment");
        garbled.publish_date = Some("yesterday".to_string());

        let valid = validate(vec![stale, fresh, undated, garbled], &config, now());
        let titles: Vec<_> = valid.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Fresh", "Undated", "Garbled"]);
    }

    #[test]
    fn test_freshness_window_counts_partial_hours() {
        let config = Config::default();
        let window = config.freshness_window_hours;
        let mut just_past = topic("Just past", "Finance & Investment");
        just_past.publish_date = Some((now() - Duration::hours(window) - Duration::minutes(50)).to_rfc3339());
        let mut on_edge = topic("On edge", "Finance & Investment");
        on_edge.publish_date = Some((now() - Duration::hours(window)).to_rfc3339());

        let valid = validate(vec![just_past, on_edge], &config, now());
        let titles: Vec<_> = valid.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["On edge"]);
    }

    #[test]
    fn test_validated_topics_are_stamped() {
        let mut t = topic("Stamped", "Finance & Investment");
        t.sources.push(source());
        let valid = validate(vec![t], &Config::default(), now());
        assert_eq!(valid[0].discovered_at, Some(now()));
        assert_eq!(valid[0].source_count, 2);
    }

    #[test]
    fn test_duplicate_threshold_boundary() {
        let past = vec!["2025-10-01-quantum-computing-startup-raises-funding.md".to_string()];

        // quantum, computing, startup shared
        let three = topic("Quantum computing startup expands abroad", "Finance & Investment");
        // quantum, computing shared
        let two = topic("Quantum computing reaches hospitals", "Finance & Investment");

        let unique = deduplicate(vec![three, two], &past);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].title, "Quantum computing reaches hospitals");
    }

    #[test]
    fn test_short_words_do_not_count() {
        let past = vec!["2025-10-01-the-new-ai-law-for-all.md".to_string()];
        let t = topic("The new AI law for all", "Regulation & Ethics");
        assert_eq!(deduplicate(vec![t], &past).len(), 1);
    }

    #[test]
    fn test_dedup_ignores_accents_and_matches_whole_words() {
        let past = vec!["2025-10-01-regulation-europeenne-des-modeles-generatifs.md".to_string()];
        let t = topic("Régulation européenne : les modèles génératifs", "Regulation & Ethics");
        assert!(deduplicate(vec![t], &past).is_empty());

        let past = vec!["2025-10-01-reasonable-transformers-explained.md".to_string()];
        let t = topic("Reason, Transform, Explain", "Analysis & Trends");
        assert_eq!(deduplicate(vec![t], &past).len(), 1);
    }

    #[test]
    fn test_repeated_words_count_once() {
        let past = vec!["2025-10-01-quantum-chips-explained.md".to_string()];
        let t = topic("Quantum quantum quantum chips", "Analysis & Trends");
        assert_eq!(deduplicate(vec![t], &past).len(), 1);
    }

    #[test]
    fn test_normalize_past_title() {
        let words = normalize_past_title("2025-10-03-openai-ships-gpt-5.md");
        assert!(words.contains("openai"));
        assert!(words.contains("ships"));
        assert!(!words.iter().any(|w| w.contains("2025")));
    }
}
