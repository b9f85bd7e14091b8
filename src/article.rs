//! Article assembly: draft, validate, correct, finish.
//!
//! [`assemble`] asks the draft port for an article, checks it against the
//! structural rules of [`validate_draft`] and, while being too short is the
//! draft's only problem, asks again with an amended instruction that carries
//! the measured word count. Any other violation ends the loop at once. After `max_attempts` calls the best
//! draft so far is accepted and flagged through its [`ValidationReport`].
//!
//! The finished [`Article`] gets its derived fields here as well: title,
//! slug and filename, excerpt, reading time and the reference list.

use crate::api::with_backoff;
use crate::cancel::Cancellation;
use crate::config::{ArticleConfig, RetryConfig};
use crate::error::AssemblyError;
use crate::models::{Article, DraftStats, Source, Topic, ValidationReport, Violation};
use crate::ports::{PortRequest, TextPort};
use crate::prompts;
use crate::utils::{slugify_title, truncate_slug, word_count};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info, instrument, warn};

static H1: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t]*$").expect("valid h1 regex"));
static H2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^##[ \t]+\S").expect("valid h2 regex"));
static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+\]").expect("valid citation regex"));

const UNTITLED: &str = "Untitled";
const ELLIPSIS: char = '…';

/// Title from the first `# ` heading, or `"Untitled"`.
pub fn extract_title(text: &str) -> String {
    H1.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn is_heading(line: &str, heading: &str) -> bool {
    line.trim_start()
        .strip_prefix("##")
        .filter(|rest| rest.starts_with([' ', '\t']))
        .map(|rest| rest.trim().to_lowercase().starts_with(&heading.to_lowercase()))
        .unwrap_or(false)
}

fn is_section_break(line: &str) -> bool {
    let l = line.trim_start();
    (l.starts_with("## ") || l.starts_with("# ")) && !l.starts_with("###")
}

/// Whether the text has an H2 section starting with `heading` (case-insensitive).
pub fn has_section(text: &str, heading: &str) -> bool {
    text.lines().any(|l| is_heading(l, heading))
}

/// Body of the H2 section starting with `heading`, up to the next H1/H2.
pub fn extract_section(text: &str, heading: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().position(|l| is_heading(l, heading))?;
    let body = lines[start + 1..]
        .iter()
        .take_while(|l| !is_section_break(l))
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Check a draft against the structural rules.
pub fn validate_draft(text: &str, config: &ArticleConfig) -> ValidationReport {
    let words = word_count(text);
    let sections = H2.find_iter(text).count();
    let has_faq = has_section(text, &config.faq_heading);
    let has_cta = text.to_lowercase().contains(&config.cta_marker.to_lowercase());

    let mut violations = Vec::new();
    if words < config.min_words {
        violations.push(Violation::TooShort {
            words,
            min: config.min_words,
        });
    } else if words > config.max_words {
        violations.push(Violation::TooLong {
            words,
            max: config.max_words,
        });
    }
    if !H1.is_match(text) {
        violations.push(Violation::MissingTitle);
    }
    for heading in [&config.summary_heading, &config.faq_heading, &config.conclusion_heading] {
        if !has_section(text, heading) {
            violations.push(Violation::MissingSection {
                heading: heading.clone(),
            });
        }
    }
    if sections < config.min_sections {
        violations.push(Violation::TooFewSections {
            found: sections,
            min: config.min_sections,
        });
    }
    if !has_cta {
        violations.push(Violation::MissingCallToAction);
    }

    ValidationReport {
        valid: violations.is_empty(),
        violations,
        stats: DraftStats {
            word_count: words,
            section_count: sections,
            citation_count: CITATION.find_iter(text).count(),
            has_faq,
            has_cta,
        },
    }
}

/// Truncate `text` to at most `cap` characters, ellipsis included.
///
/// Prefers the last sentence end past 60% of the limit, then the last
/// whitespace, then a hard cut. Text within the cap is returned unchanged.
pub fn truncate_excerpt(text: &str, cap: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let limit = cap.saturating_sub(1);
    let head: Vec<char> = text.chars().take(limit).collect();
    let floor = limit * 6 / 10;

    let sentence_end = (floor..head.len())
        .rev()
        .find(|&i| matches!(head[i], '.' | '!' | '?') && head.get(i + 1).is_none_or(|c| c.is_whitespace()))
        .map(|i| i + 1);
    let cut = sentence_end
        .or_else(|| (1..head.len()).rev().find(|&i| head[i].is_whitespace()))
        .unwrap_or(head.len());

    let mut excerpt: String = head[..cut].iter().collect();
    let trimmed_len = excerpt.trim_end().len();
    excerpt.truncate(trimmed_len);
    excerpt.push(ELLIPSIS);
    excerpt
}

/// Minutes to read `words` words, rounded up; never zero for a non-empty text.
pub fn reading_time(words: usize, words_per_minute: usize) -> usize {
    words.div_ceil(words_per_minute.max(1)).max(1)
}

fn references_section(sources: &[Source], heading: &str) -> String {
    let mut section = format!("## {heading}\n\n");
    for (i, source) in sources.iter().enumerate() {
        let title = if source.title.trim().is_empty() {
            "Source"
        } else {
            source.title.trim()
        };
        let date = source.date.as_deref().map(|d| format!(" ({d})")).unwrap_or_default();
        section.push_str(&format!("{}. [{title}]({}){date}\n", i + 1, source.url));
    }
    section
}

/// Put the numbered reference list in place of the references section, or
/// append it when the draft has none.
pub fn add_references(body: &str, sources: &[Source], config: &ArticleConfig) -> String {
    if sources.is_empty() {
        return body.replace(prompts::SOURCES_PLACEHOLDER, "").trim_end().to_string();
    }
    let section = references_section(sources, &config.references_heading);
    let lines: Vec<&str> = body.lines().collect();

    match lines.iter().position(|l| is_heading(l, &config.references_heading)) {
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|l| is_section_break(l))
                .map(|offset| start + 1 + offset)
                .unwrap_or(lines.len());
            let mut out = lines[..start].join("\n");
            out.push('\n');
            out.push_str(&section);
            if end < lines.len() {
                out.push('\n');
                out.push_str(&lines[end..].join("\n"));
                out.push('\n');
            }
            out
        }
        None => format!("{}\n\n{section}", body.trim_end()),
    }
}

/// Slug and `YYYY-MM-DD-<slug>.md` filename for a title.
pub fn generate_filename(title: &str, date: DateTime<Utc>, slug_max: usize) -> (String, String) {
    let mut slug = truncate_slug(&slugify_title(title), slug_max);
    if slug.is_empty() {
        slug = "article".to_string();
    }
    let filename = format!("{}-{slug}.md", date.format("%Y-%m-%d"));
    (slug, filename)
}

/// Fewer violations wins; among equals, the longer draft.
fn is_better(candidate: &ValidationReport, current: &ValidationReport) -> bool {
    (candidate.violations.len(), std::cmp::Reverse(candidate.stats.word_count))
        < (current.violations.len(), std::cmp::Reverse(current.stats.word_count))
}

struct Draft {
    text: String,
    report: ValidationReport,
}

/// Draft an article for `topic`, correcting under-length drafts.
///
/// Always makes at least one call and at most `config.max_attempts`. Only a
/// draft port that never returns usable text is an error.
#[instrument(level = "info", skip_all, fields(title = %topic.title, max_attempts = config.max_attempts))]
pub async fn assemble<T: TextPort>(
    topic: &Topic,
    port: &T,
    config: &ArticleConfig,
    retry: &RetryConfig,
    cancel: &Cancellation,
    now: DateTime<Utc>,
) -> Result<Article, AssemblyError> {
    let base = prompts::draft(topic, config);
    let mut prompt = base.clone();
    let mut best: Option<Draft> = None;
    let mut attempts = 0u32;
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled);
        }
        attempts = attempt;
        let t0 = Instant::now();
        let request = PortRequest::new(prompt.as_str())
            .system(prompts::DRAFT_SYSTEM)
            .temperature(config.temperature)
            .max_tokens(config.max_tokens);

        let response = match with_backoff(retry, "draft", cancel, || port.generate(&request)).await {
            Ok(response) => response,
            Err(source) if best.is_none() => return Err(AssemblyError::Draft { attempt, source }),
            Err(e) => {
                warn!(attempt, error = %e, "Draft call failed; keeping the best draft so far");
                break;
            }
        };

        let text = response.text.trim().to_string();
        if text.is_empty() {
            warn!(attempt, "Draft port returned empty text");
            continue;
        }

        let report = validate_draft(&text, config);
        info!(
            attempt,
            words = report.stats.word_count,
            sections = report.stats.section_count,
            violations = report.violations.len(),
            tokens = response.usage.total_tokens,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            event_kind = "article.drafted",
            "Draft received"
        );

        let only_too_short = report.only_too_short();
        let valid = report.valid;
        let words = report.stats.word_count;
        let violations = report.violations.clone();
        if best.as_ref().is_none_or(|b| is_better(&report, &b.report)) {
            best = Some(Draft { text, report });
        }

        if valid {
            break;
        }
        if !only_too_short {
            warn!(attempt, issues = ?violations, "Draft has issues beyond length; accepting it flagged");
            break;
        }
        if attempt < max_attempts {
            warn!(attempt, words, min = config.min_words, "Draft too short; asking for an expanded version");
            prompt = prompts::expansion(&base, words, config);
        }
    }

    let Draft { text, report } = best.ok_or(AssemblyError::Empty)?;
    if !report.valid {
        warn!(attempts, issues = ?report.issues(), "Accepting flagged draft");
    }
    Ok(finish(topic, &text, report, attempts, config, now))
}

/// Derive the article fields from an accepted draft.
pub fn finish(
    topic: &Topic,
    text: &str,
    report: ValidationReport,
    attempts: u32,
    config: &ArticleConfig,
    now: DateTime<Utc>,
) -> Article {
    let title = extract_title(text);
    let (slug, filename) = generate_filename(&title, now, config.filename_slug_max);
    let summary = extract_section(text, &config.summary_heading).unwrap_or_else(|| topic.summary.clone());
    let words = report.stats.word_count;

    Article {
        excerpt: truncate_excerpt(&summary, config.excerpt_cap),
        body: add_references(text, &topic.sources, config),
        word_count: words,
        section_count: report.stats.section_count,
        reading_time_minutes: reading_time(words, config.words_per_minute),
        references: topic.sources.clone(),
        keywords: topic.keywords.clone(),
        category: topic.category.clone(),
        title,
        slug,
        filename,
        validation: report,
        attempts,
        generated_at: now,
        thumbnail: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PortError;
    use crate::ports::PortResponse;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 3, 9, 0, 0).unwrap()
    }

    /// A well-formed article of roughly `words` words.
    pub(crate) fn sample_article(words: usize) -> String {
        let config = ArticleConfig::default();
        let sections = [
            config.summary_heading.as_str(),
            "Introduction",
            "The deal",
            "What changes",
            config.faq_heading.as_str(),
            config.conclusion_heading.as_str(),
        ];
        let per_section = words.saturating_sub(20) / sections.len();
        let mut text = String::from("# OpenAI and AMD sign a compute deal\n\n");
        for heading in sections {
            text.push_str(&format!("## {heading}\n\n"));
            let paragraph = std::iter::repeat_n("word", per_section).collect::<Vec<_>>().join(" ");
            text.push_str(&paragraph);
            text.push_str(" [1].\n\n");
        }
        text.push_str(&format!("{} Subscribe to the newsletter.\n\n", config.cta_marker));
        text.push_str(&format!("## {}\n{}\n", config.references_heading, prompts::SOURCES_PLACEHOLDER));
        text
    }

    fn topic() -> Topic {
        Topic {
            title: "OpenAI and AMD".to_string(),
            summary: "A compute deal.".to_string(),
            impact: "Chips".to_string(),
            category: "Finance & Investment".to_string(),
            sources: vec![Source {
                title: "Reuters".to_string(),
                url: "https://reuters.com/a".to_string(),
                date: Some("2025-10-02".to_string()),
                ..Default::default()
            }],
            keywords: vec!["AMD".to_string()],
            ..Default::default()
        }
    }

    struct FixedDraft {
        text: String,
        calls: AtomicU32,
    }

    impl TextPort for FixedDraft {
        async fn generate(&self, _request: &PortRequest) -> Result<PortResponse, PortError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PortResponse::text(self.text.clone()))
        }
    }

    struct GrowingDraft {
        calls: AtomicU32,
        prompts: std::sync::Mutex<Vec<String>>,
    }

    impl TextPort for GrowingDraft {
        async fn generate(&self, request: &PortRequest) -> Result<PortResponse, PortError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(request.prompt.clone());
            }
            let words = if n == 1 { 600 } else { 1300 };
            Ok(PortResponse::text(sample_article(words)))
        }
    }

    #[test]
    fn test_extract_title_falls_back_to_untitled() {
        assert_eq!(extract_title("# Hello world \nbody"), "Hello world");
        assert_eq!(extract_title("intro\n## Not a title\n"), "Untitled");
        assert_eq!(extract_title("#\n"), "Untitled");
    }

    #[test]
    fn test_validate_well_formed_draft() {
        let report = validate_draft(&sample_article(1300), &ArticleConfig::default());
        assert!(report.valid, "{:?}", report.violations);
        assert_eq!(report.stats.section_count, 7);
        assert!(report.stats.has_faq);
        assert!(report.stats.has_cta);
        assert_eq!(report.stats.citation_count, 6);
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let report = validate_draft("Just a few words here.", &ArticleConfig::default());
        assert!(!report.valid);
        assert!(report.is_too_short());
        assert!(report.violations.contains(&Violation::MissingTitle));
        assert!(report.violations.contains(&Violation::MissingCallToAction));
        assert!(report.violations.contains(&Violation::MissingSection {
            heading: "FAQ".to_string()
        }));
    }

    #[test]
    fn test_too_long_is_flagged_not_short() {
        let report = validate_draft(&sample_article(2000), &ArticleConfig::default());
        assert!(!report.valid);
        assert!(!report.is_too_short());
        assert!(matches!(report.violations[0], Violation::TooLong { .. }));
    }

    #[tokio::test]
    async fn test_short_drafts_stop_after_max_attempts() {
        let port = FixedDraft {
            text: sample_article(500),
            calls: AtomicU32::new(0),
        };
        let config = ArticleConfig::default();
        let article = assemble(
            &topic(),
            &port,
            &config,
            &RetryConfig::immediate(1),
            &Cancellation::new(),
            now(),
        )
        .await
        .unwrap();
        assert_eq!(port.calls.load(Ordering::SeqCst), config.max_attempts);
        assert_eq!(article.attempts, config.max_attempts);
        assert!(!article.validation.valid);
        assert!(article.validation.is_too_short());
    }

    #[tokio::test]
    async fn test_corrective_retry_carries_word_count() {
        let port = GrowingDraft {
            calls: AtomicU32::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        };
        let article = assemble(
            &topic(),
            &port,
            &ArticleConfig::default(),
            &RetryConfig::immediate(1),
            &Cancellation::new(),
            now(),
        )
        .await
        .unwrap();
        assert_eq!(port.calls.load(Ordering::SeqCst), 2);
        assert!(article.validation.valid);
        assert_eq!(article.attempts, 2);
        let prompts = port.prompts.lock().unwrap();
        assert!(!prompts[0].contains("previous draft"));
        assert!(prompts[1].contains(&format!("only {} words", word_count(&sample_article(600)))));
    }

    #[tokio::test]
    async fn test_structural_issues_without_shortness_do_not_retry() {
        let text = sample_article(1300).replace("**Call-to-Action:**", "");
        let port = FixedDraft {
            text,
            calls: AtomicU32::new(0),
        };
        let article = assemble(
            &topic(),
            &port,
            &ArticleConfig::default(),
            &RetryConfig::immediate(1),
            &Cancellation::new(),
            now(),
        )
        .await
        .unwrap();
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
        assert_eq!(article.validation.violations, vec![Violation::MissingCallToAction]);
    }

    #[tokio::test]
    async fn test_short_draft_with_other_issues_is_not_expanded() {
        let config = ArticleConfig::default();
        let text = sample_article(500).replace(&format!("## {}", config.faq_heading), "## Questions");
        let port = FixedDraft {
            text,
            calls: AtomicU32::new(0),
        };
        let article = assemble(
            &topic(),
            &port,
            &config,
            &RetryConfig::immediate(1),
            &Cancellation::new(),
            now(),
        )
        .await
        .unwrap();
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
        assert_eq!(article.attempts, 1);
        assert!(article.validation.is_too_short());
        assert!(!article.validation.only_too_short());
        assert!(article.validation.violations.contains(&Violation::MissingSection {
            heading: config.faq_heading.clone()
        }));
    }

    #[tokio::test]
    async fn test_failing_port_is_an_assembly_error() {
        struct Down;
        impl TextPort for Down {
            async fn generate(&self, _request: &PortRequest) -> Result<PortResponse, PortError> {
                Err(PortError::Auth("bad key".into()))
            }
        }
        let result = assemble(
            &topic(),
            &Down,
            &ArticleConfig::default(),
            &RetryConfig::immediate(1),
            &Cancellation::new(),
            now(),
        )
        .await;
        assert!(matches!(result, Err(AssemblyError::Draft { attempt: 1, .. })));
    }

    #[test]
    fn test_excerpt_never_exceeds_cap() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        for cap in [2usize, 10, 57, 100, 500] {
            for len in [cap / 2, cap, cap + 1, cap * 3] {
                let text: String = sentence.chars().cycle().take(len).collect();
                let text = text.trim().to_string();
                let excerpt = truncate_excerpt(&text, cap);
                if text.chars().count() <= cap {
                    assert_eq!(excerpt, text);
                } else {
                    assert!(excerpt.chars().count() <= cap, "cap {cap} len {len}");
                    assert!(excerpt.ends_with(ELLIPSIS));
                }
            }
        }
    }

    #[test]
    fn test_excerpt_prefers_sentence_end() {
        let text = "First sentence is here. Second sentence is a bit longer than that. Third.";
        let excerpt = truncate_excerpt(text, 70);
        assert_eq!(excerpt, "First sentence is here. Second sentence is a bit longer than that.…");
    }

    #[test]
    fn test_excerpt_falls_back_to_whitespace_then_hard_cut() {
        let excerpt = truncate_excerpt("alpha beta gamma delta epsilon", 14);
        assert_eq!(excerpt, "alpha beta…");
        let excerpt = truncate_excerpt(&"x".repeat(50), 10);
        assert_eq!(excerpt, format!("{}…", "x".repeat(9)));
    }

    #[test]
    fn test_reading_time_rounds_up() {
        assert_eq!(reading_time(1300, 200), 7);
        assert_eq!(reading_time(1200, 200), 6);
        assert_eq!(reading_time(0, 200), 1);
    }

    #[test]
    fn test_add_references_replaces_placeholder_section() {
        let config = ArticleConfig::default();
        let body = format!("# T\n\n## Sources\n{}\n", prompts::SOURCES_PLACEHOLDER);
        let out = add_references(&body, &topic().sources, &config);
        assert!(out.contains("1. [Reuters](https://reuters.com/a) (2025-10-02)"));
        assert!(!out.contains(prompts::SOURCES_PLACEHOLDER));
        assert_eq!(out.matches("## Sources").count(), 1);
    }

    #[test]
    fn test_add_references_appends_when_missing() {
        let out = add_references("# T\n\nBody.", &topic().sources, &ArticleConfig::default());
        assert!(out.starts_with("# T\n\nBody.\n\n## Sources\n\n1. [Reuters]"));
    }

    #[test]
    fn test_add_references_keeps_following_sections() {
        let body = "# T\n\n## Sources\nold list\n\n## Appendix\nmore";
        let out = add_references(body, &topic().sources, &ArticleConfig::default());
        assert!(!out.contains("old list"));
        assert!(out.contains("## Appendix\nmore"));
    }

    #[test]
    fn test_generate_filename() {
        let (slug, filename) = generate_filename("L'IA générative: ce qui change!", now(), 60);
        assert_eq!(slug, "lia-generative-ce-qui-change");
        assert_eq!(filename, "2025-10-03-lia-generative-ce-qui-change.md");

        let long = "word ".repeat(40);
        let (slug, _) = generate_filename(&long, now(), 60);
        assert!(slug.len() <= 60);
        assert!(!slug.ends_with('-'));

        let (slug, _) = generate_filename("!!!", now(), 60);
        assert_eq!(slug, "article");
    }

    #[test]
    fn test_finish_derives_fields() {
        let text = sample_article(1300);
        let config = ArticleConfig::default();
        let report = validate_draft(&text, &config);
        let article = finish(&topic(), &text, report, 1, &config, now());
        assert_eq!(article.title, "OpenAI and AMD sign a compute deal");
        assert_eq!(article.filename, "2025-10-03-openai-and-amd-sign-a-compute-deal.md");
        assert!(article.excerpt.starts_with("word word"));
        assert!(article.body.contains("1. [Reuters]"));
        assert_eq!(article.category, "Finance & Investment");
    }
}
