//! Instruction text sent to the capability ports.
//!
//! Everything here is a pure function from typed input to a `String`. The
//! pipeline never inspects prompt content; only the structural headings the
//! draft prompt asks for are shared with the validator through
//! [`ArticleConfig`].

use crate::config::{ArticleConfig, Config};
use crate::models::Topic;
use chrono::{DateTime, Utc};
use itertools::Itertools;

pub const DISCOVERY_SYSTEM: &str =
    "You are a research assistant that searches the web and returns structured JSON data about trending news.";

pub const RESEARCH_SYSTEM: &str =
    "You are an investigative research assistant. Answer with a single JSON object and nothing else.";

pub const DRAFT_SYSTEM: &str = "You are a senior journalist writing long-form explainers for non-technical \
decision makers. You write in Markdown and follow the requested structure exactly.";

pub const JSON_REPAIR_SYSTEM: &str =
    "You convert text into strict, valid JSON. You never add commentary or markdown fences.";

/// Line the draft prompt puts under the references heading; replaced by the
/// real reference list once the article is assembled.
pub const SOURCES_PLACEHOLDER: &str = "[Sources are added automatically]";

/// Discovery instruction: today's most significant stories on the configured subjects.
pub fn discovery(config: &Config, now: DateTime<Utc>) -> String {
    let categories = config.categories.iter().map(|c| format!("- {c}")).join("\n");
    let subjects = config.subjects.join(", ");
    format!(
        r#"Today is {date}. Search the web for the most significant news of the last {window} hours about: {subjects}.

Return between 5 and 10 distinct stories. Prefer stories reported by several independent outlets.

Each story must belong to exactly one of these categories:
{categories}

Answer with JSON only, using this shape:
{{
  "topics": [
    {{
      "title": "headline-style title",
      "summary": "3-4 sentence factual summary",
      "impact": "why it matters for businesses",
      "category": "one of the categories above",
      "publishDate": "YYYY-MM-DDTHH:MM:SSZ",
      "keywords": ["keyword", "keyword"],
      "sources": [
        {{"title": "article title", "url": "https://...", "date": "YYYY-MM-DD", "type": "media|official|research"}}
      ]
    }}
  ]
}}"#,
        date = now.format("%Y-%m-%d"),
        window = config.freshness_window_hours,
    )
}

/// Research instruction for the selected topic.
pub fn research(topic: &Topic) -> String {
    let sources = topic
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {}: {}", i + 1, s.title, s.url))
        .join("\n");
    format!(
        r#"Investigate the following story in depth.

TITLE: {title}
CATEGORY: {category}
SUMMARY: {summary}
IMPACT: {impact}

KNOWN SOURCES:
{sources}

Find the editorial angle, the key questions a decision maker would ask, hard figures (amounts,
percentages, forecasts), attributed expert quotes, the historical context and how competitors
compare. List any additional sources you used.

Answer with JSON only:
{{
  "editorialAngle": "...",
  "keyQuestions": ["..."],
  "figures": {{}},
  "quotes": [{{"author": "...", "quote": "...", "source": "..."}}],
  "historicalContext": "...",
  "competitiveAnalysis": "...",
  "additionalSources": [{{"title": "...", "url": "https://...", "date": "YYYY-MM-DD"}}]
}}"#,
        title = topic.title,
        category = topic.category,
        summary = topic.summary,
        impact = topic.impact,
    )
}

fn json_or(value: Option<&serde_json::Value>, fallback: &str) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| fallback.to_string()),
        None => fallback.to_string(),
    }
}

/// Drafting instruction. Enrichment fields fall back to generic guidance
/// when research did not run or failed.
pub fn draft(topic: &Topic, article: &ArticleConfig) -> String {
    let enrichment = topic.enrichment.as_ref();
    let angle = enrichment
        .and_then(|e| e.editorial_angle.clone())
        .unwrap_or_else(|| "Analyse the business impact and the strategic implications".to_string());
    let questions = match enrichment.map(|e| &e.key_questions) {
        Some(qs) if !qs.is_empty() => qs.iter().enumerate().map(|(i, q)| format!("{}. {q}", i + 1)).join("\n"),
        _ => "1. What is at stake?\n2. What does it change for companies?\n3. What comes next?".to_string(),
    };
    let figures = json_or(enrichment.and_then(|e| e.figures.as_ref()), "Look for amounts, percentages and forecasts");
    let quotes = json_or(enrichment.and_then(|e| e.quotes.as_ref()), "Quote experts when the sources allow it");
    let history = json_or(
        enrichment.and_then(|e| e.historical_context.as_ref()),
        "Place the story in its historical and industry context",
    );
    let competition = json_or(
        enrichment.and_then(|e| e.competitive_analysis.as_ref()),
        "Compare with similar situations, competitors and other markets",
    );
    let sources = topic
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {}: {} ({})", i + 1, s.title, s.url, s.date.as_deref().unwrap_or("n/a")))
        .join("\n");
    let keywords = if topic.keywords.is_empty() {
        "AI, artificial intelligence, business".to_string()
    } else {
        topic.keywords.join(", ")
    };

    format!(
        r#"EDITORIAL BRIEF

TOPIC: {title}
CATEGORY: {category}
SUMMARY: {summary}
BUSINESS IMPACT: {impact}

ANGLE:
{angle}

QUESTIONS TO ANSWER:
{questions}

FIGURES:
{figures}

QUOTES:
{quotes}

HISTORICAL CONTEXT:
{history}

COMPARISONS:
{competition}

SOURCES ({source_count}):
{sources}

Write an article of {min}-{max} words in Markdown. Every H2 section should run 150-300 words.
Cite sources inline as [1], [2]. Use these keywords naturally: {keywords}.

Follow this structure exactly:

# [Compelling, search-friendly title]

## {summary_heading}
[Eight lines summarising the article with its key figures]

## Introduction
[Two or three paragraphs: the striking fact, then why it matters now]

## [Main section 1]

## [Main section 2]

## [Main section 3]

## {faq_heading}

### [Specific question 1?]
[Answer]

### [Specific question 2?]
[Answer]

### [Specific question 3?]
[Answer]

## {conclusion_heading}
[Key points and outlook]

{cta} [An invitation to act]

## {references_heading}
{placeholder}"#,
        title = topic.title,
        category = topic.category,
        summary = topic.summary,
        impact = topic.impact,
        source_count = topic.sources.len(),
        min = article.min_words,
        max = article.max_words,
        summary_heading = article.summary_heading,
        faq_heading = article.faq_heading,
        conclusion_heading = article.conclusion_heading,
        cta = article.cta_marker,
        references_heading = article.references_heading,
        placeholder = SOURCES_PLACEHOLDER,
    )
}

/// Corrective instruction after a draft came back too short: the original
/// brief plus the measured deficiency and explicit expansion directives.
pub fn expansion(base: &str, words: usize, article: &ArticleConfig) -> String {
    let missing = article.min_words.saturating_sub(words);
    format!(
        "{base}\n\nIMPORTANT: your previous draft had only {words} words, {missing} short of the {min} minimum.\n\
Write the complete article again, between {min} and {max} words:\n\
- develop every H2 section to at least 200 words with three to five full paragraphs\n\
- add concrete examples, named companies and figures from the sources\n\
- add one more analysis section on risks and limits\n\
- add two more questions to the {faq} section\n\
- do not pad with repetition\n",
        min = article.min_words,
        max = article.max_words,
        faq = article.faq_heading,
    )
}

/// Ask a secondary model to turn `raw` into strict JSON for `shape`.
pub fn json_repair(shape: &str, raw: &str) -> String {
    format!(
        "The following text was meant to be a JSON {shape} but is not valid JSON. \
Rewrite it as one valid JSON object keeping every piece of information it contains. \
Answer with the JSON object only.\n\n{raw}"
    )
}

/// Editorial photograph prompt built from the article title and excerpt.
pub fn thumbnail(title: &str, excerpt: &str) -> String {
    let scene: String = excerpt.chars().take(300).collect();
    format!(
        "Editorial documentary photograph illustrating \"{title}\". Scene: {scene}. \
Natural light with authentic shadows, rich colours, sharp details, strong contrasts, \
shot on a medium-format camera with an 80mm lens, cinematic editorial style. \
No text, no logos, no recognisable faces."
    )
}

/// Fallback prompt with fewer constraints, used after a content rejection.
pub fn thumbnail_simplified(title: &str) -> String {
    format!("Professional editorial photograph, modern office or technology setting, evoking: {title}. No text.")
}
