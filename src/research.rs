//! Research stage: deepen the selected topic into an editorial dossier.
//!
//! Research is best-effort. [`enrich`] never fails; when the port call or the
//! parse fails the topic comes back untouched except for `enrichment_error`,
//! and the article is drafted from what discovery found.

use crate::api::with_backoff;
use crate::cancel::Cancellation;
use crate::config::{Config, RetryConfig};
use crate::error::{ExtractionError, StageError};
use crate::extract::{ExpectedShape, extract_or_delegate};
use crate::models::{Enrichment, Topic};
use crate::ports::{PortRequest, TextPort};
use crate::prompts;
use itertools::Itertools;
use serde_json::Value;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Wrapper keys some models put around the dossier.
const WRAPPERS: [&str; 3] = ["dossier", "dossierEditorial", "dossier_editorial"];

fn unwrap_dossier(value: Value) -> Value {
    for key in WRAPPERS {
        if let Some(inner) = value.get(key).filter(|v| v.is_object()) {
            return inner.clone();
        }
    }
    value
}

/// Call the research port and parse its dossier.
#[instrument(level = "info", skip_all, fields(title = %topic.title))]
pub async fn research<T: TextPort, R: TextPort>(
    topic: &Topic,
    port: &T,
    repair: &R,
    config: &Config,
    retry: &RetryConfig,
    cancel: &Cancellation,
) -> Result<Enrichment, StageError> {
    let t0 = Instant::now();
    let request = PortRequest::new(prompts::research(topic))
        .system(prompts::RESEARCH_SYSTEM)
        .max_tokens(config.ports.research.max_tokens)
        .json();

    let response = with_backoff(retry, "research", cancel, || port.generate(&request)).await?;
    let extracted = extract_or_delegate(&response.text, &ExpectedShape::DOSSIER, repair, retry, cancel).await?;
    let enrichment: Enrichment =
        serde_json::from_value(unwrap_dossier(extracted.value)).map_err(|e| ExtractionError::SchemaMismatch {
            shape: ExpectedShape::DOSSIER.name.to_string(),
            message: e.to_string(),
        })?;

    info!(
        tier = ?extracted.tier,
        additional_sources = enrichment.additional_sources.len(),
        key_questions = enrichment.key_questions.len(),
        tokens = response.usage.total_tokens,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Dossier parsed"
    );
    Ok(enrichment)
}

/// Merge a dossier into the topic: original fields kept, additional sources
/// appended, duplicates (same URL) dropped.
pub fn merge(mut topic: Topic, enrichment: Enrichment) -> Topic {
    let sources = std::mem::take(&mut topic.sources);
    topic.sources = sources
        .into_iter()
        .chain(enrichment.additional_sources.iter().cloned())
        .filter(|s| !s.url.trim().is_empty())
        .unique_by(|s| s.url.trim().trim_end_matches('/').to_lowercase())
        .collect();
    topic.source_count = topic.sources.len();
    topic.enrichment = Some(enrichment);
    topic.enrichment_error = None;
    topic
}

/// Research stage with degradation: always returns a topic to draft from.
pub async fn enrich<T: TextPort, R: TextPort>(
    topic: Topic,
    port: &T,
    repair: &R,
    config: &Config,
    retry: &RetryConfig,
    cancel: &Cancellation,
) -> Topic {
    match research(&topic, port, repair, config, retry, cancel).await {
        Ok(enrichment) => {
            let before = topic.sources.len();
            let merged = merge(topic, enrichment);
            info!(
                sources_before = before,
                sources_after = merged.sources.len(),
                event_kind = "topic.enriched",
                "Topic enriched"
            );
            merged
        }
        Err(e) => {
            warn!(error = %e, event_kind = "topic.enrichment_failed", "Research failed; drafting from the original topic");
            let mut topic = topic;
            topic.enrichment_error = Some(e.to_string());
            topic
        }
    }
}
