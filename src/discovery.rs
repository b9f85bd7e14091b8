//! Topic discovery: one web-search completion, parsed into raw topics.

use crate::api::with_backoff;
use crate::cancel::Cancellation;
use crate::config::{Config, RetryConfig};
use crate::error::StageError;
use crate::extract::{ExpectedShape, extract};
use crate::models::Topic;
use crate::ports::{PortRequest, TextPort};
use crate::prompts;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Convert the elements of the `topics` array, skipping the ones that are
/// not topic-shaped at all.
pub fn topics_from_value(value: &Value) -> Vec<Topic> {
    let Some(items) = value.get("topics").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Topic>(item.clone()) {
            Ok(topic) => Some(topic),
            Err(e) => {
                warn!(error = %e, "Skipping malformed topic entry");
                None
            }
        })
        .collect()
}

/// Ask the discovery port for candidate topics.
///
/// Returns the raw, unvalidated topics. A port failure or an answer that no
/// repair tier can read is a [`StageError`]; an empty list is not.
#[instrument(level = "info", skip_all)]
pub async fn discover<T: TextPort>(
    port: &T,
    config: &Config,
    retry: &RetryConfig,
    cancel: &Cancellation,
    now: DateTime<Utc>,
) -> Result<Vec<Topic>, StageError> {
    let t0 = Instant::now();
    let request = PortRequest::new(prompts::discovery(config, now))
        .system(prompts::DISCOVERY_SYSTEM)
        .temperature(config.discovery.temperature)
        .max_tokens(config.ports.discover.max_tokens)
        .json();

    let response = with_backoff(retry, "discover", cancel, || port.generate(&request)).await?;
    let extracted = extract(&response.text, &ExpectedShape::TOPIC_LIST)?;
    let topics = topics_from_value(&extracted.value);

    info!(
        topics = topics.len(),
        tier = ?extracted.tier,
        tokens = response.usage.total_tokens,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        event_kind = "topics.discovered",
        "Discovery answer parsed"
    );
    Ok(topics)
}
