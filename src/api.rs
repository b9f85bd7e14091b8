//! LLM and image API interaction with exponential backoff retry logic.
//!
//! This module provides the concrete capability ports used by the binary and
//! the retry policy the pipeline wraps around every port call.
//!
//! # Architecture
//!
//! - [`with_backoff`]: retries any port call that fails with a transient
//!   [`PortError`], sleeping according to a [`RetryConfig`]
//! - [`ChatClient`]: OpenAI-compatible `/chat/completions` client implementing
//!   [`TextPort`]
//! - [`ImageClient`]: JSON image endpoint returning a base64 image,
//!   implementing [`ImagePort`]
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * multiplier^(attempt-1), max_delay) + random_jitter(0..jitter)
//! ```
//!
//! Only rate limits, timeouts, 5xx responses and transport failures are
//! retried. Authentication failures and malformed responses fail immediately:
//! asking again would get the same answer.

use crate::cancel::Cancellation;
use crate::config::{ImageConfig, PortConfig, RetryConfig};
use crate::error::{ConfigError, PortError};
use crate::ports::{ImagePort, ImageRequest, PortRequest, PortResponse, ResponseFormat, TextPort, Usage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
///
/// # Arguments
///
/// * `policy` - Attempt budget and backoff parameters
/// * `label` - Name of the call for logging (e.g. `"discover"`)
/// * `cancel` - Interrupts backoff sleeps; the last error is returned when cancelled
/// * `op` - Produces a fresh future for every attempt
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    label: &str,
    cancel: &Cancellation,
    mut op: F,
) -> Result<T, PortError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PortError>>,
{
    let total_t0 = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let attempt_t0 = Instant::now();
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                let elapsed_ms_total = total_t0.elapsed().as_millis();

                if !e.is_transient() {
                    warn!(label, attempt, elapsed_ms_attempt, error = %e, "Port call failed permanently");
                    return Err(e);
                }
                if attempt >= max_attempts {
                    error!(
                        label,
                        attempt,
                        max = max_attempts,
                        elapsed_ms_total,
                        error = %e,
                        "Port call exhausted retries"
                    );
                    return Err(e);
                }

                let jitter_ms: u64 = if policy.jitter_ms > 0 {
                    rng().random_range(0..=policy.jitter_ms)
                } else {
                    0
                };
                let delay = policy.delay_for(attempt) + Duration::from_millis(jitter_ms);

                warn!(
                    label,
                    attempt,
                    max = max_attempts,
                    elapsed_ms_attempt,
                    elapsed_ms_total,
                    ?delay,
                    error = %e,
                    "Port call failed; backing off"
                );
                if !cancel.sleep(delay).await {
                    return Err(e);
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Map a non-success HTTP status to the port error taxonomy.
pub fn classify_status(status: u16, body: &str) -> PortError {
    let message = body.chars().take(500).collect::<String>();
    match status {
        429 => PortError::RateLimited(message),
        401 | 403 => PortError::Auth(message),
        408 | 504 => PortError::Timeout(message),
        500..=599 => PortError::Server { status, message },
        400 if message.to_lowercase().contains("content") => PortError::ContentRejected(message),
        _ => PortError::Rejected { status, message },
    }
}

/// OpenAI-compatible chat completion client.
///
/// Works against any endpoint that speaks the `/chat/completions` dialect
/// (OpenAI, Perplexity, OpenRouter, local servers).
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    default_max_tokens: Option<u32>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self, PortError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            default_max_tokens: None,
        })
    }

    /// Build a client from a port section, reading the API key from the environment.
    pub fn from_config(config: &PortConfig) -> Result<Self, ConfigError> {
        let api_key = config.api_key()?;
        let mut client = Self::new(
            &config.base_url,
            &api_key,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        )
        .map_err(|e| ConfigError::Invalid(format!("could not build HTTP client: {e}")))?;
        client.default_max_tokens = Some(config.max_tokens);
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TextPort for ChatClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn generate(&self, request: &PortRequest) -> Result<PortResponse, PortError> {
        let t0 = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens.or(self.default_max_tokens),
            response_format: match request.response_format {
                ResponseFormat::Json => Some(serde_json::json!({ "type": "json_object" })),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), &text);
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %err, "Chat completion failed");
            return Err(err);
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PortError::Malformed("response carried no message content".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            total_tokens = usage.total_tokens,
            chars = text.len(),
            "Chat completion succeeded"
        );
        Ok(PortResponse {
            text,
            usage,
            model: parsed.model,
        })
    }
}

#[derive(Debug, Serialize)]
struct ImageBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    content_violation: bool,
    #[serde(default)]
    request_id: Option<String>,
}

/// Decode a base64 image payload, tolerating a `data:` URL prefix.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, PortError> {
    let data = match payload.find("base64,") {
        Some(idx) if payload.starts_with("data:") => &payload[idx + "base64,".len()..],
        _ => payload,
    };
    STANDARD
        .decode(data.trim())
        .map_err(|e| PortError::Malformed(format!("image payload is not base64: {e}")))
}

/// Client for a JSON image-generation endpoint (`{prompt}` in, `{image}` out).
#[derive(Clone)]
pub struct ImageClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for ImageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageClient").field("endpoint", &self.endpoint).finish()
    }
}

impl ImageClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, PortError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// A missing API key yields an unconfigured client rather than an error.
    pub fn from_config(config: &ImageConfig) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        Self::new(&config.endpoint, &api_key, Duration::from_secs(config.timeout_secs))
            .map_err(|e| ConfigError::Invalid(format!("could not build HTTP client: {e}")))
    }
}

impl ImagePort for ImageClient {
    fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && !self.api_key.is_empty()
    }

    #[instrument(level = "info", skip_all)]
    async fn illustrate(&self, request: &ImageRequest) -> Result<Vec<u8>, PortError> {
        if !self.is_configured() {
            return Err(PortError::Unconfigured("image endpoint or API key missing".into()));
        }
        let body = ImageBody {
            prompt: &request.prompt,
            aspect_ratio: request.aspect_ratio.as_deref(),
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let parsed: ImageResponse = response.json().await?;
        if parsed.content_violation {
            return Err(PortError::ContentRejected(format!(
                "request {} flagged as content violation",
                parsed.request_id.unwrap_or_default()
            )));
        }
        let payload = parsed
            .image
            .ok_or_else(|| PortError::Malformed("no image data in response".into()))?;
        decode_image(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_backoff_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryConfig::immediate(3);
        let result = with_backoff(&policy, "test", &Cancellation::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(PortError::RateLimited("429".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryConfig::immediate(5);
        let result: Result<(), _> = with_backoff(&policy, "test", &Cancellation::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PortError::Auth("bad key".into())) }
        })
        .await;
        assert!(matches!(result, Err(PortError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryConfig::immediate(4);
        let result: Result<(), _> = with_backoff(&policy, "test", &Cancellation::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PortError::Timeout("slow".into())) }
        })
        .await;
        assert!(matches!(result, Err(PortError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, ""), PortError::RateLimited(_)));
        assert!(matches!(classify_status(401, ""), PortError::Auth(_)));
        assert!(matches!(classify_status(503, ""), PortError::Server { status: 503, .. }));
        assert!(matches!(
            classify_status(400, "Content policy violation"),
            PortError::ContentRejected(_)
        ));
        assert!(matches!(classify_status(404, "nope"), PortError::Rejected { status: 404, .. }));
    }

    #[test]
    fn test_decode_image_with_data_url() {
        let encoded = STANDARD.encode(b"png-bytes");
        assert_eq!(decode_image(&encoded).unwrap(), b"png-bytes");
        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_image(&data_url).unwrap(), b"png-bytes");
        assert!(decode_image("%%%").is_err());
    }

    #[test]
    fn test_unconfigured_image_client() {
        let client = ImageClient::new("https://images.example.com", "", Duration::from_secs(5)).unwrap();
        assert!(!client.is_configured());
    }
}
