//! Illustration stage.
//!
//! The full editorial prompt goes first. A content rejection is retried once
//! with a simplified prompt; an endpoint that rejects the `aspect_ratio`
//! parameter is retried once without it.

use crate::api::with_backoff;
use crate::cancel::Cancellation;
use crate::config::{ImageConfig, RetryConfig};
use crate::error::PortError;
use crate::models::{Article, Thumbnail};
use crate::ports::{ImagePort, ImageRequest};
use crate::prompts;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// `YYYY-MM-DD-<slug>.png`, next to the article it illustrates.
pub fn thumbnail_filename(article: &Article) -> String {
    format!("{}-{}.png", article.generated_at.format("%Y-%m-%d"), article.slug)
}

async fn request_image<I: ImagePort>(
    port: &I,
    prompt: &str,
    aspect_ratio: Option<&str>,
    retry: &RetryConfig,
    cancel: &Cancellation,
) -> Result<Vec<u8>, PortError> {
    let request = ImageRequest {
        prompt: prompt.to_string(),
        aspect_ratio: aspect_ratio.map(str::to_string),
    };
    match with_backoff(retry, "illustrate", cancel, || port.illustrate(&request)).await {
        Err(PortError::Rejected { status: 400, message }) if aspect_ratio.is_some() => {
            warn!(%message, "Image endpoint rejected the request; retrying without aspect ratio");
            let minimal = ImageRequest {
                prompt: prompt.to_string(),
                aspect_ratio: None,
            };
            with_backoff(retry, "illustrate", cancel, || port.illustrate(&minimal)).await
        }
        other => other,
    }
}

/// Generate a thumbnail for `article`.
#[instrument(level = "info", skip_all, fields(slug = %article.slug))]
pub async fn illustrate<I: ImagePort>(
    article: &Article,
    port: &I,
    config: &ImageConfig,
    retry: &RetryConfig,
    cancel: &Cancellation,
) -> Result<Thumbnail, PortError> {
    if !port.is_configured() {
        return Err(PortError::Unconfigured("image port".into()));
    }
    let t0 = Instant::now();
    let aspect = (!config.aspect_ratio.is_empty()).then_some(config.aspect_ratio.as_str());

    let mut prompt = prompts::thumbnail(&article.title, &article.excerpt);
    let bytes = match request_image(port, &prompt, aspect, retry, cancel).await {
        Err(PortError::ContentRejected(reason)) => {
            warn!(%reason, "Thumbnail prompt rejected; retrying with a simplified prompt");
            prompt = prompts::thumbnail_simplified(&article.title);
            request_image(port, &prompt, aspect, retry, cancel).await?
        }
        other => other?,
    };
    if bytes.is_empty() {
        return Err(PortError::Malformed("empty image".into()));
    }

    let filename = thumbnail_filename(article);
    info!(
        %filename,
        bytes = bytes.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        event_kind = "thumbnail.generated",
        "Thumbnail generated"
    );
    Ok(Thumbnail {
        filename,
        prompt,
        bytes,
        asset_url: None,
    })
}
