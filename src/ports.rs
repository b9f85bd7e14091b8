//! Contracts of the external collaborators the pipeline talks to.
//!
//! # Architecture
//!
//! - [`TextPort`]: remote text generation (discovery, research, drafting and
//!   JSON repair are all instances of it)
//! - [`ImagePort`]: thumbnail generation
//! - [`ArticleStore`]: persistence gateway (articles and the past-title corpus)
//! - [`PublishGateway`]: optional CMS sync
//!
//! Implementations live in [`crate::api`], [`crate::store`] and
//! [`crate::publish`]; tests substitute in-memory stubs.

use crate::error::{PortError, StoreError};
use crate::models::Article;
use serde::{Deserialize, Serialize};
use std::future::Future;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Input of a text-generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: ResponseFormat,
}

impl PortRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortResponse {
    pub text: String,
    pub usage: Usage,
    pub model: Option<String>,
}

impl PortResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A remote text-generation service.
pub trait TextPort {
    fn generate(&self, request: &PortRequest) -> impl Future<Output = Result<PortResponse, PortError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: Option<String>,
}

/// A remote image-generation service returning encoded image bytes.
pub trait ImagePort {
    fn is_configured(&self) -> bool {
        true
    }

    fn illustrate(&self, request: &ImageRequest) -> impl Future<Output = Result<Vec<u8>, PortError>> + Send;
}

/// Result of persisting an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub id: String,
    pub slug: String,
    pub canonical_asset_url: Option<String>,
}

/// A persisted article as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleEntry {
    pub filename: String,
    pub title: String,
}

/// Durable storage for articles; also owns the corpus of past titles.
pub trait ArticleStore {
    fn save(&self, article: &Article) -> impl Future<Output = Result<StoredArticle, StoreError>> + Send;

    fn exists(&self, slug: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Titles of previously produced articles, as stored (may carry a date
    /// prefix and an extension).
    fn list_past_titles(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn list_articles(&self) -> impl Future<Output = Result<Vec<ArticleEntry>, StoreError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    pub external_id: Option<String>,
    pub url: Option<String>,
}

/// Optional CMS the article is pushed to after persistence.
pub trait PublishGateway {
    fn is_configured(&self) -> bool;

    fn publish(&self, article: &Article) -> impl Future<Output = Result<PublishOutcome, PortError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = PortRequest::new("hello")
            .system("be terse")
            .temperature(0.2)
            .max_tokens(64)
            .json();
        assert_eq!(req.prompt, "hello");
        assert_eq!(req.system.as_deref(), Some("be terse"));
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(64));
        assert_eq!(req.response_format, ResponseFormat::Json);
    }
}
