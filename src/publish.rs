//! CMS publishing gateway.
//!
//! Pushes a persisted article to a headless CMS collection over HTTP. The
//! gateway is optional: without an API URL, a collection id and an API key in
//! the environment it reports itself unconfigured and the pipeline skips the
//! publish stage.
//!
//! # Request
//!
//! ```text
//! POST {api_url}/collections/{collection_id}/items
//! Authorization: Bearer $KEY
//!
//! {"isDraft": false, "fieldData": {"name": ..., "slug": ..., "post-body": "<h2>..."}}
//! ```
//!
//! The article body is converted from Markdown to HTML with `pulldown-cmark`.

use crate::api::classify_status;
use crate::config::PublishConfig;
use crate::error::PortError;
use crate::models::Article;
use crate::ports::{PublishGateway, PublishOutcome};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Convert the article Markdown to HTML. H1 headings are dropped: the CMS
/// renders the item name as the page title. Raw HTML in the draft is escaped
/// as text.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut in_title = false;
    let events = Parser::new_ext(markdown, options).filter_map(|event| match event {
        Event::Start(Tag::Heading {
            level: HeadingLevel::H1, ..
        }) => {
            in_title = true;
            None
        }
        Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
            in_title = false;
            None
        }
        _ if in_title => None,
        Event::Html(raw) | Event::InlineHtml(raw) => Some(Event::Text(raw)),
        other => Some(other),
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct FieldData<'a> {
    name: &'a str,
    slug: &'a str,
    post_body: String,
    post_summary: &'a str,
    category: &'a str,
    reading_time: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_url: Option<String>,
    seo_title: &'a str,
    seo_description: String,
    seo_keywords: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemRequest<'a> {
    is_archived: bool,
    is_draft: bool,
    field_data: FieldData<'a>,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Clone)]
pub struct CmsPublisher {
    http: reqwest::Client,
    config: PublishConfig,
    api_key: Option<String>,
}

impl std::fmt::Debug for CmsPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmsPublisher")
            .field("api_url", &self.config.api_url)
            .field("collection_id", &self.config.collection_id)
            .finish()
    }
}

impl CmsPublisher {
    pub fn new(config: PublishConfig, api_key: Option<String>) -> Result<Self, PortError> {
        let http = reqwest::Client::builder().timeout(PUBLISH_TIMEOUT).build()?;
        Ok(Self {
            http,
            config,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Reads the API key from the variable named in the config; a missing one
    /// leaves the publisher unconfigured.
    pub fn from_config(config: &PublishConfig) -> Result<Self, PortError> {
        let api_key = (!config.api_key_env.is_empty())
            .then(|| std::env::var(&config.api_key_env).ok())
            .flatten();
        Self::new(config.clone(), api_key)
    }

    fn items_url(&self) -> String {
        format!(
            "{}/collections/{}/items",
            self.config.api_url.trim_end_matches('/'),
            self.config.collection_id
        )
    }

    fn public_url(&self, slug: &str) -> Option<String> {
        (!self.config.public_base_url.is_empty())
            .then(|| format!("{}/{slug}", self.config.public_base_url.trim_end_matches('/')))
    }

    fn thumbnail_url(&self, article: &Article) -> Option<String> {
        let asset = article.thumbnail.as_ref()?.asset_url.as_deref()?;
        if asset.starts_with("http://") || asset.starts_with("https://") {
            return Some(asset.to_string());
        }
        self.public_url(asset)
    }
}

impl PublishGateway for CmsPublisher {
    fn is_configured(&self) -> bool {
        !self.config.api_url.is_empty() && !self.config.collection_id.is_empty() && self.api_key.is_some()
    }

    #[instrument(level = "info", skip_all, fields(slug = %article.slug))]
    async fn publish(&self, article: &Article) -> Result<PublishOutcome, PortError> {
        let Some(api_key) = self.api_key.as_deref().filter(|_| self.is_configured()) else {
            return Err(PortError::Unconfigured("CMS api_url, collection_id or API key missing".into()));
        };
        let t0 = Instant::now();
        let front = article.front_matter();
        let body = ItemRequest {
            is_archived: false,
            is_draft: false,
            field_data: FieldData {
                name: &article.title,
                slug: &article.slug,
                post_body: markdown_to_html(&article.body),
                post_summary: &article.excerpt,
                category: &article.category,
                reading_time: article.reading_time_minutes,
                thumbnail_url: self.thumbnail_url(article),
                seo_title: &front.seo.title,
                seo_description: front.seo.description.clone(),
                seo_keywords: front.seo.keywords.join(", "),
            },
        };

        let response = self
            .http
            .post(self.items_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), &text);
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %err, "CMS rejected the article");
            return Err(err);
        }
        let item: ItemResponse = response.json().await?;
        let url = self.public_url(&article.slug);
        info!(
            external_id = item.id.as_deref().unwrap_or(""),
            url = url.as_deref().unwrap_or(""),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            event_kind = "article.published",
            "Article published"
        );
        Ok(PublishOutcome {
            success: true,
            external_id: item.id,
            url,
        })
    }
}
