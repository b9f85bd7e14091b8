//! Markdown documents with a YAML front-matter block.
//!
//! ```text
//! ---
//! title: OpenAI and AMD sign a compute deal
//! slug: openai-and-amd-sign-a-compute-deal
//! ...
//! ---
//!
//! # OpenAI and AMD sign a compute deal
//! ...
//! ```

use crate::error::StoreError;
use crate::models::{Article, FrontMatter};

const FENCE: &str = "---";

/// Render the stored form of an article.
pub fn render_document(article: &Article) -> Result<String, StoreError> {
    let yaml = serde_yaml::to_string(&article.front_matter())?;
    Ok(format!("{FENCE}\n{yaml}{FENCE}\n\n{}\n", article.body.trim_end()))
}

/// Split a document into its front-matter and body. Documents without a
/// (valid) front-matter block yield `None`.
pub fn parse_document(doc: &str) -> Option<(FrontMatter, &str)> {
    let rest = doc.strip_prefix(FENCE)?.strip_prefix('\n')?;
    let end = rest.find("\n---\n")?;
    let front: FrontMatter = serde_yaml::from_str(&rest[..end]).ok()?;
    let body = rest[end + 5..].trim_start_matches('\n');
    Some((front, body))
}
