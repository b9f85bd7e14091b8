//! Index file management for navigation.
//!
//! `INDEX.md` in the articles directory lists every stored article, grouped
//! under the day it was generated, newest day first:
//!
//! ```text
//! # Articles Index
//!
//! - **2025-10-03**
//!     - [OpenAI and AMD sign a compute deal](./2025-10-03-openai-and-amd.md) <small>`Finance & Investment`</small>
//! - **2025-10-02**
//!     - [...](./...)
//! ```
//!
//! Updates are idempotent: writing the same article twice keeps one entry.

use crate::error::StoreError;
use crate::models::Article;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

pub const INDEX_FILE: &str = "INDEX.md";
const INDEX_HEADER: &str = "# Articles Index";

/// Insert `article` (stored as `filename`) into the index under its date.
#[instrument(level = "info", skip_all, fields(%articles_dir, file = %filename))]
pub async fn update_articles_index(articles_dir: &str, article: &Article, filename: &str) -> Result<(), StoreError> {
    let index_path = Path::new(articles_dir).join(INDEX_FILE);
    let content = match fs::read_to_string(&index_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => format!("{INDEX_HEADER}\n"),
        Err(e) => return Err(e.into()),
    };

    let date = article.generated_at.format("%Y-%m-%d").to_string();
    let date_heading = format!("- **{date}**");
    let entry = format!(
        "    - [{}](./{}) <small>`{}`</small>",
        article.title, filename, article.category
    );
    let link = format!("](./{filename})");

    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    if lines.iter().any(|l| l.contains(&link)) {
        info!("Article already indexed");
        return Ok(());
    }

    match lines.iter().position(|l| l.trim() == date_heading) {
        Some(i) => {
            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with("    - ") {
                j += 1;
            }
            lines.insert(j, entry);
        }
        None => {
            let insert_at = match lines.iter().position(|l| l.starts_with(INDEX_HEADER)) {
                Some(pos) => pos + 1,
                None => {
                    lines.insert(0, INDEX_HEADER.to_string());
                    1
                }
            };
            // newest day right under the header
            lines.insert(insert_at, String::new());
            lines.insert(insert_at + 1, date_heading);
            lines.insert(insert_at + 2, entry);
            if lines.get(insert_at + 3).is_some_and(|l| l.is_empty()) {
                lines.remove(insert_at + 3);
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(&index_path, out).await?;
    info!(path = %index_path.display(), "Updated INDEX.md");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::tests::{now, sample_article};
    use crate::article::{finish, validate_draft};
    use crate::config::ArticleConfig;
    use crate::models::Topic;
    use chrono::Duration;

    fn article(days_later: i64) -> Article {
        let text = sample_article(1300);
        let config = ArticleConfig::default();
        let topic = Topic {
            category: "Finance & Investment".to_string(),
            ..Default::default()
        };
        let report = validate_draft(&text, &config);
        finish(&topic, &text, report, 1, &config, now() + Duration::days(days_later))
    }

    #[tokio::test]
    async fn test_index_groups_by_date_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let first = article(0);
        update_articles_index(path, &first, "a.md").await.unwrap();
        update_articles_index(path, &first, "b.md").await.unwrap();
        update_articles_index(path, &first, "b.md").await.unwrap();
        let next_day = article(1);
        update_articles_index(path, &next_day, "c.md").await.unwrap();

        let index = std::fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines[0], "# Articles Index");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "- **2025-10-04**");
        assert!(lines[3].contains("](./c.md)"));
        assert_eq!(lines[4], "- **2025-10-03**");
        assert!(lines[5].contains("](./a.md)"));
        assert!(lines[6].contains("](./b.md)"));
        assert_eq!(index.matches("](./b.md)").count(), 1);
    }
}
