//! Filesystem persistence gateway.
//!
//! Articles are written as Markdown documents with YAML front-matter into a
//! single directory; thumbnails go into its `images/` subdirectory and every
//! save is recorded in `INDEX.md`. The filenames double as the corpus of past
//! titles used for duplicate detection.
//!
//! Two articles that slugify to the same name on the same day do not
//! overwrite each other: the second one gets a `-2` suffix, the third `-3`,
//! and so on.

use crate::error::StoreError;
use crate::models::Article;
use crate::outputs::indexes::{INDEX_FILE, update_articles_index};
use crate::outputs::markdown::{parse_document, render_document};
use crate::ports::{ArticleEntry, ArticleStore, StoredArticle};
use crate::thumbnail::thumbnail_filename;
use crate::topics::DATE_PREFIX;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

pub const IMAGES_DIR: &str = "images";

#[derive(Debug, Clone)]
pub struct FsArticleStore {
    dir: PathBuf,
}

impl FsArticleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dir_str(&self) -> String {
        self.dir.to_string_lossy().to_string()
    }

    /// Markdown filenames in the directory, newest first. A missing directory is empty.
    async fn markdown_files(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".md") && name != INDEX_FILE && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// First `slug`, `slug-2`, `slug-3`, ... whose file does not exist yet.
    async fn free_slug(&self, article: &Article) -> Result<(String, String), StoreError> {
        let date = article.generated_at.format("%Y-%m-%d");
        let mut slug = article.slug.clone();
        let mut n = 1;
        loop {
            let filename = format!("{date}-{slug}.md");
            if !fs::try_exists(self.dir.join(&filename)).await? {
                return Ok((slug, filename));
            }
            n += 1;
            slug = format!("{}-{n}", article.slug);
        }
    }
}

fn slug_of(filename: &str) -> String {
    DATE_PREFIX
        .replace(filename.trim_end_matches(".md"), "")
        .to_string()
}

impl ArticleStore for FsArticleStore {
    #[instrument(level = "info", skip_all, fields(dir = %self.dir.display(), slug = %article.slug))]
    async fn save(&self, article: &Article) -> Result<StoredArticle, StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let (slug, filename) = self.free_slug(article).await?;
        if slug != article.slug {
            warn!(original = %article.slug, %slug, "Slug already taken; suffixing");
        }
        let mut stored = article.clone();
        stored.slug = slug.clone();
        stored.filename = filename.clone();

        // the image follows the article's final slug
        let image_name = thumbnail_filename(&stored);
        let mut canonical_asset_url = None;
        if let Some(thumbnail) = stored.thumbnail.as_mut() {
            thumbnail.filename = image_name;
            let images = self.dir.join(IMAGES_DIR);
            fs::create_dir_all(&images).await?;
            fs::write(images.join(&thumbnail.filename), &thumbnail.bytes).await?;
            let rel = format!("{IMAGES_DIR}/{}", thumbnail.filename);
            thumbnail.asset_url = Some(rel.clone());
            canonical_asset_url = Some(rel);
        }

        let document = render_document(&stored)?;
        let path = self.dir.join(&filename);
        fs::write(&path, document).await?;
        update_articles_index(&self.dir_str(), &stored, &filename).await?;

        info!(
            path = %path.display(),
            words = stored.word_count,
            event_kind = "article.saved",
            "Article saved"
        );
        Ok(StoredArticle {
            id: filename.trim_end_matches(".md").to_string(),
            slug,
            canonical_asset_url,
        })
    }

    async fn exists(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.markdown_files().await?.iter().any(|name| slug_of(name) == slug))
    }

    async fn list_past_titles(&self) -> Result<Vec<String>, StoreError> {
        self.markdown_files().await
    }

    async fn list_articles(&self) -> Result<Vec<ArticleEntry>, StoreError> {
        let mut articles = Vec::new();
        for filename in self.markdown_files().await? {
            let title = match fs::read_to_string(self.dir.join(&filename)).await {
                Ok(doc) => parse_document(&doc).map(|(front, _)| front.title),
                Err(e) => {
                    warn!(%filename, error = %e, "Could not read article");
                    None
                }
            };
            let title = title.unwrap_or_else(|| slug_of(&filename).replace('-', " "));
            articles.push(ArticleEntry { filename, title });
        }
        Ok(articles)
    }
}
