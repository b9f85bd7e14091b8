//! Utility functions for string manipulation and file system checks.
//!
//! This module provides helpers used throughout the application:
//! - String truncation for logging and error context
//! - Slugification for filenames and URLs
//! - JSON error detection for handling LLM response truncation
//! - File system validation for output directories
//! - Delay until the next scheduled daily run

use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
use std::error::Error;
use std::fs as stdfs;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` bytes (at a character boundary) with an
/// ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// First and last `n` characters of `s`, joined by ` … ` when they would overlap.
///
/// Used to attach context to extraction failures without dumping megabytes
/// of model output into the logs.
pub fn head_tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n * 2 {
        return s.to_string();
    }
    let head: String = s.chars().take(n).collect();
    let tail: String = s.chars().skip(count - n).collect();
    format!("{head} … {tail}")
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Map common Latin diacritics to their ASCII base letter.
fn fold_diacritic(c: char) -> Option<&'static str> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'ß' => "ss",
        _ => return None,
    })
}

/// Convert a title to a URL-friendly slug.
///
/// Lowercases the text, folds accented letters to ASCII, drops any other
/// special character and joins words with single hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// assert_eq!(slugify_title("Régulation & Éthique"), "regulation-ethique");
/// ```
pub fn slugify_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if let Some(folded) = fold_diacritic(c) {
            slug.push_str(folded);
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Truncate a slug to at most `max` bytes without leaving a dangling hyphen.
pub fn truncate_slug(slug: &str, max: usize) -> String {
    // Slugs are ASCII, so byte slicing is safe.
    let cut = if slug.len() > max { &slug[..max] } else { slug };
    cut.trim_end_matches('-').to_string()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Time left until the next `hour:00` in `now`'s time zone; a run exactly at
/// `hour:00` is scheduled for the following day.
pub fn next_run_delay<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Duration {
    let today = now.date_naive();
    let next = [today, today + ChronoDuration::days(1), today + ChronoDuration::days(2)]
        .into_iter()
        .filter_map(|day| day.and_hms_opt(hour, 0, 0))
        .filter_map(|naive| naive.and_local_timezone(now.timezone()).earliest())
        .find(|at| at > now);
    next.and_then(|at| (at - now.clone()).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}
