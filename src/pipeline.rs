//! Pipeline orchestration.
//!
//! ```text
//! DISCOVER (validate + dedup, re-discover up to N times)
//!    -> SCORE -> gate -> RESEARCH -> DRAFT -> ILLUSTRATE -> PERSIST -> PUBLISH
//! ```
//!
//! [`Pipeline::run`] walks the stages as an explicit state machine: every
//! stage outcome maps to exactly one transition (next stage, done, stop, or
//! cancelled), and a [`PipelineReport`] is produced whichever path is taken.
//!
//! | Outcome                               | Effect                         |
//! |---------------------------------------|--------------------------------|
//! | no topics / no unique topics after N  | fatal stop                     |
//! | no topic passes the score gate        | non-fatal stop                 |
//! | research fails                        | degrade, draft unenriched      |
//! | draft fails                           | fatal stop                     |
//! | illustration fails                    | continue without thumbnail     |
//! | persistence fails                     | fatal stop                     |
//! | publish fails or is unconfigured      | success, `published = false`   |
//!
//! Each stage is also exposed on its own for the step-wise CLI commands.

use crate::article;
use crate::cancel::Cancellation;
use crate::config::Config;
use crate::discovery;
use crate::error::{AssemblyError, PortError, StageError, StoreError};
use crate::models::{Article, ScoredTopic, Thumbnail, Topic};
use crate::ports::{ArticleStore, ImagePort, PublishGateway, PublishOutcome, StoredArticle, TextPort};
use crate::research;
use crate::scoring;
use crate::thumbnail;
use crate::topics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Source of "now"; injected so runs are reproducible in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discover,
    Score,
    Research,
    Draft,
    Illustrate,
    Persist,
    Publish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discover => "discover",
            Stage::Score => "score",
            Stage::Research => "research",
            Stage::Draft => "draft",
            Stage::Illustrate => "illustrate",
            Stage::Persist => "persist",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    /// Completed with a reduced result (unenriched topic, flagged draft).
    Degraded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

/// What the report says about the produced article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub filename: String,
    pub category: String,
    pub word_count: usize,
    pub valid: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Terminal summary of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub success: bool,
    pub fatal: bool,
    pub cancelled: bool,
    pub elapsed_seconds: f64,
    pub stages: Vec<StageSummary>,
    pub article: Option<ArticleRef>,
    pub published: bool,
    pub thumbnail: Option<String>,
    pub failure_reason: Option<String>,
}

impl PipelineReport {
    fn record(&mut self, stage: Stage, status: StageStatus, detail: Option<String>, t0: Instant, attempts: u32) {
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        info!(
            stage = stage.as_str(),
            ?status,
            detail = detail.as_deref().unwrap_or(""),
            elapsed_ms,
            attempts,
            event_kind = "pipeline.stage",
            "Stage finished"
        );
        self.stages.push(StageSummary {
            stage,
            status,
            detail,
            elapsed_ms,
            attempts,
        });
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.success {
            "success"
        } else if self.cancelled {
            "cancelled"
        } else if self.fatal {
            "FAILED"
        } else {
            "stopped"
        };
        writeln!(f, "Run {outcome} in {:.1}s", self.elapsed_seconds)?;
        for s in &self.stages {
            write!(f, "  {:<11} {:<9} {:>6}ms", s.stage.as_str(), format!("{:?}", s.status), s.elapsed_ms)?;
            if let Some(detail) = &s.detail {
                write!(f, "  {detail}")?;
            }
            writeln!(f)?;
        }
        if let Some(article) = &self.article {
            writeln!(
                f,
                "Article: {} ({} words, {})",
                article.title,
                article.word_count,
                if article.valid { "valid" } else { "flagged" }
            )?;
            writeln!(f, "File:    {}", article.filename)?;
            if let Some(url) = &article.url {
                writeln!(f, "URL:     {url}")?;
            }
        }
        if let Some(thumbnail) = &self.thumbnail {
            writeln!(f, "Image:   {thumbnail}")?;
        }
        writeln!(f, "Published: {}", if self.published { "yes" } else { "no" })?;
        if let Some(reason) = &self.failure_reason {
            writeln!(f, "Reason:  {reason}")?;
        }
        Ok(())
    }
}

/// Topics that survived validation and de-duplication.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryOutcome {
    pub topics: Vec<Topic>,
    pub attempts: u32,
}

/// The four text-generation roles.
#[derive(Debug, Clone)]
pub struct TextPorts<T> {
    pub discover: T,
    pub research: T,
    pub draft: T,
    pub repair: T,
}

enum Transition {
    Next(Stage),
    Done,
    Stop { fatal: bool, reason: String },
    Cancelled,
}

#[derive(Default)]
struct RunState {
    topics: Vec<Topic>,
    selected: Option<Topic>,
    article: Option<Article>,
}

pub struct Pipeline<T, I, S, P> {
    config: Config,
    text: TextPorts<T>,
    image: I,
    store: S,
    publisher: P,
    clock: Clock,
    cancel: Cancellation,
}

impl<T, I, S, P> Pipeline<T, I, S, P>
where
    T: TextPort,
    I: ImagePort,
    S: ArticleStore,
    P: PublishGateway,
{
    pub fn new(config: Config, text: TextPorts<T>, image: I, store: S, publisher: P) -> Self {
        Self {
            config,
            text,
            image,
            store,
            publisher,
            clock: Arc::new(Utc::now),
            cancel: Cancellation::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Discover, validate and de-duplicate, asking again while nothing usable comes back.
    ///
    /// An answer without usable topics is retried at once; an answer whose
    /// topics all duplicate past articles waits `discovery.retry_delay_ms`
    /// first. Fails with [`StageError::NoTopics`] or [`StageError::NoUniqueTopics`]
    /// (whichever happened on the last attempt) once the attempt budget is spent.
    #[instrument(level = "info", skip_all)]
    pub async fn discover_unique(&self) -> Result<DiscoveryOutcome, StageError> {
        let max_attempts = self.config.discovery.max_attempts.max(1);
        let delay = Duration::from_millis(self.config.discovery.retry_delay_ms);
        let mut last = StageError::NoTopics;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let now = self.now();
            match discovery::discover(&self.text.discover, &self.config, &self.config.retry, &self.cancel, now).await {
                Err(e) => {
                    warn!(attempt, error = %e, "Discovery attempt failed");
                    last = StageError::NoTopics;
                }
                Ok(raw) => {
                    let valid = topics::validate(raw, &self.config, now);
                    if valid.is_empty() {
                        warn!(attempt, "No valid topics in discovery answer");
                        last = StageError::NoTopics;
                    } else {
                        let past = match self.store.list_past_titles().await {
                            Ok(past) => past,
                            Err(e) => {
                                warn!(error = %e, "Could not list past titles; skipping duplicate check");
                                Vec::new()
                            }
                        };
                        let unique = topics::deduplicate(valid, &past);
                        if !unique.is_empty() {
                            info!(
                                attempt,
                                unique = unique.len(),
                                event_kind = "topics.unique",
                                "Unique topics found"
                            );
                            return Ok(DiscoveryOutcome {
                                topics: unique,
                                attempts: attempt,
                            });
                        }
                        warn!(attempt, "Every discovered topic duplicates a past article");
                        last = StageError::NoUniqueTopics;
                    }
                }
            }
            let wait = matches!(last, StageError::NoUniqueTopics) && attempt < max_attempts;
            if wait && !self.cancel.sleep(delay).await {
                return Err(StageError::Cancelled);
            }
        }
        Err(last)
    }

    pub fn rank_topics(&self, topics: &[Topic]) -> Vec<ScoredTopic> {
        scoring::score_all(topics, &self.config.scoring, self.now())
    }

    pub async fn enrich(&self, topic: Topic) -> Topic {
        research::enrich(
            topic,
            &self.text.research,
            &self.text.repair,
            &self.config,
            &self.config.retry,
            &self.cancel,
        )
        .await
    }

    pub async fn draft(&self, topic: &Topic) -> Result<Article, AssemblyError> {
        article::assemble(
            topic,
            &self.text.draft,
            &self.config.article,
            &self.config.retry,
            &self.cancel,
            self.now(),
        )
        .await
    }

    pub async fn illustrate(&self, article: &Article) -> Result<Thumbnail, PortError> {
        thumbnail::illustrate(article, &self.image, &self.config.image, &self.config.retry, &self.cancel).await
    }

    pub async fn persist(&self, article: &Article) -> Result<StoredArticle, StoreError> {
        self.store.save(article).await
    }

    pub async fn publish(&self, article: &Article) -> Result<PublishOutcome, PortError> {
        if !self.publisher.is_configured() {
            return Err(PortError::Unconfigured("publish gateway".into()));
        }
        self.publisher.publish(article).await
    }

    /// Run every stage and report; never fails.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> PipelineReport {
        let started = Instant::now();
        let mut report = PipelineReport::default();
        let mut state = RunState::default();
        let mut stage = Stage::Discover;
        info!(event_kind = "pipeline.started", "Pipeline starting");

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break Transition::Cancelled;
            }
            let transition = self.step(stage, &mut state, &mut report).await;
            match transition {
                Transition::Next(next) => stage = next,
                other => break other,
            }
        };

        match outcome {
            Transition::Done => report.success = true,
            Transition::Stop { fatal, reason } => {
                report.fatal = fatal;
                report.failure_reason = Some(reason);
            }
            Transition::Cancelled => {
                report.cancelled = true;
                report.failure_reason = Some("cancelled".to_string());
            }
            Transition::Next(_) => {}
        }
        report.elapsed_seconds = started.elapsed().as_secs_f64();

        if report.fatal {
            error!(
                reason = report.failure_reason.as_deref().unwrap_or(""),
                elapsed_seconds = report.elapsed_seconds,
                event_kind = "pipeline.failed",
                "Pipeline failed"
            );
        } else {
            info!(
                success = report.success,
                published = report.published,
                reason = report.failure_reason.as_deref().unwrap_or(""),
                elapsed_seconds = report.elapsed_seconds,
                event_kind = "pipeline.completed",
                "Pipeline finished"
            );
        }
        report
    }

    async fn step(&self, stage: Stage, state: &mut RunState, report: &mut PipelineReport) -> Transition {
        let t0 = Instant::now();
        match stage {
            Stage::Discover => match self.discover_unique().await {
                Ok(found) => {
                    let detail = format!("{} unique topics", found.topics.len());
                    report.record(stage, StageStatus::Ok, Some(detail), t0, found.attempts);
                    state.topics = found.topics;
                    Transition::Next(Stage::Score)
                }
                Err(StageError::Cancelled) => Transition::Cancelled,
                Err(e) => {
                    let n = self.config.discovery.max_attempts.max(1);
                    let reason = match e {
                        StageError::NoUniqueTopics => format!("no unique topics after {n} attempts"),
                        _ => format!("no topics discovered after {n} attempts"),
                    };
                    report.record(stage, StageStatus::Failed, Some(reason.clone()), t0, n);
                    Transition::Stop { fatal: true, reason }
                }
            },

            Stage::Score => {
                let ranked = self.rank_topics(&state.topics);
                let summary = scoring::report(&ranked, self.config.scoring.min_score);
                let detail = format!(
                    "{}/{} passing, top score {}",
                    summary.passing_topics,
                    summary.total_topics,
                    summary.top_score.unwrap_or(0)
                );
                state.selected = ranked
                    .into_iter()
                    .find(|t| t.score.passes_threshold)
                    .map(|t| t.topic);
                match &state.selected {
                    Some(topic) => {
                        info!(title = %topic.title, "Selected topic");
                        report.record(stage, StageStatus::Ok, Some(detail), t0, 1);
                        Transition::Next(Stage::Research)
                    }
                    None => {
                        report.record(stage, StageStatus::Failed, Some(detail), t0, 1);
                        Transition::Stop {
                            fatal: false,
                            reason: "no topics passed threshold".to_string(),
                        }
                    }
                }
            }

            Stage::Research => {
                let Some(topic) = state.selected.take() else {
                    return Transition::Stop {
                        fatal: true,
                        reason: "no topic selected".to_string(),
                    };
                };
                let topic = self.enrich(topic).await;
                match &topic.enrichment_error {
                    Some(e) => report.record(stage, StageStatus::Degraded, Some(e.clone()), t0, 1),
                    None => report.record(stage, StageStatus::Ok, Some(format!("{} sources", topic.source_count)), t0, 1),
                }
                state.selected = Some(topic);
                Transition::Next(Stage::Draft)
            }

            Stage::Draft => {
                let Some(topic) = state.selected.as_ref() else {
                    return Transition::Stop {
                        fatal: true,
                        reason: "no topic selected".to_string(),
                    };
                };
                match self.draft(topic).await {
                    Ok(article) => {
                        let detail = format!("{} words", article.word_count);
                        let (status, detail) = if article.validation.valid {
                            (StageStatus::Ok, detail)
                        } else {
                            (
                                StageStatus::Degraded,
                                format!("{detail}; {}", article.validation.issues().join(", ")),
                            )
                        };
                        report.record(stage, status, Some(detail), t0, article.attempts);
                        state.article = Some(article);
                        Transition::Next(Stage::Illustrate)
                    }
                    Err(AssemblyError::Cancelled) => Transition::Cancelled,
                    Err(e) => {
                        let reason = format!("draft failed: {e}");
                        report.record(stage, StageStatus::Failed, Some(reason.clone()), t0, 1);
                        Transition::Stop { fatal: true, reason }
                    }
                }
            }

            Stage::Illustrate => {
                let Some(article) = state.article.as_mut() else {
                    return Transition::Stop {
                        fatal: true,
                        reason: "no article drafted".to_string(),
                    };
                };
                match self.illustrate(article).await {
                    Ok(thumb) => {
                        report.record(stage, StageStatus::Ok, Some(thumb.filename.clone()), t0, 1);
                        article.thumbnail = Some(thumb);
                    }
                    Err(PortError::Unconfigured(what)) => {
                        report.record(stage, StageStatus::Skipped, Some(format!("{what} not configured")), t0, 0);
                    }
                    Err(e) => {
                        warn!(error = %e, "Thumbnail generation failed; continuing without one");
                        report.record(stage, StageStatus::Failed, Some(e.to_string()), t0, 1);
                    }
                }
                Transition::Next(Stage::Persist)
            }

            Stage::Persist => {
                let Some(article) = state.article.as_mut() else {
                    return Transition::Stop {
                        fatal: true,
                        reason: "no article drafted".to_string(),
                    };
                };
                match self.persist(article).await {
                    Ok(stored) => {
                        article.slug = stored.slug.clone();
                        article.filename = format!("{}.md", stored.id);
                        if let Some(thumb) = article.thumbnail.as_mut() {
                            thumb.asset_url = stored.canonical_asset_url.clone();
                        }
                        report.record(stage, StageStatus::Ok, Some(article.filename.clone()), t0, 1);
                        report.thumbnail = article.thumbnail.as_ref().map(|t| t.filename.clone());
                        report.article = Some(ArticleRef {
                            id: stored.id,
                            title: article.title.clone(),
                            slug: article.slug.clone(),
                            filename: article.filename.clone(),
                            category: article.category.clone(),
                            word_count: article.word_count,
                            valid: article.validation.valid,
                            attempts: article.attempts,
                            url: None,
                        });
                        Transition::Next(Stage::Publish)
                    }
                    Err(e) => {
                        let reason = format!("persist failed: {e}");
                        report.record(stage, StageStatus::Failed, Some(reason.clone()), t0, 1);
                        Transition::Stop { fatal: true, reason }
                    }
                }
            }

            Stage::Publish => {
                let Some(article) = state.article.as_ref() else {
                    return Transition::Done;
                };
                match self.publish(article).await {
                    Ok(outcome) if outcome.success => {
                        report.published = true;
                        if let Some(r) = report.article.as_mut() {
                            r.url = outcome.url.clone();
                        }
                        report.record(stage, StageStatus::Ok, outcome.url, t0, 1);
                    }
                    Ok(_) => {
                        report.record(stage, StageStatus::Failed, Some("gateway refused the article".into()), t0, 1);
                    }
                    Err(PortError::Unconfigured(what)) => {
                        report.record(stage, StageStatus::Skipped, Some(format!("{what} not configured")), t0, 0);
                    }
                    Err(e) => {
                        warn!(error = %e, "Publishing failed; article stays local");
                        report.record(stage, StageStatus::Failed, Some(e.to_string()), t0, 1);
                    }
                }
                Transition::Done
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::tests::{now, sample_article};
    use crate::config::RetryConfig;
    use crate::ports::{ArticleEntry, ImageRequest, PortRequest, PortResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        answers: Mutex<VecDeque<Result<String, PortError>>>,
        fallback: Result<String, PortError>,
        calls: AtomicU32,
        /// Cancelled on every call, to stop a run from inside a stage.
        trips: Option<Cancellation>,
    }

    impl Scripted {
        fn always(text: &str) -> Self {
            Self {
                answers: Mutex::new(VecDeque::new()),
                fallback: Ok(text.to_string()),
                calls: AtomicU32::new(0),
                trips: None,
            }
        }

        fn failing(err: PortError) -> Self {
            Self {
                answers: Mutex::new(VecDeque::new()),
                fallback: Err(err),
                calls: AtomicU32::new(0),
                trips: None,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextPort for Scripted {
        async fn generate(&self, _request: &PortRequest) -> Result<PortResponse, PortError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(cancel) = &self.trips {
                cancel.cancel();
            }
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone()).map(PortResponse::text)
        }
    }

    impl TextPort for &Scripted {
        async fn generate(&self, request: &PortRequest) -> Result<PortResponse, PortError> {
            (**self).generate(request).await
        }
    }

    struct StubImage(Option<Vec<u8>>);

    impl ImagePort for StubImage {
        fn is_configured(&self) -> bool {
            self.0.is_some()
        }

        async fn illustrate(&self, _request: &ImageRequest) -> Result<Vec<u8>, PortError> {
            self.0.clone().ok_or_else(|| PortError::Unconfigured("image".into()))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        past: Vec<String>,
        saved: Mutex<Vec<Article>>,
        broken: bool,
    }

    impl ArticleStore for &MemoryStore {
        async fn save(&self, article: &Article) -> Result<StoredArticle, StoreError> {
            if self.broken {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.saved.lock().unwrap().push(article.clone());
            Ok(StoredArticle {
                id: article.filename.trim_end_matches(".md").to_string(),
                slug: article.slug.clone(),
                canonical_asset_url: article.thumbnail.as_ref().map(|t| format!("images/{}", t.filename)),
            })
        }

        async fn exists(&self, slug: &str) -> Result<bool, StoreError> {
            Ok(self.saved.lock().unwrap().iter().any(|a| a.slug == slug))
        }

        async fn list_past_titles(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.past.clone())
        }

        async fn list_articles(&self) -> Result<Vec<ArticleEntry>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct StubPublisher(bool);

    impl PublishGateway for StubPublisher {
        fn is_configured(&self) -> bool {
            self.0
        }

        async fn publish(&self, article: &Article) -> Result<PublishOutcome, PortError> {
            Ok(PublishOutcome {
                success: true,
                external_id: Some("item-1".to_string()),
                url: Some(format!("https://example.com/blog/{}", article.slug)),
            })
        }
    }

    const TITLES: [&str; 5] = [
        "OpenAI signs multi-gigawatt compute agreement with AMD",
        "European regulators publish guidance for general purpose models",
        "Startup raises funding for autonomous coding agents",
        "Chipmaker unveils inference accelerator for datacenters",
        "Retailers adopt conversational shopping assistants at scale",
    ];

    fn topics_json() -> String {
        let topics: Vec<serde_json::Value> = TITLES
            .iter()
            .enumerate()
            .map(|(i, title)| {
                serde_json::json!({
                    "title": title,
                    "summary": "What happened and why it matters.",
                    "impact": "Changes the competitive landscape.",
                    "category": "Finance & Investment",
                    "publishDate": "2025-10-03T06:00:00Z",
                    "keywords": ["AI"],
                    "sources": [
                        {"title": "Reuters", "url": format!("https://www.reuters.com/story-{i}")},
                        {"title": "The Verge", "url": format!("https://www.theverge.com/story-{i}")}
                    ]
                })
            })
            .collect();
        serde_json::json!({ "topics": topics }).to_string()
    }

    fn dossier_json() -> String {
        serde_json::json!({
            "editorialAngle": "Follow the compute",
            "keyQuestions": ["Who pays?"],
            "additionalSources": [{"title": "AMD IR", "url": "https://ir.amd.com/news"}]
        })
        .to_string()
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry = RetryConfig::immediate(2);
        config.discovery.retry_delay_ms = 0;
        config
    }

    struct Harness {
        discover: Scripted,
        research: Scripted,
        draft: Scripted,
        repair: Scripted,
        store: MemoryStore,
    }

    impl Harness {
        fn happy() -> Self {
            Self {
                discover: Scripted::always(&topics_json()),
                research: Scripted::always(&dossier_json()),
                draft: Scripted::always(&sample_article(1300)),
                repair: Scripted::failing(PortError::Unconfigured("repair".into())),
                store: MemoryStore::default(),
            }
        }

        fn pipeline(&self, config: Config, publisher: bool) -> Pipeline<&Scripted, StubImage, &MemoryStore, StubPublisher> {
            let text = TextPorts {
                discover: &self.discover,
                research: &self.research,
                draft: &self.draft,
                repair: &self.repair,
            };
            Pipeline::new(config, text, StubImage(Some(vec![1, 2, 3])), &self.store, StubPublisher(publisher))
                .with_clock(Arc::new(now))
        }
    }

    #[tokio::test]
    async fn test_happy_path_without_publisher() {
        let h = Harness::happy();
        let report = h.pipeline(test_config(), false).run().await;

        assert!(report.success, "{report}");
        assert!(!report.fatal);
        assert!(!report.published);
        assert!(report.failure_reason.is_none());
        assert_eq!(report.stages.len(), 7);
        assert_eq!(report.stage(Stage::Publish).map(|s| s.status), Some(StageStatus::Skipped));

        let article = report.article.as_ref().unwrap();
        assert_eq!(article.title, "OpenAI and AMD sign a compute deal");
        assert_eq!(article.filename, "2025-10-03-openai-and-amd-sign-a-compute-deal.md");
        assert!(article.valid);
        assert_eq!(report.thumbnail.as_deref(), Some("2025-10-03-openai-and-amd-sign-a-compute-deal.png"));

        assert_eq!(h.discover.calls(), 1);
        assert_eq!(h.research.calls(), 1);
        assert_eq!(h.draft.calls(), 1);
        let saved = h.store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].references.iter().any(|s| s.url == "https://ir.amd.com/news"));
    }

    #[tokio::test]
    async fn test_happy_path_publishes_when_configured() {
        let h = Harness::happy();
        let report = h.pipeline(test_config(), true).run().await;
        assert!(report.success);
        assert!(report.published);
        assert_eq!(
            report.article.as_ref().and_then(|a| a.url.as_deref()),
            Some("https://example.com/blog/openai-and-amd-sign-a-compute-deal")
        );
    }

    #[tokio::test]
    async fn test_zero_topics_is_fatal_after_three_attempts() {
        let mut h = Harness::happy();
        h.discover = Scripted::always(r#"{"topics": []}"#);
        let mut config = test_config();
        config.discovery.max_attempts = 3;

        let report = h.pipeline(config, false).run().await;
        assert!(!report.success);
        assert!(report.fatal);
        assert!(report.failure_reason.as_deref().unwrap().contains("no topics"));
        assert_eq!(h.discover.calls(), 3);
        assert_eq!(h.research.calls(), 0);
        assert_eq!(h.draft.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_discovery_is_retried_without_delay() {
        let mut h = Harness::happy();
        h.discover = Scripted::always(r#"{"topics": []}"#);
        let mut config = test_config();
        config.discovery.max_attempts = 3;
        config.discovery.retry_delay_ms = 60_000;

        let started = std::time::Instant::now();
        let report = h.pipeline(config, false).run().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.fatal);
        assert_eq!(report.failure_reason.as_deref(), Some("no topics discovered after 3 attempts"));
        assert_eq!(h.discover.calls(), 3);
    }

    #[tokio::test]
    async fn test_all_duplicates_is_fatal() {
        let mut h = Harness::happy();
        h.store.past = TITLES.iter().map(|t| format!("2025-09-01-{}.md", crate::utils::slugify_title(t))).collect();
        let mut config = test_config();
        config.discovery.max_attempts = 2;

        let report = h.pipeline(config, false).run().await;
        assert!(report.fatal);
        assert_eq!(report.failure_reason.as_deref(), Some("no unique topics after 2 attempts"));
        assert_eq!(h.discover.calls(), 2);
    }

    #[tokio::test]
    async fn test_rediscovers_after_an_empty_answer() {
        let h = Harness::happy();
        h.discover.answers.lock().unwrap().push_back(Ok(r#"{"topics": []}"#.to_string()));

        let report = h.pipeline(test_config(), false).run().await;
        assert!(report.success);
        assert_eq!(h.discover.calls(), 2);
        assert_eq!(report.stage(Stage::Discover).map(|s| s.attempts), Some(2));
    }

    #[tokio::test]
    async fn test_score_gate_stops_without_failure() {
        let h = Harness::happy();
        let mut config = test_config();
        config.scoring.min_score = 1000;

        let report = h.pipeline(config, false).run().await;
        assert!(!report.success);
        assert!(!report.fatal);
        assert_eq!(report.failure_reason.as_deref(), Some("no topics passed threshold"));
        assert_eq!(h.research.calls(), 0);
        assert_eq!(h.draft.calls(), 0);
    }

    #[tokio::test]
    async fn test_research_failure_degrades() {
        let mut h = Harness::happy();
        h.research = Scripted::failing(PortError::Auth("bad key".into()));

        let report = h.pipeline(test_config(), false).run().await;
        assert!(report.success);
        assert_eq!(report.stage(Stage::Research).map(|s| s.status), Some(StageStatus::Degraded));
        assert_eq!(h.draft.calls(), 1);
    }

    #[tokio::test]
    async fn test_draft_failure_is_fatal() {
        let mut h = Harness::happy();
        h.draft = Scripted::failing(PortError::Auth("bad key".into()));

        let report = h.pipeline(test_config(), false).run().await;
        assert!(report.fatal);
        assert!(report.failure_reason.as_deref().unwrap().starts_with("draft failed"));
        assert!(h.store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_is_fatal() {
        let mut h = Harness::happy();
        h.store.broken = true;

        let report = h.pipeline(test_config(), true).run().await;
        assert!(report.fatal);
        assert!(report.article.is_none());
        assert!(!report.published);
        assert!(report.failure_reason.as_deref().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_missing_image_port_is_skipped() {
        let h = Harness::happy();
        let text = TextPorts {
            discover: &h.discover,
            research: &h.research,
            draft: &h.draft,
            repair: &h.repair,
        };
        let pipeline = Pipeline::new(test_config(), text, StubImage(None), &h.store, StubPublisher(false))
            .with_clock(Arc::new(now));

        let report = pipeline.run().await;
        assert!(report.success);
        assert!(report.thumbnail.is_none());
        assert_eq!(report.stage(Stage::Illustrate).map(|s| s.status), Some(StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::happy();
        let pipeline = h.pipeline(test_config(), false);
        pipeline.cancellation().cancel();

        let report = pipeline.run().await;
        assert!(report.cancelled);
        assert!(!report.fatal);
        assert!(!report.success);
        assert_eq!(h.discover.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_between_stages() {
        let cancel = Cancellation::new();
        let mut h = Harness::happy();
        h.research.trips = Some(cancel.clone());
        let pipeline = h.pipeline(test_config(), true).with_cancellation(cancel);

        let report = pipeline.run().await;
        assert!(report.cancelled);
        assert!(!report.fatal);
        assert!(!report.success);
        assert!(!report.published);
        assert!(report.article.is_none());
        assert_eq!(h.research.calls(), 1);
        assert_eq!(h.draft.calls(), 0);
        assert!(h.store.saved.lock().unwrap().is_empty());
        assert!(report.stage(Stage::Draft).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_during_discovery_retry_delay() {
        let cancel = Cancellation::new();
        let mut h = Harness::happy();
        h.store.past = TITLES.iter().map(|t| format!("2025-09-01-{}.md", crate::utils::slugify_title(t))).collect();
        h.discover.trips = Some(cancel.clone());
        let mut config = test_config();
        config.discovery.max_attempts = 3;
        config.discovery.retry_delay_ms = 60_000;

        let started = std::time::Instant::now();
        let report = h.pipeline(config, false).with_cancellation(cancel).run().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.cancelled);
        assert!(!report.fatal);
        assert_eq!(h.discover.calls(), 1);
        assert_eq!(h.research.calls(), 0);
    }
}
