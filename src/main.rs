//! # Awful Newsroom
//!
//! Command-line entry point. Builds the HTTP-backed ports from the
//! configuration and dispatches to the pipeline, either as a whole
//! (`run-full`, `daemon`) or one step at a time (`discover`, `score`,
//! `draft`), with JSON snapshots carrying data between the steps.
//!
//! ## Usage
//!
//! ```sh
//! OPENAI_API_KEY=... awful_newsroom run-full
//! ```
//!
//! The process exits non-zero only when a run ends in a fatal outcome; a
//! topic set that fails the score gate or a skipped publish is not an error.

use awful_newsroom::api::{ChatClient, ImageClient};
use awful_newsroom::cancel::Cancellation;
use awful_newsroom::cli::{Cli, Command};
use awful_newsroom::config::Config;
use awful_newsroom::outputs::json::{DiscoverySnapshot, RankingSnapshot, SnapshotKind, read_snapshot, write_snapshot};
use awful_newsroom::pipeline::{Pipeline, PipelineReport, TextPorts};
use awful_newsroom::ports::{ArticleStore, ImagePort, PublishGateway};
use awful_newsroom::publish::CmsPublisher;
use awful_newsroom::scoring;
use awful_newsroom::store::FsArticleStore;
use awful_newsroom::utils::{ensure_writable_dir, next_run_delay, slugify_title, truncate_for_log};
use chrono::{Local, Utc};
use clap::Parser;
use itertools::Itertools;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

type Newsroom = Pipeline<ChatClient, ImageClient, FsArticleStore, CmsPublisher>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), event_kind = "application.started", "newsroom starting up");

    let args = Cli::parse();
    debug!(?args.command, config = %args.config, "Parsed CLI arguments");

    let mut config = Config::load(&args.config)?;
    if let Some(dir) = &args.articles_dir {
        config.output.articles_dir = dir.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.output.data_dir = dir.clone();
    }

    // Read-only commands need no API keys.
    match args.command {
        Command::List { limit } => return list(&config, limit).await,
        Command::Status => return status(&config).await,
        _ => {}
    }

    if let Err(e) = ensure_writable_dir(&config.output.articles_dir).await {
        error!(
            path = %config.output.articles_dir,
            error = %e,
            "Articles directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; cancelling");
            trigger.cancel();
        }
    });

    let pipeline = build(config)?.with_cancellation(cancel);
    let result = match args.command {
        Command::Discover => discover(&pipeline).await,
        Command::Score => score(&pipeline).await,
        Command::Draft { publish } => draft(&pipeline, publish).await,
        Command::RunFull { json } => run_full(&pipeline, json).await,
        Command::Daemon { run_now } => daemon(&pipeline, run_now).await,
        Command::List { .. } | Command::Status => Ok(()),
    };

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(secs = elapsed.as_secs(), event_kind = "application.completed", "Execution complete"),
        Err(e) => error!(secs = elapsed.as_secs(), error = %e, event_kind = "application.failed", "Execution failed"),
    }
    result
}

fn build(config: Config) -> Result<Newsroom, Box<dyn Error>> {
    let text = TextPorts {
        discover: ChatClient::from_config(&config.ports.discover)?,
        research: ChatClient::from_config(&config.ports.research)?,
        draft: ChatClient::from_config(&config.ports.draft)?,
        repair: ChatClient::from_config(&config.ports.repair)?,
    };
    let image = ImageClient::from_config(&config.image)?;
    if !image.is_configured() {
        warn!(env = %config.image.api_key_env, "Image port not configured; articles will have no thumbnail");
    }
    let publisher = CmsPublisher::from_config(&config.publish)?;
    if !publisher.is_configured() {
        info!("CMS publishing not configured; articles stay local");
    }
    let store = FsArticleStore::new(&config.output.articles_dir);
    Ok(Pipeline::new(config, text, image, store, publisher))
}

#[instrument(level = "info", skip_all)]
async fn discover(pipeline: &Newsroom) -> Result<(), Box<dyn Error>> {
    let found = pipeline.discover_unique().await?;
    let snapshot = DiscoverySnapshot {
        discovered_at: Utc::now(),
        attempts: found.attempts,
        topics: found.topics,
    };
    let path = write_snapshot(
        &pipeline.config().output.data_dir,
        SnapshotKind::Discovered,
        Local::now().date_naive(),
        &snapshot,
    )
    .await?;

    println!("Discovered {} unique topics ({})", snapshot.topics.len(), path.display());
    for (i, topic) in snapshot.topics.iter().enumerate() {
        println!("\n{}. {}", i + 1, topic.title);
        println!("   Category: {}", topic.category);
        println!("   Sources:  {}", topic.sources.len());
    }
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn score(pipeline: &Newsroom) -> Result<(), Box<dyn Error>> {
    let data_dir = &pipeline.config().output.data_dir;
    let today = Local::now().date_naive();
    let Some(discovered) = read_snapshot::<DiscoverySnapshot>(data_dir, SnapshotKind::Discovered, today).await? else {
        return Err("no discovered topics yet; run `discover` first".into());
    };

    let ranked = pipeline.rank_topics(&discovered.topics);
    let report = scoring::report(&ranked, pipeline.config().scoring.min_score);
    let snapshot = RankingSnapshot {
        ranked_at: Utc::now(),
        ranked,
        report,
    };
    write_snapshot(data_dir, SnapshotKind::Ranked, today, &snapshot).await?;

    let r = &snapshot.report;
    println!("{}/{} topics passed the threshold ({})", r.passing_topics, r.total_topics, r.threshold);
    println!("Average score: {:.1}", r.average_score);
    println!("\nTop topics:");
    for (i, scored) in snapshot.ranked.iter().take(5).enumerate() {
        let components = scored
            .score
            .components
            .iter()
            .map(|(name, points)| format!("{name}:{points}"))
            .join(" ");
        println!("\n{}. [{}/{}] {}", i + 1, scored.score.total, scored.score.max_possible, scored.topic.title);
        println!("   Category: {}", scored.topic.category);
        println!("   Scores:   {components}");
    }
    Ok(())
}

#[instrument(level = "info", skip_all, fields(publish = publish))]
async fn draft(pipeline: &Newsroom, publish: bool) -> Result<(), Box<dyn Error>> {
    let data_dir = &pipeline.config().output.data_dir;
    let today = Local::now().date_naive();
    let Some(ranking) = read_snapshot::<RankingSnapshot>(data_dir, SnapshotKind::Ranked, today).await? else {
        return Err("no ranked topics yet; run `score` first".into());
    };
    let Some(best) = ranking.ranked.into_iter().find(|t| t.score.passes_threshold) else {
        println!("No topic passed the threshold; nothing to draft.");
        return Ok(());
    };
    if pipeline.store().exists(&slugify_title(&best.topic.title)).await? {
        warn!(title = %best.topic.title, "An article with this slug already exists; drafting anyway");
    }

    let topic = pipeline.enrich(best.topic).await;
    if let Some(e) = &topic.enrichment_error {
        warn!(error = %e, "Research failed; drafting from the discovery data only");
    }
    let mut article = pipeline.draft(&topic).await?;
    match pipeline.illustrate(&article).await {
        Ok(thumbnail) => article.thumbnail = Some(thumbnail),
        Err(e) => warn!(error = %e, "No thumbnail for this article"),
    }
    let stored = pipeline.persist(&article).await?;
    article.slug = stored.slug;
    article.filename = format!("{}.md", stored.id);

    println!("Article written: {}", article.title);
    println!("File:       {}", article.filename);
    println!("Word count: {}", article.word_count);
    println!("Attempts:   {}", article.attempts);
    if let Some(t) = &article.thumbnail {
        println!("Thumbnail:  {}", t.filename);
    }
    let issues = article.validation.issues();
    if !issues.is_empty() {
        println!("\nValidation issues:");
        for issue in issues {
            println!("   - {issue}");
        }
    }

    if publish {
        match pipeline.publish(&article).await {
            Ok(outcome) => println!("Published: {}", outcome.url.unwrap_or_else(|| "yes".to_string())),
            Err(e) => {
                warn!(error = %e, "Publishing failed");
                println!("Not published: {}", truncate_for_log(&e.to_string(), 200));
            }
        }
    }
    Ok(())
}

fn fatal_to_error(report: &PipelineReport) -> Result<(), Box<dyn Error>> {
    if report.fatal {
        let reason = report.failure_reason.as_deref().unwrap_or("pipeline failed");
        return Err(reason.to_string().into());
    }
    Ok(())
}

async fn run_full(pipeline: &Newsroom, json: bool) -> Result<(), Box<dyn Error>> {
    let report = pipeline.run().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    fatal_to_error(&report)
}

#[instrument(level = "info", skip_all, fields(run_now = run_now))]
async fn daemon(pipeline: &Newsroom, run_now: bool) -> Result<(), Box<dyn Error>> {
    let hour = pipeline.config().schedule.hour;
    let cancel = pipeline.cancellation().clone();
    info!(hour, articles_dir = %pipeline.config().output.articles_dir, "Daemon started");

    if run_now {
        let report = pipeline.run().await;
        print!("{report}");
    }
    loop {
        let delay = next_run_delay(&Local::now(), hour);
        info!(wait_secs = delay.as_secs(), "Waiting for the next scheduled run");
        if !cancel.sleep(delay).await {
            info!("Daemon stopping");
            return Ok(());
        }
        let report = pipeline.run().await;
        print!("{report}");
        if report.cancelled {
            return Ok(());
        }
        if report.fatal {
            error!(reason = report.failure_reason.as_deref().unwrap_or(""), "Scheduled run failed; will retry tomorrow");
        }
    }
}

async fn list(config: &Config, limit: usize) -> Result<(), Box<dyn Error>> {
    let store = FsArticleStore::new(&config.output.articles_dir);
    let articles = store.list_articles().await?;
    println!("Generated articles ({}):\n", articles.len());
    if articles.is_empty() {
        println!("No articles found.");
    }
    for (i, entry) in articles.iter().take(limit).enumerate() {
        println!("{}. {}  ({})", i + 1, entry.title, entry.filename);
    }
    Ok(())
}

async fn status(config: &Config) -> Result<(), Box<dyn Error>> {
    let data_dir = &config.output.data_dir;
    let today = Local::now().date_naive();
    let discovered = read_snapshot::<DiscoverySnapshot>(data_dir, SnapshotKind::Discovered, today).await?;
    let ranked = read_snapshot::<RankingSnapshot>(data_dir, SnapshotKind::Ranked, today).await?;
    let articles = FsArticleStore::new(&config.output.articles_dir).list_articles().await?;

    println!("Newsroom status");
    println!("{}", "-".repeat(60));
    match &discovered {
        Some(d) => println!(
            "Discover: {} topics ({})",
            d.topics.len(),
            d.discovered_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Discover: not run"),
    }
    match &ranked {
        Some(r) => {
            println!(
                "Score:    {}/{} passing ({})",
                r.report.passing_topics,
                r.report.total_topics,
                r.ranked_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            );
            if let Some(title) = &r.report.top_title {
                println!("          best: {}", truncate_for_log(title, 50));
            }
        }
        None => println!("Score:    not run"),
    }
    println!("Articles: {} in {}", articles.len(), config.output.articles_dir);
    println!("{}", "-".repeat(60));

    let env_set = |name: &str| !name.is_empty() && std::env::var(name).is_ok();
    println!("Draft model:   {} ({})", config.ports.draft.model, config.ports.draft.base_url);
    println!("Discover model: {}", config.ports.discover.model);
    println!("Image port:    {}", if env_set(&config.image.api_key_env) { "configured" } else { "not configured" });
    let cms = !config.publish.api_url.is_empty() && env_set(&config.publish.api_key_env);
    println!("CMS publish:   {}", if cms { "configured" } else { "not configured" });
    println!("Schedule:      daily at {:02}:00", config.schedule.hour);
    Ok(())
}
