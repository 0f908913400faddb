//! Sumi-Ingest main entry point
//!
//! This is the command-line interface for the Sumi-Ingest pipeline.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_ingest::config::{load_config_with_hash, Config};
use sumi_ingest::fetch::HttpPageFetcher;
use sumi_ingest::output::{
    load_job_report, load_statistics, print_dead_letters, print_job_report, print_statistics,
};
use sumi_ingest::queue::{load_triggers, JobQueue};
use sumi_ingest::storage::{self, SqliteStorage, Storage};
use sumi_ingest::worker::{OutboxSink, RunMode, WorkerPool};
use sumi_ingest::{IngestError, JobStatus};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Ingest: a resilient paginated ingestion pipeline
///
/// Sumi-Ingest pages through HTTP sources under rate limits, deduplicates
/// results by fingerprint, retries transient failures with backoff and
/// isolates jobs that keep failing in a dead-letter set.
#[derive(Parser, Debug)]
#[command(name = "sumi-ingest")]
#[command(version)]
#[command(about = "A resilient paginated ingestion pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Enqueue the job trigger(s) in FILE (one object or an array) and exit
    #[arg(long, value_name = "FILE", conflicts_with_all = ["stats", "dead_letters", "job", "requeue", "drain"])]
    enqueue: Option<PathBuf>,

    /// Show queue statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dead_letters", "job", "requeue", "dry_run", "drain"])]
    stats: bool,

    /// List dead-lettered jobs and exit
    #[arg(long, conflicts_with_all = ["job", "requeue", "dry_run", "drain"])]
    dead_letters: bool,

    /// Show one job's status and attempt history and exit
    #[arg(long, value_name = "ID", conflicts_with_all = ["requeue", "dry_run", "drain"])]
    job: Option<String>,

    /// Move a dead-lettered job back to the queue and exit
    #[arg(long, value_name = "ID", conflicts_with_all = ["dry_run", "drain"])]
    requeue: Option<String>,

    /// Validate config (and triggers given with --enqueue) without side effects
    #[arg(long, conflicts_with = "drain")]
    dry_run: bool,

    /// Process until no pending or retrying job is left, then exit
    #[arg(long)]
    drain: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, cli.enqueue.as_deref())
    } else if let Some(path) = &cli.enqueue {
        handle_enqueue(&config, path)
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.dead_letters {
        handle_dead_letters(&config)
    } else if let Some(job_id) = &cli.job {
        handle_job(&config, job_id)
    } else if let Some(job_id) = &cli.requeue {
        handle_requeue(&config, job_id)
    } else {
        let mode = if cli.drain {
            RunMode::Drain
        } else {
            RunMode::Continuous
        };
        handle_run(config, mode).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_ingest=info,warn"),
            1 => EnvFilter::new("sumi_ingest=debug,info"),
            2 => EnvFilter::new("sumi_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.output.database_path);
    storage::open_storage(path)
        .with_context(|| format!("Failed to open database {}", path.display()))
}

/// Handles the --dry-run mode: validates config and optional triggers
fn handle_dry_run(config: &Config, triggers: Option<&Path>) -> anyhow::Result<()> {
    println!("=== Sumi-Ingest Dry Run ===\n");

    println!("Workers:");
    println!("  Concurrency: {}", config.worker.concurrency);
    println!(
        "  Visibility timeout: {}s",
        config.worker.visibility_timeout_secs
    );
    println!("  Job timeout: {}s", config.worker.job_timeout_secs);
    println!("  Retention: {}h", config.worker.retention_hours);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms base, {}ms cap, {:.0}% jitter",
        config.retry.base_backoff_ms,
        config.retry.max_backoff_ms,
        config.retry.jitter * 100.0
    );

    println!("\nHTTP:");
    println!("  User agent: {}", config.http.user_agent);
    println!("  Request timeout: {}s", config.http.request_timeout_secs);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Persist partial results: {}", config.output.persist_partial);

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        match source.requests_per_minute {
            Some(rpm) => println!("  - {} ({} requests/min)", source.id, rpm),
            None => println!("  - {}", source.id),
        }
    }

    println!("\n✓ Configuration is valid");

    if let Some(path) = triggers {
        let requests = load_triggers(path)
            .with_context(|| format!("Failed to read triggers from {}", path.display()))?;
        let mut invalid = 0;
        for request in &requests {
            if let Err(e) = request.pagination.validate() {
                invalid += 1;
                println!("✗ {} {}: {}", request.source_id, request.endpoint.url, e);
            }
        }
        println!(
            "✓ {} trigger(s) parsed, {} would be dead-lettered as invalid",
            requests.len(),
            invalid
        );
    }

    Ok(())
}

/// Handles the --enqueue mode: adds jobs for each trigger in a file
fn handle_enqueue(config: &Config, path: &Path) -> anyhow::Result<()> {
    let requests = load_triggers(path)
        .with_context(|| format!("Failed to read triggers from {}", path.display()))?;
    let queue = open_queue(config)?;

    for request in requests {
        let job = queue.enqueue(request)?;
        println!("{}", job.id);
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_database(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --dead-letters mode: lists dead-lettered jobs
fn handle_dead_letters(config: &Config) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    print_dead_letters(&storage.list_dead_letters()?);
    Ok(())
}

/// Handles the --job mode: shows one job's status and history
fn handle_job(config: &Config, job_id: &str) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    let report = load_job_report(&storage, job_id)?;
    print_job_report(&report);
    Ok(())
}

/// Handles the --requeue mode: returns a dead-lettered job to the queue
fn handle_requeue(config: &Config, job_id: &str) -> anyhow::Result<()> {
    let queue = open_queue(config)?;

    let job = queue
        .get_job(job_id)?
        .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))?;

    let operator_requeue =
        job.status.is_terminal() && job.status.can_transition_to(JobStatus::Pending);
    if !operator_requeue || !queue.requeue(job_id)? {
        return Err(IngestError::InvalidTransition {
            from: job.status,
            to: JobStatus::Pending,
        }
        .into());
    }

    println!("✓ Job {} requeued", job_id);
    Ok(())
}

fn open_queue(config: &Config) -> anyhow::Result<JobQueue> {
    let storage = storage::shared(open_database(config)?);
    Ok(JobQueue::new(
        storage,
        std::time::Duration::from_secs(config.worker.visibility_timeout_secs),
        std::time::Duration::from_millis(config.worker.poll_interval_ms),
    ))
}

/// Handles the main worker operation
async fn handle_run(config: Config, mode: RunMode) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let storage = storage::shared(open_database(&config)?);
    let fetcher =
        Arc::new(HttpPageFetcher::new(&config.http).context("Failed to build HTTP client")?);
    let sink = Arc::new(OutboxSink::new(storage.clone()));

    tracing::info!(
        "Workers: {}, sources: {}, database: {}",
        config.worker.concurrency,
        config.sources.len(),
        config.output.database_path
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested, releasing in-flight jobs");
                cancel.cancel();
            }
        });
    }

    let pool = WorkerPool::new(config, storage, fetcher, sink);
    match pool.run(cancel, mode).await {
        Ok(stats) => {
            tracing::info!(
                "Processed {} attempts: {} succeeded, {} duplicates, {} deferred, {} retried, {} dead-lettered",
                stats.processed,
                stats.succeeded,
                stats.duplicates,
                stats.deferred,
                stats.retried,
                stats.dead_lettered
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Worker pool failed: {}", e);
            Err(e.into())
        }
    }
}
