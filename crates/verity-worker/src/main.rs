//! verity-worker: consumes AI-image-detection jobs from the queue.
//!
//! `run` exits with status 0 both on a stop signal and after the queue has
//! stayed empty long enough; a supervisor restarts it when work arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verity_core::{defaults, Classifier};
use verity_db::{Database, HttpObjectStorage, RedisQueue, StorageConfig};
use verity_inference::HttpClassifier;
use verity_jobs::{
    queue_stats, recover_in_processing, submit_job, BatchProcessor, EnqueueRequest,
    PdfReportRenderer, QueueConsumer, ResendNotifier, ShutdownSignal, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "verity-worker")]
#[command(author, version, about = "AI image detection queue worker")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume jobs until stopped or idle (default)
    Run {
        /// Skip database migrations at startup
        #[arg(long)]
        no_migrate: bool,
    },

    /// Move entries stranded in the in-processing list back to ready.
    /// Only run while no worker is consuming the queue.
    Recover,

    /// Print queue lengths
    Inspect,

    /// Create a job record, upload images, and queue the job
    Enqueue {
        /// Owner of the job
        #[arg(short, long)]
        user_id: String,

        /// Address the report link is sent to
        #[arg(short, long)]
        email: String,

        /// Storage bucket (default: STORAGE_BUCKET or "user-uploads")
        #[arg(short, long)]
        bucket: Option<String>,

        /// Image files to upload as inputs
        #[arg(required = true, num_args = 1..)]
        images: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _file_guard = init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run { no_migrate: false }) {
        Commands::Run { no_migrate } => cmd_run(no_migrate).await,
        Commands::Recover => cmd_recover().await,
        Commands::Inspect => cmd_inspect().await,
        Commands::Enqueue {
            user_id,
            email,
            bucket,
            images,
        } => cmd_enqueue(user_id, email, bucket, images).await,
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "verity=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "verity_worker=info,verity_jobs=info,verity_db=info,verity_inference=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("verity-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DATABASE_URL.to_string())
}

async fn connect_queue() -> anyhow::Result<RedisQueue> {
    RedisQueue::from_env()
        .await
        .context("Failed to connect to Redis")
}

async fn connect_database() -> anyhow::Result<Database> {
    Database::connect(&database_url())
        .await
        .context("Failed to connect to PostgreSQL")
}

/// Raise `signal` on SIGINT or SIGTERM.
async fn forward_os_signals(signal: ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
        }
    }

    signal.trigger();
}

async fn cmd_run(no_migrate: bool) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    let db = connect_database().await?;
    if !no_migrate {
        db.migrate().await.context("Failed to run migrations")?;
    }
    let queue = connect_queue().await?;

    let storage = HttpObjectStorage::new(StorageConfig::from_env()?)?;
    let classifier = HttpClassifier::from_env()?;
    let notifier = ResendNotifier::from_env()?;
    info!(
        model = classifier.model_name(),
        "Collaborators configured"
    );

    let processor = BatchProcessor::new(
        Arc::new(storage),
        Arc::new(classifier),
        Arc::new(PdfReportRenderer::new()),
        Arc::new(notifier),
    );
    let consumer = QueueConsumer::new(Arc::new(queue), Arc::new(db.jobs.clone()), processor, config);

    let signal = ShutdownSignal::new();
    let signal_task = tokio::spawn(forward_os_signals(signal.clone()));
    let handle = consumer.start(signal);

    let reason = handle.join().await?;
    signal_task.abort();
    info!(reason = %reason, "Worker exited");
    Ok(())
}

async fn cmd_recover() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    let queue = connect_queue().await?;
    let recovered = recover_in_processing(&queue, &config).await?;
    println!("Recovered {} entries", recovered);
    Ok(())
}

async fn cmd_inspect() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    let queue = connect_queue().await?;
    let stats = queue_stats(&queue, &config).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn cmd_enqueue(
    user_id: String,
    email: String,
    bucket: Option<String>,
    images: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    let request = EnqueueRequest {
        user_id,
        user_email: email,
        bucket: bucket
            .or_else(|| std::env::var("STORAGE_BUCKET").ok())
            .unwrap_or_else(|| defaults::STORAGE_BUCKET.to_string()),
    };

    let mut inputs = Vec::with_capacity(images.len());
    for path in &images {
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .with_context(|| format!("Invalid image path: {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        inputs.push((name, bytes));
    }

    let db = connect_database().await?;
    let queue = connect_queue().await?;
    let storage = HttpObjectStorage::new(StorageConfig::from_env()?)?;

    let job = submit_job(
        &queue,
        &db.jobs,
        &storage,
        &config.ready_queue,
        &request,
        inputs,
    )
    .await?;

    println!("{}", job.job_id);
    Ok(())
}
