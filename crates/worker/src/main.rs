//! `clipchain-worker` -- runs the clip generation queue and exports videos.
//!
//! `run` (the default) drains queued clips until Ctrl-C. The clip in flight
//! is finished before the process exits. `export <video_id> [--hq]` stitches
//! one fully generated video and exits. `video`, `clip`, `queue` and
//! `requeue` edit the store a running worker reads from.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clipchain_comfyui::{ComfyUIApi, JobExecutionClient};
use clipchain_core::ffmpeg::FfmpegTools;
use clipchain_core::types::DbId;
use clipchain_db::MemoryStore;
use clipchain_events::{EventBus, StatusLogger};
use clipchain_pipeline::{ComfyClipGenerator, Exporter, JobService, Scheduler, VideoStitcher};
use clipchain_worker::cli::{self, Cli, Command, ManageCommand};
use clipchain_worker::WorkerConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "clipchain_worker=debug,clipchain_pipeline=debug,clipchain_comfyui=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Export { video_id, hq } => export(config, video_id, hq).await,
        Command::Manage(command) => manage(config, command).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Shared process state for both commands.
struct Runtime {
    store: Arc<MemoryStore>,
    events: Arc<EventBus>,
    tools: Arc<FfmpegTools>,
    /// Ends once every handle to `events` is dropped.
    logger: JoinHandle<()>,
}

async fn runtime(config: &WorkerConfig) -> anyhow::Result<Runtime> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Cannot create data dir {}", config.data_dir.display()))?;
    let store = MemoryStore::open(&config.store_file)
        .await
        .with_context(|| format!("Cannot open store {}", config.store_file.display()))?;

    let events = Arc::new(EventBus::default());
    let logger = tokio::spawn(StatusLogger::run(events.subscribe(), config.event_journal.clone()));

    Ok(Runtime {
        store: Arc::new(store),
        events,
        tools: Arc::new(FfmpegTools::new(&config.ffmpeg_bin, &config.ffprobe_bin)),
        logger,
    })
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let rt = runtime(&config).await?;

    let client = JobExecutionClient::new(ComfyUIApi::new(&config.api_url), config.execution());
    let generator = ComfyClipGenerator::new(
        client,
        config.workflow_template.clone(),
        config.generation_defaults(),
    );
    let scheduler = Scheduler::new(
        rt.store,
        Arc::new(generator),
        rt.tools,
        rt.events,
        config.data_dir.clone(),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            return;
        }
        tracing::info!("Interrupt received, finishing the current clip");
        on_signal.cancel();
    });

    tracing::info!(
        api_url = %config.api_url,
        data_dir = %config.data_dir.display(),
        template = %config.workflow_template.display(),
        "Worker starting",
    );
    scheduler.serve(cancel).await;
    tracing::info!("Worker stopped");
    Ok(())
}

async fn export(config: WorkerConfig, video_id: DbId, hq: bool) -> anyhow::Result<()> {
    let rt = runtime(&config).await?;

    let stitcher = Arc::new(VideoStitcher::new(rt.tools));
    let exporter = Exporter::new(rt.store, stitcher, rt.events, config.data_dir.clone())
        .with_wrap_around(config.wrap_around);

    let output = exporter
        .export(video_id, hq)
        .await
        .with_context(|| format!("Export of video {video_id} failed"))?;
    println!("{}", output.display());
    Ok(())
}

async fn manage(config: WorkerConfig, command: ManageCommand) -> anyhow::Result<()> {
    let rt = runtime(&config).await?;
    let jobs = JobService::new(rt.store.clone(), rt.events, config.data_dir.clone());

    let result = cli::manage(&jobs, rt.store.as_ref(), command).await;
    // Flush the status journal before exiting.
    drop(jobs);
    if let Err(e) = rt.logger.await {
        tracing::warn!(error = %e, "Status logger did not finish cleanly");
    }
    println!("{}", result?);
    Ok(())
}
