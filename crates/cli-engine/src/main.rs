use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::Parser;
use engine::{
    state::ensure_job, EngineConfig, FfmpegTranscoder, JobStatus, JsonStateStore, LogNotifier,
    Orchestrator, StateStore, SystemTrash,
};
use log::{info, warn};

/// Unattended batch video re-encoder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder to track for compression (repeatable); folders from previous
    /// runs are kept unless --forget is given
    #[arg(short, long = "folder")]
    folders: Vec<PathBuf>,

    /// Only index the top level of each folder instead of recursing
    #[arg(long)]
    no_recursive: bool,

    /// Output name suffix; empty selects in-place replacement
    #[arg(short, long, default_value = "")]
    suffix: String,

    /// Keep originals next to suffixed outputs
    #[arg(short, long)]
    keep_original: bool,

    /// Drop all previously tracked folders and their progress before seeding
    #[arg(long)]
    forget: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    let cfg = EngineConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Compression engine starting");
    info!("  State file: {}", cfg.state_path.display());
    info!("  ffmpeg: {}", cfg.ffmpeg_bin.display());
    info!(
        "  Target: H.264 crf {}, AAC {} kbit/s",
        cfg.video_crf, cfg.audio_bitrate_kbps
    );

    let store = Arc::new(JsonStateStore::new(cfg.state_path.clone()));

    // Seed the state document with the requested folders and options
    let mut doc = store.load().context("Failed to load state")?;
    if args.forget {
        doc.jobs.clear();
        doc.options.selected_folders.clear();
    }
    doc.options.suffix = args.suffix.clone();
    doc.options.keep_original = args.keep_original;
    for folder in &args.folders {
        let folder = folder
            .canonicalize()
            .unwrap_or_else(|_| folder.clone());
        if !folder.is_dir() {
            warn!("Not a directory, skipping: {}", folder.display());
            continue;
        }
        if !doc.options.selected_folders.contains(&folder) {
            doc.options.selected_folders.push(folder.clone());
        }
        ensure_job(&mut doc, &folder, !args.no_recursive);
    }
    if doc.jobs.is_empty() {
        warn!("No folders to process; pass at least one --folder");
        return Ok(());
    }
    store.save(&doc).context("Failed to persist state")?;

    let ffmpeg_bin = cfg.ffmpeg_bin.clone();
    let orchestrator = Orchestrator::new(
        cfg,
        store.clone(),
        Arc::new(FfmpegTranscoder::new(ffmpeg_bin)),
        Arc::new(SystemTrash),
        Arc::new(LogNotifier),
    );

    orchestrator.start();

    tokio::select! {
        _ = orchestrator.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping (in-flight encode is cancelled)...");
            if !orchestrator.stop_and_wait(Duration::from_secs(30)).await {
                warn!("Worker did not unwind within 30s; cancellation was issued, exiting");
            }
        }
    }

    // Per-job summary from the persisted snapshot
    let doc = store.load()?;
    for job in doc.jobs.values() {
        let status = match job.status {
            JobStatus::NotStarted => "not started",
            JobStatus::InProgress => "in progress",
            JobStatus::Completed => "completed",
        };
        info!(
            "{}: {}, {} / {} bytes processed",
            job.display_name,
            status,
            job.processed_bytes(),
            job.total_bytes()
        );
        if let Some(err) = &job.error_message {
            warn!("{}: last error: {}", job.display_name, err);
        }
    }

    Ok(())
}
