use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::commit::commit_encode;
use crate::config::EngineConfig;
use crate::notify::Notifier;
use crate::scan::{is_temp_output, scan_folder};
use crate::state::{JobStatus, StateDocument, StateStore};
use crate::transcode::{EncodeOutcome, EncodeRequest, NamingMode, Transcoder};
use crate::trash::Trash;

/// Control flags shared between the public surface and the worker task
struct RunFlags {
    running: AtomicBool,
    paused: AtomicBool,
    stop_requested: AtomicBool,
}

/// The job scheduler and worker loop.
///
/// One orchestrator is constructed by the composition root and owns the run
/// for its lifetime; `start` is a no-op while a run is active. All scanning,
/// selection, and commit logic runs on a single worker task, with at most
/// one external encode in flight. Control requests are observed within one
/// poll interval at every suspension point.
pub struct Orchestrator {
    cfg: EngineConfig,
    store: Arc<dyn StateStore>,
    transcoder: Arc<dyn Transcoder>,
    trash: Arc<dyn Trash>,
    notifier: Arc<dyn Notifier>,
    flags: Arc<RunFlags>,
}

impl Orchestrator {
    pub fn new(
        cfg: EngineConfig,
        store: Arc<dyn StateStore>,
        transcoder: Arc<dyn Transcoder>,
        trash: Arc<dyn Trash>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Orchestrator {
            cfg,
            store,
            transcoder,
            trash,
            notifier,
            flags: Arc::new(RunFlags {
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Begin a run on a background task. No-op if a run is already active.
    pub fn start(&self) {
        if self.flags.running.swap(true, Ordering::SeqCst) {
            debug!("start() ignored: a run is already active");
            return;
        }
        self.flags.stop_requested.store(false, Ordering::SeqCst);

        let worker = Worker {
            cfg: self.cfg.clone(),
            store: Arc::clone(&self.store),
            transcoder: Arc::clone(&self.transcoder),
            trash: Arc::clone(&self.trash),
            notifier: Arc::clone(&self.notifier),
            flags: Arc::clone(&self.flags),
        };
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!("Run aborted: {:#}", e);
            }
            worker.flags.running.store(false, Ordering::SeqCst);
        });
    }

    /// Block the loop at its next check point; the in-flight encode finishes
    /// and is committed normally.
    pub fn pause(&self) {
        if self.flags.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Pause requested");
    }

    /// Clear the pause flag; the loop continues from wherever it was
    pub fn resume(&self) {
        if self.flags.paused.swap(false, Ordering::SeqCst) {
            info!("Resuming");
        }
    }

    /// Request the run to unwind. An in-flight encode is cancelled within
    /// one poll interval; nothing is committed for the interrupted file.
    pub fn stop(&self) {
        if self.flags.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stop requested");
    }

    /// `stop()` plus a bounded wait for the worker to fully unwind. Returns
    /// false on timeout; the cancellation was already issued, so the worker
    /// is still guaranteed to stop eventually.
    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.stop();
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Wait for the current run to finish (naturally or after a stop)
    pub async fn wait(&self) {
        while self.is_running() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }
}

/// What became of one driven encode
enum EncodeDrive {
    Success,
    Failed(String),
    Stopped,
}

struct Worker {
    cfg: EngineConfig,
    store: Arc<dyn StateStore>,
    transcoder: Arc<dyn Transcoder>,
    trash: Arc<dyn Trash>,
    notifier: Arc<dyn Notifier>,
    flags: Arc<RunFlags>,
}

impl Worker {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.poll_interval_ms.max(1))
    }

    fn stop_requested(&self) -> bool {
        self.flags.stop_requested.load(Ordering::SeqCst)
    }

    fn paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    async fn run(&self) -> Result<()> {
        let mut doc = self.store.load().context("Failed to load state document")?;
        let job_paths: Vec<PathBuf> = doc.jobs.keys().cloned().collect();
        info!("Run starting: {} job(s)", job_paths.len());

        for job_path in job_paths {
            if self.stop_requested() {
                info!("Stop observed, unwinding before job {}", job_path.display());
                break;
            }
            match doc.jobs.get(&job_path).map(|j| j.status) {
                // Idempotent resume: finished jobs are skipped
                Some(JobStatus::Completed) => {
                    debug!("Skipping completed job: {}", job_path.display());
                    continue;
                }
                Some(_) => {}
                None => continue,
            }
            self.process_job(&mut doc, &job_path).await?;
        }

        self.notifier.stop();
        info!("Run finished");
        Ok(())
    }

    async fn process_job(&self, doc: &mut StateDocument, job_path: &Path) -> Result<()> {
        let options = doc.options.clone();
        let (folder, recursive, display) = match doc.jobs.get(job_path) {
            Some(j) => (j.folder_path.clone(), j.recursive, j.display_name.clone()),
            None => return Ok(()),
        };

        self.notifier.start(&display, "scanning");

        // A deleted or unwritable folder short-circuits the job instead of
        // failing on it run after run.
        if !folder.is_dir() {
            warn!("Folder missing, marking job complete: {}", folder.display());
            if let Some(job) = doc.jobs.get_mut(job_path) {
                job.status = JobStatus::Completed;
                job.current_file = None;
                job.error_message = Some(format!("folder missing: {}", folder.display()));
            }
            self.store.save(doc)?;
            return Ok(());
        }
        if let Err(e) = probe_writable(&folder) {
            warn!("Folder not writable ({}), marking job complete: {}", e, folder.display());
            if let Some(job) = doc.jobs.get_mut(job_path) {
                job.status = JobStatus::Completed;
                job.current_file = None;
                job.error_message = Some(format!("folder not writable: {}", e));
            }
            self.store.save(doc)?;
            return Ok(());
        }

        // Outputs are never resumed partially written; leftovers from an
        // interrupted run are restarted from scratch.
        remove_stale_temp_outputs(&folder, recursive);

        if let Some(job) = doc.jobs.get_mut(job_path) {
            job.status = JobStatus::InProgress;
            let index = scan_folder(&folder, recursive, &job.file_index, &job.compressed_paths);
            job.file_index = index;
        }
        self.store.save(doc)?;

        loop {
            if self.stop_requested() {
                return Ok(());
            }
            self.pause_gate().await;
            if self.stop_requested() {
                return Ok(());
            }

            let next = doc.jobs.get(job_path).and_then(|job| {
                job.file_index
                    .iter()
                    .find(|(p, st)| !st.compressed && !job.compressed_paths.contains(p.as_path()))
                    .map(|(p, _)| p.clone())
            });

            let source = match next {
                Some(p) => p,
                None => {
                    if let Some(job) = doc.jobs.get_mut(job_path) {
                        job.status = JobStatus::Completed;
                        job.current_file = None;
                    }
                    self.store.save(doc)?;
                    info!("Job complete: {}", display);
                    break;
                }
            };

            if let Some(job) = doc.jobs.get_mut(job_path) {
                job.current_file = Some(source.clone());
            }
            self.store.save(doc)?;

            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.to_string_lossy().into_owned());
            self.notifier
                .update(Some(&display), Some(&format!("encoding {}", file_name)));

            let naming = if options.suffix.is_empty() {
                NamingMode::TempForInPlace
            } else {
                NamingMode::Suffixed
            };
            let req = EncodeRequest {
                source: source.clone(),
                dest_dir: source
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| folder.clone()),
                naming,
                suffix: options.suffix.clone(),
                video_crf: self.cfg.video_crf,
                audio_bitrate_kbps: self.cfg.audio_bitrate_kbps,
            };
            let output = self.transcoder.output_path(&req);

            match self.drive_encode(&req, &output).await {
                EncodeDrive::Stopped => {
                    // Nothing committed; the file stays eligible and is
                    // retried on the next start().
                    info!("Encode cancelled: {}", source.display());
                    return Ok(());
                }
                EncodeDrive::Failed(detail) => {
                    warn!("Encode failed for {}: {}", source.display(), detail);
                    // Poison: mark done with its last recorded size so a
                    // reproducibly failing file never blocks the queue.
                    if let Some(job) = doc.jobs.get_mut(job_path) {
                        if let Some(entry) = job.file_index.get_mut(&source) {
                            entry.compressed = true;
                        }
                        job.error_message = Some(detail);
                    }
                    self.store.save(doc)?;
                }
                EncodeDrive::Success => {
                    let produced = std::fs::metadata(&output)
                        .map(|m| m.len() > 0)
                        .unwrap_or(false);
                    if let Some(job) = doc.jobs.get_mut(job_path) {
                        if produced {
                            commit_encode(job, &source, &output, &options, self.trash.as_ref());
                        } else {
                            warn!("Output missing or empty after encode: {}", output.display());
                            if let Some(entry) = job.file_index.get_mut(&source) {
                                entry.compressed = true;
                            }
                            job.error_message =
                                Some(format!("encode output missing or empty: {}", output.display()));
                        }
                    }
                    self.store.save(doc)?;
                    self.notifier
                        .update(Some(&display), Some(&format!("finished {}", file_name)));
                    // Only a real commit earns a cooldown; failures move on
                    self.cooldown().await;
                }
            }
        }

        Ok(())
    }

    /// Poll an in-flight encode until it finishes or a stop arrives. A pause
    /// never truncates in-flight work; only a stop cancels it.
    async fn drive_encode(&self, req: &EncodeRequest, output: &Path) -> EncodeDrive {
        let mut handle = match self.transcoder.start(req) {
            Ok(h) => h,
            Err(e) => return EncodeDrive::Failed(format!("{:#}", e)),
        };

        loop {
            if self.stop_requested() {
                handle.cancel();
                remove_partial_output(output);
                return EncodeDrive::Stopped;
            }
            match handle.try_outcome() {
                Ok(Some(EncodeOutcome::Success)) => return EncodeDrive::Success,
                Ok(Some(EncodeOutcome::Failed { detail })) => {
                    remove_partial_output(output);
                    return EncodeDrive::Failed(detail);
                }
                Ok(None) => {}
                Err(e) => {
                    handle.cancel();
                    remove_partial_output(output);
                    return EncodeDrive::Failed(format!("{:#}", e));
                }
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Block while paused, re-checking the stop flag every poll interval
    async fn pause_gate(&self) {
        while self.paused() && !self.stop_requested() {
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Bounded inter-file cooldown, preempted immediately by stop or pause
    async fn cooldown(&self) {
        let mut remaining = Duration::from_millis(self.cfg.cooldown_ms);
        let step = self.poll_interval();
        while !remaining.is_zero() {
            if self.stop_requested() || self.paused() {
                return;
            }
            let slice = remaining.min(step);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    let probe = dir.join(".compress-probe");
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

fn remove_partial_output(output: &Path) {
    if output.exists() {
        match std::fs::remove_file(output) {
            Ok(()) => debug!("Removed partial output: {}", output.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", output.display(), e),
        }
    }
}

/// Delete `<stem>.temp.<ext>` leftovers from a previous interrupted run
fn remove_stale_temp_outputs(folder: &Path, recursive: bool) {
    let mut walker = WalkDir::new(folder).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.file_type().is_file() && is_temp_output(path) {
            match std::fs::remove_file(path) {
                Ok(()) => info!("Removed stale temp output: {}", path.display()),
                Err(e) => warn!("Failed to remove stale temp {}: {}", path.display(), e),
            }
        }
    }
}
